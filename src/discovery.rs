//! Discovery reply parsing and the bounded device table

use crate::at_command::{reply, trim_control, ADDRESS_LENGTH};
use crate::config::MAX_DEVICES;
use heapless::String;

/// Longest device name kept
pub const MAX_DEVICE_NAME: usize = 31;

/// RSSI reported when the reply carries none
pub const RSSI_UNKNOWN: i8 = -127;

/// A remote device seen during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: String<ADDRESS_LENGTH>,
    pub name: String<MAX_DEVICE_NAME>,
    pub rssi: i8,
    pub valid: bool,
}

impl DiscoveredDevice {
    pub const EMPTY: Self = Self {
        address: String::new(),
        name: String::new(),
        rssi: RSSI_UNKNOWN,
        valid: false,
    };
}

impl Default for DiscoveredDevice {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Vendor reply shapes, tried in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyShape {
    /// `OK+DISC:<addr>[:<name>][:<rssi>]`
    Disc,
    /// `OK+DIS<x>:<addr>[:<name>][:<rssi>]`
    DisIndexed,
}

const SHAPES: [(ReplyShape, &str); 2] = [
    (ReplyShape::Disc, reply::DISCOVERY),
    (ReplyShape::DisIndexed, reply::DISCOVERY_INDEXED),
];

/// Fields of the record, i.e. everything after the marker
fn record_fields(line: &str) -> Option<&str> {
    SHAPES.iter().find_map(|&(shape, marker)| {
        let start = line.find(marker)? + marker.len();
        let rest = &line[start..];
        match shape {
            ReplyShape::Disc => Some(rest),
            ReplyShape::DisIndexed => rest.find(':').map(|colon| &rest[colon + 1..]),
        }
    })
}

/// Heuristic for a lone second field: a sign or a digit means RSSI, anything else a name
fn looks_like_rssi(field: &str) -> bool {
    field
        .chars()
        .next()
        .is_some_and(|c| c == '+' || c == '-' || c.is_ascii_digit())
}

/// Leading signed decimal, saturated to the i8 range
fn parse_rssi(field: &str) -> i8 {
    let field = trim_control(field);
    let (negative, digits) = match field.as_bytes().first() {
        Some(b'-') => (true, &field[1..]),
        Some(b'+') => (false, &field[1..]),
        _ => (false, field),
    };
    let digits_end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if digits_end == 0 {
        return RSSI_UNKNOWN;
    }
    let magnitude = digits[..digits_end]
        .bytes()
        .fold(0i32, |acc, d| (acc * 10 + (d - b'0') as i32).min(1000));
    let value = if negative { -magnitude } else { magnitude };
    value.clamp(i8::MIN as i32, i8::MAX as i32) as i8
}

fn truncated<const N: usize>(value: &str) -> String<N> {
    let mut out = String::new();
    for c in value.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// Parse one line of a discovery reply
///
/// Lines without a known marker, or whose address holds fewer than 12 hex
/// digits, come back with `valid == false`. Longer addresses are truncated to
/// their first 12 digits.
pub fn parse_discovery_line(line: &str) -> DiscoveredDevice {
    let Some(fields) = record_fields(line) else {
        return DiscoveredDevice::EMPTY;
    };

    let mut parts = fields.splitn(3, ':');
    let address = trim_control(parts.next().unwrap_or_default());
    if address.len() < ADDRESS_LENGTH
        || !address.as_bytes()[..ADDRESS_LENGTH]
            .iter()
            .all(u8::is_ascii_hexdigit)
    {
        return DiscoveredDevice::EMPTY;
    }

    let mut device = DiscoveredDevice {
        address: truncated(&address[..ADDRESS_LENGTH]),
        valid: true,
        ..DiscoveredDevice::EMPTY
    };

    match (parts.next(), parts.next()) {
        (Some(name), Some(rssi)) => {
            device.name = truncated(trim_control(name));
            device.rssi = parse_rssi(rssi);
        }
        (Some(second), None) => {
            let second = trim_control(second);
            if looks_like_rssi(second) {
                device.rssi = parse_rssi(second);
            } else {
                device.name = truncated(second);
            }
        }
        _ => {}
    }

    device
}

/// Fixed-capacity table of devices found by the latest scan
pub struct DeviceTable {
    entries: [DiscoveredDevice; MAX_DEVICES],
    count: usize,
    overflow_count: u16,
}

impl DeviceTable {
    pub const fn new() -> Self {
        Self {
            entries: [DiscoveredDevice::EMPTY; MAX_DEVICES],
            count: 0,
            overflow_count: 0,
        }
    }

    /// Invalidate every entry and reset both counters
    pub fn clear(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.valid = false;
        }
        self.count = 0;
        self.overflow_count = 0;
    }

    /// Store a valid device, or count it as overflow when the table is full
    pub fn record(&mut self, device: DiscoveredDevice) -> bool {
        if !device.valid {
            return false;
        }
        if self.count < MAX_DEVICES {
            self.entries[self.count] = device;
            self.count += 1;
            true
        } else {
            self.overflow_count = self.overflow_count.saturating_add(1);
            false
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn overflow_count(&self) -> u16 {
        self.overflow_count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.entries[..self.count]
    }

    pub fn find(&self, address: &str) -> Option<&DiscoveredDevice> {
        self.devices()
            .iter()
            .find(|device| device.address.eq_ignore_ascii_case(address))
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new()
    }
}

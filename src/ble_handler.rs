//! AT-command engine for the UART-attached BLE module
//!
//! Every operation is a blocking command/response exchange. Nothing here
//! returns an error to the caller: failures are logged and reported as a
//! sentinel (`false`, `None`, `Role::Unknown` or a non-`Ok` outcome).

use crate::at_command::{
    action, contains, find, query, reply, set, trim_control, trim_trailing_bytes, utf8_prefix,
    CommandOutcome,
    Response, ADDRESS_LENGTH, BAUD_RATES, COMMAND_CAPACITY, CONNECT_COMMAND_CAPACITY,
    CONNECT_TIMEOUT_MS, DEFAULT_TIMEOUT_MS, MAX_NAME_LENGTH, NEWLINE, POWER_UP_DELAY_MS,
    RESPONSE_POLL_DELAY_MS, RESPONSE_TRAILING_DELAY_MS, ROLE_CHANGE_DELAY_MS, SCAN_MARGIN_MS,
    SERIAL_REINIT_DELAY_MS, TEST,
};
use crate::discovery::{parse_discovery_line, DeviceTable, DiscoveredDevice};
use crate::panel::{ActivitySink, Component};
use crate::role::{role_from_reply, Role, RoleEvent, RoleMachine};
use crate::{Clock, FeederError};
use core::fmt::Write as _;
use embassy_time::Duration;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_io::{ErrorType, Read, ReadReady, Write};
use heapless::{String, Vec};
use log::{debug, error, info, warn};

/// Serial link to the module
///
/// A byte stream that can also be re-clocked, which the baud probe needs.
pub trait AtSerial: Read + Write + ReadReady {
    fn set_baud_rate(&mut self, baud: u32) -> Result<(), <Self as ErrorType>::Error>;
}

/// Byte count shown on the panel gauge, clamped to 1..=255
fn gauge_count(len: usize) -> u8 {
    len.clamp(1, u8::MAX as usize) as u8
}

/// An `OK` or `ERROR` ends a plain exchange
fn plain_reply_complete(bytes: &[u8]) -> bool {
    contains(bytes, reply::OK.as_bytes()) || contains(bytes, reply::ERROR.as_bytes())
}

/// Bytes following each `OK+CONN` marker, `None` when the marker ends the buffer
fn connect_suffixes(bytes: &[u8]) -> impl Iterator<Item = Option<u8>> + '_ {
    let marker = reply::CONNECTED.as_bytes();
    bytes
        .windows(marker.len())
        .enumerate()
        .filter(move |(_, window)| *window == marker)
        .map(move |(i, _)| bytes.get(i + marker.len()).copied())
}

/// A connect exchange ends on a final connect reply or `ERROR`
///
/// `OK+CONNA` only acknowledges the attempt and keeps the exchange open.
fn connect_reply_complete(bytes: &[u8]) -> bool {
    contains(bytes, reply::ERROR.as_bytes()) || connect_suffixes(bytes).any(|next| next != Some(b'A'))
}

/// `OK+CONN` that is neither the pending ack nor a failure
fn connect_succeeded(bytes: &[u8]) -> bool {
    if contains(bytes, reply::CONNECT_FAILED.as_bytes())
        || contains(bytes, reply::CONNECT_ERROR.as_bytes())
    {
        return false;
    }
    connect_suffixes(bytes).any(|next| !matches!(next, Some(b'A' | b'E' | b'F')))
}

fn is_valid_address(address: &str) -> bool {
    address.len() == ADDRESS_LENGTH && address.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Records on one raw reply line
///
/// Some firmwares emit discovery records back to back without a line
/// break, so a line is further cut in front of every `OK+DIS` marker.
/// Cutting happens on bytes: a name that is not UTF-8 stays inside its
/// own record.
fn discovery_records(line: &[u8]) -> impl Iterator<Item = &[u8]> {
    let marker = reply::DISCOVERY_INDEXED.as_bytes();
    let mut rest = find(line, marker).map(|i| &line[i..]);
    core::iter::from_fn(move || {
        let current = rest?;
        match find(&current[marker.len()..], marker) {
            Some(next) => {
                let split = marker.len() + next;
                rest = Some(&current[split..]);
                Some(&current[..split])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
}

/// AT protocol engine
///
/// Owns the serial link, the device table and the role state machine. The
/// panel is reached only through `sink`.
pub struct BleHandler<S, T, A, EN, ST> {
    serial: S,
    timer: T,
    sink: A,
    enable_pin: EN,
    state_pin: ST,
    roles: RoleMachine,
    devices: DeviceTable,
    baud_rate: u32,
}

impl<S, T, A, EN, ST> BleHandler<S, T, A, EN, ST>
where
    S: AtSerial,
    T: Clock + DelayNs,
    A: ActivitySink,
    EN: OutputPin,
    ST: InputPin,
{
    pub fn new(serial: S, timer: T, sink: A, enable_pin: EN, state_pin: ST, baud_rate: u32) -> Self {
        Self {
            serial,
            timer,
            sink,
            enable_pin,
            state_pin,
            roles: RoleMachine::new(),
            devices: DeviceTable::new(),
            baud_rate,
        }
    }

    /// Module off, serial at the configured baud, Bluetooth node shown
    pub fn init(&mut self) {
        if self.enable_pin.set_low().is_err() {
            error!("[BLE] Failed to drive enable pin");
        }
        if self.serial.set_baud_rate(self.baud_rate).is_err() {
            error!("[BLE] Failed to configure serial at {} baud", self.baud_rate);
        }
        self.sink.enable(Component::Bluetooth);
        info!("[BLE] Handler ready at {} baud", self.baud_rate);
    }

    /// Power the module up
    pub fn enable(&mut self) {
        if self.enable_pin.set_high().is_err() {
            error!("[BLE] Failed to drive enable pin");
        }
        self.timer.delay_ms(POWER_UP_DELAY_MS);
        self.sink.enable(Component::Bluetooth);
    }

    /// Power the module down
    pub fn disable(&mut self) {
        if self.enable_pin.set_low().is_err() {
            error!("[BLE] Failed to drive enable pin");
        }
        self.sink.disable(Component::Bluetooth);
    }

    /// Link state as reported by the module's state pin
    pub fn is_connected(&mut self) -> bool {
        let connected = match self.state_pin.is_high() {
            Ok(level) => level,
            Err(_) => {
                error!("[BLE] Failed to read state pin");
                false
            }
        };
        self.sink.activity(Component::Bluetooth, connected);
        connected
    }

    /// Raw write to a connected peer, true when every byte went out
    pub fn send(&mut self, data: &[u8]) -> bool {
        self.sink.activity(Component::Bluetooth, true);
        let sent = self
            .serial
            .write_all(data)
            .and_then(|()| self.serial.flush())
            .is_ok();
        self.sink
            .data_transmission(Component::Bluetooth, gauge_count(data.len()));
        self.sink.activity(Component::Bluetooth, false);
        if !sent {
            error!("[BLE] Failed to send {} bytes", data.len());
        }
        sent
    }

    /// Read whatever the peer has sent so far into `buf`
    pub fn receive(&mut self, buf: &mut [u8]) -> usize {
        self.sink.activity(Component::Bluetooth, true);
        let mut received = 0;
        while received < buf.len() && matches!(self.serial.read_ready(), Ok(true)) {
            match self.serial.read(&mut buf[received..]) {
                Ok(0) => break,
                Ok(n) => received += n,
                Err(_) => {
                    error!("[BLE] Serial read failed");
                    break;
                }
            }
        }
        if received > 0 {
            self.sink
                .data_transmission(Component::Bluetooth, gauge_count(received));
        }
        self.sink.activity(Component::Bluetooth, false);
        received
    }

    /// Send one AT command and collect the reply until `OK`/`ERROR` or inactivity
    pub fn send_command(&mut self, command: &str, timeout_ms: u64) -> Response {
        self.exchange(command, timeout_ms, plain_reply_complete)
    }

    /// Like [`Self::send_command`] but the exchange only ends on `terminator` (or `ERROR`)
    pub fn send_command_until(&mut self, command: &str, timeout_ms: u64, terminator: &str) -> Response {
        self.exchange(command, timeout_ms, |bytes: &[u8]| {
            contains(bytes, terminator.as_bytes()) || contains(bytes, reply::ERROR.as_bytes())
        })
    }

    fn exchange<F>(&mut self, command: &str, timeout_ms: u64, complete: F) -> Response
    where
        F: Fn(&[u8]) -> bool,
    {
        self.drain_input();

        debug!("[BLE] > {}", trim_control(command));
        if let Err(e) = self.write_line(command) {
            error!("[BLE] Failed to write '{}': {}", trim_control(command), e);
            return Response::empty(CommandOutcome::Timeout);
        }
        self.sink.activity(Component::Bluetooth, true);

        let mut response = Response::empty(CommandOutcome::Timeout);
        let mut overflowed = false;
        let timeout = Duration::from_millis(timeout_ms);
        let mut last_activity = self.timer.now();

        loop {
            if self.read_available(&mut response.bytes, &mut overflowed) > 0 {
                last_activity = self.timer.now();
            }

            if complete(&response.bytes) {
                // late bytes of the same reply
                self.timer.delay_ms(RESPONSE_TRAILING_DELAY_MS);
                self.read_available(&mut response.bytes, &mut overflowed);
                break;
            }

            let idle = self
                .timer
                .now()
                .checked_duration_since(last_activity)
                .unwrap_or(Duration::from_ticks(0));
            if idle >= timeout {
                break;
            }
            self.timer.delay_ms(RESPONSE_POLL_DELAY_MS);
        }

        response.outcome = CommandOutcome::classify(&response.bytes);
        if !response.bytes.is_empty() {
            self.sink
                .data_transmission(Component::Bluetooth, gauge_count(response.bytes.len()));
        }
        debug!(
            "[BLE] < {} ({:?})",
            trim_control(response.text()),
            response.outcome
        );
        response
    }

    fn write_line(&mut self, command: &str) -> Result<(), FeederError> {
        let write = |serial: &mut S| -> Result<(), <S as ErrorType>::Error> {
            serial.write_all(command.as_bytes())?;
            if !command.ends_with(NEWLINE) {
                serial.write_all(NEWLINE.as_bytes())?;
            }
            serial.flush()
        };
        write(&mut self.serial).map_err(|_| FeederError::SerialError)
    }

    /// Discard anything left over from a previous exchange
    fn drain_input(&mut self) {
        let mut scratch = [0u8; 64];
        let mut discarded = 0usize;
        while matches!(self.serial.read_ready(), Ok(true)) {
            match self.serial.read(&mut scratch) {
                Ok(0) | Err(_) => break,
                Ok(n) => discarded += n,
            }
        }
        if discarded > 0 {
            debug!("[BLE] Dropped {} stale bytes", discarded);
        }
    }

    /// Append everything currently buffered by the UART, returns bytes read
    fn read_available<const N: usize>(&mut self, bytes: &mut Vec<u8, N>, overflowed: &mut bool) -> usize {
        let mut chunk = [0u8; 64];
        let mut received = 0;
        while matches!(self.serial.read_ready(), Ok(true)) {
            let n = match self.serial.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => {
                    error!("[BLE] Serial read failed");
                    break;
                }
            };
            received += n;
            for &byte in &chunk[..n] {
                if bytes.push(byte).is_err() && !*overflowed {
                    *overflowed = true;
                    warn!("[BLE] Response exceeds {} bytes, truncating", N);
                }
            }
        }
        received
    }

    /// Bare `AT` liveness probe
    pub fn test_connection(&mut self) -> CommandOutcome {
        let response = self.send_command(TEST, DEFAULT_TIMEOUT_MS);
        let outcome = CommandOutcome::classify(trim_trailing_bytes(&response.bytes));
        if outcome != CommandOutcome::Ok {
            warn!("[BLE] Module did not answer AT: {:?}", outcome);
        }
        outcome
    }

    /// Probe the supported baud rates until the module answers `AT`
    pub fn detect_baud_rate(&mut self) -> Option<u32> {
        for baud in BAUD_RATES {
            info!("[BLE] Trying {} baud", baud);
            if self.serial.set_baud_rate(baud).is_err() {
                warn!("[BLE] Could not switch serial to {} baud", baud);
                continue;
            }
            self.timer.delay_ms(SERIAL_REINIT_DELAY_MS);

            if self.test_connection() == CommandOutcome::Ok {
                info!("[BLE] Module answers at {} baud", baud);
                self.baud_rate = baud;
                return Some(baud);
            }
        }

        error!("[BLE] No supported baud rate answered");
        None
    }

    /// Ask the module for its role
    pub fn get_role(&mut self) -> Role {
        let response = self.send_command(query::ROLE, DEFAULT_TIMEOUT_MS);
        match role_from_reply(response.text()) {
            Some(role) => {
                self.roles.handle_event(RoleEvent::Confirmed(role));
                role
            }
            None => {
                warn!(
                    "[BLE] Unrecognised role reply: '{}'",
                    trim_control(response.text())
                );
                self.roles.handle_event(RoleEvent::QueryFailed);
                Role::Unknown
            }
        }
    }

    /// Switch the module role, true once the module confirmed it
    pub fn set_role(&mut self, role: Role) -> bool {
        let (Some(command), Some(echo)) = (role.set_command(), role.set_echo()) else {
            warn!("[BLE] Refusing to set role {:?}", role);
            return false;
        };

        let response = self.send_command(command, DEFAULT_TIMEOUT_MS);
        if !(response.is_ok() || response.contains(echo)) {
            error!(
                "[BLE] Failed to set role {:?}: {:?}",
                role, response.outcome
            );
            self.roles.handle_event(RoleEvent::QueryFailed);
            return false;
        }

        self.roles.handle_event(RoleEvent::Confirmed(role));
        self.timer.delay_ms(ROLE_CHANGE_DELAY_MS);
        true
    }

    /// Discover nearby devices for about `timeout_ms`, true when any was found
    pub fn start_scan(&mut self, timeout_ms: u64) -> bool {
        if !self.roles.is_central() {
            warn!("[BLE] Scan needs central role, switching");
            if !self.set_role(Role::Central) {
                error!("[BLE] Scan aborted: could not switch to central");
                return false;
            }
        }

        self.devices.clear();
        info!("[BLE] Scanning for {} ms", timeout_ms);

        let response = self.send_command_until(
            action::DISCOVER,
            timeout_ms + SCAN_MARGIN_MS,
            reply::DISCOVERY_END,
        );
        if response.outcome == CommandOutcome::Error {
            error!("[BLE] Module rejected discovery");
        }

        for line in response.bytes.split(|&b| b == b'\r' || b == b'\n') {
            for record in discovery_records(line) {
                let device = parse_discovery_line(utf8_prefix(record));
                if !device.valid {
                    continue;
                }
                debug!(
                    "[BLE] Found {} '{}' {} dBm",
                    device.address.as_str(),
                    device.name.as_str(),
                    device.rssi
                );
                if !self.devices.record(device) {
                    warn!("[BLE] Device table full, dropping record");
                }
            }
        }

        info!(
            "[BLE] Scan done: {} devices, {} dropped",
            self.devices.count(),
            self.devices.overflow_count()
        );
        self.devices.count() > 0
    }

    /// Connect to the device with the given 12 hex digit address
    pub fn connect_to_device(&mut self, address: &str) -> bool {
        if !self.roles.is_central() {
            error!("[BLE] Connect needs central role, current {:?}", self.roles.current());
            return false;
        }
        if !is_valid_address(address) {
            error!("[BLE] {}: '{}'", FeederError::InvalidAddress, address);
            return false;
        }

        let mut command: String<CONNECT_COMMAND_CAPACITY> = String::new();
        if write!(command, "{}{}{}", action::CONNECT, address, NEWLINE).is_err() {
            error!("[BLE] Connect command does not fit");
            return false;
        }

        match self.devices.find(address) {
            Some(device) => info!(
                "[BLE] Connecting to {} '{}' ({} dBm)",
                address,
                device.name.as_str(),
                device.rssi
            ),
            None => info!("[BLE] Connecting to {} (not seen in last scan)", address),
        }
        let response = self.exchange(&command, CONNECT_TIMEOUT_MS, connect_reply_complete);
        let connected = connect_succeeded(&response.bytes);
        if connected {
            info!("[BLE] Connected to {}", address);
        } else {
            warn!(
                "[BLE] Connection to {} failed: '{}'",
                address,
                trim_control(response.text())
            );
        }
        connected
    }

    /// Software reset, forgets the role and every discovered device
    pub fn reset(&mut self) -> CommandOutcome {
        let response = self.send_command(action::RESET, DEFAULT_TIMEOUT_MS);
        self.roles.handle_event(RoleEvent::ModuleReset);
        self.devices.clear();
        self.timer.delay_ms(POWER_UP_DELAY_MS);
        response.outcome
    }

    pub fn sleep(&mut self) -> CommandOutcome {
        self.send_command(action::SLEEP, DEFAULT_TIMEOUT_MS).outcome
    }

    fn query_value<const N: usize>(&mut self, command: &str, prefix: &str) -> Option<String<N>> {
        let response = self.send_command(command, DEFAULT_TIMEOUT_MS);
        let Some(value) = response.value_after(prefix) else {
            warn!("[BLE] No value in reply to {}", command);
            return None;
        };
        let mut out = String::new();
        for c in value.chars() {
            if out.push(c).is_err() {
                break;
            }
        }
        Some(out)
    }

    pub fn query_name(&mut self) -> Option<String<MAX_NAME_LENGTH>> {
        self.query_value(query::NAME, reply::NAME)
    }

    pub fn query_address(&mut self) -> Option<String<ADDRESS_LENGTH>> {
        self.query_value(query::ADDR, reply::ADDR)
    }

    pub fn query_version(&mut self) -> Option<String<COMMAND_CAPACITY>> {
        self.query_value(query::VERSION, reply::VERSION)
    }

    /// Rename the module (1 to 20 characters)
    pub fn set_name(&mut self, name: &str) -> bool {
        if name.is_empty() || name.chars().count() > MAX_NAME_LENGTH {
            error!("[BLE] {}: '{}'", FeederError::InvalidName, name);
            return false;
        }

        let mut command: String<COMMAND_CAPACITY> = String::new();
        if write!(command, "{}{}", set::NAME, name).is_err() {
            error!("[BLE] Name command does not fit");
            return false;
        }
        self.send_command(&command, DEFAULT_TIMEOUT_MS).is_ok()
    }

    /// Log identity, role and the last scan
    pub fn log_status(&mut self) {
        let name = self.query_name();
        let address = self.query_address();
        let version = self.query_version();

        info!("[BLE] === Module status ===");
        info!("[BLE] Name: {}", name.as_deref().unwrap_or("?"));
        info!("[BLE] Address: {}", address.as_deref().unwrap_or("?"));
        info!("[BLE] Version: {}", version.as_deref().unwrap_or("?"));
        info!("[BLE] Baud: {}", self.baud_rate);
        info!(
            "[BLE] Role: {:?} (previous {:?})",
            self.roles.current(),
            self.roles.previous()
        );
        info!(
            "[BLE] Devices: {} ({} dropped)",
            self.devices.count(),
            self.devices.overflow_count()
        );
        if self.devices.is_empty() {
            info!("[BLE]   (no scan results)");
        }
        for (i, device) in self.devices.devices().iter().enumerate() {
            info!(
                "[BLE]   {}: {} '{}' {} dBm",
                i,
                device.address.as_str(),
                device.name.as_str(),
                device.rssi
            );
        }
    }

    pub fn role(&self) -> Role {
        self.roles.current()
    }

    pub fn devices(&self) -> &[DiscoveredDevice] {
        self.devices.devices()
    }

    pub fn device_count(&self) -> usize {
        self.devices.count()
    }

    pub fn overflow_count(&self) -> u16 {
        self.devices.overflow_count()
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn sink(&self) -> &A {
        &self.sink
    }

    pub fn serial(&self) -> &S {
        &self.serial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_count_is_clamped() {
        assert_eq!(gauge_count(0), 1);
        assert_eq!(gauge_count(12), 12);
        assert_eq!(gauge_count(4096), 255);
    }

    #[test]
    fn connect_ack_keeps_exchange_open() {
        assert!(!connect_reply_complete(b"OK+CONNA\r\n"));
        assert!(connect_reply_complete(b"OK+CONNAOK+CONN"));
        assert!(connect_reply_complete(b"OK+CONNF"));
        assert!(connect_reply_complete(b"ERROR"));
    }

    #[test]
    fn connect_success_excludes_failures() {
        assert!(connect_succeeded(b"OK+CONNA\r\nOK+CONN\r\n"));
        assert!(connect_succeeded(b"OK+CONN"));
        assert!(!connect_succeeded(b"OK+CONNA"));
        assert!(!connect_succeeded(b"OK+CONNAOK+CONNF"));
        assert!(!connect_succeeded(b"OK+CONNE"));
        assert!(!connect_succeeded(b""));
    }

    #[test]
    fn address_must_be_twelve_hex_digits() {
        assert!(is_valid_address("AABBCCDDEEFF"));
        assert!(is_valid_address("0011aabbccdd"));
        assert!(!is_valid_address("AABBCCDDEEF"));
        assert!(!is_valid_address("AABBCCDDEEFG"));
        assert!(!is_valid_address("AABBCCDDEEFF0"));
    }

    #[test]
    fn records_split_on_markers() {
        let records: std::vec::Vec<&[u8]> =
            discovery_records(b"OK+DISCSOK+DISC:AABBCCDDEEFF:-45OK+DISCE").collect();
        assert_eq!(
            records,
            [&b"OK+DISCS"[..], b"OK+DISC:AABBCCDDEEFF:-45", b"OK+DISCE"]
        );

        assert_eq!(discovery_records(b"OK").count(), 0);
        assert_eq!(
            discovery_records(b"OK+DIS0:AABBCCDDEEFF:MyDevice").collect::<std::vec::Vec<_>>(),
            [&b"OK+DIS0:AABBCCDDEEFF:MyDevice"[..]]
        );
    }

    #[test]
    fn invalid_name_stays_in_its_own_record() {
        let records: std::vec::Vec<&[u8]> =
            discovery_records(b"OK+DIS0:AABBCCDDEEFF:Caf\xE9OK+DISC:001122334455:-45").collect();
        assert_eq!(records.len(), 2);
        assert_eq!(utf8_prefix(records[0]), "OK+DIS0:AABBCCDDEEFF:Caf");
        assert_eq!(records[1], b"OK+DISC:001122334455:-45");
    }
}

//! AT command vocabulary for the AT-09 / HM-10 family of BLE modules
//!
//! Commands, reply markers and timing constants, plus the classification of
//! one command/response exchange.

use heapless::Vec;

/// Line terminator expected by the module
pub const NEWLINE: &str = "\r\n";

/// Bare liveness probe
pub const TEST: &str = "AT";

/// Query commands
pub mod query {
    pub const NAME: &str = "AT+NAME?";
    pub const ADDR: &str = "AT+ADDR?";
    pub const VERSION: &str = "AT+VERS?";
    pub const ROLE: &str = "AT+ROLE?";
}

/// Configuration commands
pub mod set {
    /// Followed by the new name
    pub const NAME: &str = "AT+NAME";
    pub const ROLE_PERIPHERAL: &str = "AT+ROLE0";
    pub const ROLE_CENTRAL: &str = "AT+ROLE1";
}

/// Action commands
pub mod action {
    pub const RESET: &str = "AT+RESET";
    pub const SLEEP: &str = "AT+SLEEP";
    pub const DISCOVER: &str = "AT+DISC?";
    /// Followed by the 12 hex digit address
    pub const CONNECT: &str = "AT+CON";
}

/// Reply markers
pub mod reply {
    pub const OK: &str = "OK";
    pub const ERROR: &str = "ERROR";
    pub const CONNECTED: &str = "OK+CONN";
    pub const CONNECT_FAILED: &str = "OK+CONNF";
    pub const CONNECT_ERROR: &str = "OK+CONNE";
    pub const DISCOVERY: &str = "OK+DISC:";
    /// Covers OK+DIS0:, OK+DISA:, ...
    pub const DISCOVERY_INDEXED: &str = "OK+DIS";
    pub const DISCOVERY_END: &str = "OK+DISCE";
    pub const NAME: &str = "OK+NAME:";
    pub const ADDR: &str = "OK+ADDR:";
    pub const VERSION: &str = "OK+VERS:";
}

/// Buffer sizes
pub const RESPONSE_CAPACITY: usize = 1024;
pub const CONNECT_COMMAND_CAPACITY: usize = 22; // "AT+CON" + 12 hex digits + "\r\n" + spare
pub const COMMAND_CAPACITY: usize = 32;

/// Module address length in hex digits
pub const ADDRESS_LENGTH: usize = 12;

/// Longest name the module accepts with AT+NAME
pub const MAX_NAME_LENGTH: usize = 20;

/// Timing (milliseconds)
pub const POWER_UP_DELAY_MS: u32 = 100;
pub const ROLE_CHANGE_DELAY_MS: u32 = 500;
pub const SERIAL_REINIT_DELAY_MS: u32 = 50;
pub const RESPONSE_TRAILING_DELAY_MS: u32 = 50;
pub const RESPONSE_POLL_DELAY_MS: u32 = 10;

/// Timeouts (milliseconds of inactivity)
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
pub const CONNECT_TIMEOUT_MS: u64 = 5000;
pub const SCAN_MARGIN_MS: u64 = 1000;

/// Baud rates tried, in order, when probing the module
pub const BAUD_RATES: [u32; 5] = [9600, 19200, 38400, 57600, 115200];

/// Classification of a single command/response exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Ok,
    Error,
    Timeout,
    Unknown,
}

impl CommandOutcome {
    /// Classify the accumulated reply bytes
    pub fn classify(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            CommandOutcome::Timeout
        } else if contains(bytes, reply::ERROR.as_bytes()) {
            CommandOutcome::Error
        } else if contains(bytes, reply::OK.as_bytes()) {
            CommandOutcome::Ok
        } else {
            CommandOutcome::Unknown
        }
    }
}

/// Reply collected for one command
#[derive(Debug, Clone)]
pub struct Response {
    pub bytes: Vec<u8, RESPONSE_CAPACITY>,
    pub outcome: CommandOutcome,
}

impl Response {
    pub fn empty(outcome: CommandOutcome) -> Self {
        Self {
            bytes: Vec::new(),
            outcome,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == CommandOutcome::Ok
    }

    pub fn contains(&self, marker: &str) -> bool {
        contains(&self.bytes, marker.as_bytes())
    }

    /// Reply as text, cut at the first invalid UTF-8 sequence
    ///
    /// Records that may carry raw device names go through [`utf8_prefix`]
    /// one at a time instead.
    pub fn text(&self) -> &str {
        utf8_prefix(&self.bytes)
    }

    /// Value following `prefix` up to the end of its line, trimmed
    pub fn value_after(&self, prefix: &str) -> Option<&str> {
        let text = self.text();
        let start = text.find(prefix)? + prefix.len();
        let rest = &text[start..];
        let end = rest.find(['\r', '\n']).unwrap_or(rest.len());
        let value = trim_control(&rest[..end]);
        (!value.is_empty()).then_some(value)
    }
}

/// Substring search over raw bytes
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

/// Offset of the first occurrence of `needle`
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Longest valid UTF-8 prefix of `bytes`
pub fn utf8_prefix(bytes: &[u8]) -> &str {
    match core::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default(),
    }
}

/// Strip surrounding whitespace and control characters
pub fn trim_control(value: &str) -> &str {
    value.trim_matches(|c: char| c.is_whitespace() || c.is_control())
}

/// Strip trailing whitespace and control characters from raw bytes
pub fn trim_trailing_bytes(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !(b.is_ascii_whitespace() || b.is_ascii_control()))
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

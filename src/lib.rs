#![cfg_attr(not(test), no_std)]

//! Cat feeder coordination layer
//!
//! This library drives the two real-time subsystems of the feeder node: an
//! AT-command engine talking to a UART-attached BLE module, and a status
//! panel that multiplexes one RGBW strip into per-component indicators.
//! Everything runs from a single cooperative scheduler pass and uses fixed
//! size buffers only.

pub mod at_command;
pub mod ble_handler;
#[cfg(feature = "firmware")]
pub mod board;
pub mod colour;
pub mod command_buffer;
pub mod discovery;
#[cfg(feature = "firmware")]
pub mod led_control;
pub mod panel;
pub mod role;
pub mod status_node;

use embassy_time::Instant;

/// Project version information
pub const VERSION: &str = "0.1.0-dev";

/// Default configuration constants
pub mod config {
    /// Number of physical pixels on the strip
    pub const STRIP_LENGTH: usize = 30;

    /// The strip is folded in a U: pixels `0..BOTTOM_LENGTH` form the bottom row
    pub const BOTTOM_LENGTH: usize = 15;

    /// First pixel of the (electrically flipped) top row
    pub const TOP_START: usize = 15;

    /// Auto-expiring command slots available on top of the base frame
    pub const TRANSIENT_SLOTS: usize = 24;

    /// Size of the whole command buffer (base frame + transient region)
    pub const TOTAL_SLOTS: usize = STRIP_LENGTH + TRANSIENT_SLOTS;

    /// Longest byte-count gauge painted on the top row
    pub const MAX_GAUGE_LEDS: usize = 5;

    /// Lifetime of an activity ping
    pub const PING_DURATION_MS: u64 = 1000;

    /// Lifetime of a gauge pixel
    pub const GAUGE_DURATION_MS: u64 = 2000;

    /// Global strip brightness (0-255)
    pub const LED_BRIGHTNESS: u8 = 100;

    /// Clock node animation
    pub const CLOCK_INTERVAL_MS: u64 = 100;
    pub const CLOCK_STEP: i16 = 1;

    /// Component node animation
    pub const COMPONENT_INTERVAL_MS: u64 = 500;
    pub const COMPONENT_STEP: i16 = 0;
    pub const COMPONENT_DISABLE_ON_COMPLETE: bool = false;

    /// Distance between two component nodes on the bottom row
    pub const COMPONENT_SPACING: u16 = 2;

    /// Scheduler pass period (~30fps)
    pub const FRAME_INTERVAL_MS: u64 = 33;

    /// Capacity of the discovered device table
    pub const MAX_DEVICES: usize = 10;

    /// Periodic discovery
    pub const SCAN_INTERVAL_MS: u64 = 30_000;
    pub const SCAN_DURATION_MS: u64 = 3_000;

    /// Onboard heartbeat LED toggle period
    pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;

    /// GPIO assignment
    pub const LED_DATA_PIN: u8 = 4;
    pub const STATUS_LED_PIN: u8 = 8;
    pub const BLE_RX_PIN: u8 = 20;
    pub const BLE_TX_PIN: u8 = 21;
    pub const BLE_EN_PIN: u8 = 5;
    pub const BLE_STATE_PIN: u8 = 6;

    /// Module configuration
    /// Read from environment variables at compile time
    pub const BOARD_NAME: &str = env!("FEEDER_BOARD_NAME");
    pub const BLE_BAUD: u32 = parse_decimal(env!("FEEDER_BLE_BAUD"));

    const _: () = assert!(TOTAL_SLOTS > STRIP_LENGTH, "transient region must not be empty");
    const _: () = assert!(TOP_START + BOTTOM_LENGTH <= STRIP_LENGTH);

    const fn parse_decimal(value: &str) -> u32 {
        let bytes = value.as_bytes();
        let mut result = 0u32;
        let mut i = 0;
        while i < bytes.len() {
            let digit = bytes[i];
            assert!(digit.is_ascii_digit(), "FEEDER_BLE_BAUD must be decimal");
            result = result * 10 + (digit - b'0') as u32;
            i += 1;
        }
        result
    }
}

/// Monotonic time source shared by the engine and the panel
pub trait Clock {
    fn now(&self) -> Instant;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Error types for the feeder board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeederError {
    /// UART read/write failed
    SerialError,
    /// LED strip write failed
    LedError,
    /// Transient command region exhausted
    NoFreeSlot,
    /// Not a 12 hex digit module address
    InvalidAddress,
    /// Pixel index outside the strip
    OutOfRange,
    /// Module name empty or too long
    InvalidName,
}

impl core::fmt::Display for FeederError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::SerialError => write!(f, "serial link error"),
            Self::LedError => write!(f, "LED strip write failed"),
            Self::NoFreeSlot => write!(f, "LED command buffer full"),
            Self::InvalidAddress => write!(f, "address must be 12 hex digits"),
            Self::OutOfRange => write!(f, "position outside the strip"),
            Self::InvalidName => write!(f, "module name must be 1-20 characters"),
        }
    }
}

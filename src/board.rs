//! ESP32-C3 bindings for the hardware seams of the library

use crate::Clock;
use crate::ble_handler::AtSerial;
use embassy_time::Instant;
use embedded_hal::delay::DelayNs;
use embedded_io::{Error as _, ErrorKind, ErrorType, Read, ReadReady, Write};
use esp_hal::Blocking;
use esp_hal::delay::Delay;
use esp_hal::uart::{Config as UartConfig, Uart};

/// Monotonic clock and busy-wait delay
#[derive(Clone, Copy)]
pub struct SystemTimer {
    delay: Delay,
}

impl SystemTimer {
    pub fn new() -> Self {
        Self {
            delay: Delay::new(),
        }
    }
}

impl Default for SystemTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemTimer {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl DelayNs for SystemTimer {
    fn delay_ns(&mut self, ns: u32) {
        self.delay.delay_ns(ns);
    }
}

/// UART link to the BLE module
pub struct BleUart {
    uart: Uart<'static, Blocking>,
}

impl BleUart {
    pub fn new(uart: Uart<'static, Blocking>) -> Self {
        Self { uart }
    }
}

impl ErrorType for BleUart {
    type Error = ErrorKind;
}

impl Read for BleUart {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        Read::read(&mut self.uart, buf).map_err(|e| e.kind())
    }
}

impl ReadReady for BleUart {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        ReadReady::read_ready(&mut self.uart).map_err(|e| e.kind())
    }
}

impl Write for BleUart {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        Write::write(&mut self.uart, buf).map_err(|e| e.kind())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Write::flush(&mut self.uart).map_err(|e| e.kind())
    }
}

impl AtSerial for BleUart {
    fn set_baud_rate(&mut self, baud: u32) -> Result<(), Self::Error> {
        self.uart
            .apply_config(&UartConfig::default().with_baudrate(baud))
            .map_err(|_| ErrorKind::InvalidInput)
    }
}

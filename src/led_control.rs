use crate::FeederError;
use crate::config::STRIP_LENGTH;
use esp_hal::gpio::Level;
use esp_hal::rmt::{PulseCode, TxChannel};
use log::warn;
use smart_leds::{RGBW, SmartLedsWrite};

/// Bits per RGBW pixel on the wire
const BITS_PER_PIXEL: usize = 32;

/// One pulse per bit plus the latch
const PULSE_CAPACITY: usize = STRIP_LENGTH * BITS_PER_PIXEL + 1;

/// SK6812 RGBW strip driven by an RMT channel
///
/// The RMT clock must run at 10MHz for the pulse widths below.
pub struct Sk6812Strip<TX>
where
    TX: TxChannel,
{
    channel: Option<TX>,
    pulses: [u32; PULSE_CAPACITY],
}

impl<TX> Sk6812Strip<TX>
where
    TX: TxChannel,
{
    pub fn new(channel: TX) -> Self {
        Self {
            channel: Some(channel),
            pulses: [0; PULSE_CAPACITY],
        }
    }

    fn transmit(&mut self, len: usize) -> Result<(), FeederError> {
        let channel = self.channel.take().ok_or(FeederError::LedError)?;
        match channel.transmit(&self.pulses[..len]) {
            Ok(transaction) => match transaction.wait() {
                Ok(channel) => {
                    self.channel = Some(channel);
                    Ok(())
                }
                Err((_, channel)) => {
                    // The frame usually lands despite the warning
                    self.channel = Some(channel);
                    warn!("[PANEL] RMT reported an error after transmit");
                    Ok(())
                }
            },
            Err(_) => Err(FeederError::LedError),
        }
    }
}

impl<TX> SmartLedsWrite for Sk6812Strip<TX>
where
    TX: TxChannel,
{
    type Error = FeederError;
    type Color = RGBW<u8>;

    fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = I>,
        I: Into<Self::Color>,
    {
        let mut len = 0;
        for pixel in iterator.into_iter().take(STRIP_LENGTH) {
            let pixel: RGBW<u8> = pixel.into();
            // SK6812 RGBW wire order is G, R, B, W
            for byte in [pixel.g, pixel.r, pixel.b, pixel.a.0] {
                self.pulses[len..len + 8].copy_from_slice(&byte_to_pulses(byte));
                len += 8;
            }
        }

        self.pulses[len] = PulseCode::new(Level::Low, 800, Level::Low, 0);
        self.transmit(len + 1)
    }
}

/// Convert a single byte to RMT pulses
/// SK6812 timing at 10MHz: 1-bit = 600ns high + 600ns low, 0-bit = 300ns high + 900ns low
fn byte_to_pulses(byte: u8) -> [u32; 8] {
    let mut pulses = [0u32; 8];

    for (i, pulse) in pulses.iter_mut().enumerate() {
        *pulse = if (byte >> (7 - i)) & 1 == 1 {
            PulseCode::new(Level::High, 6, Level::Low, 6)
        } else {
            PulseCode::new(Level::High, 3, Level::Low, 9)
        };
    }

    pulses
}

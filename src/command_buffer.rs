//! Slot-allocated LED command buffer
//!
//! The first `STRIP_LENGTH` slots are the persistent base frame, one per
//! pixel, always active and never expiring. The remaining slots form the
//! transient region: they are handed out on demand and expire on their own
//! once their duration has elapsed.

use crate::colour::Colour;
use crate::config::{STRIP_LENGTH, TOTAL_SLOTS};
use crate::FeederError;
use embassy_time::{Duration, Instant};

/// One renderable LED command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSlot {
    pub position: u16,
    pub colour: Colour,
    /// `Duration::from_ticks(0)` means "until replaced"
    pub duration: Duration,
    pub start: Instant,
    pub active: bool,
}

impl CommandSlot {
    pub const EMPTY: Self = Self {
        position: 0,
        colour: Colour::BLACK,
        duration: Duration::from_ticks(0),
        start: Instant::from_ticks(0),
        active: false,
    };

    pub fn is_infinite(&self) -> bool {
        self.duration.as_ticks() == 0
    }

    /// True once a finite slot has lived for its whole duration
    pub fn is_expired(&self, now: Instant) -> bool {
        !self.is_infinite()
            && now
                .checked_duration_since(self.start)
                .is_some_and(|elapsed| elapsed >= self.duration)
    }

    /// Claim the slot for a new command
    pub fn set(&mut self, position: u16, colour: Colour, duration: Duration, now: Instant) {
        self.position = position;
        self.colour = colour;
        self.duration = duration;
        self.start = now;
        self.active = true;
    }
}

/// Base frame followed by the transient region
pub struct CommandBuffer {
    slots: [CommandSlot; TOTAL_SLOTS],
}

impl CommandBuffer {
    pub const fn new() -> Self {
        Self {
            slots: [CommandSlot::EMPTY; TOTAL_SLOTS],
        }
    }

    /// Fill every base slot with `background`, active and infinite
    pub fn build_base_frame(&mut self, background: Colour) {
        for (i, slot) in self.base_mut().iter_mut().enumerate() {
            *slot = CommandSlot {
                position: i as u16,
                colour: background,
                active: true,
                ..CommandSlot::EMPTY
            };
        }
    }

    pub fn base(&self) -> &[CommandSlot] {
        &self.slots[..STRIP_LENGTH]
    }

    pub fn base_mut(&mut self) -> &mut [CommandSlot] {
        &mut self.slots[..STRIP_LENGTH]
    }

    pub fn transient(&self) -> &[CommandSlot] {
        &self.slots[STRIP_LENGTH..]
    }

    pub fn transient_mut(&mut self) -> &mut [CommandSlot] {
        &mut self.slots[STRIP_LENGTH..]
    }

    /// Set the persistent colour of one pixel
    pub fn set_base_colour(&mut self, position: usize, colour: Colour) -> Result<(), FeederError> {
        let slot = self
            .base_mut()
            .get_mut(position)
            .ok_or(FeederError::OutOfRange)?;
        slot.colour = colour;
        Ok(())
    }

    /// First free transient slot, zeroed
    ///
    /// A slot is free when it is inactive or its duration has run out at
    /// `now`. Exhaustion is backpressure: callers drop the effect.
    pub fn allocate(&mut self, now: Instant) -> Result<&mut CommandSlot, FeederError> {
        let slot = self
            .transient_mut()
            .iter_mut()
            .find(|slot| !slot.active || slot.is_expired(now))
            .ok_or(FeederError::NoFreeSlot)?;
        *slot = CommandSlot::EMPTY;
        Ok(slot)
    }

    /// Number of transient slots currently holding a live command
    pub fn active_transient(&self, now: Instant) -> usize {
        self.transient()
            .iter()
            .filter(|slot| slot.active && !slot.is_expired(now))
            .count()
    }

    pub fn active_base(&self) -> usize {
        self.base().iter().filter(|slot| slot.active).count()
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TRANSIENT_SLOTS;

    #[test]
    fn base_frame_is_persistent() {
        let mut buffer = CommandBuffer::new();
        buffer.build_base_frame(Colour::BLUE);
        assert_eq!(buffer.active_base(), STRIP_LENGTH);
        for (i, slot) in buffer.base().iter().enumerate() {
            assert_eq!(slot.position as usize, i);
            assert!(slot.is_infinite());
            assert!(!slot.is_expired(Instant::from_secs(3600)));
        }
    }

    #[test]
    fn allocation_exhausts_then_recovers_after_expiry() {
        let mut buffer = CommandBuffer::new();
        let start = Instant::from_millis(1000);
        for i in 0..TRANSIENT_SLOTS {
            let slot = buffer.allocate(start).unwrap();
            slot.set(i as u16, Colour::RED, Duration::from_millis(500), start);
        }
        assert_eq!(
            buffer.allocate(start + Duration::from_millis(499)).err(),
            Some(FeederError::NoFreeSlot)
        );

        let later = start + Duration::from_millis(500);
        let slot = buffer.allocate(later).unwrap();
        assert!(!slot.active);
        assert_eq!(slot.position, 0);
    }

    #[test]
    fn infinite_transient_slots_never_free_themselves() {
        let mut buffer = CommandBuffer::new();
        for _ in 0..TRANSIENT_SLOTS {
            let slot = buffer.allocate(Instant::from_millis(0)).unwrap();
            slot.set(1, Colour::GREEN, Duration::from_ticks(0), Instant::from_millis(0));
        }
        assert!(buffer.allocate(Instant::from_secs(3600)).is_err());
    }

    #[test]
    fn base_colour_out_of_range() {
        let mut buffer = CommandBuffer::new();
        assert_eq!(
            buffer.set_base_colour(STRIP_LENGTH, Colour::RED),
            Err(FeederError::OutOfRange)
        );
        assert!(buffer.set_base_colour(0, Colour::RED).is_ok());
        assert_eq!(buffer.base()[0].colour, Colour::RED);
    }
}

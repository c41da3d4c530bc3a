//! RGBW colour value and the named colours used by the panel

use smart_leds::{RGBW, White};

/// One pixel colour, including the dedicated white channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Colour {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub w: u8,
}

impl Colour {
    pub const fn new(r: u8, g: u8, b: u8, w: u8) -> Self {
        Self { r, g, b, w }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, w: 0 }
    }

    /// Scale every channel by `brightness / 255`
    pub fn scaled(self, brightness: u8) -> Self {
        let scale = |c: u8| ((c as u16 * (brightness as u16 + 1)) >> 8) as u8;
        Self {
            r: scale(self.r),
            g: scale(self.g),
            b: scale(self.b),
            w: scale(self.w),
        }
    }

    pub const BLACK: Self = Self::rgb(0, 0, 0);
    pub const WHITE: Self = Self::rgb(255, 255, 255);
    pub const RED: Self = Self::rgb(255, 0, 0);
    pub const YELLOW: Self = Self::rgb(255, 255, 0);
    pub const GREEN: Self = Self::rgb(0, 128, 0);
    pub const BLUE: Self = Self::rgb(0, 0, 255);
    pub const DARK_BLUE: Self = Self::rgb(0, 0, 139);
    pub const AQUA: Self = Self::rgb(0, 255, 255);
    pub const DARK_MAGENTA: Self = Self::rgb(139, 0, 139);
    pub const LIME_GREEN: Self = Self::rgb(50, 205, 50);
}

impl From<Colour> for RGBW<u8> {
    fn from(colour: Colour) -> Self {
        RGBW {
            r: colour.r,
            g: colour.g,
            b: colour.b,
            a: White(colour.w),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_brightness_keeps_channels() {
        assert_eq!(Colour::new(255, 10, 0, 7).scaled(255), Colour::new(255, 10, 0, 7));
    }

    #[test]
    fn zero_brightness_is_black() {
        assert_eq!(Colour::WHITE.scaled(0), Colour::BLACK);
    }

    #[test]
    fn converts_to_rgbw() {
        let pixel: RGBW<u8> = Colour::new(1, 2, 3, 4).into();
        assert_eq!((pixel.r, pixel.g, pixel.b, pixel.a.0), (1, 2, 3, 4));
    }
}

//! Pixel resolutions.

use std::fmt;

/// A resolution in pixels (`width x height`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    width: u32,
    height: u32,
}

impl Resolution {
    /// 640x480.
    pub const RES_VGA: Self = Self::new(640, 480);

    /// 1920x1080.
    pub const RES_1080P: Self = Self::new(1920, 1080);

    /// Creates a new resolution.
    ///
    /// Both `width` and `height` must be non-zero, or this will panic.
    pub const fn new(width: u32, height: u32) -> Self {
        assert!(width != 0 && height != 0, "attempted to create a resolution with 0 width or height");
        Self { width, height }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the total number of pixels.
    pub fn num_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(Resolution::new(224, 224).to_string(), "224x224");
        assert_eq!(Resolution::RES_1080P.to_string(), "1920x1080");
    }

    #[test]
    fn pixel_count() {
        assert_eq!(Resolution::RES_VGA.num_pixels(), 640 * 480);
    }
}

//! Shared pixel and geometry types.
//!
//! The [`ShadowFramebuffer`] is the single pixel store of the remote
//! output. The compositor renders into it during repaint and every
//! peer's codec reads from it afterwards; the two never interleave.

use std::cmp;

use serde::{Deserialize, Serialize};

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout of the shadow framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    #[default]
    Bgra32,
    /// 4 bytes per pixel: Blue, Green, Red, unused.
    Bgrx32,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra32 | PixelFormat::Bgrx32 => 4,
        }
    }
}

// ── Rect ─────────────────────────────────────────────────────────

/// An axis-aligned rectangle in output coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Overlap of two rectangles, `None` when they do not touch.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x1 = cmp::max(self.x, other.x);
        let y1 = cmp::max(self.y, other.y);
        let x2 = cmp::min(self.right(), other.right());
        let y2 = cmp::min(self.bottom(), other.bottom());
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Rect::new(x1, y1, x2 - x1, y2 - y1))
    }
}

// ── ShadowFramebuffer ────────────────────────────────────────────

/// CPU-side copy of the composited output.
///
/// The `data` buffer holds `height` rows of `stride` bytes each.
#[derive(Debug, Clone)]
pub struct ShadowFramebuffer {
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl ShadowFramebuffer {
    /// Allocate a zeroed framebuffer for the given mode.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = width * format.bytes_per_pixel() as u32;
        Self {
            width,
            height,
            stride,
            format,
            data: vec![0; stride as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// The whole surface as a rectangle.
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Reallocate for a new mode. Contents are cleared.
    pub fn resize(&mut self, width: u32, height: u32) {
        *self = Self::new(width, height, self.format);
    }

    /// Returns the bytes of row `y` restricted to `[x, x + width)`.
    ///
    /// Returns `None` when the span leaves the surface.
    pub fn span(&self, x: u32, y: u32, width: u32) -> Option<&[u8]> {
        if y >= self.height || x.checked_add(width)? > self.width {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let start = y as usize * self.stride as usize + x as usize * bpp;
        self.data.get(start..start + width as usize * bpp)
    }

    /// Fill `rect` (clipped) with a single pixel value.
    pub fn fill(&mut self, rect: Rect, pixel: [u8; 4]) {
        let Some(clip) = rect.intersect(&self.bounds()) else {
            return;
        };
        let bpp = self.format.bytes_per_pixel();
        for y in clip.y..clip.bottom() {
            let row = y as usize * self.stride as usize;
            for x in clip.x..clip.right() {
                let offset = row + x as usize * bpp;
                self.data[offset..offset + bpp].copy_from_slice(&pixel[..bpp]);
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_overlapping() {
        let a = Rect::new(0, 0, 100, 100);
        let b = Rect::new(50, 50, 100, 100);
        assert_eq!(a.intersect(&b), Some(Rect::new(50, 50, 50, 50)));
    }

    #[test]
    fn intersect_disjoint() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(10, 0, 10, 10);
        assert_eq!(a.intersect(&b), None);
    }

    #[test]
    fn span_bounds_checked() {
        let fb = ShadowFramebuffer::new(8, 4, PixelFormat::Bgra32);
        assert_eq!(fb.span(0, 0, 8).map(<[u8]>::len), Some(32));
        assert!(fb.span(4, 0, 5).is_none());
        assert!(fb.span(0, 4, 1).is_none());
    }

    #[test]
    fn fill_is_clipped() {
        let mut fb = ShadowFramebuffer::new(4, 4, PixelFormat::Bgra32);
        fb.fill(Rect::new(2, 2, 10, 10), [1, 2, 3, 4]);
        assert_eq!(fb.span(3, 3, 1), Some(&[1u8, 2, 3, 4][..]));
        assert_eq!(fb.span(1, 1, 1), Some(&[0u8, 0, 0, 0][..]));
    }

    #[test]
    fn resize_reallocates() {
        let mut fb = ShadowFramebuffer::new(4, 4, PixelFormat::Bgra32);
        fb.resize(16, 8);
        assert_eq!(fb.data().len(), 16 * 8 * 4);
        assert_eq!(fb.stride(), 64);
    }
}

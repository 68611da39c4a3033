//! Plain bitmap region selection: damage clipped to the surface and
//! cut into bands no taller than [`BAND_HEIGHT`].

use crate::types::{Rect, ShadowFramebuffer};

pub const BAND_HEIGHT: u32 = 64;

pub fn select(framebuffer: &ShadowFramebuffer, damage: &[Rect], full_frame: bool, out: &mut Vec<Rect>) {
    let bounds = framebuffer.bounds();
    if full_frame {
        push_bands(bounds, out);
        return;
    }
    for rect in damage {
        if let Some(clip) = rect.intersect(&bounds) {
            push_bands(clip, out);
        }
    }
}

fn push_bands(rect: Rect, out: &mut Vec<Rect>) {
    let mut y = rect.y;
    while y < rect.bottom() {
        let height = BAND_HEIGHT.min(rect.bottom() - y);
        out.push(Rect::new(rect.x, y, rect.width, height));
        y += height;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelFormat;

    #[test]
    fn damage_clipped_and_banded() {
        let fb = ShadowFramebuffer::new(100, 200, PixelFormat::Bgra32);
        let mut out = Vec::new();
        select(&fb, &[Rect::new(90, 50, 50, 100)], false, &mut out);
        assert_eq!(
            out,
            vec![Rect::new(90, 50, 10, 64), Rect::new(90, 114, 10, 36)]
        );
    }

    #[test]
    fn full_frame_bands() {
        let fb = ShadowFramebuffer::new(32, 130, PixelFormat::Bgra32);
        let mut out = Vec::new();
        select(&fb, &[], true, &mut out);
        assert_eq!(out.len(), 3);
        assert_eq!(out[2], Rect::new(0, 128, 32, 2));
    }
}

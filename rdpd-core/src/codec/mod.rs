//! Per-peer update encoder.
//!
//! A [`CodecContext`] turns damaged regions of the shared shadow
//! framebuffer into one self-describing update payload:
//!
//! ```text
//! ┌──────────────────────────────┬──────────────────────────────────┐
//! │ PayloadHeader (bincode)      │ body: rect pixels, row-major,    │
//! │ codec, flags, frame id, rects│ optionally zstd-compressed       │
//! └──────────────────────────────┴──────────────────────────────────┘
//! ```
//!
//! The variant (tile grid or plain bitmap) only decides *which*
//! rectangles are sent. Every context owns its own output stream and
//! scratch buffer, so peers never share encode state.

pub mod bitmap;
pub mod tile;

use std::io::Cursor;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::RdpError;
use crate::types::{Rect, ShadowFramebuffer};

use tile::TileCache;

/// Default zstd level, tuned for latency over ratio.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 1;

// ── Selectors ────────────────────────────────────────────────────

/// Region encoding strategy, fixed once at negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecVariant {
    /// 64×64 tile grid with unchanged-tile elision.
    Tile,
    /// Damage rectangles sent as plain bitmap bands.
    Bitmap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// The whole surface, resets any incremental state.
    Full,
    /// Only the damaged regions.
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionPolicy {
    pub enabled: bool,
    pub level: i32,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

// ── Payload ──────────────────────────────────────────────────────

/// Leading part of every update payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadHeader {
    pub codec: CodecVariant,
    pub compressed: bool,
    pub full_frame: bool,
    pub frame_id: u32,
    pub width: u32,
    pub height: u32,
    pub rects: Vec<Rect>,
}

impl PayloadHeader {
    /// Split a payload into its header and uncompressed pixel body.
    pub fn decode(payload: &[u8]) -> Result<(PayloadHeader, Vec<u8>), RdpError> {
        let mut cursor = Cursor::new(payload);
        let header: PayloadHeader = bincode::deserialize_from(&mut cursor)?;
        let body = &payload[cursor.position() as usize..];
        let body = if header.compressed {
            zstd::decode_all(body).map_err(|e| RdpError::CodecFailure(format!("zstd decode failed: {e}")))?
        } else {
            body.to_vec()
        };
        Ok((header, body))
    }
}

/// A ready-to-send update borrowed from its [`CodecContext`].
#[derive(Debug, Clone, Copy)]
pub struct EncodedUpdate<'a> {
    pub frame_id: u32,
    pub codec: CodecVariant,
    pub full_frame: bool,
    pub rects: &'a [Rect],
    pub payload: &'a [u8],
}

// ── CodecContext ─────────────────────────────────────────────────

#[derive(Debug)]
pub struct CodecContext {
    variant: Option<CodecVariant>,
    compression: CompressionPolicy,
    max_request_size: usize,
    /// Output stream, reused across frames.
    stream: BytesMut,
    /// Uncompressed body staging.
    scratch: Vec<u8>,
    rects: Vec<Rect>,
    tiles: TileCache,
    next_frame_id: u32,
    force_full: bool,
}

impl CodecContext {
    pub fn new(compression: CompressionPolicy) -> Self {
        Self {
            variant: None,
            compression,
            max_request_size: crate::protocol::DEFAULT_MAX_REQUEST_SIZE as usize,
            stream: BytesMut::new(),
            scratch: Vec::new(),
            rects: Vec::new(),
            tiles: TileCache::new(),
            next_frame_id: 0,
            force_full: true,
        }
    }

    /// Fix the variant for the lifetime of the context.
    pub fn select_variant(&mut self, variant: CodecVariant, max_request_size: u32) -> Result<(), RdpError> {
        if let Some(current) = self.variant {
            return Err(RdpError::CodecFailure(format!(
                "codec variant already selected ({current:?})"
            )));
        }
        self.variant = Some(variant);
        self.max_request_size = max_request_size as usize;
        Ok(())
    }

    pub fn variant(&self) -> Option<CodecVariant> {
        self.variant
    }

    pub fn compression(&self) -> CompressionPolicy {
        self.compression
    }

    /// Make the next [`encode`](Self::encode) a full frame.
    pub fn request_full_frame(&mut self) {
        self.force_full = true;
    }

    pub fn full_frame_pending(&self) -> bool {
        self.force_full
    }

    /// Encode `damage` from `framebuffer`.
    ///
    /// Returns `Ok(None)` when there is nothing to send.
    pub fn encode(
        &mut self,
        framebuffer: &ShadowFramebuffer,
        damage: &[Rect],
        kind: FrameKind,
    ) -> Result<Option<EncodedUpdate<'_>>, RdpError> {
        let variant = self
            .variant
            .ok_or_else(|| RdpError::CodecFailure("no codec variant selected".into()))?;
        let full_frame = kind == FrameKind::Full || self.force_full;

        if !full_frame {
            let bounds = framebuffer.bounds();
            let mut damaged = damage.iter().filter(|r| !r.is_empty()).peekable();
            if damaged.peek().is_none() {
                return Ok(None);
            }
            if damaged.all(|r| r.intersect(&bounds).is_none()) {
                return Err(RdpError::CodecFailure(
                    "damage lies outside the surface".into(),
                ));
            }
        }

        self.rects.clear();
        match variant {
            CodecVariant::Tile => self.tiles.select(framebuffer, damage, full_frame, &mut self.rects),
            CodecVariant::Bitmap => bitmap::select(framebuffer, damage, full_frame, &mut self.rects),
        }
        if self.rects.is_empty() && !full_frame {
            return Ok(None);
        }

        self.scratch.clear();
        for rect in &self.rects {
            for y in rect.y..rect.bottom() {
                let span = framebuffer
                    .span(rect.x, y, rect.width)
                    .ok_or_else(|| RdpError::CodecFailure(format!("{rect:?} leaves the surface")))?;
                self.scratch.extend_from_slice(span);
            }
        }

        let header = PayloadHeader {
            codec: variant,
            compressed: self.compression.enabled,
            full_frame,
            frame_id: self.next_frame_id,
            width: framebuffer.width(),
            height: framebuffer.height(),
            rects: self.rects.clone(),
        };
        self.stream.clear();
        bincode::serialize_into((&mut self.stream).writer(), &header)?;
        if self.compression.enabled {
            zstd::stream::copy_encode(
                self.scratch.as_slice(),
                (&mut self.stream).writer(),
                self.compression.level,
            )
            .map_err(|e| RdpError::CodecFailure(format!("zstd encode failed: {e}")))?;
        } else {
            self.stream.extend_from_slice(&self.scratch);
        }

        if self.stream.len() > self.max_request_size {
            if variant == CodecVariant::Tile {
                // The client never got these tiles.
                self.tiles.clear();
            }
            return Err(RdpError::CodecFailure(format!(
                "payload of {} bytes exceeds client limit of {}",
                self.stream.len(),
                self.max_request_size
            )));
        }

        let frame_id = self.next_frame_id;
        self.next_frame_id = self.next_frame_id.wrapping_add(1);
        self.force_full = false;

        tracing::trace!(
            target: "rdp::verbose",
            frame_id,
            ?variant,
            full_frame,
            rects = self.rects.len(),
            bytes = self.stream.len(),
            "frame encoded"
        );

        Ok(Some(EncodedUpdate {
            frame_id,
            codec: variant,
            full_frame,
            rects: &self.rects,
            payload: &self.stream,
        }))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelFormat;

    fn context(variant: CodecVariant, enabled: bool) -> CodecContext {
        let mut ctx = CodecContext::new(CompressionPolicy {
            enabled,
            level: DEFAULT_COMPRESSION_LEVEL,
        });
        ctx.select_variant(variant, 1 << 24).unwrap();
        ctx
    }

    #[test]
    fn variant_is_fixed_once() {
        let mut ctx = CodecContext::new(CompressionPolicy::default());
        assert!(ctx.variant().is_none());
        ctx.select_variant(CodecVariant::Bitmap, 1024).unwrap();
        assert!(ctx.select_variant(CodecVariant::Tile, 1024).is_err());
        assert_eq!(ctx.variant(), Some(CodecVariant::Bitmap));
    }

    #[test]
    fn encode_without_variant_fails() {
        let fb = ShadowFramebuffer::new(8, 8, PixelFormat::Bgra32);
        let mut ctx = CodecContext::new(CompressionPolicy::default());
        let err = ctx.encode(&fb, &[fb.bounds()], FrameKind::Full).unwrap_err();
        assert!(matches!(err, RdpError::CodecFailure(_)));
    }

    #[test]
    fn first_frame_is_forced_full() {
        let fb = ShadowFramebuffer::new(16, 16, PixelFormat::Bgra32);
        let mut ctx = context(CodecVariant::Bitmap, true);
        let update = ctx
            .encode(&fb, &[Rect::new(0, 0, 1, 1)], FrameKind::Incremental)
            .unwrap()
            .unwrap();
        assert!(update.full_frame);
        assert_eq!(update.frame_id, 0);
    }

    #[test]
    fn uncompressed_payload_decodes() {
        let mut fb = ShadowFramebuffer::new(16, 16, PixelFormat::Bgra32);
        fb.fill(Rect::new(0, 0, 16, 16), [1, 2, 3, 4]);
        let mut ctx = context(CodecVariant::Bitmap, false);
        let payload = ctx
            .encode(&fb, &[], FrameKind::Full)
            .unwrap()
            .unwrap()
            .payload
            .to_vec();

        let (header, body) = PayloadHeader::decode(&payload).unwrap();
        assert!(!header.compressed);
        assert!(header.full_frame);
        assert_eq!(body.len(), 16 * 16 * 4);
        assert_eq!(&body[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn compressed_payload_is_smaller_and_decodes() {
        let fb = ShadowFramebuffer::new(64, 64, PixelFormat::Bgra32);
        let mut ctx = context(CodecVariant::Tile, true);
        let payload = ctx
            .encode(&fb, &[], FrameKind::Full)
            .unwrap()
            .unwrap()
            .payload
            .to_vec();
        assert!(payload.len() < 64 * 64 * 4);
        let (header, body) = PayloadHeader::decode(&payload).unwrap();
        assert!(header.compressed);
        assert_eq!(body.len(), 64 * 64 * 4);
    }

    #[test]
    fn empty_damage_sends_nothing() {
        let fb = ShadowFramebuffer::new(16, 16, PixelFormat::Bgra32);
        let mut ctx = context(CodecVariant::Bitmap, true);
        ctx.encode(&fb, &[], FrameKind::Full).unwrap();
        assert!(ctx.encode(&fb, &[], FrameKind::Incremental).unwrap().is_none());
    }

    #[test]
    fn damage_outside_surface_fails() {
        let fb = ShadowFramebuffer::new(16, 16, PixelFormat::Bgra32);
        let mut ctx = context(CodecVariant::Bitmap, true);
        ctx.encode(&fb, &[], FrameKind::Full).unwrap();
        let err = ctx
            .encode(&fb, &[Rect::new(100, 100, 4, 4)], FrameKind::Incremental)
            .unwrap_err();
        assert!(matches!(err, RdpError::CodecFailure(_)));
    }

    #[test]
    fn oversize_payload_fails() {
        let fb = ShadowFramebuffer::new(64, 64, PixelFormat::Bgra32);
        let mut ctx = CodecContext::new(CompressionPolicy {
            enabled: false,
            level: DEFAULT_COMPRESSION_LEVEL,
        });
        ctx.select_variant(CodecVariant::Bitmap, 1024).unwrap();
        let err = ctx.encode(&fb, &[], FrameKind::Full).unwrap_err();
        assert!(matches!(err, RdpError::CodecFailure(_)));
        // Still owes the client a full frame.
        assert!(ctx.full_frame_pending());
    }

    #[test]
    fn frame_ids_increase() {
        let mut fb = ShadowFramebuffer::new(16, 16, PixelFormat::Bgra32);
        let mut ctx = context(CodecVariant::Bitmap, true);
        ctx.encode(&fb, &[], FrameKind::Full).unwrap();
        fb.fill(Rect::new(0, 0, 2, 2), [5, 5, 5, 5]);
        let update = ctx
            .encode(&fb, &[Rect::new(0, 0, 2, 2)], FrameKind::Incremental)
            .unwrap()
            .unwrap();
        assert_eq!(update.frame_id, 1);
        assert!(!update.full_frame);
        assert_eq!(update.rects, &[Rect::new(0, 0, 2, 2)]);
    }
}

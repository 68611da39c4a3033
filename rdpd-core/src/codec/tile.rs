//! Tile-grid region selection.
//!
//! The surface is split into `TILE_SIZE × TILE_SIZE` tiles. A blake3
//! digest is kept for every tile that has been sent; an incremental
//! frame only carries the damaged tiles whose digest changed.

use crate::types::{Rect, ShadowFramebuffer};

pub const TILE_SIZE: u32 = 64;

#[derive(Debug, Clone, Default)]
pub struct TileCache {
    columns: u32,
    rows: u32,
    digests: Vec<Option<blake3::Hash>>,
}

impl TileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every digest.
    pub fn clear(&mut self) {
        self.digests.iter_mut().for_each(|d| *d = None);
    }

    pub fn cached_tiles(&self) -> usize {
        self.digests.iter().filter(|d| d.is_some()).count()
    }

    /// Push into `out` the tiles to send for this frame.
    pub fn select(
        &mut self,
        framebuffer: &ShadowFramebuffer,
        damage: &[Rect],
        full_frame: bool,
        out: &mut Vec<Rect>,
    ) {
        self.fit(framebuffer);
        if full_frame {
            self.clear();
        }
        let bounds = framebuffer.bounds();

        let mut visited = vec![false; self.digests.len()];
        let regions: &[Rect] = if full_frame {
            std::slice::from_ref(&bounds)
        } else {
            damage
        };

        for region in regions {
            let Some(region) = region.intersect(&bounds) else {
                continue;
            };
            let (c0, r0) = (region.x / TILE_SIZE, region.y / TILE_SIZE);
            let (c1, r1) = (
                (region.right() - 1) / TILE_SIZE,
                (region.bottom() - 1) / TILE_SIZE,
            );
            for row in r0..=r1 {
                for col in c0..=c1 {
                    let index = (row * self.columns + col) as usize;
                    if std::mem::replace(&mut visited[index], true) {
                        continue;
                    }
                    let Some(tile) = self.tile_rect(col, row).intersect(&bounds) else {
                        continue;
                    };
                    let digest = digest(framebuffer, &tile);
                    if self.digests[index] == Some(digest) {
                        continue;
                    }
                    self.digests[index] = Some(digest);
                    out.push(tile);
                }
            }
        }
    }

    fn fit(&mut self, framebuffer: &ShadowFramebuffer) {
        let columns = framebuffer.width().div_ceil(TILE_SIZE);
        let rows = framebuffer.height().div_ceil(TILE_SIZE);
        if columns != self.columns || rows != self.rows {
            self.columns = columns;
            self.rows = rows;
            self.digests = vec![None; (columns * rows) as usize];
        }
    }

    fn tile_rect(&self, col: u32, row: u32) -> Rect {
        Rect::new(col * TILE_SIZE, row * TILE_SIZE, TILE_SIZE, TILE_SIZE)
    }
}

fn digest(framebuffer: &ShadowFramebuffer, tile: &Rect) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    for y in tile.y..tile.bottom() {
        if let Some(span) = framebuffer.span(tile.x, y, tile.width) {
            hasher.update(span);
        }
    }
    hasher.finalize()
}

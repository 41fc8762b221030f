use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-layer stride for the combined draw-order key. Any in-bounds
/// `gx + gy` sum must stay below this so a higher layer always paints
/// above a lower one at the same footprint.
pub const LAYER_DRAW_STRIDE: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
    pub layer: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ProjectionError {
    #[error("tile dimensions must be positive, got {width}x{height}")]
    NonPositiveTile { width: f32, height: f32 },
}

/// Oblique (2:1 isometric) projection between logical grid coordinates and
/// screen coordinates:
/// - `sx = origin.x + (gx - gy) * tile_width / 2`
/// - `sy = origin.y + (gx + gy) * tile_height / 2`
///
/// Elevation layers shift the screen Y upward by `layer * tile_height / 2`
/// and do not participate in the planar depth sum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    tile_width: f32,
    tile_height: f32,
    origin: Vec2,
}

impl Projection {
    pub fn new(tile_width: f32, tile_height: f32, origin: Vec2) -> Result<Self, ProjectionError> {
        if !(tile_width > 0.0) || !(tile_height > 0.0) {
            return Err(ProjectionError::NonPositiveTile {
                width: tile_width,
                height: tile_height,
            });
        }
        Ok(Self {
            tile_width,
            tile_height,
            origin,
        })
    }

    pub fn tile_width(&self) -> f32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> f32 {
        self.tile_height
    }

    pub fn origin(&self) -> Vec2 {
        self.origin
    }

    pub fn grid_to_screen(&self, gx: i32, gy: i32) -> Vec2 {
        Vec2 {
            x: self.origin.x + (gx - gy) as f32 * self.tile_width * 0.5,
            y: self.origin.y + (gx + gy) as f32 * self.tile_height * 0.5,
        }
    }

    pub fn grid_to_screen_elevated(&self, gx: i32, gy: i32, layer: u16) -> Vec2 {
        let flat = self.grid_to_screen(gx, gy);
        Vec2 {
            x: flat.x,
            y: flat.y - layer as f32 * self.tile_height * 0.5,
        }
    }

    /// Algebraic inverse of `grid_to_screen`, rounded to the nearest cell.
    pub fn screen_to_grid(&self, screen: Vec2) -> (i32, i32) {
        let dx = (screen.x - self.origin.x) / (self.tile_width * 0.5);
        let dy = (screen.y - self.origin.y) / (self.tile_height * 0.5);
        let gx = (dx + dy) * 0.5;
        let gy = (dy - dx) * 0.5;
        (gx.round() as i32, gy.round() as i32)
    }
}

/// Planar paint/update depth: larger sums are nearer the viewer and must be
/// processed after (on top of) smaller ones.
pub fn depth(gx: i32, gy: i32) -> i64 {
    gx as i64 + gy as i64
}

/// Depth combined with the elevation layer so taller stacks at the same
/// footprint always paint above lower ones.
pub fn draw_order(gx: i32, gy: i32, layer: u16) -> i64 {
    layer as i64 * LAYER_DRAW_STRIDE + depth(gx, gy)
}

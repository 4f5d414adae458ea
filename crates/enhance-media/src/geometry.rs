//! Tile geometry for overlapping tiled inference.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelRect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> usize {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> usize {
        self.y + self.height
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// Multiply every coordinate by `factor`.
    pub fn scaled(&self, factor: usize) -> Self {
        Self::new(
            self.x * factor,
            self.y * factor,
            self.width * factor,
            self.height * factor,
        )
    }

    /// This rectangle expressed relative to the origin of `outer`.
    pub fn relative_to(&self, outer: &PixelRect) -> Self {
        Self::new(
            self.x - outer.x,
            self.y - outer.y,
            self.width,
            self.height,
        )
    }

    pub fn contains_rect(&self, other: &PixelRect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn intersects(&self, other: &PixelRect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// Regions describing one tile of a tiled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGeometry {
    /// 0-based position in row-major order.
    pub index: usize,
    pub column: usize,
    pub row: usize,
    /// Pixels this tile is responsible for.
    pub input: PixelRect,
    /// `input` grown by the tile pad and clamped to the image.
    pub padded_input: PixelRect,
    /// Where the tile writes into the output canvas.
    pub output: PixelRect,
    /// The part of the tile's raw output that maps to `input`.
    pub inner_output: PixelRect,
}

/// Tiling of a `width` x `height` image.
///
/// A `tile_size` of zero produces a single tile covering the whole image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    width: usize,
    height: usize,
    tile_size: usize,
    tile_pad: usize,
    scale: usize,
    tiles_x: usize,
    tiles_y: usize,
}

impl TileGrid {
    pub fn new(width: usize, height: usize, tile_size: usize, tile_pad: usize, scale: usize) -> Self {
        let tile_size = if tile_size == 0 {
            width.max(height).max(1)
        } else {
            tile_size
        };

        Self {
            width,
            height,
            tile_size,
            tile_pad,
            scale,
            tiles_x: width.div_ceil(tile_size),
            tiles_y: height.div_ceil(tile_size),
        }
    }

    pub fn tiles_x(&self) -> usize {
        self.tiles_x
    }

    pub fn tiles_y(&self) -> usize {
        self.tiles_y
    }

    pub fn len(&self) -> usize {
        self.tiles_x * self.tiles_y
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The full output canvas, `(width * scale, height * scale)`.
    pub fn output_bounds(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width, self.height).scaled(self.scale)
    }

    /// Geometry of the tile at `column`, `row`.
    pub fn tile(&self, column: usize, row: usize) -> TileGeometry {
        let x0 = column * self.tile_size;
        let y0 = row * self.tile_size;
        let x1 = ((column + 1) * self.tile_size).min(self.width);
        let y1 = ((row + 1) * self.tile_size).min(self.height);
        let input = PixelRect::new(x0, y0, x1 - x0, y1 - y0);

        let px0 = x0.saturating_sub(self.tile_pad);
        let py0 = y0.saturating_sub(self.tile_pad);
        let px1 = (x1 + self.tile_pad).min(self.width);
        let py1 = (y1 + self.tile_pad).min(self.height);
        let padded_input = PixelRect::new(px0, py0, px1 - px0, py1 - py0);

        TileGeometry {
            index: row * self.tiles_x + column,
            column,
            row,
            input,
            padded_input,
            output: input.scaled(self.scale),
            inner_output: input.relative_to(&padded_input).scaled(self.scale),
        }
    }

    /// All tiles in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = TileGeometry> + '_ {
        (0..self.tiles_y).flat_map(move |row| (0..self.tiles_x).map(move |col| self.tile(col, row)))
    }
}

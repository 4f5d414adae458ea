//! Overlapping tiled inference with bounded peak memory.
//!
//! The input is split into a grid of `tile_size` tiles. Each tile is grown
//! by `tile_pad` context pixels (clamped to the image), run through the
//! transform, and only the part of the output corresponding to the unpadded
//! tile is written into a zero-initialized canvas. Output regions of distinct
//! tiles are disjoint and together cover the canvas.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use ndarray::s;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::geometry::{TileGeometry, TileGrid};
use crate::image::{spatial_dims, Image};
use crate::metrics;
use crate::padding::{mod_padding, reflect_pad};
use crate::transform::{CancelToken, Transform};

/// What to do when inference fails for a single tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileFailurePolicy {
    /// Fail the whole run on the first failing tile.
    #[default]
    Abort,
    /// Log the failure, leave the tile's output region zero-filled and continue.
    ZeroFill,
}

impl TileFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TileFailurePolicy::Abort => "abort",
            TileFailurePolicy::ZeroFill => "zero_fill",
        }
    }
}

impl fmt::Display for TileFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TileFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(TileFailurePolicy::Abort),
            "zero_fill" | "zero-fill" | "zerofill" => Ok(TileFailurePolicy::ZeroFill),
            other => Err(format!("unknown tile failure policy: {}", other)),
        }
    }
}

/// Summary of a tiled run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TileReport {
    pub tiles_x: usize,
    pub tiles_y: usize,
    pub tiles_total: usize,
    /// Row-major indices of tiles left zero-filled.
    pub failed_tiles: Vec<usize>,
}

impl TileReport {
    /// True when every tile was stitched from transform output.
    pub fn is_complete(&self) -> bool {
        self.failed_tiles.is_empty()
    }
}

/// Runs a transform over an image tile by tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileScheduler {
    /// Tile edge in input pixels. Zero runs the whole image in one call.
    pub tile_size: usize,
    /// Context pixels added around each tile.
    pub tile_pad: usize,
    /// Required divisibility of every transform input, if any.
    pub window_size: Option<usize>,
    pub policy: TileFailurePolicy,
}

impl Default for TileScheduler {
    fn default() -> Self {
        Self {
            tile_size: 400,
            tile_pad: 10,
            window_size: None,
            policy: TileFailurePolicy::Abort,
        }
    }
}

impl TileScheduler {
    pub fn new(tile_size: usize, tile_pad: usize) -> Self {
        Self {
            tile_size,
            tile_pad,
            ..Default::default()
        }
    }

    pub fn with_window(mut self, window_size: Option<usize>) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_policy(mut self, policy: TileFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run `transform` over `image`, returning an `(H * scale, W * scale)` image.
    ///
    /// `cancel` is checked before every tile.
    pub fn run(
        &self,
        image: &Image,
        transform: &dyn Transform,
        cancel: &CancelToken,
    ) -> MediaResult<(Image, TileReport)> {
        let (n, c, h, w) = image.dim();
        if h == 0 || w == 0 {
            return Err(MediaError::invalid_image("cannot tile an empty image"));
        }
        let scale = transform.scale();
        if scale == 0 {
            return Err(MediaError::invalid_image(format!(
                "transform {} reports scale 0",
                transform.name()
            )));
        }

        let grid = TileGrid::new(w, h, self.tile_size, self.tile_pad, scale);
        let total = grid.len();
        let mut canvas = Image::zeros((n, c, h * scale, w * scale));
        let mut report = TileReport {
            tiles_x: grid.tiles_x(),
            tiles_y: grid.tiles_y(),
            tiles_total: total,
            failed_tiles: Vec::new(),
        };

        let start = Instant::now();
        for tile in grid.iter() {
            if cancel.is_cancelled() {
                info!(tile = tile.index + 1, total, "Cancelled before tile");
                return Err(MediaError::Cancelled);
            }

            let position = tile.index + 1;
            match self.run_tile(image, &tile, transform) {
                Ok(output) => {
                    let dst = tile.output;
                    let src = tile.inner_output;
                    canvas
                        .slice_mut(s![.., .., dst.y..dst.bottom(), dst.x..dst.right()])
                        .assign(&output.slice(s![.., .., src.y..src.bottom(), src.x..src.right()]));
                    metrics::record_tile(transform.name());
                    debug!(tile = position, total, "Tile {}/{}", position, total);
                }
                Err(MediaError::Cancelled) => return Err(MediaError::Cancelled),
                Err(e) => {
                    metrics::record_tile_failure(transform.name());
                    match self.policy {
                        TileFailurePolicy::Abort => {
                            warn!(tile = position, total, error = %e, "Tile failed, aborting");
                            return Err(MediaError::tile_failed(position, total, e.to_string()));
                        }
                        TileFailurePolicy::ZeroFill => {
                            warn!(
                                tile = position,
                                total,
                                error = %e,
                                "Tile failed, leaving region zero-filled"
                            );
                            report.failed_tiles.push(tile.index);
                        }
                    }
                }
            }
        }

        debug!(
            tiles = total,
            failed = report.failed_tiles.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Tiled inference finished"
        );

        Ok((canvas, report))
    }

    /// Extract, align and transform one tile, validating the output shape.
    fn run_tile(
        &self,
        image: &Image,
        tile: &TileGeometry,
        transform: &dyn Transform,
    ) -> MediaResult<Image> {
        let region = tile.padded_input;
        let input = image
            .slice(s![.., .., region.y..region.bottom(), region.x..region.right()])
            .to_owned();

        let input = match self.window_size {
            Some(window) if window > 1 => reflect_pad(
                &input,
                mod_padding(region.height, window),
                mod_padding(region.width, window),
            ),
            _ => input,
        };

        let (n, c, _, _) = input.dim();
        let (ih, iw) = spatial_dims(&input);
        let scale = transform.scale();
        let output = transform.forward(&input)?;

        let expected = [n, c, ih * scale, iw * scale];
        if output.shape() != &expected[..] {
            return Err(MediaError::shape_mismatch(format!(
                "expected transform output {:?}, got {:?}",
                expected,
                output.shape()
            )));
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ndarray::Array4;

    use super::*;
    use crate::reference::NearestNeighbor;

    fn pattern(h: usize, w: usize) -> Image {
        Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
            ((c * 31 + y * 17 + x * 7) % 97) as f32 / 96.0
        })
    }

    /// Fails on the n-th call (1-based).
    struct FailOnCall {
        inner: NearestNeighbor,
        fail_at: usize,
        calls: AtomicUsize,
    }

    impl FailOnCall {
        fn new(scale: usize, fail_at: usize) -> Self {
            Self {
                inner: NearestNeighbor::new(scale),
                fail_at,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Transform for FailOnCall {
        fn name(&self) -> &str {
            "fail_on_call"
        }

        fn scale(&self) -> usize {
            self.inner.scale()
        }

        fn forward(&self, input: &Image) -> MediaResult<Image> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.fail_at {
                return Err(MediaError::inference("out of memory"));
            }
            self.inner.forward(input)
        }
    }

    /// Claims scale 2 but returns its input unchanged.
    struct WrongShape;

    impl Transform for WrongShape {
        fn name(&self) -> &str {
            "wrong_shape"
        }

        fn scale(&self) -> usize {
            2
        }

        fn forward(&self, input: &Image) -> MediaResult<Image> {
            Ok(input.clone())
        }
    }

    /// Rejects inputs whose dimensions are not multiples of `window`.
    struct Windowed {
        inner: NearestNeighbor,
        window: usize,
    }

    impl Transform for Windowed {
        fn name(&self) -> &str {
            "windowed"
        }

        fn scale(&self) -> usize {
            self.inner.scale()
        }

        fn forward(&self, input: &Image) -> MediaResult<Image> {
            let (h, w) = spatial_dims(input);
            if h % self.window != 0 || w % self.window != 0 {
                return Err(MediaError::inference(format!("{}x{} not aligned", w, h)));
            }
            self.inner.forward(input)
        }
    }

    /// Cancels the shared token during its first call.
    struct CancelsDuringFirstTile {
        token: CancelToken,
        calls: AtomicUsize,
    }

    impl Transform for CancelsDuringFirstTile {
        fn name(&self) -> &str {
            "cancels"
        }

        fn scale(&self) -> usize {
            1
        }

        fn forward(&self, input: &Image) -> MediaResult<Image> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.token.cancel();
            Ok(input.clone())
        }
    }

    #[test]
    fn test_output_dims_scale() {
        let image = pattern(530, 700);
        let scheduler = TileScheduler::new(400, 10);
        let (output, report) = scheduler
            .run(&image, &NearestNeighbor::new(2), &CancelToken::new())
            .unwrap();

        assert_eq!(output.shape(), &[1, 3, 1060, 1400]);
        assert_eq!((report.tiles_x, report.tiles_y, report.tiles_total), (2, 2, 4));
        assert!(report.is_complete());
    }

    #[test]
    fn test_tiled_matches_whole_image() {
        let image = pattern(37, 23);
        let transform = NearestNeighbor::new(3);
        let cancel = CancelToken::new();

        let (tiled, report) = TileScheduler::new(8, 3).run(&image, &transform, &cancel).unwrap();
        let (whole, single) = TileScheduler::new(0, 3).run(&image, &transform, &cancel).unwrap();

        assert_eq!(report.tiles_total, 15);
        assert_eq!(single.tiles_total, 1);
        assert_eq!(tiled, whole);
        assert_eq!(whole, transform.forward(&image).unwrap());
    }

    #[test]
    fn test_every_output_pixel_written() {
        let image = Image::from_elem((1, 3, 19, 26), 0.5);
        let (output, _) = TileScheduler::new(7, 2)
            .run(&image, &NearestNeighbor::new(4), &CancelToken::new())
            .unwrap();
        assert!(output.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_abort_on_tile_failure() {
        let image = pattern(20, 20);
        let transform = FailOnCall::new(2, 2);
        let err = TileScheduler::new(10, 2)
            .run(&image, &transform, &CancelToken::new())
            .unwrap_err();

        match err {
            MediaError::TileFailed { index, total, message } => {
                assert_eq!(index, 2);
                assert_eq!(total, 4);
                assert!(message.contains("out of memory"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transform.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_fill_leaves_region_empty() {
        let image = Image::from_elem((1, 3, 20, 20), 0.75);
        let transform = FailOnCall::new(2, 2);
        let (output, report) = TileScheduler::new(10, 2)
            .with_policy(TileFailurePolicy::ZeroFill)
            .run(&image, &transform, &CancelToken::new())
            .unwrap();

        assert_eq!(report.failed_tiles, vec![1]);
        assert!(!report.is_complete());
        // Tile 1 is the top-right tile: output columns 20..40, rows 0..20.
        assert!(output.slice(s![.., .., 0..20, 20..40]).iter().all(|&v| v == 0.0));
        assert!(output.slice(s![.., .., 0..20, 0..20]).iter().all(|&v| v == 0.75));
        assert!(output.slice(s![.., .., 20..40, ..]).iter().all(|&v| v == 0.75));
    }

    #[test]
    fn test_wrong_output_shape_is_tile_failure() {
        let image = pattern(8, 8);
        let err = TileScheduler::new(0, 0)
            .run(&image, &WrongShape, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, MediaError::TileFailed { index: 1, total: 1, .. }));
    }

    #[test]
    fn test_window_alignment() {
        let image = pattern(37, 23);
        let transform = Windowed {
            inner: NearestNeighbor::new(1),
            window: 8,
        };
        let cancel = CancelToken::new();

        let unaligned = TileScheduler::new(10, 3).run(&image, &transform, &cancel);
        assert!(unaligned.is_err());

        let (output, _) = TileScheduler::new(10, 3)
            .with_window(Some(8))
            .run(&image, &transform, &cancel)
            .unwrap();
        assert_eq!(output, image);
    }

    #[test]
    fn test_cancelled_before_start() {
        let image = pattern(8, 8);
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = TileScheduler::new(4, 0)
            .run(&image, &NearestNeighbor::new(1), &cancel)
            .unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));
    }

    #[test]
    fn test_cancel_stops_at_next_tile_boundary() {
        let image = pattern(8, 8);
        let token = CancelToken::new();
        let transform = CancelsDuringFirstTile {
            token: token.clone(),
            calls: AtomicUsize::new(0),
        };

        let err = TileScheduler::new(4, 0).run(&image, &transform, &token).unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));
        assert_eq!(transform.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("abort".parse::<TileFailurePolicy>().unwrap(), TileFailurePolicy::Abort);
        assert_eq!(
            "zero_fill".parse::<TileFailurePolicy>().unwrap(),
            TileFailurePolicy::ZeroFill
        );
        assert!("skip".parse::<TileFailurePolicy>().is_err());
        assert_eq!(TileFailurePolicy::default(), TileFailurePolicy::Abort);
    }
}

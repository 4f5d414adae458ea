//! Weight-free transforms for pipeline checks.

use ndarray::Array4;

use crate::error::MediaResult;
use crate::image::Image;
use crate::transform::Transform;

/// Nearest-neighbour upscaling. Purely local, so tiled and whole-image
/// runs produce identical output.
#[derive(Debug, Clone)]
pub struct NearestNeighbor {
    name: String,
    scale: usize,
}

impl NearestNeighbor {
    pub fn new(scale: usize) -> Self {
        let scale = scale.max(1);
        Self {
            name: format!("nearest_x{}", scale),
            scale,
        }
    }
}

impl Transform for NearestNeighbor {
    fn name(&self) -> &str {
        &self.name
    }

    fn scale(&self) -> usize {
        self.scale
    }

    fn forward(&self, input: &Image) -> MediaResult<Image> {
        let s = self.scale;
        let (n, c, h, w) = input.dim();
        Ok(Array4::from_shape_fn((n, c, h * s, w * s), |(b, ch, y, x)| {
            input[[b, ch, y / s, x / s]]
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_neighbor_repeats_pixels() {
        let input = Array4::from_shape_fn((1, 3, 2, 2), |(_, c, y, x)| (c * 4 + y * 2 + x) as f32);
        let output = NearestNeighbor::new(2).forward(&input).unwrap();

        assert_eq!(output.shape(), &[1, 3, 4, 4]);
        assert_eq!(output[[0, 0, 1, 1]], input[[0, 0, 0, 0]]);
        assert_eq!(output[[0, 2, 3, 2]], input[[0, 2, 1, 1]]);
    }
}

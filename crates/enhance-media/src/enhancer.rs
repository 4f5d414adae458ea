//! End-to-end enhancement of a single image.

use std::sync::Arc;

use enhance_models::ModelDescriptor;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::image::{decode_image, encode_png, spatial_dims, Image};
use crate::padding;
use crate::tiling::{TileFailurePolicy, TileReport, TileScheduler};
use crate::transform::{CancelToken, Transform};

/// Tiling and padding parameters for an [`Enhancer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhanceConfig {
    /// Zero disables tiling.
    pub tile_size: usize,
    pub tile_pad: usize,
    pub pre_pad: usize,
    pub failure_policy: TileFailurePolicy,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            tile_size: 400,
            tile_pad: 10,
            pre_pad: 10,
            failure_policy: TileFailurePolicy::Abort,
        }
    }
}

/// Encoded result of [`Enhancer::enhance_bytes`].
#[derive(Debug, Clone)]
pub struct EnhanceOutput {
    /// PNG-encoded image.
    pub png: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub report: TileReport,
}

/// Pads, tiles, runs and crops one model over an image.
pub struct Enhancer {
    descriptor: ModelDescriptor,
    transform: Arc<dyn Transform>,
    config: EnhanceConfig,
}

impl Enhancer {
    /// Pair a loaded transform with its descriptor.
    ///
    /// Fails if the transform's scale disagrees with the descriptor.
    pub fn new(
        descriptor: ModelDescriptor,
        transform: Arc<dyn Transform>,
        config: EnhanceConfig,
    ) -> MediaResult<Self> {
        if transform.scale() != descriptor.scale {
            return Err(MediaError::model_load(
                descriptor.name.as_str(),
                format!(
                    "transform scale {} does not match descriptor scale {}",
                    transform.scale(),
                    descriptor.scale
                ),
            ));
        }

        Ok(Self {
            descriptor,
            transform,
            config,
        })
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn config(&self) -> &EnhanceConfig {
        &self.config
    }

    fn scheduler(&self) -> TileScheduler {
        TileScheduler::new(self.config.tile_size, self.config.tile_pad)
            .with_window(self.descriptor.window_size)
            .with_policy(self.config.failure_policy)
    }

    /// Enhance a decoded image. The result is `(H * scale, W * scale)` with
    /// values in `[0, 1]`.
    pub fn enhance(&self, image: &Image, cancel: &CancelToken) -> MediaResult<(Image, TileReport)> {
        let (padded, plan) = padding::plan(
            image,
            self.descriptor.scale,
            self.descriptor.mod_divisor,
            self.config.pre_pad,
        )?;

        let (ph, pw) = spatial_dims(&padded);
        debug!(
            model = %self.descriptor.name.as_str(),
            padded_width = pw,
            padded_height = ph,
            mod_pad_h = plan.mod_pad_h,
            mod_pad_w = plan.mod_pad_w,
            "Padded input"
        );

        let (output, report) = self.scheduler().run(&padded, self.transform.as_ref(), cancel)?;
        let output = padding::invert(output, &plan)?;
        Ok((output, report))
    }

    /// Decode `bytes`, enhance, and encode the result as PNG.
    pub fn enhance_bytes(&self, bytes: &[u8], cancel: &CancelToken) -> MediaResult<EnhanceOutput> {
        let image = decode_image(bytes)?;
        let (output, report) = self.enhance(&image, cancel)?;
        let (height, width) = spatial_dims(&output);

        Ok(EnhanceOutput {
            png: encode_png(&output)?,
            width,
            height,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use ::image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
    use enhance_models::ModelName;
    use ndarray::Array4;

    use super::*;
    use crate::reference::NearestNeighbor;

    struct AlwaysFails;

    impl Transform for AlwaysFails {
        fn name(&self) -> &str {
            "always_fails"
        }

        fn scale(&self) -> usize {
            1
        }

        fn forward(&self, _input: &Image) -> MediaResult<Image> {
            Err(MediaError::inference("device lost"))
        }
    }

    fn enhancer(model: ModelName, config: EnhanceConfig) -> Enhancer {
        let descriptor = model.descriptor();
        Enhancer::new(
            descriptor,
            Arc::new(NearestNeighbor::new(descriptor.scale)),
            config,
        )
        .unwrap()
    }

    fn png(rgb: &RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(rgb.clone())
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_output_dims_for_large_image() {
        let image = Image::from_elem((1, 3, 530, 700), 0.25);
        let enhancer = enhancer(ModelName::RealEsrganX2, EnhanceConfig::default());

        let (output, report) = enhancer.enhance(&image, &CancelToken::new()).unwrap();
        assert_eq!(output.shape(), &[1, 3, 1060, 1400]);
        assert_eq!((report.tiles_x, report.tiles_y), (2, 2));
    }

    #[test]
    fn test_output_dims_independent_of_tiling() {
        let image = Array4::from_shape_fn((1, 3, 45, 31), |(_, c, y, x)| {
            ((c + y * 3 + x * 5) % 11) as f32 / 10.0
        });

        for model in [ModelName::RealEsrganX2, ModelName::RealEsrganX4, ModelName::Scunet] {
            let scale = model.descriptor().scale;
            let mut outputs = Vec::new();
            for tile_size in [0, 8, 16, 400] {
                let config = EnhanceConfig {
                    tile_size,
                    ..Default::default()
                };
                let (output, _) = enhancer(model, config)
                    .enhance(&image, &CancelToken::new())
                    .unwrap();
                assert_eq!(output.shape(), &[1, 3, 45 * scale, 31 * scale]);
                outputs.push(output);
            }
            assert!(outputs.windows(2).all(|pair| pair[0] == pair[1]));
        }
    }

    #[test]
    fn test_enhance_bytes_round_trip() {
        let rgb = RgbImage::from_fn(30, 20, |x, y| Rgb([(x * 8) as u8, (y * 12) as u8, 200]));
        let enhancer = enhancer(
            ModelName::RealEsrganX2,
            EnhanceConfig {
                tile_size: 16,
                ..Default::default()
            },
        );

        let output = enhancer.enhance_bytes(&png(&rgb), &CancelToken::new()).unwrap();
        assert_eq!((output.width, output.height), (60, 40));

        let decoded = ::image::load_from_memory(&output.png).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (60, 40));
        for (x, y, pixel) in decoded.enumerate_pixels() {
            assert_eq!(pixel, rgb.get_pixel(x / 2, y / 2));
        }
    }

    #[test]
    fn test_decode_failure() {
        let enhancer = enhancer(ModelName::Mlwnet, EnhanceConfig::default());
        let err = enhancer.enhance_bytes(b"garbage", &CancelToken::new()).unwrap_err();
        assert!(matches!(err, MediaError::Decode(_)));
    }

    #[test]
    fn test_tile_failure_aborts() {
        let enhancer = Enhancer::new(
            ModelName::NafnetSidd.descriptor(),
            Arc::new(AlwaysFails),
            EnhanceConfig::default(),
        )
        .unwrap();

        let image = Image::from_elem((1, 3, 12, 12), 0.5);
        let err = enhancer.enhance(&image, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, MediaError::TileFailed { index: 1, .. }));
    }

    #[test]
    fn test_scale_mismatch_rejected() {
        let result = Enhancer::new(
            ModelName::RealEsrganX4.descriptor(),
            Arc::new(NearestNeighbor::new(2)),
            EnhanceConfig::default(),
        );
        assert!(matches!(result, Err(MediaError::ModelLoad { .. })));
    }
}

//! Runs one job through the enhancement pipeline.

use std::sync::Arc;

use enhance_media::{CancelToken, EnhanceConfig, EnhanceOutput, Enhancer};
use enhance_queue::EnhanceJob;

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::models::TransformRegistry;

/// Turns a job payload into an enhanced PNG.
pub struct JobProcessor {
    registry: Arc<TransformRegistry>,
    config: EnhanceConfig,
}

impl JobProcessor {
    pub fn new(registry: Arc<TransformRegistry>, config: EnhanceConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<TransformRegistry> {
        &self.registry
    }

    /// Load the model (if needed) and enhance the job's image.
    ///
    /// Model loading and inference run on the blocking thread pool. A load
    /// failure aborts the job before any tile is processed.
    pub async fn process(
        &self,
        job: &EnhanceJob,
        cancel: CancelToken,
        logger: &JobLogger,
    ) -> WorkerResult<EnhanceOutput> {
        let model = job.model();
        let registry = Arc::clone(&self.registry);
        let transform = tokio::task::spawn_blocking(move || registry.get_or_load(model))
            .await
            .map_err(|e| WorkerError::processing_failed(format!("model load task failed: {}", e)))??;

        let enhancer = Enhancer::new(model.descriptor(), transform, self.config)?;
        logger.log_progress(&format!(
            "running {} with tile_size={} tile_pad={} pre_pad={}",
            model, self.config.tile_size, self.config.tile_pad, self.config.pre_pad
        ));

        let payload = job.payload.clone();
        let output = tokio::task::spawn_blocking(move || enhancer.enhance_bytes(&payload, &cancel))
            .await
            .map_err(|e| WorkerError::processing_failed(format!("inference task failed: {}", e)))??;

        if !output.report.is_complete() {
            logger.log_warning(&format!(
                "{} of {} tiles zero-filled",
                output.report.failed_tiles.len(),
                output.report.tiles_total
            ));
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use enhance_media::{MediaError, MediaResult, NearestNeighbor, TileFailurePolicy, Transform};
    use enhance_models::{ModelDescriptor, ModelName};
    use image::{DynamicImage, ImageOutputFormat, RgbImage};

    use super::*;
    use crate::models::TransformLoader;

    struct NearestLoader;

    impl TransformLoader for NearestLoader {
        fn load(&self, descriptor: &ModelDescriptor) -> MediaResult<Arc<dyn Transform>> {
            Ok(Arc::new(NearestNeighbor::new(descriptor.scale)))
        }
    }

    struct BrokenLoader;

    impl TransformLoader for BrokenLoader {
        fn load(&self, descriptor: &ModelDescriptor) -> MediaResult<Arc<dyn Transform>> {
            Err(MediaError::model_load(descriptor.name.as_str(), "truncated file"))
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30])))
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    fn processor(loader: impl TransformLoader + 'static) -> JobProcessor {
        JobProcessor::new(
            Arc::new(TransformRegistry::new(loader)),
            EnhanceConfig {
                tile_size: 32,
                tile_pad: 4,
                pre_pad: 4,
                failure_policy: TileFailurePolicy::Abort,
            },
        )
    }

    #[tokio::test]
    async fn test_process_upscales() {
        let processor = processor(NearestLoader);
        let job = EnhanceJob::new(ModelName::RealEsrganX4, png(50, 30));
        let logger = JobLogger::new(job.job_id(), job.model());

        let output = processor.process(&job, CancelToken::new(), &logger).await.unwrap();
        assert_eq!((output.width, output.height), (200, 120));
        assert_eq!((output.report.tiles_x, output.report.tiles_y), (2, 2));
    }

    #[tokio::test]
    async fn test_model_load_failure_is_fatal() {
        let processor = processor(BrokenLoader);
        let job = EnhanceJob::new(ModelName::Mlwnet, png(8, 8));
        let logger = JobLogger::new(job.job_id(), job.model());

        let err = processor.process(&job, CancelToken::new(), &logger).await.unwrap_err();
        assert!(err.is_model_load());
    }

    #[tokio::test]
    async fn test_cancelled_job() {
        let processor = processor(NearestLoader);
        let job = EnhanceJob::new(ModelName::NafnetSidd, png(8, 8));
        let logger = JobLogger::new(job.job_id(), job.model());
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = processor.process(&job, cancel, &logger).await.unwrap_err();
        assert!(matches!(err, WorkerError::Cancelled));
    }

    #[tokio::test]
    async fn test_undecodable_payload() {
        let processor = processor(NearestLoader);
        let job = EnhanceJob::new(ModelName::NafnetSidd, b"not an image".to_vec());
        let logger = JobLogger::new(job.job_id(), job.model());

        let err = processor.process(&job, CancelToken::new(), &logger).await.unwrap_err();
        assert_eq!(err.reason(), "decode");
    }
}

//! Loaded transforms, one per model per worker.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use enhance_media::{MediaResult, OnnxTransform, Transform};
use enhance_models::{ModelDescriptor, ModelName};
use tracing::{info, warn};

use crate::error::{WorkerError, WorkerResult};

/// Builds a transform from a model descriptor.
pub trait TransformLoader: Send + Sync {
    fn load(&self, descriptor: &ModelDescriptor) -> MediaResult<Arc<dyn Transform>>;
}

/// Loads ONNX weights from a directory.
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    models_dir: PathBuf,
}

impl OnnxLoader {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }
}

impl TransformLoader for OnnxLoader {
    fn load(&self, descriptor: &ModelDescriptor) -> MediaResult<Arc<dyn Transform>> {
        Ok(Arc::new(OnnxTransform::load(&self.models_dir, descriptor)?))
    }
}

/// Caches transforms so each model is loaded at most once per worker.
///
/// Failed loads are not cached; the next job for the model retries.
pub struct TransformRegistry {
    loader: Box<dyn TransformLoader>,
    loaded: Mutex<HashMap<ModelName, Arc<dyn Transform>>>,
}

impl TransformRegistry {
    pub fn new(loader: impl TransformLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached transform for `model`, loading it on first use.
    ///
    /// Blocks while loading; call from a blocking context.
    pub fn get_or_load(&self, model: ModelName) -> WorkerResult<Arc<dyn Transform>> {
        let mut loaded = self
            .loaded
            .lock()
            .map_err(|_| WorkerError::processing_failed("transform cache poisoned"))?;

        if let Some(transform) = loaded.get(&model) {
            return Ok(Arc::clone(transform));
        }

        let descriptor = model.descriptor();
        let transform = self.loader.load(&descriptor).map_err(|e| {
            warn!(model = %model, error = %e, "Model load failed");
            WorkerError::from(e)
        })?;

        if transform.scale() != descriptor.scale {
            return Err(WorkerError::ModelLoad {
                model: model.to_string(),
                message: format!(
                    "loaded transform has scale {}, registry says {}",
                    transform.scale(),
                    descriptor.scale
                ),
            });
        }

        info!(model = %model, "Transform ready");
        loaded.insert(model, Arc::clone(&transform));
        Ok(transform)
    }

    /// Load every listed model, stopping at the first failure.
    pub fn preload(&self, models: &[ModelName]) -> WorkerResult<()> {
        for model in models {
            self.get_or_load(*model)?;
        }
        Ok(())
    }

    pub fn is_loaded(&self, model: ModelName) -> bool {
        self.loaded
            .lock()
            .map(|loaded| loaded.contains_key(&model))
            .unwrap_or(false)
    }
}

//! ONNX Runtime backed transform.
//!
//! Exported enhancement networks take a single `[N, 3, H, W]` float input
//! and produce a single `[N, 3, H * scale, W * scale]` float output.

use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use enhance_models::ModelDescriptor;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};
use crate::image::Image;
use crate::metrics;
use crate::transform::Transform;

/// A model loaded into an ONNX Runtime session.
///
/// `Session::run` needs exclusive access, so calls are serialized.
pub struct OnnxTransform {
    name: String,
    scale: usize,
    output_name: String,
    session: Mutex<Session>,
}

impl std::fmt::Debug for OnnxTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxTransform")
            .field("name", &self.name)
            .field("scale", &self.scale)
            .field("output_name", &self.output_name)
            .finish()
    }
}

impl OnnxTransform {
    /// Load the weights for `descriptor` from `models_dir`.
    pub fn load(models_dir: &Path, descriptor: &ModelDescriptor) -> MediaResult<Self> {
        let name = descriptor.name.as_str();
        let path = models_dir.join(descriptor.weights_file);
        if !path.exists() {
            return Err(MediaError::model_load(
                name,
                format!("weights not found at {}", path.display()),
            ));
        }

        let start = Instant::now();
        let session = create_session(&path).map_err(|e| MediaError::model_load(name, e))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| MediaError::model_load(name, "model declares no outputs"))?;

        let elapsed = start.elapsed().as_secs_f64();
        metrics::record_model_load(name, elapsed);
        info!(
            model = name,
            path = %path.display(),
            elapsed_secs = elapsed,
            "Loaded ONNX model"
        );

        Ok(Self {
            name: name.to_string(),
            scale: descriptor.scale,
            output_name,
            session: Mutex::new(session),
        })
    }

    fn to_tensor(input: &Image) -> MediaResult<Value> {
        let shape = input.shape().to_vec();
        let data: Vec<f32> = input.iter().copied().collect();
        Tensor::from_array((shape, data.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::inference(format!("Failed to create tensor: {}", e)))
    }
}

impl Transform for OnnxTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn scale(&self) -> usize {
        self.scale
    }

    fn forward(&self, input: &Image) -> MediaResult<Image> {
        let tensor = Self::to_tensor(input)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::inference("ORT session poisoned"))?;

        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| MediaError::inference(format!("ONNX inference failed: {}", e)))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| MediaError::inference(format!("Missing {} tensor", self.output_name)))?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::inference(format!("Failed to extract tensor: {}", e)))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        let dims: [usize; 4] = dims.as_slice().try_into().map_err(|_| {
            MediaError::shape_mismatch(format!("expected 4-d output, got {:?}", dims))
        })?;

        debug!(model = %self.name, ?dims, "ONNX forward");
        Ok(Array4::from_shape_vec(dims, data.to_vec())?)
    }
}

/// Create ONNX Runtime session with automatic execution provider selection.
fn create_session(model_path: &Path) -> Result<Session, String> {
    let model_bytes =
        std::fs::read(model_path).map_err(|e| format!("Failed to read model file: {}", e))?;

    let builder = Session::builder()
        .map_err(|e| format!("Failed to create session builder: {}", e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| format!("Failed to set optimization level: {}", e))?;

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, using CPU");
    }

    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| format!("Failed to load ONNX model: {}", e))
}

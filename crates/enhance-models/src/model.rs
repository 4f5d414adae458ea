//! Model registry.
//!
//! Every supported transform is described declaratively by a
//! [`ModelDescriptor`]; padding and tiling consult the descriptor instead of
//! branching on model names.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while resolving or validating models.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Unknown operation selector: {0}")]
    UnknownSelector(String),

    #[error("Unsupported upscale factor: {0}")]
    UnsupportedScale(u32),

    #[error("Invalid descriptor for {model}: {reason}")]
    InvalidDescriptor { model: ModelName, reason: String },
}

/// Kind of enhancement a model performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Upscale,
    Deblur,
    Denoise,
}

/// Closed set of models a worker can load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ModelName {
    /// Real-ESRGAN, 2x super resolution
    RealEsrganX2,
    /// Real-ESRGAN, 4x super resolution
    RealEsrganX4,
    /// NAFNet trained on SIDD (denoising)
    NafnetSidd,
    /// MLWNet (motion deblurring)
    Mlwnet,
    /// SCUNet (denoising, window attention)
    Scunet,
}

/// Static description of a model's geometry requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
pub struct ModelDescriptor {
    pub name: ModelName,
    pub task: Task,
    /// ONNX weights file, relative to the models directory
    pub weights_file: &'static str,
    /// Output is `scale` times larger than the input on both axes
    pub scale: usize,
    /// Input height and width must be multiples of this
    pub mod_divisor: usize,
    /// Tiles must additionally be padded to a multiple of this
    pub window_size: Option<usize>,
}

impl ModelName {
    pub const ALL: &'static [ModelName] = &[
        ModelName::RealEsrganX2,
        ModelName::RealEsrganX4,
        ModelName::NafnetSidd,
        ModelName::Mlwnet,
        ModelName::Scunet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelName::RealEsrganX2 => "real_esrgan_x2",
            ModelName::RealEsrganX4 => "real_esrgan_x4",
            ModelName::NafnetSidd => "nafnet_sidd",
            ModelName::Mlwnet => "mlwnet",
            ModelName::Scunet => "scunet",
        }
    }

    pub fn descriptor(&self) -> ModelDescriptor {
        match self {
            ModelName::RealEsrganX2 => ModelDescriptor {
                name: *self,
                task: Task::Upscale,
                weights_file: "real_esrgan_x2.onnx",
                scale: 2,
                mod_divisor: 2,
                window_size: None,
            },
            ModelName::RealEsrganX4 => ModelDescriptor {
                name: *self,
                task: Task::Upscale,
                weights_file: "real_esrgan_x4.onnx",
                scale: 4,
                mod_divisor: 4,
                window_size: None,
            },
            ModelName::NafnetSidd => ModelDescriptor {
                name: *self,
                task: Task::Denoise,
                weights_file: "nafnet_sidd.onnx",
                scale: 1,
                mod_divisor: 4,
                window_size: None,
            },
            ModelName::Mlwnet => ModelDescriptor {
                name: *self,
                task: Task::Deblur,
                weights_file: "mlwnet.onnx",
                scale: 1,
                mod_divisor: 4,
                window_size: None,
            },
            ModelName::Scunet => ModelDescriptor {
                name: *self,
                task: Task::Denoise,
                weights_file: "scunet.onnx",
                scale: 1,
                mod_divisor: 4,
                window_size: Some(64),
            },
        }
    }

    /// Check every registered descriptor. Called once at worker startup.
    pub fn validate_registry() -> Result<(), ModelError> {
        for model in Self::ALL {
            model.descriptor().validate()?;
        }
        Ok(())
    }
}

impl ModelDescriptor {
    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |reason: &str| ModelError::InvalidDescriptor {
            model: self.name,
            reason: reason.to_string(),
        };

        if self.scale == 0 {
            return Err(invalid("scale must be at least 1"));
        }
        if self.mod_divisor == 0 {
            return Err(invalid("mod divisor must be at least 1"));
        }
        if self.window_size == Some(0) {
            return Err(invalid("window size must be at least 1"));
        }
        if self.weights_file.is_empty() {
            return Err(invalid("missing weights file"));
        }
        Ok(())
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelName {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| ModelError::UnknownModel(s.to_string()))
    }
}

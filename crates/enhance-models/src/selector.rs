//! Operation selectors submitted by front ends.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::model::{ModelError, ModelName};

/// What the caller asked for, before it is resolved to a concrete model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Selector {
    /// Super resolution by a numeric factor
    Upscale { scale: u32 },
    Deblur,
    Denoise,
    /// Explicit model choice
    Model { model: ModelName },
}

impl Selector {
    /// Build a selector from an operation name and an optional scale.
    ///
    /// `upscale` defaults to a factor of 2 when no scale is given.
    pub fn parse(operation: &str, scale: Option<u32>) -> Result<Self, ModelError> {
        match operation.trim().to_lowercase().as_str() {
            "upscale" => Ok(Selector::Upscale {
                scale: scale.unwrap_or(2),
            }),
            "deblur" => Ok(Selector::Deblur),
            "denoise" => Ok(Selector::Denoise),
            other => other
                .parse::<ModelName>()
                .map(|model| Selector::Model { model })
                .map_err(|_| ModelError::UnknownSelector(operation.to_string())),
        }
    }

    /// Map the selector onto a registered model.
    pub fn resolve(&self) -> Result<ModelName, ModelError> {
        match self {
            Selector::Upscale { scale: 2 } => Ok(ModelName::RealEsrganX2),
            Selector::Upscale { scale: 4 } => Ok(ModelName::RealEsrganX4),
            Selector::Upscale { scale } => Err(ModelError::UnsupportedScale(*scale)),
            Selector::Deblur => Ok(ModelName::Mlwnet),
            Selector::Denoise => Ok(ModelName::NafnetSidd),
            Selector::Model { model } => Ok(*model),
        }
    }
}

impl FromStr for Selector {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, None)
    }
}

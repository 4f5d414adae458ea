//! Memory-bounded tiled inference for image enhancement.
//!
//! This crate provides:
//! - Conversion between encoded images and `[batch, channel, height, width]` tensors
//! - Reflect and divisibility padding with exact inversion
//! - Overlapping tile geometry and the tile scheduler that stitches outputs
//! - The `Transform` seam and an ONNX Runtime backed implementation
//! - The `Enhancer` pipeline tying the pieces together

pub mod enhancer;
pub mod error;
pub mod geometry;
pub mod image;
pub mod metrics;
pub mod onnx;
pub mod padding;
pub mod reference;
pub mod tiling;
pub mod transform;

pub use enhancer::{EnhanceConfig, EnhanceOutput, Enhancer};
pub use error::{MediaError, MediaResult};
pub use geometry::{PixelRect, TileGeometry, TileGrid};
pub use crate::image::{decode_image, encode_png, Image};
pub use onnx::OnnxTransform;
pub use padding::PaddingPlan;
pub use reference::NearestNeighbor;
pub use tiling::{TileFailurePolicy, TileReport, TileScheduler};
pub use transform::{CancelToken, Transform};

//! Reflect padding before inference and exact cropping afterwards.
//!
//! Padding is only ever added at the bottom and right edges, so the
//! top-left origin of the image is preserved through the whole pipeline
//! and inversion is a plain crop.

use ndarray::{s, Array4};
use serde::{Deserialize, Serialize};

use crate::error::{MediaError, MediaResult};
use crate::image::{spatial_dims, Image};

/// Padding recorded by [`plan`] and undone by [`invert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaddingPlan {
    /// Rows and columns of reflect padding added before divisibility padding.
    pub pre_pad: usize,
    /// Rows added so the padded height is a multiple of the divisor.
    pub mod_pad_h: usize,
    /// Columns added so the padded width is a multiple of the divisor.
    pub mod_pad_w: usize,
    /// Model scale factor the plan will be inverted with.
    pub scale: usize,
}

impl PaddingPlan {
    /// Total rows added at the bottom, in input pixels.
    pub fn bottom(&self) -> usize {
        self.pre_pad + self.mod_pad_h
    }

    /// Total columns added at the right, in input pixels.
    pub fn right(&self) -> usize {
        self.pre_pad + self.mod_pad_w
    }
}

/// Amount needed to round `dim` up to a multiple of `divisor`.
pub fn mod_padding(dim: usize, divisor: usize) -> usize {
    if divisor <= 1 {
        return 0;
    }
    (divisor - dim % divisor) % divisor
}

/// Index into a dimension of length `n` with mirror reflection that
/// excludes the edge pixel. Handles indices past `2n - 1` by bouncing.
fn reflect_index(i: usize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n - 1);
    let m = i % period;
    if m < n {
        m
    } else {
        period - m
    }
}

/// Reflect-pad an image at the bottom and right edges.
pub fn reflect_pad(image: &Image, bottom: usize, right: usize) -> Image {
    if bottom == 0 && right == 0 {
        return image.clone();
    }

    let (n, c, h, w) = image.dim();
    Array4::from_shape_fn((n, c, h + bottom, w + right), |(b, ch, y, x)| {
        image[[b, ch, reflect_index(y, h), reflect_index(x, w)]]
    })
}

/// Pad an image for a model with the given scale and divisibility constraint.
///
/// Reflect padding of `pre_pad` is applied first, then just enough reflect
/// padding to make both spatial dimensions multiples of `mod_divisor`.
pub fn plan(
    image: &Image,
    scale: usize,
    mod_divisor: usize,
    pre_pad: usize,
) -> MediaResult<(Image, PaddingPlan)> {
    let (h, w) = spatial_dims(image);
    if h == 0 || w == 0 {
        return Err(MediaError::invalid_image("cannot pad an empty image"));
    }
    if scale == 0 {
        return Err(MediaError::invalid_image("scale must be at least 1"));
    }

    let pre_padded = reflect_pad(image, pre_pad, pre_pad);
    let (ph, pw) = spatial_dims(&pre_padded);
    let mod_pad_h = mod_padding(ph, mod_divisor);
    let mod_pad_w = mod_padding(pw, mod_divisor);
    let padded = reflect_pad(&pre_padded, mod_pad_h, mod_pad_w);

    Ok((
        padded,
        PaddingPlan {
            pre_pad,
            mod_pad_h,
            mod_pad_w,
            scale,
        },
    ))
}

/// Remove the padding recorded in `plan` from a model output and clamp to `[0, 1]`.
///
/// Divisibility padding is cropped first, then pre-padding, each scaled by
/// the plan's factor.
pub fn invert(output: Image, plan: &PaddingPlan) -> MediaResult<Image> {
    let (h, w) = spatial_dims(&output);
    let crop_h = plan.bottom() * plan.scale;
    let crop_w = plan.right() * plan.scale;

    if crop_h >= h || crop_w >= w {
        return Err(MediaError::shape_mismatch(format!(
            "output {}x{} is smaller than padding {}x{} to remove",
            w, h, crop_w, crop_h
        )));
    }

    let mut cropped = output.slice(s![.., .., ..h - crop_h, ..w - crop_w]).to_owned();
    cropped.mapv_inplace(|v| v.clamp(0.0, 1.0));
    Ok(cropped)
}

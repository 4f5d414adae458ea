//! The inference seam used by the tile scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::MediaResult;
use crate::image::Image;

/// A deterministic image-to-image transform with a fixed scale factor.
///
/// `forward` maps `[N, C, H, W]` to `[N, C, H * scale, W * scale]`.
/// Implementations that are not reentrant must serialize calls internally.
pub trait Transform: Send + Sync {
    /// Model identifier, used for logging and metrics.
    fn name(&self) -> &str;

    /// Integer scale factor applied to height and width.
    fn scale(&self) -> usize;

    fn forward(&self, input: &Image) -> MediaResult<Image>;
}

impl<T: Transform + ?Sized> Transform for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn scale(&self) -> usize {
        (**self).scale()
    }

    fn forward(&self, input: &Image) -> MediaResult<Image> {
        (**self).forward(input)
    }
}

/// Shared flag checked at tile boundaries to stop a running job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());

        token.cancel();
        assert!(other.is_cancelled());
    }
}

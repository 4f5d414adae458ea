//! Terminal job outcomes and their wire encoding.

/// Literal stored in place of an image when processing failed.
///
/// Never a prefix of a PNG (or any other supported) image header.
pub const FAILURE_SENTINEL: &[u8] = b"error";

/// Value of a result record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultOutcome {
    /// Encoded result image
    Success(Vec<u8>),
    /// Processing failed; there is no image to decode
    Failure,
}

impl ResultOutcome {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        if bytes == FAILURE_SENTINEL {
            ResultOutcome::Failure
        } else {
            ResultOutcome::Success(bytes)
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            ResultOutcome::Success(bytes) => bytes,
            ResultOutcome::Failure => FAILURE_SENTINEL.to_vec(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResultOutcome::Success(_))
    }
}

use std::time::Duration;

use image::GrayImage;
use thiserror::Error;

/// Failures surfaced by the perception and actuation core.
#[derive(Debug, Error)]
pub enum Error {
    /// Nothing could be located: the template never fit the parent image,
    /// or no pixel of the requested colour exists.
    #[error("no match found for {0}")]
    NoMatchFound(String),

    #[error("{target}: confidence {confidence:.3} below threshold {threshold:.3}")]
    LowConfidence {
        target: String,
        confidence: f64,
        threshold: f64,
    },

    /// The hover text never confirmed the target. Distinct from
    /// `NoMatchFound`: something was found, it just was the wrong thing.
    #[error("{target}: hover text {seen:?} matched none of {expected:?} after {attempts} attempt(s)")]
    VerificationMismatch {
        target: String,
        expected: Vec<String>,
        seen: Option<String>,
        attempts: u32,
    },

    #[error("termination requested")]
    Terminated,

    #[error("still resting after {0:?}")]
    RestTimeout(Duration),

    /// Numeric extraction failed; `image` is the binarised crop handed to the reader.
    #[error("ocr: {reason}")]
    Ocr { reason: String, image: GrayImage },

    /// A caller (usually a bot script) passed a value that cannot be honoured.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors a locate loop may retry at looser settings.
    pub fn is_locate_miss(&self) -> bool {
        matches!(self, Error::NoMatchFound(_) | Error::LowConfidence { .. })
    }
}

//! Error kinds reported by the engine.
//!
//! Every error is fatal for the call that produced it: no output is written
//! and nothing is retried. Turning these into user-facing messages or exit
//! codes is left to the caller.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Bm3dError {
    /// Non-positive dimensions, unsupported channel count, or an image too
    /// small to hold a single patch.
    #[error("invalid geometry {width}x{height}x{channels}: {reason}")]
    InvalidGeometry {
        width: usize,
        height: usize,
        channels: usize,
        reason: String,
    },

    /// A scalar parameter outside its valid range.
    #[error("invalid parameter `{name}` = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    /// A working buffer could not be reserved.
    #[error("failed to allocate {what} ({elements} elements)")]
    AllocationFailure { what: &'static str, elements: usize },

    /// Input does not match the geometry the engine was configured for.
    #[error("geometry mismatch: engine is configured for {expected}, got {actual}")]
    GeometryMismatch { expected: String, actual: String },
}

pub type Result<T> = std::result::Result<T, Bm3dError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_are_descriptive() {
        let err = Bm3dError::InvalidParameter {
            name: "lambda",
            value: -1.0,
            reason: "must be finite and > 0",
        };
        assert_eq!(
            err.to_string(),
            "invalid parameter `lambda` = -1: must be finite and > 0"
        );

        let err = Bm3dError::GeometryMismatch {
            expected: "64x64x1".to_string(),
            actual: "100 samples".to_string(),
        };
        assert!(err.to_string().contains("64x64x1"));
        assert!(err.to_string().contains("100 samples"));
    }
}

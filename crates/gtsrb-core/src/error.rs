//! Error types for the GTSRB data pipeline.
//!
//! Structural failures (missing sources, empty sources, unsplittable classes,
//! malformed bundles, exhausted memory) are terminal for a run and carry the
//! [`Stage`] that raised them. Per-sample problems never reach this type; the
//! components log and count them instead.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::Stage;

/// Main error type for the pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// A required input path does not exist
    #[error("[{stage}] source not found: {}", path.display())]
    SourceNotFound { stage: Stage, path: PathBuf },

    /// The source exists but produced zero usable samples
    #[error("[{stage}] no usable samples could be loaded from {}", path.display())]
    EmptySource { stage: Stage, path: PathBuf },

    /// Stratified splitting cannot place this class into both parts
    #[error("[{stage}] class {class} has {count} sample(s); at least 2 are required for a stratified split")]
    InsufficientSamples {
        stage: Stage,
        class: i64,
        count: usize,
    },

    /// A persisted bundle exists but does not have the expected structure
    #[error("[persist] malformed bundle {}: {reason}", path.display())]
    MalformedBundle { path: PathBuf, reason: String },

    /// Allocation of a large array failed
    #[error("[{stage}] could not allocate {requested_bytes} bytes: {guidance}")]
    ResourceExhausted {
        stage: Stage,
        requested_bytes: usize,
        guidance: String,
    },

    /// A file-system operation on a stage's input or output failed
    #[error("[{stage}] {}: {source}", path.display())]
    FileSystem {
        stage: Stage,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Images and labels disagree on the number of samples
    #[error("dataset length mismatch: {images} images vs {labels} labels")]
    LengthMismatch { images: usize, labels: usize },

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding/encoding error
    #[error("Image processing error: {0}")]
    Image(String),

    /// Test manifest could not be read
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid argument error
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Stage that raised the error, when the error is stage-bound.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::SourceNotFound { stage, .. }
            | Error::EmptySource { stage, .. }
            | Error::InsufficientSamples { stage, .. }
            | Error::ResourceExhausted { stage, .. }
            | Error::FileSystem { stage, .. } => Some(*stage),
            Error::MalformedBundle { .. } => Some(Stage::Persist),
            _ => None,
        }
    }

    /// Shorthand for [`Error::SourceNotFound`].
    pub fn not_found(stage: Stage, path: impl Into<PathBuf>) -> Self {
        Error::SourceNotFound {
            stage,
            path: path.into(),
        }
    }

    /// Wraps an IO error with the stage and path it happened on.
    pub fn fs(stage: Stage, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::FileSystem {
            stage,
            path: path.into(),
            source,
        }
    }

    /// Shorthand for [`Error::MalformedBundle`].
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::MalformedBundle {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Manifest(err.to_string())
    }
}

/// Specialized Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_stage_and_path() {
        let err = Error::not_found(Stage::Ingest, "/data/raw/Train");
        let msg = err.to_string();
        assert!(msg.contains("ingest"));
        assert!(msg.contains("/data/raw/Train"));
    }

    #[test]
    fn test_insufficient_samples_names_class() {
        let err = Error::InsufficientSamples {
            stage: Stage::Split,
            class: 7,
            count: 1,
        };
        assert!(err.to_string().contains("class 7"));
        assert_eq!(err.stage(), Some(Stage::Split));
    }

    #[test]
    fn test_resource_exhausted_carries_guidance() {
        let err = Error::ResourceExhausted {
            stage: Stage::Augment,
            requested_bytes: 1 << 30,
            guidance: "lower augmentations_per_minority".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("augment"));
        assert!(msg.contains("lower augmentations_per_minority"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.stage(), None);
    }

    #[test]
    fn test_file_system_error_names_stage_and_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = Error::fs(Stage::Clean, "/data/cleaned/00003", io_err);
        assert_eq!(err.stage(), Some(Stage::Clean));
        let msg = err.to_string();
        assert!(msg.starts_with("[clean] /data/cleaned/00003"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_malformed_is_persist_stage() {
        let err = Error::malformed("bundle.npz", "missing key 'labels'");
        assert_eq!(err.stage(), Some(Stage::Persist));
    }
}

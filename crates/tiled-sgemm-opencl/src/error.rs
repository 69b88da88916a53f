//! Error types for OpenCL operations.

use thiserror::Error;
use tiled_sgemm::SgemmError;

/// Errors raised while bootstrapping or driving an OpenCL device.
#[derive(Debug, Error)]
pub enum OpenClError {
    /// No OpenCL platform is installed.
    #[error("No OpenCL platform available")]
    NoPlatform,

    /// Requested platform index does not exist.
    #[error("Platform index {index} out of range ({count} platforms)")]
    PlatformIndex { index: usize, count: usize },

    /// Requested GPU index does not exist on the platform.
    #[error("GPU index {index} out of range on platform {platform} ({count} GPUs)")]
    DeviceIndex {
        platform: String,
        index: usize,
        count: usize,
    },

    /// An OpenCL API call failed.
    #[error("{call} failed: {reason}")]
    Api { call: &'static str, reason: String },
}

impl OpenClError {
    pub(crate) fn api(call: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Api {
            call,
            reason: err.to_string(),
        }
    }
}

impl From<OpenClError> for SgemmError {
    fn from(err: OpenClError) -> Self {
        SgemmError::Resource(err.to_string())
    }
}

/// Result type for OpenCL operations.
pub type Result<T> = std::result::Result<T, OpenClError>;

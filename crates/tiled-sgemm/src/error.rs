//! Error types for the dispatch pipeline.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A tiling configuration that breaks one of the launch invariants.
///
/// The messages mirror the diagnostics printed before a launch is refused,
/// including the arithmetic that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TilingViolation {
    /// One of BM, BN, BK, WIM, WIN is not a power of two.
    #[error("BM,BN,BK,WIM,WIN should be powers of two (got {bm},{bn},{bk},{wim},{win})")]
    NotPowerOfTwo {
        bm: usize,
        bn: usize,
        bk: usize,
        wim: usize,
        win: usize,
    },

    /// A tile product does not fit the host's integer width.
    #[error("BM,BN,BK,WIM,WIN are too large: tile sizes overflow (got {bm},{bn},{bk},{wim},{win})")]
    Overflow {
        bm: usize,
        bn: usize,
        bk: usize,
        wim: usize,
        win: usize,
    },

    /// The A tile cannot be split evenly across the work-group.
    #[error(
        "BM * BK should be a multiple of the number of work items per group: \
         {bm} * {bk} = {tile}, {bm} * {bn} / ({wim} * {win}) = {work_items}"
    )]
    ATileNotDivisible {
        bm: usize,
        bn: usize,
        bk: usize,
        wim: usize,
        win: usize,
        tile: usize,
        work_items: usize,
    },

    /// The B tile cannot be split evenly across the work-group.
    #[error(
        "BN * BK should be a multiple of the number of work items per group: \
         {bn} * {bk} = {tile}, {bm} * {bn} / ({wim} * {win}) = {work_items}"
    )]
    BTileNotDivisible {
        bm: usize,
        bn: usize,
        bk: usize,
        wim: usize,
        win: usize,
        tile: usize,
        work_items: usize,
    },

    /// Work-group height exceeds the device limit.
    #[error(
        "BM / WIM should be less or equal to the max local size {max_local_size}: \
         {bm} / {wim} = {local} > {max_local_size}"
    )]
    RowsExceedLocalSize {
        bm: usize,
        wim: usize,
        local: usize,
        max_local_size: usize,
    },

    /// Work-group width exceeds the device limit.
    #[error(
        "BN / WIN should be less or equal to the max local size {max_local_size}: \
         {bn} / {win} = {local} > {max_local_size}"
    )]
    ColsExceedLocalSize {
        bn: usize,
        win: usize,
        local: usize,
        max_local_size: usize,
    },
}

/// First differing element found by an exact matrix comparison.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("not equal: expected[{row}][{col}]({expected:.2}) != actual[{row}][{col}]({actual:.2})")]
pub struct Mismatch {
    pub row: usize,
    pub col: usize,
    pub expected: f32,
    pub actual: f32,
}

/// Errors that can occur anywhere in the pipeline.
#[derive(Debug, Error)]
pub enum SgemmError {
    /// Tiling configuration violates a launch invariant.
    #[error("Configuration error: {0}")]
    Configuration(#[from] TilingViolation),

    /// Device resource creation, transfer or release failed.
    #[error("Resource error: {0}")]
    Resource(String),

    /// Kernel source could not be read.
    #[error("Could not open kernel file {}: {source}", path.display())]
    KernelSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Kernel compilation failed.
    #[error("Could not build kernel {kernel}:\n{log}")]
    Build { kernel: String, log: String },

    /// A result or a transposed operand differs from its host reference.
    #[error("Validation error: {0}")]
    Validation(#[from] Mismatch),

    /// Matrix shapes do not match the requested multiply.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A bounded wait on the device expired.
    #[error("Timed out after {timeout:?} waiting for {operation}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },
}

impl SgemmError {
    /// Shorthand for a [`SgemmError::Resource`] built from any message.
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, SgemmError>;

//! Tiled single-precision matrix multiplication on GPU compute devices.
//!
//! This crate turns a requested multiply (`m×k` times `k×n`) into a
//! correctly shaped, correctly parameterised kernel launch and measures how
//! fast it ran. Several strategies are provided:
//!
//! | Strategy | Kernel | A layout | Padding |
//! |----------|--------|----------|---------|
//! | naive | `matmult_simple` | row-major | no |
//! | tiled | `matmult_block` | row-major | no |
//! | tiled-colmajor | `matmult_block_colmajor` | column-major | no |
//! | tiled-colmajor-padded | `matmult_block_colmajor_padded` | column-major | to whole tiles |
//!
//! The crate does not talk to any driver. Backends implement
//! [`ComputeDevice`]; [`ReferenceDevice`] emulates the kernels on the host,
//! and the `tiled-sgemm-opencl` crate provides the OpenCL implementation.
//!
//! # Quick Start
//!
//! ```ignore
//! use tiled_sgemm::prelude::*;
//!
//! let session = Session::new(ReferenceDevice::new(), SessionConfig::default());
//!
//! let a = Matrix::generate(300, 200, MatrixFill::Random);
//! let b = Matrix::generate(200, 100, MatrixFill::Random);
//! let trial = run_trial(&session, &Strategy::DEFAULT_ORDER, &a, &b, true)?;
//! for report in &trial.strategies {
//!     println!("{report}");
//! }
//! ```
//!
//! # Pipeline
//!
//! ```text
//! A ──► transpose_a (optional) ──► pad_matrix (optional) ──┐
//! B ──────────────────────────────► pad_matrix (optional) ──┼──► dispatch ──► crop_into ──► C
//!                                                           │
//!                     select_tiling ──► TilingConfig ───────┘
//! ```
//!
//! Kernel sources are read from [`SessionConfig::kernel_dir`] on every
//! dispatch and built fresh with the tiling macros prepended.

pub mod api;
pub mod core;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod gpu_mat;
pub mod session;
pub mod transpose;
pub mod types;
pub mod validate;

pub use api::{
    matmul_naive, matmul_tiled, matmul_tiled_colmajor, matmul_tiled_colmajor_padded,
    random_dims, run_strategy, run_trial, Strategy, StrategyReport, TrialReport,
};
pub use crate::core::{
    crop_into, pad_matrix, select_tiling, KernelKind, KernelSource, PaddedDims, TilingConfig,
    TilingRule, TILING_RULES,
};
pub use device::{
    BufferAccess, ComputeDevice, KernelArg, KernelTiming, LaunchGeometry, ReferenceDevice,
};
pub use dispatch::{dispatch, flop_count, DispatchReport, DispatchRequest, OperandA};
pub use error::{Mismatch, Result, SgemmError, TilingViolation};
pub use gpu_mat::GpuMatrix;
pub use session::{Session, SessionConfig, TilingPolicy, TransposeMode, KERNEL_DIR_ENV};
pub use transpose::{transpose_a, TransposeOutcome, TransposeReport, TransposedA};
pub use types::{Matrix, MatrixFill};
pub use validate::{assert_matrices_equal, reference_matmul};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::api::{
        matmul_naive, matmul_tiled, matmul_tiled_colmajor, matmul_tiled_colmajor_padded,
        run_strategy, run_trial, Strategy,
    };
    pub use crate::core::{select_tiling, TilingConfig};
    pub use crate::device::{ComputeDevice, ReferenceDevice};
    pub use crate::error::{Result, SgemmError};
    pub use crate::session::{Session, SessionConfig, TilingPolicy, TransposeMode};
    pub use crate::types::{Matrix, MatrixFill};
}

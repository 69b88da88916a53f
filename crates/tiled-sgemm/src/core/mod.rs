//! Pure host-side pieces of the pipeline.
//!
//! Nothing in here touches a device:
//!
//! ```text
//! (m, k, n) ──► select_tiling ──► TilingConfig ──► validate(max_local_size)
//!                                      │
//!                                      ├──► PaddedDims ──► pad_matrix / crop_into
//!                                      │
//!                                      └──► KernelSource::render ──► program text
//! ```
//!
//! # Tiling Parameters
//!
//! | Parameter | Purpose |
//! |-----------|---------|
//! | BM | Rows of C per work-group |
//! | BN | Columns of C per work-group |
//! | BK | Depth of each local-memory slice |
//! | WIM | Rows of C per work-item |
//! | WIN | Columns of C per work-item |

mod padding;
mod source;
mod tiling;

pub use padding::{crop_into, pad_matrix, pad_to, PaddedDims};
pub use source::{KernelKind, KernelSource};
pub use tiling::{select_tiling, TilingConfig, TilingRule, FALLBACK_TILING, TILING_RULES};

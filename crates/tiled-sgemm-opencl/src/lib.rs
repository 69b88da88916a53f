//! OpenCL backend for tiled single-precision matrix multiplication.
//!
//! [`OpenClDevice`] implements [`tiled_sgemm::ComputeDevice`] on top of the
//! `opencl3` crate. Each device owns a context and one in-order command
//! queue with profiling enabled, so every launch reports device timestamps.
//!
//! # Quick Start
//!
//! ```ignore
//! use tiled_sgemm::prelude::*;
//! use tiled_sgemm_opencl::{OpenClConfig, OpenClDevice};
//!
//! let device = OpenClDevice::with_config(&OpenClConfig::default())?;
//! let session = Session::new(device, SessionConfig::default());
//!
//! let a = Matrix::generate(4096, 4096, MatrixFill::Random);
//! let b = Matrix::generate(4096, 4096, MatrixFill::Random);
//! let mut c = Matrix::zeros(4096, 4096);
//! let report = matmul_tiled_colmajor_padded(&session, &a, &b, &mut c)?;
//! println!("{report}");
//! ```
//!
//! # Listing Devices
//!
//! ```ignore
//! for platform in tiled_sgemm_opencl::list_platforms()? {
//!     println!("{platform}");
//! }
//! ```

mod context;
mod error;
mod kernels;
mod memory;
mod wait;

pub use context::{list_platforms, DeviceInfo, OpenClConfig, OpenClDevice, PlatformInfo};
pub use error::{OpenClError, Result};
pub use kernels::OpenClKernel;
pub use memory::OpenClBuffer;

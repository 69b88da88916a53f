//! The seam between the pipeline and a compute backend.
//!
//! The pipeline never enumerates platforms or touches a driver API. It is
//! handed a ready [`ComputeDevice`] inside a [`Session`](crate::Session) and
//! drives it through a handful of synchronous calls: build a kernel, create
//! and fill buffers, launch, read back.

mod reference;

pub use reference::{LaunchRecord, ReferenceBuffer, ReferenceDevice, ReferenceKernel};

use std::fmt;
use std::time::Duration;

use crate::core::{KernelSource, TilingConfig};
use crate::error::Result;

/// How a kernel uses a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// One positional kernel argument.
pub enum KernelArg<'a, B> {
    Int(i32),
    Buffer(&'a B),
}

impl<B> fmt::Debug for KernelArg<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelArg::Int(v) => write!(f, "Int({v})"),
            KernelArg::Buffer(_) => f.write_str("Buffer"),
        }
    }
}

/// Two-dimensional NDRange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    pub global: [usize; 2],
    pub local: [usize; 2],
}

impl LaunchGeometry {
    /// One work-item per `WIM×WIN` sub-tile, rounded up to whole blocks.
    pub fn tiled(m: usize, n: usize, tiling: &TilingConfig) -> Self {
        Self {
            global: [
                m.div_ceil(tiling.bm) * tiling.bm / tiling.wim,
                n.div_ceil(tiling.bn) * tiling.bn / tiling.win,
            ],
            local: tiling.local_size(),
        }
    }

    /// One work-item per output element, square work-groups of side `cap`.
    ///
    /// The global size is not rounded, so on OpenCL this relies on
    /// non-uniform work-groups (OpenCL 2.0+).
    pub fn untiled(m: usize, n: usize, cap: usize) -> Self {
        Self {
            global: [m, n],
            local: [cap, cap],
        }
    }

    /// Square `side×side` work-groups covering an `m×k` source.
    pub fn transpose(m: usize, k: usize, side: usize) -> Self {
        Self {
            global: [m.div_ceil(side) * side, k.div_ceil(side) * side],
            local: [side, side],
        }
    }

    /// Work-items per work-group.
    pub fn local_items(&self) -> usize {
        self.local[0] * self.local[1]
    }
}

impl fmt::Display for LaunchGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "local = ({}, {}), global = ({}, {})",
            self.local[0], self.local[1], self.global[0], self.global[1]
        )
    }
}

/// Device timestamps of one kernel execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KernelTiming {
    pub start_ns: u64,
    pub end_ns: u64,
}

impl KernelTiming {
    pub fn from_timestamps(start_ns: u64, end_ns: u64) -> Self {
        Self { start_ns, end_ns }
    }

    /// Execution time in nanoseconds.
    pub fn elapsed_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns())
    }

    /// Throughput for `ops` operations; zero when no time was recorded.
    pub fn gflops(&self, ops: u64) -> f64 {
        let ns = self.elapsed_ns();
        if ns == 0 {
            return 0.0;
        }
        ops as f64 / ns as f64 // ops per ns == GFLOPS
    }
}

/// A compute backend able to run the kernels in `kernels/`.
///
/// All calls are synchronous from the caller's point of view. Dropping a
/// buffer or a kernel releases the device resource.
pub trait ComputeDevice {
    /// Device memory holding `f32` elements.
    type Buffer;
    /// A compiled program together with one of its kernels.
    type Kernel;

    /// Human-readable device name.
    fn name(&self) -> String;

    /// Largest work-group side for square 2-D launches.
    fn max_local_size(&self) -> usize;

    /// Compile `source` and create the kernel `name`.
    ///
    /// Compilation failure is [`SgemmError::Build`](crate::SgemmError::Build)
    /// carrying the compiler log.
    fn build_kernel(&self, source: &KernelSource, name: &str) -> Result<Self::Kernel>;

    /// Maximum work-group size the compiled kernel can be launched with.
    fn kernel_work_group_size(&self, kernel: &Self::Kernel) -> Result<usize>;

    /// Allocate an uninitialised buffer of `len` elements.
    fn create_buffer(&self, len: usize, access: BufferAccess) -> Result<Self::Buffer>;

    /// Host-to-device copy starting at element 0, waiting up to `timeout`.
    fn write_buffer(
        &self,
        buffer: &mut Self::Buffer,
        data: &[f32],
        timeout: Duration,
    ) -> Result<()>;

    /// Device-to-host copy starting at element 0, waiting up to `timeout`.
    fn read_buffer(
        &self,
        buffer: &Self::Buffer,
        out: &mut [f32],
        timeout: Duration,
    ) -> Result<()>;

    /// Launch `kernel` and wait up to `timeout` for it to complete.
    fn launch(
        &self,
        kernel: &Self::Kernel,
        args: &[KernelArg<'_, Self::Buffer>],
        geometry: LaunchGeometry,
        timeout: Duration,
    ) -> Result<KernelTiming>;

    /// Drain the queue, waiting up to `timeout`.
    fn finish(&self, timeout: Duration) -> Result<()>;
}

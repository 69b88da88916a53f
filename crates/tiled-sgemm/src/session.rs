//! The compute session and its configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::core::{select_tiling, KernelKind, TilingConfig};
use crate::device::ComputeDevice;
use crate::error::{Result, SgemmError};

/// Environment variable overriding the kernel source directory.
pub const KERNEL_DIR_ENV: &str = "TILED_SGEMM_KERNEL_DIR";

/// Default bound on a single wait for the device.
pub const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Kernel directory from [`KERNEL_DIR_ENV`], falling back to the `kernels/`
/// directory shipped with this crate.
pub fn default_kernel_dir() -> PathBuf {
    std::env::var_os(KERNEL_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/kernels")))
}

/// Where the column-major copy of A is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransposeMode {
    /// Transpose kernel on the device; the result stays resident.
    #[default]
    Device,
    /// Nested loop on the host; the result is uploaded by the multiply.
    Host,
}

/// How tiled kernels get their tiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TilingPolicy {
    /// First matching rule of the selection table.
    #[default]
    Auto,
    /// The same configuration for every shape.
    Fixed(TilingConfig),
}

/// Settings shared by every dispatch in a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory holding the `.cl` sources.
    pub kernel_dir: PathBuf,
    pub transpose_mode: TransposeMode,
    /// Cross-check device transposes against the host.
    pub validate_transpose: bool,
    pub tiling: TilingPolicy,
    /// Refuse launches whose tiling breaks a divisibility or local size
    /// invariant. Non-power-of-two values are refused regardless.
    pub validate_tiling: bool,
    /// Log operands, intermediates and results.
    pub print_matrices: bool,
    /// Bound on each wait for the device: kernel completion, transfers and
    /// queue drains.
    pub launch_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            kernel_dir: default_kernel_dir(),
            transpose_mode: TransposeMode::Device,
            validate_transpose: false,
            tiling: TilingPolicy::Auto,
            validate_tiling: true,
            print_matrices: false,
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
        }
    }
}

impl SessionConfig {
    pub fn with_kernel_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.kernel_dir = dir.into();
        self
    }

    pub fn with_transpose_mode(mut self, mode: TransposeMode) -> Self {
        self.transpose_mode = mode;
        self
    }

    pub fn with_validate_transpose(mut self, enabled: bool) -> Self {
        self.validate_transpose = enabled;
        self
    }

    pub fn with_tiling(mut self, policy: TilingPolicy) -> Self {
        self.tiling = policy;
        self
    }

    pub fn with_validate_tiling(mut self, enabled: bool) -> Self {
        self.validate_tiling = enabled;
        self
    }

    pub fn with_print_matrices(mut self, enabled: bool) -> Self {
        self.print_matrices = enabled;
        self
    }

    pub fn with_launch_timeout(mut self, timeout: Duration) -> Self {
        self.launch_timeout = timeout;
        self
    }
}

/// A ready device plus configuration.
///
/// Created once and passed by reference to every operation. The device (and
/// with it any context and queue) is torn down when the session is dropped.
pub struct Session<D: ComputeDevice> {
    device: D,
    config: SessionConfig,
}

impl<D: ComputeDevice> Session<D> {
    pub fn new(device: D, config: SessionConfig) -> Self {
        debug!(
            device = %device.name(),
            max_local_size = device.max_local_size(),
            kernel_dir = %config.kernel_dir.display(),
            "session created"
        );
        Self { device, config }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn max_local_size(&self) -> usize {
        self.device.max_local_size()
    }

    /// Tiling for an `m×k` by `k×n` multiply under the configured policy.
    ///
    /// A fixed tiling that cannot be rendered or padded to (zero, not a power
    /// of two, overflowing tile sizes) is a configuration error.
    pub fn resolve_tiling(&self, m: usize, k: usize, n: usize) -> Result<TilingConfig> {
        let tiling = match self.config.tiling {
            TilingPolicy::Auto => select_tiling(m, k, n),
            TilingPolicy::Fixed(tiling) => tiling,
        };
        tiling.validate_form()?;
        Ok(tiling)
    }

    /// Path of a kernel's source file.
    pub fn kernel_path(&self, kind: KernelKind) -> PathBuf {
        self.config.kernel_dir.join(kind.file_name())
    }

    /// Read a kernel's source text from the kernel directory.
    pub fn load_kernel_source(&self, kind: KernelKind) -> Result<String> {
        read_source(&self.kernel_path(kind))
    }

    /// Give the device back.
    pub fn into_device(self) -> D {
        self.device
    }
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| SgemmError::KernelSource {
        path: path.to_path_buf(),
        source,
    })
}

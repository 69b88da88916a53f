//! One kernel invocation, end to end.

use tracing::{debug, info};

use crate::core::{KernelKind, KernelSource, TilingConfig};
use crate::device::{BufferAccess, ComputeDevice, KernelArg, KernelTiming, LaunchGeometry};
use crate::error::{Result, SgemmError};
use crate::gpu_mat::GpuMatrix;
use crate::session::Session;
use crate::types::Matrix;

/// Floating-point operations of an `m×k` by `k×n` multiply: `m·n·(2k−1)`.
pub fn flop_count(m: usize, k: usize, n: usize) -> u64 {
    (m as u64) * (n as u64) * (2 * k as u64).saturating_sub(1)
}

/// The left operand of a multiply.
pub enum OperandA<'a, B> {
    /// Host matrix, uploaded by the dispatch.
    Host(&'a Matrix),
    /// Already on the device; the dispatch takes ownership and releases it.
    Staged(GpuMatrix<B>),
}

impl<B> OperandA<'_, B> {
    fn shape(&self) -> (usize, usize) {
        match self {
            OperandA::Host(m) => (m.rows(), m.cols()),
            OperandA::Staged(g) => (g.rows(), g.cols()),
        }
    }
}

/// A multiply to run with one kernel.
///
/// For the column-major kernels `a` holds `Aᵀ`, a `k×m` matrix.
pub struct DispatchRequest<'a, B> {
    pub kind: KernelKind,
    pub m: usize,
    pub k: usize,
    pub n: usize,
    pub a: OperandA<'a, B>,
    pub b: &'a Matrix,
    /// Tiling for tiled kernels; resolved from the session when `None`.
    pub tiling: Option<TilingConfig>,
}

impl<'a, B> DispatchRequest<'a, B> {
    pub fn new(
        kind: KernelKind,
        (m, k, n): (usize, usize, usize),
        a: OperandA<'a, B>,
        b: &'a Matrix,
    ) -> Self {
        Self {
            kind,
            m,
            k,
            n,
            a,
            b,
            tiling: None,
        }
    }

    /// Pin the tiling instead of resolving it from the session.
    pub fn with_tiling(mut self, tiling: TilingConfig) -> Self {
        self.tiling = Some(tiling);
        self
    }
}

/// What a dispatch did and how fast.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub kind: KernelKind,
    /// Dimensions the kernel ran with (padded, if the caller padded).
    pub dims: (usize, usize, usize),
    pub tiling: Option<TilingConfig>,
    pub geometry: LaunchGeometry,
    pub timing: KernelTiming,
    pub flops: u64,
}

impl DispatchReport {
    /// Kernel throughput from the device timestamps.
    pub fn kernel_gflops(&self) -> f64 {
        self.timing.gflops(self.flops)
    }
}

/// Convert a dimension to the kernels' `int` argument type.
pub(crate) fn to_cl_int(name: &str, value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| {
        SgemmError::DimensionMismatch(format!("{name} = {value} does not fit a kernel int"))
    })
}

fn check_shapes<B>(request: &DispatchRequest<'_, B>, c: &Matrix) -> Result<()> {
    let DispatchRequest { kind, m, k, n, .. } = *request;
    if m == 0 || k == 0 || n == 0 {
        return Err(SgemmError::DimensionMismatch(format!(
            "dimensions must be non-zero, got {m}x{k}x{n}"
        )));
    }
    let expected_a = match kind {
        KernelKind::TiledColMajor | KernelKind::TiledColMajorPadded => (k, m),
        _ => (m, k),
    };
    let checks = [
        ("A", request.a.shape(), expected_a),
        ("B", (request.b.rows(), request.b.cols()), (k, n)),
        ("C", (c.rows(), c.cols()), (m, n)),
    ];
    for (name, actual, expected) in checks {
        if actual != expected {
            return Err(SgemmError::DimensionMismatch(format!(
                "{kind}: {name} is {}x{}, expected {}x{}",
                actual.0, actual.1, expected.0, expected.1
            )));
        }
    }
    Ok(())
}

/// Run one multiply kernel and read the result into `c`.
///
/// Builds the program, validates the tiling (when enabled), stages
/// operands, launches, waits, reads back. Every device resource created here
/// (and a staged A handed in) is released before returning, on success and
/// on error.
pub fn dispatch<D: ComputeDevice>(
    session: &Session<D>,
    request: DispatchRequest<'_, D::Buffer>,
    c: &mut Matrix,
) -> Result<DispatchReport> {
    if request.kind == KernelKind::Transpose {
        return Err(SgemmError::DimensionMismatch(
            "the transpose kernel is not a multiply".to_string(),
        ));
    }
    check_shapes(&request, c)?;

    let DispatchRequest {
        kind,
        m,
        k,
        n,
        a,
        b,
        tiling,
    } = request;
    let device = session.device();
    let config = session.config();
    let (m_arg, k_arg, n_arg) = (to_cl_int("m", m)?, to_cl_int("k", k)?, to_cl_int("n", n)?);

    let tiling = match (kind.is_tiled(), tiling) {
        (false, _) => None,
        (true, Some(t)) => {
            t.validate_form()?;
            Some(t)
        }
        (true, None) => Some(session.resolve_tiling(m, k, n)?),
    };
    let body = session.load_kernel_source(kind)?;
    let source = match tiling {
        Some(t) => KernelSource::with_tiling(body, t),
        None => KernelSource::plain(body),
    };
    let kernel = device.build_kernel(&source, kind.kernel_name())?;

    if let (Some(t), true) = (tiling, config.validate_tiling) {
        t.validate(session.max_local_size())?;
    }
    let geometry = match tiling {
        Some(t) => {
            info!(kernel = %kind, tiling = %t, "using tiling");
            LaunchGeometry::tiled(m, n, &t)
        }
        None => LaunchGeometry::untiled(m, n, session.max_local_size()),
    };
    debug!(kernel = %kind, %geometry, "launch geometry");

    let timeout = config.launch_timeout;
    let a_gpu = match a {
        OperandA::Staged(gpu) => gpu,
        OperandA::Host(host) => {
            GpuMatrix::from_host(device, host, BufferAccess::ReadOnly, timeout)?
        }
    };
    let b_gpu = GpuMatrix::from_host(device, b, BufferAccess::ReadOnly, timeout)?;
    let c_gpu = GpuMatrix::alloc_zeroed(device, m, n, BufferAccess::WriteOnly, timeout)?;

    let args = [
        KernelArg::Int(m_arg),
        KernelArg::Int(k_arg),
        KernelArg::Int(n_arg),
        KernelArg::Buffer(a_gpu.as_buffer()),
        KernelArg::Buffer(b_gpu.as_buffer()),
        KernelArg::Buffer(c_gpu.as_buffer()),
    ];
    let timing = device.launch(&kernel, &args, geometry, timeout)?;
    device.finish(timeout)?;

    c_gpu.read_into(device, c, timeout)?;

    let report = DispatchReport {
        kind,
        dims: (m, k, n),
        tiling,
        geometry,
        timing,
        flops: flop_count(m, k, n),
    };
    info!(
        kernel = %kind,
        kernel_time_ms = report.timing.elapsed().as_secs_f64() * 1e3,
        gflops = report.kernel_gflops(),
        "kernel finished"
    );
    Ok(report)
}

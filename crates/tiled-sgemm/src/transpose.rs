//! Column-major copy of the left operand.
//!
//! The column-major kernels read A as `Aᵀ`, a `k×m` row-major matrix,
//! optionally embedded in a larger zeroed `k2×m2` matrix for the padded
//! kernel. Depending on [`TransposeMode`] the copy is made on the host or by
//! the transpose kernel; a device result stays resident and is handed to the
//! multiply as a staged operand.

use std::time::{Duration, Instant};

use tracing::info;

use crate::core::{KernelKind, KernelSource};
use crate::device::{BufferAccess, ComputeDevice, KernelArg, KernelTiming, LaunchGeometry};
use crate::dispatch::{to_cl_int, OperandA};
use crate::error::{Result, SgemmError};
use crate::gpu_mat::GpuMatrix;
use crate::session::{Session, TransposeMode};
use crate::types::Matrix;
use crate::validate::assert_matrices_equal;

/// Where the transposed operand ended up.
pub enum TransposedA<B> {
    Host(Matrix),
    Device(GpuMatrix<B>),
}

impl<B> TransposedA<B> {
    pub fn rows(&self) -> usize {
        match self {
            TransposedA::Host(m) => m.rows(),
            TransposedA::Device(g) => g.rows(),
        }
    }

    pub fn cols(&self) -> usize {
        match self {
            TransposedA::Host(m) => m.cols(),
            TransposedA::Device(g) => g.cols(),
        }
    }

    pub fn byte_len(&self) -> usize {
        self.rows() * self.cols() * std::mem::size_of::<f32>()
    }

    /// Turn into a multiply operand. A device result is moved; a host
    /// result is borrowed from `slot`, which keeps it alive.
    pub fn into_operand(self, slot: &mut Option<Matrix>) -> OperandA<'_, B> {
        match self {
            TransposedA::Host(m) => OperandA::Host(slot.insert(m)),
            TransposedA::Device(g) => OperandA::Staged(g),
        }
    }
}

/// Timing of a transpose.
#[derive(Debug, Clone, PartialEq)]
pub struct TransposeReport {
    pub mode: TransposeMode,
    /// Host wall time for the whole step.
    pub elapsed: Duration,
    /// Device timestamps, for [`TransposeMode::Device`].
    pub timing: Option<KernelTiming>,
    /// Elements moved: `m·k`.
    pub elements: u64,
}

impl TransposeReport {
    /// Element moves per nanosecond, when device timing is available.
    pub fn gflops(&self) -> Option<f64> {
        self.timing.map(|t| t.gflops(self.elements))
    }
}

pub struct TransposeOutcome<B> {
    pub matrix: TransposedA<B>,
    pub report: TransposeReport,
}

/// Produce `Aᵀ` inside a zeroed `k2×m2` matrix.
///
/// `k2` and `m2` must be at least `a.cols()` and `a.rows()`.
pub fn transpose_a<D: ComputeDevice>(
    session: &Session<D>,
    a: &Matrix,
    k2: usize,
    m2: usize,
) -> Result<TransposeOutcome<D::Buffer>> {
    let (m, k) = (a.rows(), a.cols());
    if k2 < k || m2 < m {
        return Err(SgemmError::DimensionMismatch(format!(
            "transpose target {k2}x{m2} cannot hold a {k}x{m} transpose"
        )));
    }
    let config = session.config();
    let start = Instant::now();

    let (matrix, timing) = match config.transpose_mode {
        TransposeMode::Host => (TransposedA::Host(a.transpose_into_padded(k2, m2)), None),
        TransposeMode::Device => {
            let (gpu, timing) = transpose_on_device(session, a, k2, m2)?;
            if config.validate_transpose || config.print_matrices {
                let at = gpu.to_host(session.device(), config.launch_timeout)?;
                if config.validate_transpose {
                    assert_matrices_equal(&a.transpose_into_padded(k2, m2), &at)?;
                }
                if config.print_matrices {
                    info!("AT:\n{at}");
                }
            }
            (TransposedA::Device(gpu), Some(timing))
        }
    };
    if let (TransposedA::Host(at), true) = (&matrix, config.print_matrices) {
        info!("AT:\n{at}");
    }

    let report = TransposeReport {
        mode: config.transpose_mode,
        elapsed: start.elapsed(),
        timing,
        elements: (m * k) as u64,
    };
    if let Some(gflops) = report.gflops() {
        info!(gflops, "transpose finished");
    }
    Ok(TransposeOutcome { matrix, report })
}

fn transpose_on_device<D: ComputeDevice>(
    session: &Session<D>,
    a: &Matrix,
    k2: usize,
    m2: usize,
) -> Result<(GpuMatrix<D::Buffer>, KernelTiming)> {
    let device = session.device();
    let kind = KernelKind::Transpose;
    let source = KernelSource::plain(session.load_kernel_source(kind)?);
    let kernel = device.build_kernel(&source, kind.kernel_name())?;

    let side = (device.kernel_work_group_size(&kernel)? as f64).sqrt() as usize;
    let geometry = LaunchGeometry::transpose(a.rows(), a.cols(), side.max(1));

    let timeout = session.config().launch_timeout;
    let a_gpu = GpuMatrix::from_host(device, a, BufferAccess::ReadOnly, timeout)?;
    let at_gpu = GpuMatrix::alloc_zeroed(device, k2, m2, BufferAccess::ReadWrite, timeout)?;

    let args = [
        KernelArg::Int(to_cl_int("m", a.rows())?),
        KernelArg::Int(to_cl_int("k", a.cols())?),
        KernelArg::Int(to_cl_int("k2", k2)?),
        KernelArg::Int(to_cl_int("m2", m2)?),
        KernelArg::Buffer(a_gpu.as_buffer()),
        KernelArg::Buffer(at_gpu.as_buffer()),
    ];
    let timing = device.launch(&kernel, &args, geometry, timeout)?;
    device.finish(timeout)?;
    Ok((at_gpu, timing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ReferenceDevice;
    use crate::session::SessionConfig;
    use crate::types::MatrixFill;

    fn session(mode: TransposeMode) -> Session<ReferenceDevice> {
        let config = SessionConfig::default()
            .with_transpose_mode(mode)
            .with_validate_transpose(true);
        Session::new(ReferenceDevice::new(), config)
    }

    #[test]
    fn test_host_transpose() {
        let s = session(TransposeMode::Host);
        let a = Matrix::generate(3, 5, MatrixFill::Increasing);
        let out = transpose_a(&s, &a, 5, 3).unwrap();
        match out.matrix {
            TransposedA::Host(at) => assert_eq!(at, a.transposed()),
            TransposedA::Device(_) => panic!("expected a host result"),
        }
        assert!(out.report.timing.is_none());
    }

    #[test]
    fn test_device_transpose_into_padded_target() {
        let s = session(TransposeMode::Device);
        let a = Matrix::generate(3, 5, MatrixFill::Increasing);
        let out = transpose_a(&s, &a, 8, 8).unwrap();
        assert_eq!(out.report.elements, 15);
        assert!(out.report.gflops().is_some());

        let TransposedA::Device(gpu) = out.matrix else {
            panic!("expected a device result");
        };
        assert_eq!((gpu.rows(), gpu.cols()), (8, 8));
        let at = gpu.to_host(s.device(), s.config().launch_timeout).unwrap();
        assert_eq!(at, a.transpose_into_padded(8, 8));

        let launches = s.device().launches();
        assert_eq!(launches[0].geometry, LaunchGeometry::transpose(3, 5, 16));
        // the source buffer and the kernel are gone, only the result remains
        assert_eq!(s.device().live_buffers(), 1);
        assert_eq!(s.device().live_kernels(), 0);
    }

    #[test]
    fn test_corrupted_device_transpose_fails_validation() {
        let config = SessionConfig::default()
            .with_transpose_mode(TransposeMode::Device)
            .with_validate_transpose(true);
        let s = Session::new(ReferenceDevice::new().with_corrupted_transpose(), config);
        let a = Matrix::generate(3, 5, MatrixFill::Increasing);

        match transpose_a(&s, &a, 5, 3) {
            Err(SgemmError::Validation(m)) => assert_eq!(
                m,
                crate::error::Mismatch {
                    row: 4,
                    col: 2,
                    expected: 14.0,
                    actual: 15.0,
                }
            ),
            Err(other) => panic!("unexpected {other}"),
            Ok(_) => panic!("corrupted transpose passed validation"),
        }
        assert_eq!(s.device().live_buffers(), 0);
        assert_eq!(s.device().live_kernels(), 0);
    }

    #[test]
    fn test_corrupted_transpose_unchecked_without_validation() {
        let config = SessionConfig::default().with_transpose_mode(TransposeMode::Device);
        let s = Session::new(ReferenceDevice::new().with_corrupted_transpose(), config);
        let a = Matrix::generate(3, 5, MatrixFill::Increasing);
        assert!(transpose_a(&s, &a, 5, 3).is_ok());
    }

    #[test]
    fn test_rejects_small_target() {
        let s = session(TransposeMode::Host);
        let a = Matrix::zeros(4, 6);
        assert!(matches!(
            transpose_a(&s, &a, 4, 6),
            Err(SgemmError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_into_operand() {
        let a = Matrix::generate(2, 2, MatrixFill::Increasing);
        let mut slot = None;
        let op = TransposedA::<()>::Host(a.clone()).into_operand(&mut slot);
        assert!(matches!(op, OperandA::Host(m) if *m == a));
    }
}

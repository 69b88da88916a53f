//! Multiply strategies and the trial runner.
//!
//! Each `matmul_*` function runs one complete strategy, including any
//! transpose and padding it needs, and writes `A × B` into `c`.
//!
//! ```ignore
//! use tiled_sgemm::prelude::*;
//!
//! let session = Session::new(ReferenceDevice::new(), SessionConfig::default());
//! let a = Matrix::generate(64, 32, MatrixFill::Random);
//! let b = Matrix::generate(32, 48, MatrixFill::Random);
//! let mut c = Matrix::zeros(64, 48);
//!
//! let report = matmul_tiled_colmajor_padded(&session, &a, &b, &mut c)?;
//! println!("{report}");
//! ```

use std::fmt;
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::info;

use crate::core::{crop_into, pad_matrix, KernelKind, PaddedDims};
use crate::device::ComputeDevice;
use crate::dispatch::{dispatch, flop_count, DispatchReport, DispatchRequest, OperandA};
use crate::error::{Result, SgemmError};
use crate::session::Session;
use crate::transpose::{transpose_a, TransposeReport};
use crate::types::Matrix;
use crate::validate::{assert_matrices_equal, reference_matmul};

/// A way of running the multiply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Naive,
    Tiled,
    TiledColMajor,
    TiledColMajorPadded,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Naive,
        Strategy::Tiled,
        Strategy::TiledColMajor,
        Strategy::TiledColMajorPadded,
    ];

    /// What a trial runs unless told otherwise; the naive kernel is opt-in.
    pub const DEFAULT_ORDER: [Strategy; 3] = [
        Strategy::Tiled,
        Strategy::TiledColMajor,
        Strategy::TiledColMajorPadded,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::Naive => "naive",
            Strategy::Tiled => "tiled",
            Strategy::TiledColMajor => "tiled-colmajor",
            Strategy::TiledColMajorPadded => "tiled-colmajor-padded",
        }
    }

    /// The multiply kernel this strategy dispatches.
    pub fn kernel(self) -> KernelKind {
        match self {
            Strategy::Naive => KernelKind::Naive,
            Strategy::Tiled => KernelKind::Tiled,
            Strategy::TiledColMajor => KernelKind::TiledColMajor,
            Strategy::TiledColMajorPadded => KernelKind::TiledColMajorPadded,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyReport {
    pub strategy: Strategy,
    pub dispatch: DispatchReport,
    pub transpose: Option<TransposeReport>,
    /// Host time spent transposing and padding before the multiply.
    pub prepare_time: Duration,
    /// Host time for the whole strategy.
    pub wall_time: Duration,
    /// Bytes held by transposed and padded copies.
    pub extra_bytes: usize,
    /// FLOPs of the unpadded problem.
    pub flops: u64,
}

impl StrategyReport {
    /// Throughput over the whole strategy's wall time.
    pub fn total_gflops(&self) -> f64 {
        let secs = self.wall_time.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.flops as f64 * 1e-9 / secs
    }
}

impl fmt::Display for StrategyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<22} kernel {:>9.2} GFLOPS  total {:>9.2} GFLOPS  wall {:>8.3}s  extra mem {} bytes",
            self.strategy.name(),
            self.dispatch.kernel_gflops(),
            self.total_gflops(),
            self.wall_time.as_secs_f64(),
            self.extra_bytes
        )
    }
}

/// All strategies run on one problem.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialReport {
    pub dims: (usize, usize, usize),
    pub strategies: Vec<StrategyReport>,
    /// Whether every result was checked against the CPU reference.
    pub validated: bool,
}

fn problem_dims(a: &Matrix, b: &Matrix) -> Result<(usize, usize, usize)> {
    if a.cols() != b.rows() {
        return Err(SgemmError::DimensionMismatch(format!(
            "cannot multiply {}x{} by {}x{}",
            a.rows(),
            a.cols(),
            b.rows(),
            b.cols()
        )));
    }
    Ok((a.rows(), a.cols(), b.cols()))
}

struct Finished {
    strategy: Strategy,
    dims: (usize, usize, usize),
    start: Instant,
    prepare_time: Duration,
    extra_bytes: usize,
}

impl Finished {
    fn report(
        self,
        dispatch: DispatchReport,
        transpose: Option<TransposeReport>,
    ) -> StrategyReport {
        let (m, k, n) = self.dims;
        let report = StrategyReport {
            strategy: self.strategy,
            dispatch,
            transpose,
            prepare_time: self.prepare_time,
            wall_time: self.start.elapsed(),
            extra_bytes: self.extra_bytes,
            flops: flop_count(m, k, n),
        };
        info!(
            strategy = %report.strategy,
            prepare_secs = report.prepare_time.as_secs_f64(),
            extra_mem = report.extra_bytes,
            wall_secs = report.wall_time.as_secs_f64(),
            total_gflops = report.total_gflops(),
            "strategy finished"
        );
        report
    }
}

fn run_direct<D: ComputeDevice>(
    session: &Session<D>,
    strategy: Strategy,
    a: &Matrix,
    b: &Matrix,
    c: &mut Matrix,
) -> Result<StrategyReport> {
    let dims = problem_dims(a, b)?;
    let start = Instant::now();
    let report = dispatch(
        session,
        DispatchRequest::new(strategy.kernel(), dims, OperandA::Host(a), b),
        c,
    )?;
    let finished = Finished {
        strategy,
        dims,
        start,
        prepare_time: Duration::ZERO,
        extra_bytes: 0,
    };
    Ok(finished.report(report, None))
}

/// One work-item per output element.
pub fn matmul_naive<D: ComputeDevice>(
    session: &Session<D>,
    a: &Matrix,
    b: &Matrix,
    c: &mut Matrix,
) -> Result<StrategyReport> {
    run_direct(session, Strategy::Naive, a, b, c)
}

/// Tiled kernel on row-major operands.
pub fn matmul_tiled<D: ComputeDevice>(
    session: &Session<D>,
    a: &Matrix,
    b: &Matrix,
    c: &mut Matrix,
) -> Result<StrategyReport> {
    run_direct(session, Strategy::Tiled, a, b, c)
}

/// Tiled kernel reading A column-major.
pub fn matmul_tiled_colmajor<D: ComputeDevice>(
    session: &Session<D>,
    a: &Matrix,
    b: &Matrix,
    c: &mut Matrix,
) -> Result<StrategyReport> {
    let dims @ (m, k, _) = problem_dims(a, b)?;
    let start = Instant::now();

    let outcome = transpose_a(session, a, k, m)?;
    let extra_bytes = outcome.matrix.byte_len();
    let prepare_time = start.elapsed();

    let mut host_at = None;
    let operand = outcome.matrix.into_operand(&mut host_at);
    let report = dispatch(
        session,
        DispatchRequest::new(KernelKind::TiledColMajor, dims, operand, b),
        c,
    )?;

    let finished = Finished {
        strategy: Strategy::TiledColMajor,
        dims,
        start,
        prepare_time,
        extra_bytes,
    };
    Ok(finished.report(report, Some(outcome.report)))
}

/// Tiled kernel on column-major A with every dimension padded to whole tiles.
///
/// The tiling is resolved once from the true dimensions and used for both the
/// padding and the launch. The padded result is cropped back into `c`.
pub fn matmul_tiled_colmajor_padded<D: ComputeDevice>(
    session: &Session<D>,
    a: &Matrix,
    b: &Matrix,
    c: &mut Matrix,
) -> Result<StrategyReport> {
    let dims @ (m, k, n) = problem_dims(a, b)?;
    if !c.has_shape(m, n) {
        return Err(SgemmError::DimensionMismatch(format!(
            "C is {}x{}, expected {m}x{n}",
            c.rows(),
            c.cols()
        )));
    }
    let start = Instant::now();
    let print = session.config().print_matrices;

    let tiling = session.resolve_tiling(m, k, n)?;
    let padded = PaddedDims::new(m, k, n, &tiling);

    let outcome = transpose_a(session, a, padded.k, padded.m)?;
    let b_padded = pad_matrix(b, padded.k, padded.n);
    let mut c_padded =
        (!c.has_shape(padded.m, padded.n)).then(|| Matrix::zeros(padded.m, padded.n));

    let mut extra_bytes = outcome.matrix.byte_len();
    if let std::borrow::Cow::Owned(bp) = &b_padded {
        extra_bytes += bp.byte_len();
        if print {
            info!("Bpadded:\n{bp}");
        }
    }
    if let Some(cp) = &c_padded {
        extra_bytes += cp.byte_len();
    }
    let prepare_time = start.elapsed();

    let mut host_at = None;
    let operand = outcome.matrix.into_operand(&mut host_at);
    let request = DispatchRequest::new(
        KernelKind::TiledColMajorPadded,
        (padded.m, padded.k, padded.n),
        operand,
        &b_padded,
    )
    .with_tiling(tiling);
    let report = match c_padded.as_mut() {
        Some(cp) => dispatch(session, request, cp)?,
        None => dispatch(session, request, c)?,
    };

    if let Some(cp) = &c_padded {
        if print {
            info!("Cpadded:\n{cp}");
        }
        crop_into(cp, c);
    }

    let finished = Finished {
        strategy: Strategy::TiledColMajorPadded,
        dims,
        start,
        prepare_time,
        extra_bytes,
    };
    Ok(finished.report(report, Some(outcome.report)))
}

/// Run `strategy`, writing `A × B` into `c`.
pub fn run_strategy<D: ComputeDevice>(
    session: &Session<D>,
    strategy: Strategy,
    a: &Matrix,
    b: &Matrix,
    c: &mut Matrix,
) -> Result<StrategyReport> {
    match strategy {
        Strategy::Naive => matmul_naive(session, a, b, c),
        Strategy::Tiled => matmul_tiled(session, a, b, c),
        Strategy::TiledColMajor => matmul_tiled_colmajor(session, a, b, c),
        Strategy::TiledColMajorPadded => matmul_tiled_colmajor_padded(session, a, b, c),
    }
}

/// Run each strategy in order on the same operands.
///
/// With `validate` set, the CPU reference is computed once and every result
/// must equal it exactly; the first mismatch aborts the trial.
pub fn run_trial<D: ComputeDevice>(
    session: &Session<D>,
    strategies: &[Strategy],
    a: &Matrix,
    b: &Matrix,
    validate: bool,
) -> Result<TrialReport> {
    let (m, k, n) = problem_dims(a, b)?;
    info!(m, k, n, device = %session.device().name(), "starting trial");
    let print = session.config().print_matrices;
    if print {
        info!("A:\n{a}");
        info!("B:\n{b}");
    }

    let expected = if validate {
        Some(reference_matmul(a, b)?)
    } else {
        None
    };

    let mut c = Matrix::zeros(m, n);
    let mut reports = Vec::with_capacity(strategies.len());
    for &strategy in strategies {
        c.fill_zero();
        let report = run_strategy(session, strategy, a, b, &mut c)?;
        if print {
            info!("C:\n{c}");
        }
        if let Some(expected) = &expected {
            assert_matrices_equal(expected, &c)?;
            info!(strategy = %strategy, "result matches CPU reference");
        }
        reports.push(report);
    }

    Ok(TrialReport {
        dims: (m, k, n),
        strategies: reports,
        validated: validate,
    })
}

/// Draw `(m, k, n)` uniformly from `range`.
pub fn random_dims<R: Rng + ?Sized>(
    rng: &mut R,
    range: RangeInclusive<usize>,
) -> (usize, usize, usize) {
    (
        rng.gen_range(range.clone()),
        rng.gen_range(range.clone()),
        rng.gen_range(range),
    )
}

//! End-to-end pipeline tests on the host reference device.

use std::time::Duration;

use tiled_sgemm::{
    assert_matrices_equal, dispatch, matmul_tiled_colmajor, reference_matmul, run_strategy,
    run_trial, DispatchRequest, KernelKind, Matrix, MatrixFill, Mismatch, OperandA,
    ReferenceDevice, Session, SessionConfig, SgemmError, Strategy, TilingConfig, TilingPolicy,
    TilingViolation, TransposeMode,
};

fn session_with(config: SessionConfig) -> Session<ReferenceDevice> {
    Session::new(ReferenceDevice::new(), config)
}

fn counting_4x4() -> Matrix {
    Matrix::generate(4, 4, MatrixFill::Increasing)
}

// ============================================================================
// Strategies
// ============================================================================

#[test]
fn test_all_strategies_match_reference_4x4() {
    for mode in [TransposeMode::Device, TransposeMode::Host] {
        let s = session_with(SessionConfig::default().with_transpose_mode(mode));
        let a = counting_4x4();
        let b = counting_4x4();
        let expected = reference_matmul(&a, &b).unwrap();

        for strategy in Strategy::ALL {
            let mut c = Matrix::zeros(4, 4);
            run_strategy(&s, strategy, &a, &b, &mut c).unwrap();
            assert_eq!(c, expected, "{strategy} with {mode:?}");
        }
        assert_eq!(s.device().live_buffers(), 0);
        assert_eq!(s.device().live_kernels(), 0);
    }
}

#[test]
fn test_4x4_reference_values() {
    let a = counting_4x4();
    let c = reference_matmul(&a, &a).unwrap();
    // row 0 of A is [0, 1, 2, 3]; column 0 of A is [0, 4, 8, 12]
    assert_eq!(c.get(0, 0), 56.0);
    // [12, 13, 14, 15] . [3, 7, 11, 15]
    assert_eq!(c.get(3, 3), 506.0);
}

#[test]
fn test_strategies_on_ragged_shapes() {
    let s = session_with(SessionConfig::default().with_validate_transpose(true));
    for (m, k, n) in [(1, 1, 1), (3, 17, 5), (33, 7, 18), (70, 40, 9), (130, 129, 65)] {
        let a = Matrix::generate(m, k, MatrixFill::ColumnIndex);
        let b = Matrix::generate(k, n, MatrixFill::Increasing);
        let trial = run_trial(&s, &Strategy::ALL, &a, &b, true).unwrap();
        assert_eq!(trial.strategies.len(), 4, "{m}x{k}x{n}");
    }
    assert_eq!(s.device().live_buffers(), 0);
}

#[test]
fn test_fixed_tiling_is_used_for_every_tiled_strategy() {
    let tiling = TilingConfig::MEDIUM;
    let s = session_with(SessionConfig::default().with_tiling(TilingPolicy::Fixed(tiling)));
    let a = Matrix::generate(10, 12, MatrixFill::Increasing);
    let b = Matrix::generate(12, 14, MatrixFill::Increasing);
    run_trial(&s, &Strategy::DEFAULT_ORDER, &a, &b, true).unwrap();

    let tiled: Vec<_> = s
        .device()
        .launches()
        .into_iter()
        .filter(|l| l.kind.is_tiled())
        .collect();
    assert_eq!(tiled.len(), 3);
    assert!(tiled.iter().all(|l| l.tiling == Some(tiling)));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_perturbed_result_is_a_validation_error() {
    let s = session_with(SessionConfig::default());
    let a = counting_4x4();
    let b = counting_4x4();
    let expected = reference_matmul(&a, &b).unwrap();

    let mut c = Matrix::zeros(4, 4);
    matmul_tiled_colmajor(&s, &a, &b, &mut c).unwrap();
    let original = c.get(1, 2);
    c.set(1, 2, original + 1.0);

    match assert_matrices_equal(&expected, &c) {
        Err(SgemmError::Validation(m)) => {
            assert_eq!((m.row, m.col), (1, 2));
            assert_eq!(m.expected, original);
            assert_eq!(m.actual, original + 1.0);
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[test]
fn test_invalid_fixed_tiling_is_a_configuration_error() {
    // 64 * 64 / (4 * 4) = 256 work-items, A tile 64 * 2 = 128
    let config = SessionConfig::default()
        .with_tiling(TilingPolicy::Fixed(TilingConfig::new(64, 64, 2, 4, 4)));
    let s = session_with(config);
    let a = counting_4x4();
    let mut c = Matrix::zeros(4, 4);
    let err = run_strategy(&s, Strategy::TiledColMajorPadded, &a, &a, &mut c).unwrap_err();
    assert!(matches!(err, SgemmError::Configuration(_)), "{err}");
    assert_eq!(s.device().live_buffers(), 0);
    assert_eq!(s.device().live_kernels(), 0);
}

#[test]
fn test_zero_fixed_tiling_is_a_configuration_error() {
    for validate_tiling in [true, false] {
        let config = SessionConfig::default()
            .with_tiling(TilingPolicy::Fixed(TilingConfig::new(0, 0, 8, 4, 4)))
            .with_validate_tiling(validate_tiling);
        let s = session_with(config);
        let a = counting_4x4();
        let mut c = Matrix::zeros(4, 4);
        for strategy in Strategy::DEFAULT_ORDER {
            let err = run_strategy(&s, strategy, &a, &a, &mut c).unwrap_err();
            assert!(
                matches!(err, SgemmError::Configuration(TilingViolation::NotPowerOfTwo { .. })),
                "{strategy}: {err}"
            );
        }
        assert!(s.device().launches().iter().all(|l| !l.kind.is_tiled()));
        assert_eq!(s.device().live_buffers(), 0);
        assert_eq!(s.device().live_kernels(), 0);
    }
}

#[test]
fn test_overflowing_fixed_tiling_is_a_configuration_error() {
    let huge = 1usize << (usize::BITS - 1);
    let config = SessionConfig::default()
        .with_tiling(TilingPolicy::Fixed(TilingConfig::new(huge, huge, 8, 4, 4)));
    let s = session_with(config);
    let a = counting_4x4();
    let mut c = Matrix::zeros(4, 4);
    let err = run_strategy(&s, Strategy::TiledColMajorPadded, &a, &a, &mut c).unwrap_err();
    assert!(matches!(
        err,
        SgemmError::Configuration(TilingViolation::Overflow { .. })
    ));
}

#[test]
fn test_disabled_tiling_validation_still_launches() {
    // breaks the A-tile invariant but emulates fine on the host
    let config = SessionConfig::default()
        .with_tiling(TilingPolicy::Fixed(TilingConfig::new(64, 64, 2, 4, 4)))
        .with_validate_tiling(false);
    let s = session_with(config);
    let a = counting_4x4();
    let mut c = Matrix::zeros(4, 4);
    run_strategy(&s, Strategy::Tiled, &a, &a, &mut c).unwrap();
    assert_eq!(c, reference_matmul(&a, &a).unwrap());
}

#[test]
fn test_broken_kernel_source_is_a_build_error() {
    let dir = std::env::temp_dir().join(format!("tiled-sgemm-broken-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(KernelKind::Naive.file_name()), "__kernel void other() {}").unwrap();

    let s = session_with(SessionConfig::default().with_kernel_dir(&dir));
    let a = counting_4x4();
    let mut c = Matrix::zeros(4, 4);
    let err = run_strategy(&s, Strategy::Naive, &a, &a, &mut c).unwrap_err();
    assert!(
        matches!(err, SgemmError::Build { ref kernel, .. } if kernel == "matmult_simple"),
        "{err}"
    );
    assert_eq!(s.device().live_buffers(), 0);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_missing_kernel_file_is_reported() {
    let s = session_with(SessionConfig::default().with_kernel_dir("/nonexistent/tiled-sgemm"));
    let a = counting_4x4();
    let mut c = Matrix::zeros(4, 4);
    let err = run_strategy(&s, Strategy::Tiled, &a, &a, &mut c).unwrap_err();
    assert!(matches!(err, SgemmError::KernelSource { .. }));
}

#[test]
fn test_stalled_device_times_out() {
    let s = Session::new(
        ReferenceDevice::new().with_stalled_launches(),
        SessionConfig::default(),
    );
    let a = counting_4x4();
    let mut c = Matrix::zeros(4, 4);
    for strategy in Strategy::ALL {
        let err = run_strategy(&s, strategy, &a, &a, &mut c).unwrap_err();
        assert!(matches!(err, SgemmError::Timeout { .. }), "{strategy}: {err}");
    }
    assert_eq!(s.device().live_buffers(), 0);
    assert_eq!(s.device().live_kernels(), 0);
}

#[test]
fn test_stalled_transfers_time_out_and_release() {
    let config = SessionConfig::default().with_launch_timeout(Duration::from_millis(7));
    let s = Session::new(ReferenceDevice::new().with_stalled_transfers(), config);
    let a = counting_4x4();
    for strategy in Strategy::ALL {
        let mut c = Matrix::zeros(4, 4);
        match run_strategy(&s, strategy, &a, &a, &mut c) {
            Err(SgemmError::Timeout { timeout, .. }) => {
                assert_eq!(timeout, Duration::from_millis(7), "{strategy}")
            }
            other => panic!("{strategy}: unexpected {other:?}"),
        }
    }
    assert!(s.device().launches().is_empty());
    assert_eq!(s.device().live_buffers(), 0);
    assert_eq!(s.device().live_kernels(), 0);
}

#[test]
fn test_corrupted_device_transpose_is_reported() {
    let config = SessionConfig::default()
        .with_transpose_mode(TransposeMode::Device)
        .with_validate_transpose(true);
    let s = Session::new(ReferenceDevice::new().with_corrupted_transpose(), config);
    let a = Matrix::generate(3, 5, MatrixFill::Increasing);
    let b = Matrix::generate(5, 4, MatrixFill::Increasing);
    let mut c = Matrix::zeros(3, 4);

    let err = run_strategy(&s, Strategy::TiledColMajor, &a, &b, &mut c).unwrap_err();
    match err {
        SgemmError::Validation(m) => assert_eq!(
            m,
            Mismatch {
                row: 4,
                col: 2,
                expected: 14.0,
                actual: 15.0,
            }
        ),
        other => panic!("unexpected {other}"),
    }
    // the matmul never ran
    assert_eq!(s.device().launches().len(), 1);
    assert_eq!(s.device().live_buffers(), 0);
    assert_eq!(s.device().live_kernels(), 0);
}

// ============================================================================
// Dispatch
// ============================================================================

#[test]
fn test_staged_operand_is_consumed_and_released() {
    let s = session_with(SessionConfig::default());
    let a = Matrix::generate(8, 8, MatrixFill::Increasing);
    let at = tiled_sgemm::GpuMatrix::from_host(
        s.device(),
        &a.transposed(),
        tiled_sgemm::BufferAccess::ReadWrite,
        s.config().launch_timeout,
    )
    .unwrap();
    assert_eq!(s.device().live_buffers(), 1);

    let mut c = Matrix::zeros(8, 8);
    dispatch(
        &s,
        DispatchRequest::new(KernelKind::TiledColMajor, (8, 8, 8), OperandA::Staged(at), &a),
        &mut c,
    )
    .unwrap();
    assert_eq!(c, reference_matmul(&a, &a).unwrap());
    assert_eq!(s.device().live_buffers(), 0);
}

#[test]
fn test_padded_kernel_rejects_unaligned_dims() {
    // the padded kernel has no bounds checks; the host emulation refuses
    let s = session_with(SessionConfig::default());
    let a = Matrix::generate(5, 5, MatrixFill::Increasing);
    let mut c = Matrix::zeros(5, 5);
    let err = dispatch(
        &s,
        DispatchRequest::new(
            KernelKind::TiledColMajorPadded,
            (5, 5, 5),
            OperandA::Host(&a.transposed()),
            &a,
        ),
        &mut c,
    )
    .unwrap_err();
    assert!(matches!(err, SgemmError::Resource(_)), "{err}");
}

//! CPU reference multiply and exact comparison.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{Mismatch, Result, SgemmError};
use crate::types::Matrix;

/// Triple-loop `A × B`, accumulating over k in ascending order.
///
/// Rows are computed in parallel with the `parallel` feature.
pub fn reference_matmul(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    if a.cols() != b.rows() {
        return Err(SgemmError::DimensionMismatch(format!(
            "A is {}x{} but B is {}x{}",
            a.rows(),
            a.cols(),
            b.rows(),
            b.cols()
        )));
    }
    let (m, n) = (a.rows(), b.cols());
    let mut c = Matrix::zeros(m, n);
    if n == 0 {
        return Ok(c);
    }

    #[cfg(feature = "parallel")]
    {
        c.as_mut_slice()
            .par_chunks_mut(n)
            .enumerate()
            .for_each(|(i, row)| reference_row(a, b, i, row));
    }

    #[cfg(not(feature = "parallel"))]
    {
        for (i, row) in c.as_mut_slice().chunks_mut(n).enumerate() {
            reference_row(a, b, i, row);
        }
    }

    Ok(c)
}

fn reference_row(a: &Matrix, b: &Matrix, i: usize, row: &mut [f32]) {
    for (j, out) in row.iter_mut().enumerate() {
        let mut acc = 0.0f32;
        for p in 0..a.cols() {
            acc += a.get(i, p) * b.get(p, j);
        }
        *out = acc;
    }
}

/// Find the first element (row-major order) where the matrices differ.
///
/// Comparison is exact `f32` equality.
pub fn first_mismatch(expected: &Matrix, actual: &Matrix) -> Option<Mismatch> {
    let cols = expected.cols();
    expected
        .as_slice()
        .iter()
        .zip(actual.as_slice())
        .position(|(e, a)| e != a)
        .map(|idx| Mismatch {
            row: idx / cols,
            col: idx % cols,
            expected: expected.as_slice()[idx],
            actual: actual.as_slice()[idx],
        })
}

/// Fail with [`SgemmError::Validation`] on the first differing element.
pub fn assert_matrices_equal(expected: &Matrix, actual: &Matrix) -> Result<()> {
    if !actual.has_shape(expected.rows(), expected.cols()) {
        return Err(SgemmError::DimensionMismatch(format!(
            "expected a {}x{} matrix, got {}x{}",
            expected.rows(),
            expected.cols(),
            actual.rows(),
            actual.cols()
        )));
    }
    match first_mismatch(expected, actual) {
        Some(mismatch) => Err(mismatch.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MatrixFill;

    #[test]
    fn test_reference_matmul_2x2() {
        let a = Matrix::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = Matrix::from_vec(2, 2, vec![5.0, 6.0, 7.0, 8.0]).unwrap();
        let c = reference_matmul(&a, &b).unwrap();
        assert_eq!(c.as_slice(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_reference_matmul_rejects_bad_shapes() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(2, 3);
        assert!(matches!(
            reference_matmul(&a, &b),
            Err(SgemmError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_equal_matrices_pass() {
        let a = Matrix::generate(5, 7, MatrixFill::Increasing);
        assert!(assert_matrices_equal(&a, &a.clone()).is_ok());
    }

    #[test]
    fn test_reports_first_mismatch() {
        let expected = Matrix::generate(4, 4, MatrixFill::Increasing);
        let mut actual = expected.clone();
        actual.set(2, 1, 99.0);
        actual.set(3, 3, -1.0);
        let err = assert_matrices_equal(&expected, &actual).unwrap_err();
        match err {
            SgemmError::Validation(m) => {
                assert_eq!((m.row, m.col), (2, 1));
                assert_eq!(m.expected, 9.0);
                assert_eq!(m.actual, 99.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_nan_is_a_mismatch() {
        let expected = Matrix::zeros(1, 2);
        let actual = Matrix::from_vec(1, 2, vec![0.0, f32::NAN]).unwrap();
        assert!(matches!(
            assert_matrices_equal(&expected, &actual),
            Err(SgemmError::Validation(Mismatch { row: 0, col: 1, .. }))
        ));
    }
}

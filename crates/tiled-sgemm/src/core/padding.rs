//! Tile-aligned padding of operands and cropping of results.

use std::borrow::Cow;

use super::tiling::TilingConfig;
use crate::types::Matrix;

/// Round `dim` up to the next multiple of `tile`, which must be non-zero.
#[inline]
pub fn pad_to(dim: usize, tile: usize) -> usize {
    dim.div_ceil(tile) * tile
}

/// Problem dimensions rounded up to whole tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddedDims {
    pub m: usize,
    pub k: usize,
    pub n: usize,
}

impl PaddedDims {
    /// Pad `m`, `k`, `n` to multiples of `BM`, `BK`, `BN` respectively.
    pub fn new(m: usize, k: usize, n: usize, tiling: &TilingConfig) -> Self {
        Self {
            m: pad_to(m, tiling.bm),
            k: pad_to(k, tiling.bk),
            n: pad_to(n, tiling.bn),
        }
    }

    /// Whether any dimension grew.
    pub fn is_padded(&self, m: usize, k: usize, n: usize) -> bool {
        (self.m, self.k, self.n) != (m, k, n)
    }
}

/// Zero-pad `src` to `rows×cols`.
///
/// Returns the original matrix borrowed when it already has that shape, so a
/// same-size copy is never allocated.
pub fn pad_matrix(src: &Matrix, rows: usize, cols: usize) -> Cow<'_, Matrix> {
    if src.has_shape(rows, cols) {
        return Cow::Borrowed(src);
    }
    let mut padded = Matrix::zeros(rows, cols);
    padded.copy_region_from(src, src.rows(), src.cols());
    Cow::Owned(padded)
}

/// Copy the top-left `out.rows()×out.cols()` region of `padded` into `out`.
pub fn crop_into(padded: &Matrix, out: &mut Matrix) {
    let (rows, cols) = (out.rows(), out.cols());
    out.copy_region_from(padded, rows, cols);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MatrixFill;

    #[test]
    fn test_pad_to() {
        assert_eq!(pad_to(1, 8), 8);
        assert_eq!(pad_to(8, 8), 8);
        assert_eq!(pad_to(9, 8), 16);
        assert_eq!(pad_to(300, 64), 320);
    }

    #[test]
    fn test_padded_dims() {
        let dims = PaddedDims::new(300, 100, 64, &TilingConfig::MEDIUM);
        assert_eq!(dims, PaddedDims { m: 320, k: 104, n: 64 });
        assert!(dims.is_padded(300, 100, 64));

        let dims = PaddedDims::new(128, 16, 256, &TilingConfig::LARGE);
        assert!(!dims.is_padded(128, 16, 256));
    }

    #[test]
    fn test_pad_matrix_borrows_when_aligned() {
        let m = Matrix::generate(8, 8, MatrixFill::Increasing);
        assert!(matches!(pad_matrix(&m, 8, 8), Cow::Borrowed(_)));
    }

    #[test]
    fn test_pad_matrix_zero_fills() {
        let m = Matrix::generate(2, 3, MatrixFill::Increasing);
        let p = pad_matrix(&m, 4, 4);
        assert!(matches!(p, Cow::Owned(_)));
        assert_eq!(
            p.as_slice(),
            &[
                0.0, 1.0, 2.0, 0.0, //
                3.0, 4.0, 5.0, 0.0, //
                0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 0.0,
            ]
        );
    }

    #[test]
    fn test_crop_into() {
        let padded = Matrix::generate(4, 4, MatrixFill::Increasing);
        let mut out = Matrix::zeros(3, 2);
        crop_into(&padded, &mut out);
        assert_eq!(out.as_slice(), &[0.0, 1.0, 4.0, 5.0, 8.0, 9.0]);
    }
}

//! Host matrix type and generators.
//!
//! Every stage of the pipeline works on [`Matrix`], a dense row-major buffer
//! of `f32`. Matrices are owned by the caller and passed by reference;
//! output matrices are written in place.
//!
//! # Layouts
//!
//! A row-major `rows×cols` matrix stores element `(i, j)` at `i * cols + j`.
//! The column-major copy of an `m×k` matrix A used by the column-major
//! kernels is simply the row-major `k×m` matrix `Aᵀ`:
//!
//! ```text
//! A (m×k, row-major)          Aᵀ (k×m, row-major == A column-major)
//! ┌ a00 a01 a02 ┐             ┌ a00 a10 ┐
//! └ a10 a11 a12 ┘             │ a01 a11 │
//!                             └ a02 a12 ┘
//! ```

use std::fmt;

use rand::Rng;

use crate::error::{Result, SgemmError};

/// Rows/columns shown by [`Matrix`]'s `Display` before eliding with `...`.
pub const MAX_DISPLAY_LEN: usize = 10;

/// How to fill a freshly generated matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatrixFill {
    /// Random integer digits in `0..10`.
    Random,
    /// Every element equals its column index.
    ColumnIndex,
    /// A counter increasing in row-major order, starting at 0.
    #[default]
    Increasing,
}

/// A dense row-major matrix of `f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// Allocate a zeroed matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Wrap row-major data.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(SgemmError::DimensionMismatch(format!(
                "Expected {} elements, got {}",
                rows * cols,
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Generate a matrix with the given fill, using the thread-local RNG for
    /// [`MatrixFill::Random`].
    pub fn generate(rows: usize, cols: usize, fill: MatrixFill) -> Self {
        Self::generate_with(rows, cols, fill, &mut rand::thread_rng())
    }

    /// Generate a matrix with the given fill and random source.
    pub fn generate_with<R: Rng + ?Sized>(
        rows: usize,
        cols: usize,
        fill: MatrixFill,
        rng: &mut R,
    ) -> Self {
        let data = (0..rows * cols)
            .map(|idx| match fill {
                MatrixFill::Random => rng.gen_range(0..10) as f32,
                MatrixFill::ColumnIndex => (idx % cols) as f32,
                MatrixFill::Increasing => idx as f32,
            })
            .collect();
        Self { rows, cols, data }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the matrix holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of the element storage in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Whether this matrix is `rows×cols`.
    pub fn has_shape(&self, rows: usize, cols: usize) -> bool {
        self.rows == rows && self.cols == cols
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Element at `(row, col)`.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    /// Overwrite the element at `(row, col)`.
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * self.cols + col] = value;
    }

    /// Reset every element to zero.
    pub fn fill_zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Transpose into a zeroed `target_rows×target_cols` matrix.
    ///
    /// The target may be larger than `cols×rows`; the extra region stays
    /// zero, which is how the padded column-major operand is produced.
    ///
    /// # Panics
    ///
    /// Panics if the target is smaller than `cols×rows`.
    pub fn transpose_into_padded(&self, target_rows: usize, target_cols: usize) -> Matrix {
        assert!(
            target_rows >= self.cols && target_cols >= self.rows,
            "transpose target {}x{} smaller than {}x{}",
            target_rows,
            target_cols,
            self.cols,
            self.rows
        );
        let mut out = Matrix::zeros(target_rows, target_cols);
        for i in 0..self.rows {
            for j in 0..self.cols {
                out.data[j * target_cols + i] = self.data[i * self.cols + j];
            }
        }
        out
    }

    /// Plain transpose.
    pub fn transposed(&self) -> Matrix {
        self.transpose_into_padded(self.cols, self.rows)
    }

    /// Copy the top-left `rows×cols` region of `src` into the top-left of
    /// `self`.
    ///
    /// # Panics
    ///
    /// Panics if the region does not fit in either matrix.
    pub fn copy_region_from(&mut self, src: &Matrix, rows: usize, cols: usize) {
        assert!(rows <= src.rows && cols <= src.cols, "region exceeds source");
        assert!(rows <= self.rows && cols <= self.cols, "region exceeds target");
        for i in 0..rows {
            let src_row = &src.data[i * src.cols..i * src.cols + cols];
            self.data[i * self.cols..i * self.cols + cols].copy_from_slice(src_row);
        }
    }
}

impl fmt::Display for Matrix {
    /// Prints at most [`MAX_DISPLAY_LEN`] rows and columns, then `...`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}x{}", self.rows, self.cols)?;
        for i in 0..self.rows.min(MAX_DISPLAY_LEN) {
            for j in 0..self.cols.min(MAX_DISPLAY_LEN) {
                write!(f, "{:.2} ", self.get(i, j))?;
            }
            if self.cols > MAX_DISPLAY_LEN {
                write!(f, "...")?;
            }
            writeln!(f)?;
        }
        if self.rows > MAX_DISPLAY_LEN {
            writeln!(f, "...")?;
        }
        Ok(())
    }
}

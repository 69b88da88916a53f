//! Device-resident matrices.

use std::time::Duration;

use crate::device::{BufferAccess, ComputeDevice};
use crate::error::{Result, SgemmError};
use crate::types::Matrix;

/// A row-major matrix stored in device memory.
///
/// Owns its buffer; the device resource is released when the value is
/// dropped. Moving a `GpuMatrix` between pipeline stages moves that
/// ownership with it. Every transfer waits at most `timeout` for the
/// device.
pub struct GpuMatrix<B> {
    buffer: B,
    rows: usize,
    cols: usize,
}

impl<B> GpuMatrix<B> {
    /// Allocate and upload a host matrix.
    pub fn from_host<D>(
        device: &D,
        host: &Matrix,
        access: BufferAccess,
        timeout: Duration,
    ) -> Result<Self>
    where
        D: ComputeDevice<Buffer = B>,
    {
        let mut buffer = device.create_buffer(host.len(), access)?;
        device.write_buffer(&mut buffer, host.as_slice(), timeout)?;
        Ok(Self {
            buffer,
            rows: host.rows(),
            cols: host.cols(),
        })
    }

    /// Allocate a matrix with every element set to zero.
    pub fn alloc_zeroed<D>(
        device: &D,
        rows: usize,
        cols: usize,
        access: BufferAccess,
        timeout: Duration,
    ) -> Result<Self>
    where
        D: ComputeDevice<Buffer = B>,
    {
        let mut buffer = device.create_buffer(rows * cols, access)?;
        device.write_buffer(&mut buffer, &vec![0.0; rows * cols], timeout)?;
        Ok(Self { buffer, rows, cols })
    }

    /// Copy back to a new host matrix.
    pub fn to_host<D>(&self, device: &D, timeout: Duration) -> Result<Matrix>
    where
        D: ComputeDevice<Buffer = B>,
    {
        let mut out = Matrix::zeros(self.rows, self.cols);
        device.read_buffer(&self.buffer, out.as_mut_slice(), timeout)?;
        Ok(out)
    }

    /// Copy back into an existing host matrix of the same shape.
    pub fn read_into<D>(&self, device: &D, out: &mut Matrix, timeout: Duration) -> Result<()>
    where
        D: ComputeDevice<Buffer = B>,
    {
        if !out.has_shape(self.rows, self.cols) {
            return Err(SgemmError::DimensionMismatch(format!(
                "cannot read {}x{} device matrix into {}x{}",
                self.rows,
                self.cols,
                out.rows(),
                out.cols()
            )));
        }
        device.read_buffer(&self.buffer, out.as_mut_slice(), timeout)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Whether this matrix is `rows×cols`.
    pub fn has_shape(&self, rows: usize, cols: usize) -> bool {
        self.rows == rows && self.cols == cols
    }

    /// Size of the device allocation in bytes.
    pub fn byte_len(&self) -> usize {
        self.rows * self.cols * std::mem::size_of::<f32>()
    }

    /// Get the underlying buffer.
    pub fn as_buffer(&self) -> &B {
        &self.buffer
    }
}

//! Device buffers and bounded transfers.
//!
//! Transfers are enqueued non-blocking from a host staging copy and then
//! polled like kernels, so a wedged device surfaces as a timeout.

use std::fmt;
use std::mem;
use std::time::Duration;

use opencl3::event::Event;
use opencl3::memory::{
    Buffer, ClMem, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY,
};
use opencl3::types::{cl_float, cl_mem, cl_mem_flags, CL_NON_BLOCKING};
use tiled_sgemm::{BufferAccess, Result, SgemmError};

use crate::context::OpenClDevice;
use crate::error::OpenClError;
use crate::wait::wait_for;

/// `f32` device memory with its element count.
pub struct OpenClBuffer {
    inner: Buffer<cl_float>,
    len: usize,
}

impl fmt::Debug for OpenClBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenClBuffer").field("len", &self.len).finish()
    }
}

impl OpenClBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn raw(&self) -> cl_mem {
        self.inner.get()
    }
}

pub(crate) fn access_flags(access: BufferAccess) -> cl_mem_flags {
    match access {
        BufferAccess::ReadOnly => CL_MEM_READ_ONLY,
        BufferAccess::WriteOnly => CL_MEM_WRITE_ONLY,
        BufferAccess::ReadWrite => CL_MEM_READ_WRITE,
    }
}

fn check_len(op: &str, buffer: &OpenClBuffer, host_len: usize) -> Result<()> {
    if host_len > buffer.len {
        return Err(SgemmError::resource(format!(
            "{op} of {host_len} elements into a buffer of {}",
            buffer.len
        )));
    }
    Ok(())
}

impl OpenClDevice {
    pub(crate) fn alloc(&self, len: usize, access: BufferAccess) -> Result<OpenClBuffer> {
        // zero-sized buffers are invalid in OpenCL
        let inner = unsafe {
            Buffer::<cl_float>::create(
                &self.context,
                access_flags(access),
                len.max(1),
                std::ptr::null_mut(),
            )
            .map_err(|e| OpenClError::api("clCreateBuffer", e))?
        };
        Ok(OpenClBuffer { inner, len })
    }

    pub(crate) fn upload(
        &self,
        buffer: &mut OpenClBuffer,
        data: &[f32],
        timeout: Duration,
    ) -> Result<()> {
        check_len("write", buffer, data.len())?;
        if data.is_empty() {
            return Ok(());
        }
        let staging = data.to_vec();
        let event = unsafe {
            self.queue
                .enqueue_write_buffer(&mut buffer.inner, CL_NON_BLOCKING, 0, &staging, &[])
                .map_err(|e| OpenClError::api("clEnqueueWriteBuffer", e))?
        };
        self.settle(&event, "write buffer", staging, timeout)?;
        Ok(())
    }

    pub(crate) fn download(
        &self,
        buffer: &OpenClBuffer,
        out: &mut [f32],
        timeout: Duration,
    ) -> Result<()> {
        check_len("read", buffer, out.len())?;
        if out.is_empty() {
            return Ok(());
        }
        let mut staging = vec![0.0; out.len()];
        let event = unsafe {
            self.queue
                .enqueue_read_buffer(&buffer.inner, CL_NON_BLOCKING, 0, &mut staging, &[])
                .map_err(|e| OpenClError::api("clEnqueueReadBuffer", e))?
        };
        let staging = self.settle(&event, "read buffer", staging, timeout)?;
        out.copy_from_slice(&staging);
        Ok(())
    }

    /// Wait for the transfer behind `event` and hand back its staging memory.
    ///
    /// On failure the transfer may still be in flight, so the staging
    /// memory is leaked rather than freed under the device.
    fn settle(
        &self,
        event: &Event,
        operation: &str,
        staging: Vec<f32>,
        timeout: Duration,
    ) -> Result<Vec<f32>> {
        let waited = self
            .queue
            .flush()
            .map_err(|e| SgemmError::from(OpenClError::api("clFlush", e)))
            .and_then(|()| wait_for(event, operation, timeout));
        match waited {
            Ok(()) => Ok(staging),
            Err(e) => {
                mem::forget(staging);
                Err(e)
            }
        }
    }
}

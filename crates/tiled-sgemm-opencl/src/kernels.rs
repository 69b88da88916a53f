//! Program builds and kernel launches.

use std::time::Duration;

use opencl3::event::Event;
use opencl3::kernel::{ExecuteKernel, Kernel};
use opencl3::program::Program;
use opencl3::types::{cl_int, cl_mem};
use tiled_sgemm::{
    BufferAccess, ComputeDevice, KernelArg, KernelSource, KernelTiming, LaunchGeometry, Result,
    SgemmError,
};
use tracing::{debug, trace};

use crate::context::OpenClDevice;
use crate::error::OpenClError;
use crate::memory::OpenClBuffer;
use crate::wait::wait_for;

/// A built program and one kernel created from it.
pub struct OpenClKernel {
    kernel: Kernel,
    name: String,
    _program: Program,
}

impl OpenClKernel {
    pub fn name(&self) -> &str {
        &self.name
    }
}

enum RawArg {
    Int(cl_int),
    Mem(cl_mem),
}

fn raw_args(args: &[KernelArg<'_, OpenClBuffer>]) -> Vec<RawArg> {
    args.iter()
        .map(|arg| match arg {
            KernelArg::Int(v) => RawArg::Int(*v),
            KernelArg::Buffer(b) => RawArg::Mem(b.raw()),
        })
        .collect()
}

/// Compiler flags for `opencl_c_version` strings like `"OpenCL C 2.0 "`.
///
/// OpenCL C 2.0 is requested when available so untiled launches may use
/// non-uniform work-groups.
fn build_options(opencl_c_version: &str) -> &'static str {
    let major = opencl_c_version
        .trim()
        .strip_prefix("OpenCL C ")
        .and_then(|v| v.split('.').next())
        .and_then(|v| v.parse::<u32>().ok());
    match major {
        Some(major) if major >= 2 => "-cl-std=CL2.0",
        _ => "",
    }
}

fn timing(event: &Event) -> Result<KernelTiming> {
    let start = event
        .profiling_command_start()
        .map_err(|e| OpenClError::api("CL_PROFILING_COMMAND_START", e))?;
    let end = event
        .profiling_command_end()
        .map_err(|e| OpenClError::api("CL_PROFILING_COMMAND_END", e))?;
    Ok(KernelTiming::from_timestamps(start, end))
}

impl ComputeDevice for OpenClDevice {
    type Buffer = OpenClBuffer;
    type Kernel = OpenClKernel;

    fn name(&self) -> String {
        self.info().name.clone()
    }

    fn max_local_size(&self) -> usize {
        self.local_size_limit()
    }

    fn build_kernel(&self, source: &KernelSource, name: &str) -> Result<OpenClKernel> {
        let text = source.render();
        let options = build_options(&self.info().opencl_c_version);
        let program = Program::create_and_build_from_source(&self.context, &text, options)
            .map_err(|log| SgemmError::Build {
                kernel: name.to_string(),
                log,
            })?;
        let kernel = Kernel::create(&program, name).map_err(|e| SgemmError::Build {
            kernel: name.to_string(),
            log: format!("clCreateKernel: {e}"),
        })?;
        debug!(kernel = name, tiling = ?source.tiling(), "built kernel");
        Ok(OpenClKernel {
            kernel,
            name: name.to_string(),
            _program: program,
        })
    }

    fn kernel_work_group_size(&self, kernel: &OpenClKernel) -> Result<usize> {
        let size = kernel
            .kernel
            .get_work_group_size(self.device.id())
            .map_err(|e| OpenClError::api("CL_KERNEL_WORK_GROUP_SIZE", e))?;
        Ok(size)
    }

    fn create_buffer(&self, len: usize, access: BufferAccess) -> Result<OpenClBuffer> {
        self.alloc(len, access)
    }

    fn write_buffer(
        &self,
        buffer: &mut OpenClBuffer,
        data: &[f32],
        timeout: Duration,
    ) -> Result<()> {
        self.upload(buffer, data, timeout)
    }

    fn read_buffer(
        &self,
        buffer: &OpenClBuffer,
        out: &mut [f32],
        timeout: Duration,
    ) -> Result<()> {
        self.download(buffer, out, timeout)
    }

    fn launch(
        &self,
        kernel: &OpenClKernel,
        args: &[KernelArg<'_, OpenClBuffer>],
        geometry: LaunchGeometry,
        timeout: Duration,
    ) -> Result<KernelTiming> {
        let raw = raw_args(args);
        trace!(kernel = %kernel.name, args = ?args, %geometry, "enqueue");

        let event = unsafe {
            let mut exec = ExecuteKernel::new(&kernel.kernel);
            for arg in &raw {
                match arg {
                    RawArg::Int(v) => exec.set_arg(v),
                    RawArg::Mem(m) => exec.set_arg(m),
                };
            }
            exec.set_global_work_sizes(&geometry.global)
                .set_local_work_sizes(&geometry.local)
                .enqueue_nd_range(&self.queue)
                .map_err(|e| OpenClError::api("clEnqueueNDRangeKernel", e))?
        };
        self.queue
            .flush()
            .map_err(|e| OpenClError::api("clFlush", e))?;

        wait_for(&event, &format!("kernel {}", kernel.name), timeout)?;
        timing(&event)
    }

    fn finish(&self, timeout: Duration) -> Result<()> {
        // in-order queue: the marker completes once everything before it has
        // SAFETY: empty wait list; no host memory is referenced by the marker
        let marker = unsafe { self.queue.enqueue_marker_with_wait_list(&[]) }
            .map_err(|e| OpenClError::api("clEnqueueMarkerWithWaitList", e))?;
        self.queue
            .flush()
            .map_err(|e| OpenClError::api("clFlush", e))?;
        wait_for(&marker, "queue drain", timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiled_sgemm::{reference_matmul, KernelKind, Matrix, MatrixFill, Session, SessionConfig};

    fn device() -> Option<OpenClDevice> {
        match OpenClDevice::new() {
            Ok(d) => Some(d),
            Err(_) => {
                println!("OpenCL not available, skipping test");
                None
            }
        }
    }

    #[test]
    fn test_build_options() {
        assert_eq!(build_options("OpenCL C 1.2 "), "");
        assert_eq!(build_options("OpenCL C 2.0 "), "-cl-std=CL2.0");
        assert_eq!(build_options("OpenCL C 3.0"), "-cl-std=CL2.0");
        assert_eq!(build_options("unknown"), "");
    }

    #[test]
    fn test_broken_source_reports_build_log() {
        let Some(device) = device() else { return };
        let source = KernelSource::plain("__kernel void matmult_simple( {");
        match device.build_kernel(&source, "matmult_simple") {
            Err(SgemmError::Build { kernel, .. }) => assert_eq!(kernel, "matmult_simple"),
            Err(other) => panic!("unexpected {other}"),
            Ok(_) => panic!("broken source should not build"),
        }
    }

    #[test]
    fn test_kernel_work_group_size() {
        let Some(device) = device() else { return };
        let session = Session::new(device, SessionConfig::default());
        let source = KernelSource::plain(session.load_kernel_source(KernelKind::Naive).unwrap());
        let kernel = session
            .device()
            .build_kernel(&source, KernelKind::Naive.kernel_name())
            .unwrap();
        assert!(session.device().kernel_work_group_size(&kernel).unwrap() >= 1);
    }

    #[test]
    fn test_finish_drains_queued_transfer() {
        let Some(device) = device() else { return };
        let timeout = Duration::from_secs(10);
        let mut buf = device.create_buffer(1024, BufferAccess::ReadWrite).unwrap();
        device.write_buffer(&mut buf, &[2.5; 1024], timeout).unwrap();
        device.finish(timeout).unwrap();
        let mut out = vec![0.0; 1024];
        device.read_buffer(&buf, &mut out, timeout).unwrap();
        assert!(out.iter().all(|&v| v == 2.5));
    }

    #[test]
    fn test_all_strategies_on_device() {
        let Some(device) = device() else { return };
        let session = Session::new(device, SessionConfig::default());
        let a = Matrix::generate(70, 33, MatrixFill::ColumnIndex);
        let b = Matrix::generate(33, 50, MatrixFill::ColumnIndex);
        let expected = reference_matmul(&a, &b).unwrap();

        for strategy in tiled_sgemm::Strategy::DEFAULT_ORDER {
            let mut c = Matrix::zeros(70, 50);
            let report = tiled_sgemm::run_strategy(&session, strategy, &a, &b, &mut c).unwrap();
            assert_eq!(c, expected, "{strategy}");
            assert!(report.dispatch.timing.elapsed_ns() > 0);
        }
    }
}

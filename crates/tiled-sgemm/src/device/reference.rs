//! Host emulation of the shipped kernels.
//!
//! [`ReferenceDevice`] runs the pipeline end to end without a GPU. It
//! compiles nothing; instead it checks that the program text declares the
//! requested kernel and (for tiled kernels) the tiling macros, then emulates
//! each kernel's index arithmetic on the host over the exact NDRange it is
//! launched with. Fresh buffers are filled with NaN so reads of memory that
//! was never written show up in the result.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use tracing::trace;

use super::{BufferAccess, ComputeDevice, KernelArg, KernelTiming, LaunchGeometry};
use crate::core::{KernelKind, KernelSource, TilingConfig};
use crate::error::{Result, SgemmError};

const KINDS: [KernelKind; 5] = [
    KernelKind::Naive,
    KernelKind::Tiled,
    KernelKind::TiledColMajor,
    KernelKind::TiledColMajorPadded,
    KernelKind::Transpose,
];

/// A launch seen by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub kind: KernelKind,
    pub geometry: LaunchGeometry,
    /// Tiling parsed back out of the compiled program text.
    pub tiling: Option<TilingConfig>,
}

/// Host buffer standing in for device memory.
pub struct ReferenceBuffer {
    data: RefCell<Vec<f32>>,
    access: BufferAccess,
    live: Rc<Cell<usize>>,
}

impl ReferenceBuffer {
    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn access(&self) -> BufferAccess {
        self.access
    }
}

impl Drop for ReferenceBuffer {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

/// A "compiled" kernel: its kind and the tiling macros it was built with.
pub struct ReferenceKernel {
    kind: KernelKind,
    tiling: Option<TilingConfig>,
    live: Rc<Cell<usize>>,
}

impl ReferenceKernel {
    pub fn kind(&self) -> KernelKind {
        self.kind
    }
}

impl Drop for ReferenceKernel {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

/// A [`ComputeDevice`] that executes kernels on the host.
pub struct ReferenceDevice {
    max_local_size: usize,
    max_work_group_size: usize,
    stall_launches: bool,
    stall_transfers: bool,
    corrupt_transpose: bool,
    clock_ns: Cell<u64>,
    live_buffers: Rc<Cell<usize>>,
    live_kernels: Rc<Cell<usize>>,
    launches: RefCell<Vec<LaunchRecord>>,
}

impl ReferenceDevice {
    fn check_transfer(&self, operation: &str, timeout: Duration) -> Result<()> {
        if self.stall_transfers {
            return Err(SgemmError::Timeout {
                operation: operation.to_string(),
                timeout,
            });
        }
        Ok(())
    }

    /// A device with a 16×16 local size limit and 256-item work-groups.
    pub fn new() -> Self {
        Self {
            max_local_size: 16,
            max_work_group_size: 256,
            stall_launches: false,
            stall_transfers: false,
            corrupt_transpose: false,
            clock_ns: Cell::new(0),
            live_buffers: Rc::new(Cell::new(0)),
            live_kernels: Rc::new(Cell::new(0)),
            launches: RefCell::new(Vec::new()),
        }
    }

    /// Override the square local size limit (and the work-group size with it).
    pub fn with_max_local_size(mut self, side: usize) -> Self {
        self.max_local_size = side;
        self.max_work_group_size = side * side;
        self
    }

    /// Make every launch time out instead of running.
    pub fn with_stalled_launches(mut self) -> Self {
        self.stall_launches = true;
        self
    }

    /// Make every transfer and queue drain time out.
    pub fn with_stalled_transfers(mut self) -> Self {
        self.stall_transfers = true;
        self
    }

    /// Make the transpose kernel write one wrong value: the last element
    /// of A lands in AT plus one.
    pub fn with_corrupted_transpose(mut self) -> Self {
        self.corrupt_transpose = true;
        self
    }

    /// Buffers allocated and not yet dropped.
    pub fn live_buffers(&self) -> usize {
        self.live_buffers.get()
    }

    /// Kernels built and not yet dropped.
    pub fn live_kernels(&self) -> usize {
        self.live_kernels.get()
    }

    /// Every launch so far, in order.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.borrow().clone()
    }
}

impl Default for ReferenceDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn build_error(name: &str, log: String) -> SgemmError {
    SgemmError::Build {
        kernel: name.to_string(),
        log,
    }
}

fn parse_defines(text: &str) -> HashMap<&str, usize> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("#define "))
        .filter_map(|rest| {
            let mut parts = rest.split_whitespace();
            let name = parts.next()?;
            let value = parts.next()?.parse().ok()?;
            Some((name, value))
        })
        .collect()
}

fn parse_tiling(name: &str, text: &str) -> Result<TilingConfig> {
    let defines = parse_defines(text);
    let get = |macro_name: &str| {
        defines.get(macro_name).copied().ok_or_else(|| {
            build_error(
                name,
                format!("error: use of undeclared identifier '{macro_name}'"),
            )
        })
    };
    let tiling = TilingConfig::new(get("BM")?, get("BN")?, get("BK")?, get("WIM")?, get("WIN")?);
    for (macro_name, expected) in [
        ("WIA_SIZE", tiling.wia_size()),
        ("WIB_SIZE", tiling.wib_size()),
    ] {
        if get(macro_name)? != expected {
            return Err(build_error(
                name,
                format!("error: {macro_name} does not match the tile geometry"),
            ));
        }
    }
    Ok(tiling)
}

/// Positional view of a launch's arguments.
struct Args<'a, 'b> {
    kernel: KernelKind,
    args: &'b [KernelArg<'a, ReferenceBuffer>],
}

impl<'a> Args<'a, '_> {
    fn int(&self, idx: usize) -> Result<usize> {
        match self.args.get(idx) {
            Some(KernelArg::Int(v)) => usize::try_from(*v).map_err(|_| {
                SgemmError::resource(format!("{}: negative argument {idx}", self.kernel))
            }),
            _ => Err(SgemmError::resource(format!(
                "{}: argument {idx} is not an int",
                self.kernel
            ))),
        }
    }

    fn buffer(&self, idx: usize) -> Result<&'a ReferenceBuffer> {
        match self.args.get(idx) {
            Some(KernelArg::Buffer(b)) => Ok(*b),
            _ => Err(SgemmError::resource(format!(
                "{}: argument {idx} is not a buffer",
                self.kernel
            ))),
        }
    }
}

fn out_of_bounds(kernel: KernelKind, what: &str, idx: usize) -> SgemmError {
    SgemmError::resource(format!("{kernel}: out-of-bounds access to {what}[{idx}]"))
}

fn read(kernel: KernelKind, what: &str, data: &[f32], idx: usize) -> Result<f32> {
    data.get(idx)
        .copied()
        .ok_or_else(|| out_of_bounds(kernel, what, idx))
}

fn write(kernel: KernelKind, what: &str, data: &mut [f32], idx: usize, value: f32) -> Result<()> {
    let slot = data
        .get_mut(idx)
        .ok_or_else(|| out_of_bounds(kernel, what, idx))?;
    *slot = value;
    Ok(())
}

impl ReferenceDevice {
    /// `(m, k, n, A, B, C)`; returns the multiply-add count.
    fn run_matmul(
        &self,
        kernel: &ReferenceKernel,
        args: &Args<'_, '_>,
        geometry: LaunchGeometry,
    ) -> Result<u64> {
        let kind = kernel.kind;
        let (m, k, n) = (args.int(0)?, args.int(1)?, args.int(2)?);
        let a = args.buffer(3)?.data.borrow().clone();
        let b = args.buffer(4)?.data.borrow().clone();
        let mut c = args.buffer(5)?.data.borrow_mut();

        let col_major = matches!(
            kind,
            KernelKind::TiledColMajor | KernelKind::TiledColMajorPadded
        );
        let dot = |row: usize, col: usize| -> Result<f32> {
            let mut acc = 0.0f32;
            for p in 0..k {
                let a_idx = if col_major { p * m + row } else { row * k + p };
                acc += read(kind, "A", &a, a_idx)? * read(kind, "B", &b, p * n + col)?;
            }
            Ok(acc)
        };

        // Work-item sub-tile; the naive kernel computes a single element.
        let (wim, win) = kernel.tiling.map_or((1, 1), |t| (t.wim, t.win));
        if let (KernelKind::TiledColMajorPadded, Some(t)) = (kind, kernel.tiling) {
            if m % t.bm != 0 || k % t.bk != 0 || n % t.bn != 0 {
                return Err(SgemmError::resource(format!(
                    "{kind}: {m}x{k}x{n} is not aligned to {t}"
                )));
            }
        }
        let bounds_checked = kind != KernelKind::TiledColMajorPadded;

        for gx in 0..geometry.global[0] {
            for gy in 0..geometry.global[1] {
                for wi in 0..wim {
                    for wj in 0..win {
                        let (row, col) = (gx * wim + wi, gy * win + wj);
                        if bounds_checked && (row >= m || col >= n) {
                            continue;
                        }
                        let value = dot(row, col)?;
                        write(kind, "C", &mut c, row * n + col, value)?;
                    }
                }
            }
        }
        Ok((m * n * k) as u64)
    }

    /// `(m, k, k2, m2, A, AT)`; returns the element count moved.
    fn run_transpose(&self, args: &Args<'_, '_>, geometry: LaunchGeometry) -> Result<u64> {
        let kind = KernelKind::Transpose;
        let (m, k, _k2, m2) = (args.int(0)?, args.int(1)?, args.int(2)?, args.int(3)?);
        let a = args.buffer(4)?.data.borrow().clone();
        let mut at = args.buffer(5)?.data.borrow_mut();
        for i in 0..geometry.global[0].min(m) {
            for j in 0..geometry.global[1].min(k) {
                let value = read(kind, "A", &a, i * k + j)?;
                write(kind, "AT", &mut at, j * m2 + i, value)?;
            }
        }
        if self.corrupt_transpose && m > 0 && k > 0 {
            let last = (k - 1) * m2 + (m - 1);
            let value = read(kind, "AT", &at, last)?;
            write(kind, "AT", &mut at, last, value + 1.0)?;
        }
        Ok((m * k) as u64)
    }
}

impl ComputeDevice for ReferenceDevice {
    type Buffer = ReferenceBuffer;
    type Kernel = ReferenceKernel;

    fn name(&self) -> String {
        "host reference".to_string()
    }

    fn max_local_size(&self) -> usize {
        self.max_local_size
    }

    fn build_kernel(&self, source: &KernelSource, name: &str) -> Result<ReferenceKernel> {
        let text = source.render();
        let kind = KINDS
            .into_iter()
            .find(|k| k.kernel_name() == name)
            .filter(|_| text.contains(&format!("__kernel void {name}(")))
            .ok_or_else(|| build_error(name, format!("error: no kernel named '{name}' in program")))?;

        let tiling = if kind.is_tiled() {
            Some(parse_tiling(name, &text)?)
        } else {
            None
        };

        self.live_kernels.set(self.live_kernels.get() + 1);
        Ok(ReferenceKernel {
            kind,
            tiling,
            live: Rc::clone(&self.live_kernels),
        })
    }

    fn kernel_work_group_size(&self, _kernel: &ReferenceKernel) -> Result<usize> {
        Ok(self.max_work_group_size)
    }

    fn create_buffer(&self, len: usize, access: BufferAccess) -> Result<ReferenceBuffer> {
        self.live_buffers.set(self.live_buffers.get() + 1);
        Ok(ReferenceBuffer {
            data: RefCell::new(vec![f32::NAN; len]),
            access,
            live: Rc::clone(&self.live_buffers),
        })
    }

    fn write_buffer(
        &self,
        buffer: &mut ReferenceBuffer,
        data: &[f32],
        timeout: Duration,
    ) -> Result<()> {
        self.check_transfer("write buffer", timeout)?;
        let dst = buffer.data.get_mut();
        if data.len() > dst.len() {
            return Err(SgemmError::resource(format!(
                "write of {} elements into a buffer of {}",
                data.len(),
                dst.len()
            )));
        }
        dst[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: &ReferenceBuffer,
        out: &mut [f32],
        timeout: Duration,
    ) -> Result<()> {
        self.check_transfer("read buffer", timeout)?;
        let src = buffer.data.borrow();
        if out.len() > src.len() {
            return Err(SgemmError::resource(format!(
                "read of {} elements from a buffer of {}",
                out.len(),
                src.len()
            )));
        }
        out.copy_from_slice(&src[..out.len()]);
        Ok(())
    }

    fn launch(
        &self,
        kernel: &ReferenceKernel,
        args: &[KernelArg<'_, ReferenceBuffer>],
        geometry: LaunchGeometry,
        timeout: Duration,
    ) -> Result<KernelTiming> {
        let kind = kernel.kind;
        if self.stall_launches {
            return Err(SgemmError::Timeout {
                operation: format!("kernel {kind}"),
                timeout,
            });
        }
        if geometry.local_items() > self.max_work_group_size {
            return Err(SgemmError::resource(format!(
                "{kind}: invalid work-group size, {geometry}"
            )));
        }
        if kind != KernelKind::Naive
            && (geometry.global[0] % geometry.local[0] != 0
                || geometry.global[1] % geometry.local[1] != 0)
        {
            return Err(SgemmError::resource(format!(
                "{kind}: global size not divisible by local size, {geometry}"
            )));
        }

        let args = Args { kernel: kind, args };
        let ops = match kind {
            KernelKind::Transpose => self.run_transpose(&args, geometry)?,
            _ => self.run_matmul(kernel, &args, geometry)?,
        };

        let start = self.clock_ns.get();
        let end = start + ops.max(1);
        self.clock_ns.set(end);
        self.launches.borrow_mut().push(LaunchRecord {
            kind,
            geometry,
            tiling: kernel.tiling,
        });
        trace!(kernel = %kind, %geometry, "reference launch");

        Ok(KernelTiming::from_timestamps(start, end))
    }

    fn finish(&self, timeout: Duration) -> Result<()> {
        self.check_transfer("finish", timeout)
    }
}

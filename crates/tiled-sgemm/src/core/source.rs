//! Kernel source files and the tiling preamble.

use std::fmt;

use super::tiling::TilingConfig;

/// The kernel programs shipped in `kernels/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    /// One work-item per output element.
    Naive,
    /// Row-major A and B, local-memory tiles.
    Tiled,
    /// Column-major A (`Aᵀ`), bounds-checked.
    TiledColMajor,
    /// Column-major A on tile-aligned operands, no bounds checks.
    TiledColMajorPadded,
    /// Row-major A to column-major `Aᵀ`.
    Transpose,
}

impl KernelKind {
    /// File name under the kernel directory.
    pub fn file_name(self) -> &'static str {
        match self {
            KernelKind::Naive => "kernel_matmult.cl",
            KernelKind::Tiled => "kernel_matmult_tiling.cl",
            KernelKind::TiledColMajor => "kernel_matmult_tiling_colmajor.cl",
            KernelKind::TiledColMajorPadded => "kernel_matmult_tiling_colmajor_padded.cl",
            KernelKind::Transpose => "kernel_transpose.cl",
        }
    }

    /// Entry point name inside the program.
    pub fn kernel_name(self) -> &'static str {
        match self {
            KernelKind::Naive => "matmult_simple",
            KernelKind::Tiled => "matmult_block",
            KernelKind::TiledColMajor => "matmult_block_colmajor",
            KernelKind::TiledColMajorPadded => "matmult_block_colmajor_padded",
            KernelKind::Transpose => "transpose",
        }
    }

    /// Whether the program needs the tiling preamble.
    pub fn is_tiled(self) -> bool {
        matches!(
            self,
            KernelKind::Tiled | KernelKind::TiledColMajor | KernelKind::TiledColMajorPadded
        )
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kernel_name())
    }
}

/// Kernel source text together with the tiling it will be compiled for.
///
/// The body is never edited; [`render`](Self::render) emits a block of
/// `#define`s followed by the body verbatim.
#[derive(Debug, Clone)]
pub struct KernelSource {
    body: String,
    tiling: Option<TilingConfig>,
}

impl KernelSource {
    /// Source compiled as-is.
    pub fn plain(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            tiling: None,
        }
    }

    /// Source compiled with the tiling macros defined.
    pub fn with_tiling(body: impl Into<String>, tiling: TilingConfig) -> Self {
        Self {
            body: body.into(),
            tiling: Some(tiling),
        }
    }

    pub fn tiling(&self) -> Option<&TilingConfig> {
        self.tiling.as_ref()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// The macro block for the attached tiling, empty for plain sources.
    pub fn preamble(&self) -> String {
        let Some(t) = self.tiling else {
            return String::new();
        };
        let defines = [
            ("BM", t.bm),
            ("BN", t.bn),
            ("BK", t.bk),
            ("WIM", t.wim),
            ("WIN", t.win),
            ("WIA_SIZE", t.wia_size()),
            ("WIB_SIZE", t.wib_size()),
        ];
        defines
            .iter()
            .map(|(name, value)| format!("#define {name} {value}\n"))
            .collect()
    }

    /// Full program text handed to the compiler.
    pub fn render(&self) -> String {
        let mut out = self.preamble();
        out.push_str(&self.body);
        out
    }
}

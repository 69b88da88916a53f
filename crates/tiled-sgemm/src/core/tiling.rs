//! Tiling parameters, the selection rule table, and launch invariants.

use std::fmt;

use crate::error::TilingViolation;

/// Block and work-item geometry for the tiled kernels.
///
/// A work-group computes one `BM×BN` block of C, stepping through K in
/// slices of `BK`. Each work-item owns a `WIM×WIN` sub-tile of that block,
/// so a work-group has `(BM/WIM) × (BN/WIN)` work-items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TilingConfig {
    /// Block height (rows of A / C per work-group).
    pub bm: usize,
    /// Block width (columns of B / C per work-group).
    pub bn: usize,
    /// Block depth (K slice loaded into local memory per step).
    pub bk: usize,
    /// Work-item sub-tile height.
    pub wim: usize,
    /// Work-item sub-tile width.
    pub win: usize,
}

impl TilingConfig {
    pub const TINY: Self = Self::new(8, 8, 8, 4, 4);
    pub const SMALL: Self = Self::new(16, 16, 8, 4, 4);
    pub const MEDIUM: Self = Self::new(64, 64, 8, 4, 4);
    pub const LARGE: Self = Self::new(128, 128, 16, 8, 8);

    pub const fn new(bm: usize, bn: usize, bk: usize, wim: usize, win: usize) -> Self {
        Self {
            bm,
            bn,
            bk,
            wim,
            win,
        }
    }

    /// Work-items per work-group: `(BM*BN) / (WIM*WIN)`.
    pub fn work_items(&self) -> usize {
        (self.bm * self.bn) / (self.wim * self.win)
    }

    /// Elements of the A tile each work-item loads: `BK*WIM*WIN/BN`.
    pub fn wia_size(&self) -> usize {
        self.bk * self.wim * self.win / self.bn
    }

    /// Elements of the B tile each work-item loads: `BK*WIM*WIN/BM`.
    pub fn wib_size(&self) -> usize {
        self.bk * self.wim * self.win / self.bm
    }

    /// Work-group shape `(BM/WIM, BN/WIN)`.
    pub fn local_size(&self) -> [usize; 2] {
        [self.bm / self.wim, self.bn / self.win]
    }

    /// Check that the values can be rendered into a kernel and padded to:
    /// all five are powers of two and the tile products fit in a `usize`.
    ///
    /// Every derived size ([`work_items`](Self::work_items),
    /// [`wia_size`](Self::wia_size), [`wib_size`](Self::wib_size),
    /// [`local_size`](Self::local_size)) is only meaningful once this passes.
    pub fn validate_form(&self) -> Result<(), TilingViolation> {
        let Self {
            bm,
            bn,
            bk,
            wim,
            win,
        } = *self;

        if ![bm, bn, bk, wim, win].iter().all(|v| v.is_power_of_two()) {
            return Err(TilingViolation::NotPowerOfTwo {
                bm,
                bn,
                bk,
                wim,
                win,
            });
        }

        let products = [
            bm.checked_mul(bn),
            bm.checked_mul(bk),
            bn.checked_mul(bk),
            wim.checked_mul(win),
            bk.checked_mul(wim).and_then(|v| v.checked_mul(win)),
        ];
        if products.iter().any(Option::is_none) {
            return Err(TilingViolation::Overflow {
                bm,
                bn,
                bk,
                wim,
                win,
            });
        }
        Ok(())
    }

    /// Check the four launch invariants against the device limit.
    ///
    /// Checks run in a fixed order and the first failure is returned; nothing
    /// is ever adjusted.
    pub fn validate(&self, max_local_size: usize) -> Result<(), TilingViolation> {
        self.validate_form()?;
        let Self {
            bm,
            bn,
            bk,
            wim,
            win,
        } = *self;

        let work_items = self.work_items();
        if work_items == 0 || (bm * bk) % work_items != 0 {
            return Err(TilingViolation::ATileNotDivisible {
                bm,
                bn,
                bk,
                wim,
                win,
                tile: bm * bk,
                work_items,
            });
        }
        if (bn * bk) % work_items != 0 {
            return Err(TilingViolation::BTileNotDivisible {
                bm,
                bn,
                bk,
                wim,
                win,
                tile: bn * bk,
                work_items,
            });
        }

        if bm / wim > max_local_size {
            return Err(TilingViolation::RowsExceedLocalSize {
                bm,
                wim,
                local: bm / wim,
                max_local_size,
            });
        }
        if bn / win > max_local_size {
            return Err(TilingViolation::ColsExceedLocalSize {
                bn,
                win,
                local: bn / win,
                max_local_size,
            });
        }

        Ok(())
    }
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self::LARGE
    }
}

impl fmt::Display for TilingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BM: {}, BN: {}, BK: {}, WIM: {}, WIN: {}",
            self.bm, self.bn, self.bk, self.wim, self.win
        )
    }
}

/// One bucket of the selection table: matches when every dimension is
/// within its bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingRule {
    pub max_m: usize,
    pub max_n: usize,
    pub max_k: usize,
    pub config: TilingConfig,
}

impl TilingRule {
    pub fn matches(&self, m: usize, k: usize, n: usize) -> bool {
        m <= self.max_m && n <= self.max_n && k <= self.max_k
    }
}

/// Ordered selection table; the first matching rule wins.
pub const TILING_RULES: [TilingRule; 3] = [
    TilingRule {
        max_m: 16,
        max_n: 16,
        max_k: 16,
        config: TilingConfig::TINY,
    },
    TilingRule {
        max_m: 256,
        max_n: 256,
        max_k: 128,
        config: TilingConfig::SMALL,
    },
    TilingRule {
        max_m: 512,
        max_n: 512,
        max_k: 512,
        config: TilingConfig::MEDIUM,
    },
];

/// Used when no rule in [`TILING_RULES`] matches.
pub const FALLBACK_TILING: TilingConfig = TilingConfig::LARGE;

/// Pick a tiling for an `m×k` by `k×n` multiply.
pub fn select_tiling(m: usize, k: usize, n: usize) -> TilingConfig {
    TILING_RULES
        .iter()
        .find(|rule| rule.matches(m, k, n))
        .map_or(FALLBACK_TILING, |rule| rule.config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_buckets() {
        assert_eq!(select_tiling(16, 16, 16), TilingConfig::TINY);
        assert_eq!(select_tiling(1, 1, 1), TilingConfig::TINY);
        assert_eq!(select_tiling(17, 16, 16), TilingConfig::SMALL);
        assert_eq!(select_tiling(256, 128, 256), TilingConfig::SMALL);
        assert_eq!(select_tiling(256, 129, 256), TilingConfig::MEDIUM);
        assert_eq!(select_tiling(512, 512, 512), TilingConfig::MEDIUM);
        assert_eq!(select_tiling(513, 512, 512), TilingConfig::LARGE);
        assert_eq!(select_tiling(4096, 4096, 4096), TilingConfig::LARGE);
    }

    #[test]
    fn test_small_k_bound_is_tighter_than_m_n() {
        // k = 16 fits the first rule only together with m, n <= 16.
        assert_eq!(select_tiling(16, 17, 16), TilingConfig::SMALL);
        assert_eq!(select_tiling(200, 200, 200), TilingConfig::MEDIUM);
    }

    #[test]
    fn test_derived_sizes() {
        let t = TilingConfig::LARGE;
        assert_eq!(t.work_items(), 256);
        assert_eq!(t.wia_size(), 8);
        assert_eq!(t.wib_size(), 8);
        assert_eq!(t.local_size(), [16, 16]);

        let t = TilingConfig::TINY;
        assert_eq!(t.work_items(), 4);
        assert_eq!(t.wia_size(), 16);
        assert_eq!(t.local_size(), [2, 2]);
    }

    #[test]
    fn test_table_configs_are_valid() {
        for rule in TILING_RULES {
            rule.config.validate(16).unwrap();
        }
        FALLBACK_TILING.validate(16).unwrap();
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        let err = TilingConfig::new(48, 64, 8, 4, 4).validate(16).unwrap_err();
        assert!(matches!(err, TilingViolation::NotPowerOfTwo { bm: 48, .. }));
    }

    #[test]
    fn test_rejects_zero() {
        let t = TilingConfig::new(0, 0, 8, 4, 4);
        assert!(matches!(
            t.validate_form(),
            Err(TilingViolation::NotPowerOfTwo { bm: 0, bn: 0, .. })
        ));
        assert!(matches!(
            t.validate(16),
            Err(TilingViolation::NotPowerOfTwo { .. })
        ));
    }

    #[test]
    fn test_rejects_overflowing_products() {
        let huge = 1usize << (usize::BITS - 1);
        let t = TilingConfig::new(huge, huge, 8, 4, 4);
        assert!(matches!(
            t.validate(16),
            Err(TilingViolation::Overflow { bm, .. }) if bm == huge
        ));
        let t = TilingConfig::new(8, 8, huge, 4, 4);
        assert!(matches!(t.validate_form(), Err(TilingViolation::Overflow { .. })));
    }

    #[test]
    fn test_form_accepts_table_configs() {
        for rule in TILING_RULES {
            rule.config.validate_form().unwrap();
        }
    }

    #[test]
    fn test_rejects_indivisible_a_tile() {
        // 256 work items, A tile 64 * 2 = 128
        let err = TilingConfig::new(64, 64, 2, 4, 4).validate(16).unwrap_err();
        assert_eq!(
            err,
            TilingViolation::ATileNotDivisible {
                bm: 64,
                bn: 64,
                bk: 2,
                wim: 4,
                win: 4,
                tile: 128,
                work_items: 256,
            }
        );
    }

    #[test]
    fn test_rejects_indivisible_b_tile() {
        // 128 work items, A tile 128 * 2 = 256, B tile 32 * 2 = 64
        let err = TilingConfig::new(128, 32, 2, 2, 16).validate(64).unwrap_err();
        assert!(matches!(
            err,
            TilingViolation::BTileNotDivisible {
                tile: 64,
                work_items: 128,
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_local_size_overflow() {
        let err = TilingConfig::new(128, 128, 16, 4, 8).validate(16).unwrap_err();
        assert_eq!(
            err,
            TilingViolation::RowsExceedLocalSize {
                bm: 128,
                wim: 4,
                local: 32,
                max_local_size: 16,
            }
        );

        let err = TilingConfig::new(128, 128, 16, 8, 4).validate(16).unwrap_err();
        assert!(matches!(err, TilingViolation::ColsExceedLocalSize { local: 32, .. }));
    }
}

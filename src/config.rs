// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::mem::{self, Va, KSEG2_BASE, PAGE_MASK, PAGE_SIZE};
use bit_field::BitField;
use core::ops::Range;

/// Describes a data cache that is virtually indexed and
/// physically tagged.  Two virtual addresses for the same frame
/// land on different cache lines unless they agree in the index
/// bits above the page offset (their "color").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CacheAlias {
    /// Number of index bits above the page offset.
    color_bits: usize,
}

impl CacheAlias {
    /// Returns a CacheAlias for a cache whose ways span the
    /// given number of bytes.  A way no larger than a page
    /// cannot alias.
    pub fn new(way_size: usize) -> CacheAlias {
        assert!(way_size.is_power_of_two());
        assert!(way_size >= PAGE_SIZE);
        let color_bits = (way_size / PAGE_SIZE).trailing_zeros() as usize;
        CacheAlias { color_bits }
    }

    /// Returns the cache color of the page at `va`.
    pub fn color(&self, va: Va) -> usize {
        if self.color_bits == 0 {
            return 0;
        }
        let shift = mem::PAGE_SHIFT;
        va.addr().get_bits(shift..shift + self.color_bits)
    }

    /// Returns true IFF mappings of one frame at `a` and `b`
    /// would occupy different lines in the cache.
    pub fn conflicts(&self, a: Va, b: Va) -> bool {
        self.color(a) != self.color(b)
    }
}

/// Per-system parameters of the pmap.
#[derive(Clone, Debug)]
pub struct Config {
    /// The largest TLB context id the hardware can tag entries
    /// with.  Ids `1..=max_tlb_pid` are handed out.
    pub max_tlb_pid: u16,
    /// The virtual indexing granularity of the data cache, or
    /// `None` if the cache cannot alias.
    pub cache_alias: Option<CacheAlias>,
    /// The fixed range covered by the kernel map.
    pub kernel_va: Range<Va>,
}

impl Config {
    pub fn new() -> Config {
        let config = Config {
            max_tlb_pid: 255,
            cache_alias: None,
            kernel_va: Va::new(KSEG2_BASE)..Va::new(KSEG2_BASE + 64 * mem::MIB),
        };
        #[cfg(feature = "r3k")]
        let config = Config { max_tlb_pid: 63, ..config };
        #[cfg(feature = "vipt_alias")]
        let config = Config {
            cache_alias: Some(CacheAlias::new(32 * mem::KIB)),
            ..config
        };

        #[allow(clippy::let_and_return)]
        config
    }

    /// Checks that the configuration is usable.
    pub(crate) fn validate(&self) {
        assert!(self.max_tlb_pid >= 1, "no assignable TLB context ids");
        let start = self.kernel_va.start.addr();
        let end = self.kernel_va.end.addr();
        assert!(KSEG2_BASE <= start && start < end, "bad kernel range");
        assert_eq!(start & PAGE_MASK, 0);
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

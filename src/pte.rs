// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Page table entries.
//!
//! We keep PTEs in the format the TLB consumes (EntryLo), so
//! that refilling an entry is a plain copy.  The hardware
//! ignores the top bits of the frame field for physical
//! addresses below 4GiB, so we borrow them for software state.

use crate::mem::{Pfn, Prot};
use bitstruct::bitstruct;

/// Cache coherency attribute values for the `c` field.
const CCA_UNCACHED: u8 = 2;
const CCA_CACHED: u8 = 3;

/// How accesses through a mapping interact with the caches.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CacheMode {
    Uncached,
    Cached,
}

bitstruct! {
    /// A MIPS EntryLo, plus software bits.
    ///
    /// The D ("dirty") bit is really a write enable: a store
    /// through a clean entry raises a TLB modified exception.
    /// The software `w` bit records whether the mapping may be
    /// written at all; D is only set on writable entries, and
    /// on managed frames only once the frame is known to be
    /// modified.
    ///
    /// `tracked` is set IFF a PV entry exists for the mapping.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Pte(u32) {
        pub g: bool = 0;
        pub v: bool = 1;
        pub d: bool = 2;
        pub c: CacheMode = 3..6;
        raw_pfn: u32 = 6..26;
        pub tracked: bool = 29;
        pub w: bool = 30;
        pub wired: bool = 31;
    }
}

impl bitstruct::IntoRaw<u8, CacheMode> for Pte {
    fn into_raw(mode: CacheMode) -> u8 {
        match mode {
            CacheMode::Uncached => CCA_UNCACHED,
            CacheMode::Cached => CCA_CACHED,
        }
    }
}

impl bitstruct::FromRaw<u8, CacheMode> for Pte {
    // Invalid entries carry a zero attribute; it reads back as
    // cached, which is harmless since nothing consults it.
    fn from_raw(raw: u8) -> CacheMode {
        match raw {
            CCA_UNCACHED => CacheMode::Uncached,
            _ => CacheMode::Cached,
        }
    }
}

impl Pte {
    /// Returns an empty PTE.
    pub const fn empty() -> Pte {
        Pte(0)
    }

    /// Returns the invalid entry used in the kernel map.  TLB
    /// entries map pairs of pages and the G bit of the pair is
    /// the AND of both halves, so kernel entries keep G even
    /// when invalid.
    pub fn kernel_invalid() -> Pte {
        Pte::empty().with_g(true)
    }

    /// Creates a new valid PTE for the given frame.  The D bit
    /// is left clear; callers decide when to grant it.
    pub fn new(pfn: Pfn, prot: Prot, mode: CacheMode) -> Pte {
        Pte::empty()
            .with_v(true)
            .with_raw_pfn(pfn.get())
            .with_c(mode)
            .with_w(prot.w())
    }

    /// Returns the frame mapped by the entry.
    pub fn pfn(self) -> Pfn {
        Pfn::new(self.raw_pfn())
    }

    /// Returns the raw bits, as loaded into EntryLo.
    pub fn bits(self) -> u32 {
        self.0
    }
}

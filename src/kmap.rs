// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel map.
//!
//! The mapped kernel segment has a range fixed at boot, so it
//! is described by one flat array of PTEs rather than by a
//! segment table.  Nothing in it is ever reclaimed.

extern crate alloc;

use crate::mem::{Va, PAGE_SHIFT};
use crate::pte::Pte;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

pub(crate) struct KernelMap {
    range: Range<Va>,
    ptes: Vec<Pte>,
}

impl KernelMap {
    /// Creates a kernel map covering the given range, with every
    /// entry invalid.
    pub(crate) fn new(range: Range<Va>) -> KernelMap {
        let len = (range.end.addr() - range.start.addr()) >> PAGE_SHIFT;
        KernelMap { range, ptes: vec![Pte::kernel_invalid(); len] }
    }

    pub(crate) fn range(&self) -> Range<Va> {
        self.range.clone()
    }

    /// Returns true IFF `va` is in the kernel map.
    pub(crate) fn contains(&self, va: Va) -> bool {
        self.range.contains(&va)
    }

    /// Returns true IFF the range lies within the kernel map.
    pub(crate) fn contains_range(&self, range: &Range<Va>) -> bool {
        range.start <= range.end
            && self.range.start <= range.start
            && range.end <= self.range.end
    }

    fn index(&self, va: Va) -> usize {
        assert!(self.contains(va), "{va:?} is outside the kernel map");
        (va.addr() - self.range.start.addr()) >> PAGE_SHIFT
    }

    pub(crate) fn entry(&self, va: Va) -> Pte {
        self.ptes[self.index(va)]
    }

    pub(crate) fn set_entry(&mut self, va: Va, pte: Pte) {
        let index = self.index(va);
        self.ptes[index] = pte;
    }
}

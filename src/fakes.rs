// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stand in for the hardware and the physical page allocator
//! in tests.

use crate::machine::{DataCache, HardwareTlb, PhysPages};
use crate::mem::{Pfn, Va};
use crate::pte::Pte;
use crate::tlbpid::TlbPid;
use alloc::vec::Vec;

/// A TLB or cache operation, as observed by the fake hardware.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum HwOp {
    Update(Va, TlbPid, Pte),
    Invalidate(Va, TlbPid),
    InvalidateAll,
    Wbinv(Va, Pfn),
}

/// Records every operation in order.
#[derive(Debug, Default)]
pub(crate) struct Hw {
    pub(crate) ops: Vec<HwOp>,
}

impl Hw {
    pub(crate) fn invalidate_alls(&self) -> usize {
        self.ops.iter().filter(|&&op| op == HwOp::InvalidateAll).count()
    }

    pub(crate) fn invalidations(&self) -> Vec<(Va, TlbPid)> {
        self.ops
            .iter()
            .filter_map(|&op| match op {
                HwOp::Invalidate(va, pid) => Some((va, pid)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn wbinvs(&self) -> Vec<(Va, Pfn)> {
        self.ops
            .iter()
            .filter_map(|&op| match op {
                HwOp::Wbinv(va, pfn) => Some((va, pfn)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.ops.clear();
    }
}

impl HardwareTlb for Hw {
    fn update(&mut self, va: Va, pid: TlbPid, pte: Pte) {
        self.ops.push(HwOp::Update(va, pid, pte));
    }

    fn invalidate(&mut self, va: Va, pid: TlbPid) {
        self.ops.push(HwOp::Invalidate(va, pid));
    }

    fn invalidate_all(&mut self) {
        self.ops.push(HwOp::InvalidateAll);
    }
}

impl DataCache for Hw {
    fn wbinv_page(&mut self, va: Va, pfn: Pfn) {
        self.ops.push(HwOp::Wbinv(va, pfn));
    }
}

/// Frames below this are managed; the rest look like device
/// memory.
pub(crate) const MANAGED_LIMIT: u32 = 0x1000;

/// Hands out frames for paging structures from the top of the
/// managed range, well clear of the frames tests map.
pub(crate) struct Phys {
    next: u32,
    budget: usize,
}

impl Phys {
    pub(crate) fn new() -> Phys {
        Phys::with_budget(usize::MAX)
    }

    /// Returns an allocator that fails after `budget` pages.
    pub(crate) fn with_budget(budget: usize) -> Phys {
        Phys { next: MANAGED_LIMIT - 1, budget }
    }

    pub(crate) fn allocated(&self) -> usize {
        (MANAGED_LIMIT - 1 - self.next) as usize
    }
}

impl PhysPages for Phys {
    fn alloc_page(&mut self) -> Option<Pfn> {
        if self.budget == 0 {
            return None;
        }
        self.budget -= 1;
        let pfn = Pfn::new(self.next);
        self.next -= 1;
        Some(pfn)
    }

    fn is_managed(&self, pfn: Pfn) -> bool {
        pfn.get() < MANAGED_LIMIT
    }
}

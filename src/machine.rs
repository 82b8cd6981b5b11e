// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capabilities the pmap consumes but does not implement: the
//! TLB and data cache maintenance instructions, and the
//! physical page allocator.

use crate::mem::{Pfn, Va};
use crate::pte::Pte;
use crate::tlbpid::TlbPid;

/// The hardware translation cache.
pub trait HardwareTlb {
    /// Rewrites the entry translating `va` in context `pid`,
    /// if the TLB holds one.  Absent entries are left absent;
    /// the refill handler will load the new PTE on demand.
    fn update(&mut self, va: Va, pid: TlbPid, pte: Pte);

    /// Discards any entry translating `va` in context `pid`.
    fn invalidate(&mut self, va: Va, pid: TlbPid);

    /// Discards every non-global entry.
    fn invalidate_all(&mut self);
}

/// Data cache maintenance.
pub trait DataCache {
    /// Writes back and invalidates the lines caching the page
    /// of frame `pfn` mapped at `va`.  Lines are selected by
    /// virtual index, so the address matters.
    fn wbinv_page(&mut self, va: Va, pfn: Pfn);
}

/// The physical page allocator.
pub trait PhysPages {
    /// Returns a free page, or None if memory is exhausted.
    fn alloc_page(&mut self) -> Option<Pfn>;

    /// Returns true IFF the frame is managed by the allocator,
    /// as opposed to device memory or memory otherwise outside
    /// of its control.
    fn is_managed(&self, pfn: Pfn) -> bool;
}

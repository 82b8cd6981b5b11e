// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TLB context id ("PID") allocation.
//!
//! TLB entries are tagged with a small context id so that an
//! address space switch does not require a flush.  Ids are
//! handed out in order.  When they run out we flush the whole
//! TLB once and start a new generation; every id handed out in
//! an older generation is then implicitly stale, and its owner
//! gets a fresh one the next time it is activated.  No per
//! space bookkeeping is needed to retire them.

use crate::machine::HardwareTlb;

/// A hardware TLB context id.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub struct TlbPid(u16);

impl TlbPid {
    /// The reserved id.  It is never assigned to a user address
    /// space and tags kernel-only operations.
    pub const KERNEL: TlbPid = TlbPid(0);

    pub const fn get(self) -> u16 {
        self.0
    }
}

/// An address space's cached context: the id it was given and
/// the generation it was given in.  Generation 0 is never
/// current, so a default context is unassigned.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct TlbContext {
    pid: u16,
    generation: u64,
}

pub(crate) struct TlbPidAllocator {
    /// The next id to hand out.  Wider than an id so that it can
    /// run one past the largest.
    next: u32,
    /// The largest id the hardware supports.
    max: u16,
    generation: u64,
}

impl TlbPidAllocator {
    pub(crate) const fn new(max: u16) -> TlbPidAllocator {
        assert!(max >= 1);
        TlbPidAllocator { next: 1, max, generation: 1 }
    }

    /// Returns the current generation.
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the context's id if it is still current.
    pub(crate) fn current(&self, ctx: &TlbContext) -> Option<TlbPid> {
        (ctx.generation == self.generation).then_some(TlbPid(ctx.pid))
    }

    /// Returns an id for the context, assigning a new one if its
    /// id is stale or was never assigned.  Exhausting the id
    /// space flushes the TLB and starts a new generation.
    pub(crate) fn acquire<H: HardwareTlb>(
        &mut self,
        ctx: &mut TlbContext,
        tlb: &mut H,
    ) -> TlbPid {
        if let Some(pid) = self.current(ctx) {
            return pid;
        }
        if self.next > u32::from(self.max) {
            tlb.invalidate_all();
            self.generation += 1;
            self.next = 1;
            log::debug!(
                "pmap: TLB pids exhausted, generation {}",
                self.generation
            );
        }
        let pid = self.next as u16;
        self.next += 1;
        *ctx = TlbContext { pid, generation: self.generation };
        TlbPid(pid)
    }
}

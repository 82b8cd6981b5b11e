// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The shared entry point.
//!
//! The fault handler, the scheduler, and the page daemon all
//! call into the pmap, possibly from interrupt context.  Every
//! operation runs under one lock, which makes each of them
//! atomic with respect to the others.

extern crate alloc;

use crate::config::Config;
use crate::machine::{DataCache, HardwareTlb, PhysPages};
use crate::mem::{Pfn, Prot, Va};
use crate::pmap::{Pmap, SpaceId};
use crate::pte::Pte;
use crate::tlbpid::TlbPid;
use crate::Result;
use alloc::vec::Vec;
use core::ops::Range;
use spin::{Mutex, MutexGuard};

pub struct VirtualMemoryManager<H, P> {
    pmap: Mutex<Pmap<H, P>>,
}

impl<H: HardwareTlb + DataCache, P: PhysPages> VirtualMemoryManager<H, P> {
    pub fn new(config: Config, hw: H, phys: P) -> VirtualMemoryManager<H, P> {
        VirtualMemoryManager { pmap: Mutex::new(Pmap::new(config, hw, phys)) }
    }

    /// Locks the pmap, for callers that need several operations
    /// to happen atomically.
    pub fn lock(&self) -> MutexGuard<'_, Pmap<H, P>> {
        self.pmap.lock()
    }

    pub fn create(&self) -> Result<SpaceId> {
        self.lock().create()
    }

    pub fn reference(&self, id: SpaceId) {
        self.lock().reference(id)
    }

    pub fn destroy(&self, id: SpaceId) {
        self.lock().destroy(id)
    }

    pub fn enter(
        &self,
        id: SpaceId,
        va: Va,
        pfn: Pfn,
        prot: Prot,
        wired: bool,
    ) -> Result<()> {
        self.lock().enter(id, va, pfn, prot, wired)
    }

    pub fn remove(&self, id: SpaceId, range: Range<Va>) {
        self.lock().remove(id, range)
    }

    pub fn protect(&self, id: SpaceId, range: Range<Va>, prot: Prot) {
        self.lock().protect(id, range, prot)
    }

    pub fn extract(&self, id: SpaceId, va: Va) -> Option<Pfn> {
        self.lock().extract(id, va)
    }

    pub fn change_wiring(&self, id: SpaceId, va: Va, wired: bool) {
        self.lock().change_wiring(id, va, wired)
    }

    pub fn activate(&self, id: SpaceId) -> TlbPid {
        self.lock().activate(id)
    }

    pub fn deactivate(&self, id: SpaceId) {
        self.lock().deactivate(id)
    }

    pub fn page_protect(&self, pfn: Pfn, prot: Prot) {
        self.lock().page_protect(pfn, prot)
    }

    pub fn emulate_modify(&self, id: SpaceId, va: Va) -> bool {
        self.lock().emulate_modify(id, va)
    }

    pub fn is_modified(&self, pfn: Pfn) -> bool {
        self.lock().is_modified(pfn)
    }

    pub fn clear_modify(&self, pfn: Pfn) -> bool {
        self.lock().clear_modify(pfn)
    }

    pub fn is_referenced(&self, pfn: Pfn) -> bool {
        self.lock().is_referenced(pfn)
    }

    pub fn clear_reference(&self, pfn: Pfn) -> bool {
        self.lock().clear_reference(pfn)
    }

    pub fn kenter_pa(&self, va: Va, pfn: Pfn, prot: Prot) {
        self.lock().kenter_pa(va, pfn, prot)
    }

    pub fn kremove(&self, range: Range<Va>) {
        self.lock().kremove(range)
    }

    pub fn resident_count(&self, id: SpaceId) -> usize {
        self.lock().resident_count(id)
    }

    pub fn wired_count(&self, id: SpaceId) -> usize {
        self.lock().wired_count(id)
    }

    pub fn pte(&self, id: SpaceId, va: Va) -> Option<Pte> {
        self.lock().pte(id, va)
    }

    pub fn mappings(&self, pfn: Pfn) -> Vec<(SpaceId, Va)> {
        self.lock().mappings(pfn)
    }
}

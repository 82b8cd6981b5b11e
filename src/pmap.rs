// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Address spaces and their mappings.
//!
//! A `Pmap` owns every address space in the system, the reverse
//! map, the pools that page tables come from, and the TLB
//! context allocator.  There is exactly one per system.
//!
//! Address spaces are named by `SpaceId`.  Id 0 is the kernel,
//! whose mappings live in the flat `KernelMap`; every other
//! space has a two-level user page table.  Ids of destroyed
//! spaces are reused, which is safe because a space can only be
//! destroyed once nothing maps through it.
//!
//! Some points worth keeping in mind:
//!
//! * A valid PTE that points at a managed frame is always
//!   `tracked`, and has exactly one entry in the reverse map.
//!   Every operation here preserves that; `kenter_pa` mappings
//!   are the one deliberate exception, and are never tracked.
//! * We keep the TLB in step with a PTE only when the owning
//!   space's TLB context is current.  A stale context will be
//!   given a new id before it next runs, and the flush that made
//!   it stale already discarded its entries.
//! * Entering a frame can change the cache mode of mappings in
//!   *other* address spaces; see `pv`.
//! * Contract violations by the caller panic.  The only error
//!   returned is running out of memory for page tables.

extern crate alloc;

use crate::allocator::{PoolIndex, TablePool};
use crate::config::Config;
use crate::kmap::KernelMap;
use crate::machine::{DataCache, HardwareTlb, PhysPages};
use crate::mem::{self, Pfn, Prot, Va};
use crate::pte::{CacheMode, Pte};
use crate::pv::{PvInsert, PvTable};
use crate::segtab::{self, PtPage, SegTab};
use crate::tlbpid::{TlbContext, TlbPid, TlbPidAllocator};
use crate::Result;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

/// Names an address space.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct SpaceId(u32);

impl SpaceId {
    /// The kernel's address space, which always exists.
    pub const KERNEL: SpaceId = SpaceId(0);

    pub(crate) const fn new(id: u32) -> SpaceId {
        SpaceId(id)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

struct AddressSpace {
    /// The user page table; the kernel has none.
    segtab: Option<PoolIndex>,
    refs: u32,
    resident: usize,
    wired: usize,
    tlb: TlbContext,
}

impl AddressSpace {
    fn new(segtab: Option<PoolIndex>) -> AddressSpace {
        AddressSpace {
            segtab,
            refs: 1,
            resident: 0,
            wired: 0,
            tlb: TlbContext::default(),
        }
    }
}

/// Where the PTE for some address lives.
#[derive(Clone, Copy, Debug)]
enum Slot {
    Kernel,
    User(PoolIndex),
}

/// The physical map.
pub struct Pmap<H, P> {
    config: Config,
    hw: H,
    phys: P,
    spaces: Vec<Option<AddressSpace>>,
    free_ids: Vec<SpaceId>,
    active: Option<SpaceId>,
    kernel: KernelMap,
    segtabs: TablePool<SegTab>,
    ptpages: TablePool<PtPage>,
    pv: PvTable,
    pids: TlbPidAllocator,
}

impl<H: HardwareTlb + DataCache, P: PhysPages> Pmap<H, P> {
    /// Creates the physical map, with an empty kernel map.
    pub fn new(config: Config, hw: H, phys: P) -> Pmap<H, P> {
        config.validate();
        let kernel = KernelMap::new(config.kernel_va.clone());
        let pids = TlbPidAllocator::new(config.max_tlb_pid);
        Pmap {
            config,
            hw,
            phys,
            spaces: vec![Some(AddressSpace::new(None))],
            free_ids: Vec::new(),
            active: None,
            kernel,
            segtabs: TablePool::new(),
            ptpages: TablePool::new(),
            pv: PvTable::new(),
            pids,
        }
    }

    /// Creates a new, empty user address space with a reference
    /// count of one.
    pub fn create(&mut self) -> Result<SpaceId> {
        let segtab = self.segtabs.alloc(&mut self.phys)?;
        let space = AddressSpace::new(Some(segtab));
        let id = match self.free_ids.pop() {
            Some(id) => {
                self.spaces[id.index()] = Some(space);
                id
            }
            None => {
                let id = u32::try_from(self.spaces.len())
                    .expect("too many address spaces");
                self.spaces.push(Some(space));
                SpaceId::new(id)
            }
        };
        log::debug!("pmap: created {id:?}");
        Ok(id)
    }

    /// Adds a reference to an address space.
    pub fn reference(&mut self, id: SpaceId) {
        self.space_mut(id).refs += 1;
    }

    /// Drops a reference to an address space, tearing it down
    /// when the last one goes.  By then the caller must have
    /// removed every mapping.
    pub fn destroy(&mut self, id: SpaceId) {
        assert_ne!(id, SpaceId::KERNEL, "the kernel map is never destroyed");
        let space = self.space_mut(id);
        space.refs -= 1;
        if space.refs > 0 {
            return;
        }
        assert_eq!(
            space.resident, 0,
            "destroying {id:?} with resident mappings"
        );
        debug_assert_eq!(space.wired, 0);
        let Some(segtab) = space.segtab else {
            panic!("user space {id:?} has no segment table");
        };
        debug_assert!(!self.pv.references(id), "pv entries outlive {id:?}");
        let tables = self
            .segtabs
            .get_mut(segtab)
            .take_tables()
            .collect::<Vec<_>>();
        for table in tables {
            self.ptpages.free(table);
        }
        self.segtabs.free(segtab);
        self.spaces[id.index()] = None;
        self.free_ids.push(id);
        if self.active == Some(id) {
            self.active = None;
        }
        log::debug!(
            "pmap: destroyed {id:?}, {} page tables free in {} pages",
            self.ptpages.free_count(),
            self.ptpages.frames()
        );
    }

    /// Inserts or updates the translation for `va` in address
    /// space `id`.
    ///
    /// Re-entering the frame a page already maps only changes
    /// its protection and wiring.  Entering a different frame
    /// first removes the old translation.
    pub fn enter(
        &mut self,
        id: SpaceId,
        va: Va,
        pfn: Pfn,
        prot: Prot,
        wired: bool,
    ) -> Result<()> {
        self.check_va(id, va);
        assert!(
            prot.r() || prot.w() || prot.x(),
            "entering {va:?} with no access"
        );
        log::trace!(
            "pmap: enter {id:?} {va:?} -> {pfn:?} {prot:?} wired={wired}"
        );
        let managed = self.phys.is_managed(pfn);
        let slot = self.slot_or_alloc(id, va)?;
        let old = self.load(slot, va);
        // An untracked entry for a managed frame came from
        // `kenter_pa`; replace it so that the new one is tracked.
        let same = old.v() && old.pfn() == pfn && old.tracked() == managed;
        let mode = if same {
            let space = self.space_mut(id);
            match (old.wired(), wired) {
                (false, true) => space.wired += 1,
                (true, false) => space.wired -= 1,
                _ => {}
            }
            old.c()
        } else {
            if old.v() {
                self.remove_entry(id, slot, va, old);
            }
            // Unmanaged memory is assumed to be device memory,
            // which may be volatile.
            let mode = if managed {
                self.pv_enter(pfn, id, va)
            } else {
                CacheMode::Uncached
            };
            let space = self.space_mut(id);
            space.resident += 1;
            if wired {
                space.wired += 1;
            }
            mode
        };
        let tracked = managed;
        if tracked {
            self.pv.update_flags(pfn, |f| f.with_referenced(true));
        }
        let dirty = prot.w() && (!tracked || self.pv.flags(pfn).modified());
        let pte = Pte::new(pfn, prot, mode)
            .with_d(dirty)
            .with_wired(wired)
            .with_tracked(tracked)
            .with_g(id == SpaceId::KERNEL);
        self.store(slot, va, pte);
        self.tlb_update(id, va, pte);
        Ok(())
    }

    /// Removes every valid mapping in [start, end).
    pub fn remove(&mut self, id: SpaceId, range: Range<Va>) {
        self.check_range(id, &range);
        log::trace!("pmap: remove {id:?} {range:x?}");
        for segment in segtab::segments(range) {
            let Some(slot) = self.slot(id, segment.start) else {
                continue;
            };
            for va in mem::pages(segment) {
                let pte = self.load(slot, va);
                if pte.v() {
                    self.remove_entry(id, slot, va, pte);
                }
            }
        }
    }

    /// Changes the protection of every valid mapping in
    /// [start, end).  Revoking read access removes them.
    pub fn protect(&mut self, id: SpaceId, range: Range<Va>, prot: Prot) {
        if !prot.r() {
            self.remove(id, range);
            return;
        }
        self.check_range(id, &range);
        log::trace!("pmap: protect {id:?} {range:x?} {prot:?}");
        for segment in segtab::segments(range) {
            let Some(slot) = self.slot(id, segment.start) else {
                continue;
            };
            for va in mem::pages(segment) {
                let pte = self.load(slot, va);
                if !pte.v() {
                    continue;
                }
                let new = self.reprotect(pte, prot);
                if new != pte {
                    self.store(slot, va, new);
                    self.tlb_update(id, va, new);
                }
            }
        }
    }

    /// Returns the frame mapped at `va`, if any.
    pub fn extract(&self, id: SpaceId, va: Va) -> Option<Pfn> {
        self.check_va(id, va);
        let (_, pte) = self.lookup(id, va)?;
        pte.v().then(|| pte.pfn())
    }

    /// Wires or unwires the mapping at `va`, which must be
    /// valid.  Wiring is bookkeeping only; the TLB is untouched.
    pub fn change_wiring(&mut self, id: SpaceId, va: Va, wired: bool) {
        self.check_va(id, va);
        let entry = self.lookup(id, va).filter(|(_, pte)| pte.v());
        let Some((slot, pte)) = entry else {
            panic!("changing wiring of unmapped {va:?} in {id:?}");
        };
        if pte.wired() == wired {
            return;
        }
        let space = self.space_mut(id);
        if wired {
            space.wired += 1;
        } else {
            space.wired -= 1;
        }
        self.store(slot, va, pte.with_wired(wired));
    }

    /// Makes `id` the running address space, returning the TLB
    /// context id to load.  Must be called on every switch.
    pub fn activate(&mut self, id: SpaceId) -> TlbPid {
        let pid = if id == SpaceId::KERNEL {
            TlbPid::KERNEL
        } else {
            let Some(Some(space)) = self.spaces.get_mut(id.index()) else {
                panic!("{id:?} is not a live address space");
            };
            self.pids.acquire(&mut space.tlb, &mut self.hw)
        };
        self.active = Some(id);
        pid
    }

    /// Notes that `id` is no longer running.
    pub fn deactivate(&mut self, id: SpaceId) {
        if self.active == Some(id) {
            self.active = None;
        }
    }

    /// Lowers the protection of every mapping of a managed
    /// frame.  Used to enforce copy-on-write across all sharers,
    /// or to unmap a frame everywhere before it is reclaimed.
    pub fn page_protect(&mut self, pfn: Pfn, prot: Prot) {
        if !self.phys.is_managed(pfn) {
            return;
        }
        if prot.r() {
            if !prot.w() {
                for (id, va) in self.pv.mappings(pfn) {
                    self.protect(id, va..va.next(), prot);
                }
            }
            return;
        }
        log::trace!("pmap: unmapping {pfn:?} everywhere");
        let mappings = self.pv.remove_all(pfn).collect::<Vec<_>>();
        for (id, va) in mappings {
            let Some((slot, pte)) = self.lookup(id, va) else {
                panic!("pv entry {id:?}/{va:?} has no page table");
            };
            self.invalidate_entry(id, slot, va, pte);
        }
    }

    /// Handles a TLB modified exception: a store through a
    /// clean entry.  Returns false if the mapping does not
    /// permit writes, in which case the caller should raise a
    /// protection fault.
    pub fn emulate_modify(&mut self, id: SpaceId, va: Va) -> bool {
        self.check_va(id, va);
        let Some((slot, pte)) = self.lookup(id, va) else {
            return false;
        };
        if !pte.v() || !pte.w() {
            return false;
        }
        if pte.tracked() {
            self.pv.update_flags(pte.pfn(), |f| {
                f.with_modified(true).with_referenced(true)
            });
        }
        if !pte.d() {
            let pte = pte.with_d(true);
            self.store(slot, va, pte);
            self.tlb_update(id, va, pte);
        }
        true
    }

    /// Returns true IFF the frame has been written since it was
    /// last cleaned.
    pub fn is_modified(&self, pfn: Pfn) -> bool {
        self.pv.flags(pfn).modified()
    }

    /// Marks the frame clean, revoking write enable from every
    /// mapping so that the next store is noticed.  Returns the
    /// old state.
    pub fn clear_modify(&mut self, pfn: Pfn) -> bool {
        if !self.phys.is_managed(pfn) {
            return false;
        }
        let old = self.pv.update_flags(pfn, |f| f.with_modified(false));
        for (id, va) in self.pv.mappings(pfn) {
            let Some((slot, pte)) = self.lookup(id, va) else {
                panic!("pv entry {id:?}/{va:?} has no page table");
            };
            if pte.d() {
                let pte = pte.with_d(false);
                self.store(slot, va, pte);
                self.tlb_update(id, va, pte);
            }
        }
        old.modified()
    }

    /// Returns true IFF the frame has been mapped since it was
    /// last cleared.
    pub fn is_referenced(&self, pfn: Pfn) -> bool {
        self.pv.flags(pfn).referenced()
    }

    pub fn clear_reference(&mut self, pfn: Pfn) -> bool {
        if !self.phys.is_managed(pfn) {
            return false;
        }
        self.pv.update_flags(pfn, |f| f.with_referenced(false)).referenced()
    }

    /// Enters a wired kernel mapping that is not tracked in the
    /// reverse map.  Remove it with `kremove`.
    pub fn kenter_pa(&mut self, va: Va, pfn: Pfn, prot: Prot) {
        self.check_va(SpaceId::KERNEL, va);
        let old = self.kernel.entry(va);
        if old.v() {
            self.remove_entry(SpaceId::KERNEL, Slot::Kernel, va, old);
        }
        let mode = if self.phys.is_managed(pfn) {
            CacheMode::Cached
        } else {
            CacheMode::Uncached
        };
        let pte = Pte::new(pfn, prot, mode)
            .with_d(prot.w())
            .with_wired(true)
            .with_g(true);
        let kernel = self.space_mut(SpaceId::KERNEL);
        kernel.resident += 1;
        kernel.wired += 1;
        self.kernel.set_entry(va, pte);
        self.tlb_update(SpaceId::KERNEL, va, pte);
    }

    /// Removes mappings made by `kenter_pa` in [start, end).
    pub fn kremove(&mut self, range: Range<Va>) {
        self.check_range(SpaceId::KERNEL, &range);
        for va in mem::pages(range) {
            let pte = self.kernel.entry(va);
            if !pte.v() {
                continue;
            }
            assert!(!pte.tracked(), "kremove of managed mapping at {va:?}");
            let cached = pte.c() == CacheMode::Cached;
            if self.config.cache_alias.is_some() && cached {
                self.hw.wbinv_page(va, pte.pfn());
            }
            self.invalidate_entry(SpaceId::KERNEL, Slot::Kernel, va, pte);
        }
    }

    /// Returns the number of valid mappings in the space.
    pub fn resident_count(&self, id: SpaceId) -> usize {
        self.space(id).resident
    }

    /// Returns the number of wired mappings in the space.
    pub fn wired_count(&self, id: SpaceId) -> usize {
        self.space(id).wired
    }

    /// Returns the PTE for `va`, valid or not, if the space has
    /// a page table covering it.
    pub fn pte(&self, id: SpaceId, va: Va) -> Option<Pte> {
        self.check_va(id, va);
        self.lookup(id, va).map(|(_, pte)| pte)
    }

    /// Returns the (space, address) pairs mapping `pfn`.
    pub fn mappings(&self, pfn: Pfn) -> Vec<(SpaceId, Va)> {
        self.pv.mappings(pfn)
    }

    /// Returns the current TLB context generation.
    pub fn generation(&self) -> u64 {
        self.pids.generation()
    }

    /// Returns the most recently activated space.
    pub fn active(&self) -> Option<SpaceId> {
        self.active
    }

    /// Returns the range covered by the kernel map.
    pub fn kernel_range(&self) -> Range<Va> {
        self.kernel.range()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    pub fn phys(&self) -> &P {
        &self.phys
    }

    fn space(&self, id: SpaceId) -> &AddressSpace {
        match self.spaces.get(id.index()) {
            Some(Some(space)) => space,
            _ => panic!("{id:?} is not a live address space"),
        }
    }

    fn space_mut(&mut self, id: SpaceId) -> &mut AddressSpace {
        match self.spaces.get_mut(id.index()) {
            Some(Some(space)) => space,
            _ => panic!("{id:?} is not a live address space"),
        }
    }

    fn check_va(&self, id: SpaceId, va: Va) {
        if id == SpaceId::KERNEL {
            assert!(
                self.kernel.contains(va),
                "{va:?} is outside the kernel map"
            );
        } else {
            assert!(va.is_user(), "{va:?} is not a user address");
        }
    }

    fn check_range(&self, id: SpaceId, range: &Range<Va>) {
        if id == SpaceId::KERNEL {
            assert!(
                self.kernel.contains_range(range),
                "{range:x?} is outside the kernel map"
            );
        } else {
            let (start, end) = (range.start.addr(), range.end.addr());
            assert!(
                mem::is_user_range(start, end),
                "{range:x?} is not a user range"
            );
        }
    }

    /// Finds the table holding `va`'s PTE, if there is one.
    fn slot(&self, id: SpaceId, va: Va) -> Option<Slot> {
        let Some(segtab) = self.space(id).segtab else {
            return Some(Slot::Kernel);
        };
        self.segtabs.get(segtab).table(va).map(Slot::User)
    }

    /// Finds the table holding `va`'s PTE, allocating a zeroed
    /// page-table page for the segment if it has none.
    fn slot_or_alloc(&mut self, id: SpaceId, va: Va) -> Result<Slot> {
        let Some(segtab) = self.space(id).segtab else {
            return Ok(Slot::Kernel);
        };
        if let Some(table) = self.segtabs.get(segtab).table(va) {
            return Ok(Slot::User(table));
        }
        let table = self.ptpages.alloc(&mut self.phys)?;
        self.segtabs.get_mut(segtab).set_table(va, table);
        log::trace!(
            "pmap: new page table {table:?} for {id:?} segment of {va:?}"
        );
        Ok(Slot::User(table))
    }

    fn load(&self, slot: Slot, va: Va) -> Pte {
        match slot {
            Slot::Kernel => self.kernel.entry(va),
            Slot::User(table) => self.ptpages.get(table).entry(va),
        }
    }

    fn store(&mut self, slot: Slot, va: Va, pte: Pte) {
        match slot {
            Slot::Kernel => self.kernel.set_entry(va, pte),
            Slot::User(table) => self.ptpages.get_mut(table).set_entry(va, pte),
        }
    }

    fn lookup(&self, id: SpaceId, va: Va) -> Option<(Slot, Pte)> {
        let slot = self.slot(id, va)?;
        Some((slot, self.load(slot, va)))
    }

    /// Returns the space's TLB context id, if it is current.
    fn current_pid(&self, id: SpaceId) -> Option<TlbPid> {
        if id == SpaceId::KERNEL {
            return Some(TlbPid::KERNEL);
        }
        self.pids.current(&self.space(id).tlb)
    }

    fn tlb_update(&mut self, id: SpaceId, va: Va, pte: Pte) {
        if let Some(pid) = self.current_pid(id) {
            self.hw.update(va, pid, pte);
        }
    }

    fn tlb_invalidate(&mut self, id: SpaceId, va: Va) {
        if let Some(pid) = self.current_pid(id) {
            self.hw.invalidate(va, pid);
        }
    }

    /// Computes the entry for a new protection.  Write enable is
    /// granted on upgrade only as `enter` would grant it;
    /// downgrading folds the D bit into the frame's modified
    /// attribute before dropping it.
    fn reprotect(&mut self, pte: Pte, prot: Prot) -> Pte {
        let pfn = pte.pfn();
        if prot.w() {
            let dirty =
                pte.d() || !pte.tracked() || self.pv.flags(pfn).modified();
            return pte.with_w(true).with_d(dirty);
        }
        if pte.d() && pte.tracked() {
            self.pv.update_flags(pfn, |f| f.with_modified(true));
        }
        pte.with_w(false).with_d(false)
    }

    /// Adds the reverse map entry for a new mapping of a managed
    /// frame, and returns the cache mode it must use.
    fn pv_enter(&mut self, pfn: Pfn, id: SpaceId, va: Va) -> CacheMode {
        match self.pv.insert(pfn, id, va, self.config.cache_alias.as_ref()) {
            PvInsert::Cached => CacheMode::Cached,
            PvInsert::Uncached => CacheMode::Uncached,
            PvInsert::Demote => {
                log::debug!(
                    "pmap: {pfn:?} at {id:?}/{va:?} aliases; caching disabled"
                );
                self.set_page_cache(pfn, CacheMode::Uncached, Some((id, va)));
                CacheMode::Uncached
            }
        }
    }

    /// Removes the reverse map entry for a mapping of a managed
    /// frame that used cache mode `mode`.
    fn pv_remove(&mut self, pfn: Pfn, id: SpaceId, va: Va, mode: CacheMode) {
        let last = self.pv.remove_one(pfn, id, va);
        let Some(alias) = self.config.cache_alias else {
            return;
        };
        // With no mapping left, nothing can see stale lines
        // through a virtual address.
        if last {
            return;
        }
        if mode == CacheMode::Cached {
            self.hw.wbinv_page(va, pfn);
        }
        if self.pv.try_recache(pfn, &alias) {
            log::debug!("pmap: {pfn:?} no longer aliased; caching enabled");
            self.set_page_cache(pfn, CacheMode::Cached, None);
        }
    }

    /// Rewrites the cache mode of every mapping of `pfn` other
    /// than `skip`, in every address space.  Lines cached
    /// through the old mappings are written back first.
    fn set_page_cache(
        &mut self,
        pfn: Pfn,
        mode: CacheMode,
        skip: Option<(SpaceId, Va)>,
    ) {
        for (id, va) in self.pv.mappings(pfn) {
            if skip == Some((id, va)) {
                continue;
            }
            let Some((slot, pte)) = self.lookup(id, va) else {
                panic!("pv entry {id:?}/{va:?} has no page table");
            };
            debug_assert!(pte.v() && pte.pfn() == pfn);
            if mode == CacheMode::Uncached {
                self.hw.wbinv_page(va, pfn);
            }
            let pte = pte.with_c(mode);
            self.store(slot, va, pte);
            self.tlb_update(id, va, pte);
        }
    }

    /// Invalidates a valid entry, keeping the counters and the
    /// TLB in step.  The reverse map is the caller's concern.
    fn invalidate_entry(&mut self, id: SpaceId, slot: Slot, va: Va, pte: Pte) {
        debug_assert!(pte.v());
        let space = self.space_mut(id);
        space.resident -= 1;
        if pte.wired() {
            space.wired -= 1;
        }
        let invalid = if id == SpaceId::KERNEL {
            Pte::kernel_invalid()
        } else {
            Pte::empty()
        };
        self.store(slot, va, invalid);
        self.tlb_invalidate(id, va);
    }

    fn remove_entry(&mut self, id: SpaceId, slot: Slot, va: Va, pte: Pte) {
        self.invalidate_entry(id, slot, va, pte);
        if pte.tracked() {
            self.pv_remove(pte.pfn(), id, va, pte.c());
        }
    }
}

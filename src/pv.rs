// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # The reverse map ("PV table").
//!
//! For each managed physical frame we record every (address
//! space, virtual address) pair that maps it.  The central
//! invariant of the pmap is that a valid PTE points at a
//! managed frame IFF the frame's list holds exactly one entry
//! for that PTE.
//!
//! Each frame also carries attribute bits that outlive its
//! mappings: whether it has been referenced or modified, and
//! whether its mappings have been forced uncached to avoid
//! virtual aliases in the data cache.
//!
//! The table holds address space ids, not address spaces; an
//! entry does not keep its space alive.  A space may only be
//! torn down once no entry names it.

extern crate alloc;

use crate::config::CacheAlias;
use crate::mem::{Pfn, Va};
use crate::pmap::SpaceId;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use bitstruct::bitstruct;

bitstruct! {
    /// Attributes of a managed frame.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct PvFlags(u8) {
        pub modified: bool = 0;
        pub referenced: bool = 1;
        pub uncached: bool = 2;
    }
}

/// One mapping of a frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct PvEntry {
    pub(crate) space: SpaceId,
    pub(crate) va: Va,
}

#[derive(Default)]
struct PvHead {
    entries: Vec<PvEntry>,
    flags: PvFlags,
}

/// How a newly added mapping should be cached.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum PvInsert {
    /// Map the new entry cached.
    Cached,
    /// The frame is already uncached; so is the new entry.
    Uncached,
    /// The new entry aliases an existing one.  The frame has
    /// just been marked uncached and every existing mapping
    /// must be demoted.
    Demote,
}

pub(crate) struct PvTable {
    heads: BTreeMap<Pfn, PvHead>,
}

impl PvTable {
    pub(crate) const fn new() -> PvTable {
        PvTable { heads: BTreeMap::new() }
    }

    /// Records that `space` maps `pfn` at `va`, and decides how
    /// the new mapping must be cached.  With `alias` set, a
    /// mapping whose color differs from an existing mapping of
    /// the same frame forces the whole frame uncached.
    pub(crate) fn insert(
        &mut self,
        pfn: Pfn,
        space: SpaceId,
        va: Va,
        alias: Option<&CacheAlias>,
    ) -> PvInsert {
        let head = self.heads.entry(pfn).or_default();
        debug_assert!(
            !head.entries.contains(&PvEntry { space, va }),
            "duplicate pv entry for {pfn:?} at {space:?}/{va:?}"
        );
        let insert = if head.flags.uncached() {
            PvInsert::Uncached
        } else if alias.is_some_and(|a| {
            head.entries.iter().any(|e| a.conflicts(e.va, va))
        }) {
            head.flags = head.flags.with_uncached(true);
            PvInsert::Demote
        } else {
            PvInsert::Cached
        };
        head.entries.push(PvEntry { space, va });
        insert
    }

    /// Removes the entry for `space` at `va` from `pfn`'s list.
    /// Returns true IFF it was the frame's last mapping.
    pub(crate) fn remove_one(
        &mut self,
        pfn: Pfn,
        space: SpaceId,
        va: Va,
    ) -> bool {
        let Some(head) = self.heads.get_mut(&pfn) else {
            panic!("no pv list for {pfn:?}");
        };
        let entry = PvEntry { space, va };
        let Some(k) = head.entries.iter().position(|&e| e == entry) else {
            panic!("no pv entry for {pfn:?} at {space:?}/{va:?}");
        };
        head.entries.swap_remove(k);
        let last = head.entries.is_empty();
        if last {
            head.flags = head.flags.with_uncached(false);
        }
        last
    }

    /// Detaches every mapping of `pfn`, yielding the (space,
    /// address) pairs.  The caller is responsible for the PTEs.
    pub(crate) fn remove_all(
        &mut self,
        pfn: Pfn,
    ) -> impl Iterator<Item = (SpaceId, Va)> {
        let entries = match self.heads.get_mut(&pfn) {
            Some(head) => {
                head.flags = head.flags.with_uncached(false);
                core::mem::take(&mut head.entries)
            }
            None => Vec::new(),
        };
        entries.into_iter().map(|e| (e.space, e.va))
    }

    /// Returns a snapshot of the mappings of `pfn`.
    pub(crate) fn mappings(&self, pfn: Pfn) -> Vec<(SpaceId, Va)> {
        self.heads
            .get(&pfn)
            .map(|head| head.entries.iter().map(|e| (e.space, e.va)).collect())
            .unwrap_or_default()
    }

    /// Returns true IFF `space` maps `pfn` at `va`.
    pub(crate) fn contains(&self, pfn: Pfn, space: SpaceId, va: Va) -> bool {
        let entry = PvEntry { space, va };
        self.heads
            .get(&pfn)
            .is_some_and(|head| head.entries.contains(&entry))
    }

    /// Returns true IFF any entry names `space`.
    pub(crate) fn references(&self, space: SpaceId) -> bool {
        self.heads
            .values()
            .any(|head| head.entries.iter().any(|e| e.space == space))
    }

    /// Returns true IFF `pfn` is marked uncached but its
    /// remaining mappings all share one color, so it could be
    /// cached again.  Clears the mark if so.
    pub(crate) fn try_recache(&mut self, pfn: Pfn, alias: &CacheAlias) -> bool {
        let Some(head) = self.heads.get_mut(&pfn) else {
            return false;
        };
        let Some(first) = head.entries.first() else {
            return false;
        };
        let aliased =
            head.entries.iter().any(|e| alias.conflicts(first.va, e.va));
        if !head.flags.uncached() || aliased {
            return false;
        }
        head.flags = head.flags.with_uncached(false);
        true
    }

    pub(crate) fn flags(&self, pfn: Pfn) -> PvFlags {
        self.heads.get(&pfn).map(|head| head.flags).unwrap_or_default()
    }

    /// Applies `f` to the attributes of `pfn`, returning the
    /// old value.
    pub(crate) fn update_flags(
        &mut self,
        pfn: Pfn,
        f: impl FnOnce(PvFlags) -> PvFlags,
    ) -> PvFlags {
        let head = self.heads.entry(pfn).or_default();
        let old = head.flags;
        head.flags = f(old);
        old
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Two-level user page tables.
//!
//! The user portion of an address space is described by a
//! segment table indexed by the high bits of the virtual
//! address.  Each non-empty slot names a page-table page of
//! PTEs for one 4MiB segment, indexed by the middle bits.
//! Segments that have never been mapped have no page-table page
//! at all, so sparse address spaces stay small.
//!
//! Neither kind of table is ever shared between segments or
//! address spaces.

extern crate alloc;

use crate::allocator::{PoolIndex, PoolUnit};
use crate::mem::{Va, PAGE_SHIFT, PAGE_SIZE, USER_SUP};
use crate::pte::Pte;
use alloc::boxed::Box;
use bit_field::BitField;
use core::ops::Range;
use static_assertions::{const_assert, const_assert_eq};

/// Log2 of the span of virtual address space mapped by one
/// page-table page.
pub(crate) const SEGSHIFT: usize = 22;
pub(crate) const NBSEG: usize = 1 << SEGSHIFT;
pub(crate) const SEGOFSET: usize = NBSEG - 1;

/// Number of PTEs in a page-table page.
pub(crate) const NPTEPG: usize = PAGE_SIZE / core::mem::size_of::<Pte>();

/// Number of slots in a segment table.
pub(crate) const NSEGPG: usize = USER_SUP >> SEGSHIFT;

/// The on-hardware size of a segment table, one word per slot.
const SEGTAB_SIZE: usize = NSEGPG * core::mem::size_of::<u32>();

const_assert_eq!(core::mem::size_of::<Pte>(), 4);
const_assert_eq!(NPTEPG << PAGE_SHIFT, NBSEG);
const_assert_eq!(NSEGPG << SEGSHIFT, USER_SUP);
const_assert!(SEGTAB_SIZE <= PAGE_SIZE);
const_assert_eq!(PAGE_SIZE % SEGTAB_SIZE, 0);

/// A page of PTEs covering one segment.
pub(crate) struct PtPage {
    entries: [Pte; NPTEPG],
}

impl PtPage {
    /// Computes the index of `va`'s entry in its page-table
    /// page.
    pub(crate) fn index(va: Va) -> usize {
        va.addr().get_bits(PAGE_SHIFT..SEGSHIFT)
    }

    /// Returns the entry for the given virtual address.
    pub(crate) fn entry(&self, va: Va) -> Pte {
        self.entries[Self::index(va)]
    }

    /// Sets the entry for the given virtual address.
    pub(crate) fn set_entry(&mut self, va: Va, pte: Pte) {
        self.entries[Self::index(va)] = pte;
    }
}

impl PoolUnit for PtPage {
    const PER_PAGE: usize = 1;

    fn zeroed() -> Box<PtPage> {
        Box::new(PtPage { entries: [Pte::empty(); NPTEPG] })
    }

    fn zero(&mut self) {
        self.entries.fill(Pte::empty());
    }

    fn is_zeroed(&self) -> bool {
        self.entries.iter().all(|&pte| pte == Pte::empty())
    }
}

/// The top-level index of a user address space.
pub(crate) struct SegTab {
    slots: [Option<PoolIndex>; NSEGPG],
}

impl SegTab {
    /// Computes the segment table index for `va`.
    pub(crate) fn index(va: Va) -> usize {
        debug_assert!(va.is_user());
        va.addr().get_bits(SEGSHIFT..usize::BITS as usize)
    }

    /// Returns the page-table page for `va`'s segment, if any.
    pub(crate) fn table(&self, va: Va) -> Option<PoolIndex> {
        self.slots[Self::index(va)]
    }

    /// Links a page-table page into `va`'s segment.
    pub(crate) fn set_table(&mut self, va: Va, table: PoolIndex) {
        let slot = &mut self.slots[Self::index(va)];
        assert!(slot.is_none(), "segment for {va:?} already has a table");
        *slot = Some(table);
    }

    /// Unlinks and returns every page-table page.
    pub(crate) fn take_tables(
        &mut self,
    ) -> impl Iterator<Item = PoolIndex> + '_ {
        self.slots.iter_mut().filter_map(Option::take)
    }
}

impl PoolUnit for SegTab {
    const PER_PAGE: usize = PAGE_SIZE / SEGTAB_SIZE;

    fn zeroed() -> Box<SegTab> {
        Box::new(SegTab { slots: [None; NSEGPG] })
    }

    fn zero(&mut self) {
        self.slots.fill(None);
    }

    fn is_zeroed(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

/// Splits the range [start, end) at segment boundaries.
pub(crate) fn segments(range: Range<Va>) -> impl Iterator<Item = Range<Va>> {
    let end = range.end;
    let mut start = range.start;
    core::iter::from_fn(move || {
        if start >= end {
            return None;
        }
        let next = match (start.addr() | SEGOFSET).checked_add(1) {
            Some(boundary) => Va::new(boundary).min(end),
            None => end,
        };
        let segment = start..next;
        start = next;
        Some(segment)
    })
}

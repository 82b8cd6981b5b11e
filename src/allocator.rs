// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pools of paging structures.
//!
//! Page-table pages and segment tables are taken from a private
//! free list rather than from the physical page allocator on
//! every use.  When the list is empty we take one physical page
//! and carve it into as many units as fit.  Units are never
//! handed back to the physical allocator; we assume address
//! space churn will reuse them.
//!
//! Units are addressed by index into the pool, not by pointer.

extern crate alloc;

use crate::machine::PhysPages;
use crate::mem::Pfn;
use crate::{Error, Result};
use alloc::boxed::Box;
use alloc::vec::Vec;

/// A structure that can be pooled.
pub(crate) trait PoolUnit {
    /// How many units are carved out of one physical page.
    const PER_PAGE: usize;

    /// Returns a new, zeroed unit.
    fn zeroed() -> Box<Self>;

    /// Zeroes the unit in place.
    fn zero(&mut self);

    /// Returns true IFF the unit holds nothing.
    fn is_zeroed(&self) -> bool;
}

/// The index of a unit in its pool.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub(crate) struct PoolIndex(u32);

/// A LIFO pool of units of type `T`.
pub(crate) struct TablePool<T> {
    units: Vec<Box<T>>,
    free: Vec<PoolIndex>,
    frames: Vec<Pfn>,
}

impl<T: PoolUnit> TablePool<T> {
    pub(crate) const fn new() -> TablePool<T> {
        TablePool { units: Vec::new(), free: Vec::new(), frames: Vec::new() }
    }

    /// Allocates a zeroed unit, growing the pool from `phys` if
    /// the free list is empty.
    pub(crate) fn alloc<P: PhysPages>(
        &mut self,
        phys: &mut P,
    ) -> Result<PoolIndex> {
        if self.free.is_empty() {
            self.grow(phys)?;
        }
        let index = self.free.pop().ok_or(Error::NoMemory)?;
        self.units[index.0 as usize].zero();
        Ok(index)
    }

    /// Returns a unit to the free list.  The unit must be empty.
    pub(crate) fn free(&mut self, index: PoolIndex) {
        debug_assert!(
            self.units[index.0 as usize].is_zeroed(),
            "freeing a live table"
        );
        debug_assert!(!self.free.contains(&index), "double free of {index:?}");
        self.free.push(index);
    }

    pub(crate) fn get(&self, index: PoolIndex) -> &T {
        &self.units[index.0 as usize]
    }

    pub(crate) fn get_mut(&mut self, index: PoolIndex) -> &mut T {
        &mut self.units[index.0 as usize]
    }

    /// Returns the number of physical pages backing the pool.
    pub(crate) fn frames(&self) -> usize {
        self.frames.len()
    }

    /// Returns the number of units on the free list.
    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Takes a page from the physical allocator and splits it
    /// into units.  The free list is filled so that the lowest
    /// index is handed out first.
    fn grow<P: PhysPages>(&mut self, phys: &mut P) -> Result<()> {
        let Some(frame) = phys.alloc_page() else {
            log::warn!("pmap: out of memory for paging structures");
            return Err(Error::NoMemory);
        };
        let base = self.units.len();
        let next = base.checked_add(T::PER_PAGE).expect("pool index overflow");
        let last = u32::try_from(next).expect("pool index overflow");
        log::trace!("pmap: pool grows by {frame:?} into units {base}..{last}");
        self.frames.push(frame);
        self.units.extend((base..next).map(|_| T::zeroed()));
        self.free.extend((base..next).rev().map(|k| PoolIndex(k as u32)));
        Ok(())
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::ops::Range;

pub(crate) const KIB: usize = 1024;
pub(crate) const MIB: usize = 1024 * KIB;

pub(crate) const PAGE_SHIFT: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
pub(crate) const PAGE_MASK: usize = PAGE_SIZE - 1;

/// Supremum of the user portion of the address space (kuseg).
pub const USER_SUP: usize = 0x8000_0000;
/// Base of the mapped kernel segment (kseg2).  The range
/// between `USER_SUP` and here is unmapped and never enters the
/// TLB.
pub const KSEG2_BASE: usize = 0xC000_0000;

/// Returns true IFF the range of virtual addresses in
/// [start, end) lies entirely in user space.
pub(crate) const fn is_user_range(start: usize, end: usize) -> bool {
    start <= end && end <= USER_SUP
}

/// A Va represents a page aligned virtual address.  The
/// address may or may not be mapped.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Va(usize);

impl Va {
    /// The alignment factor.
    pub const ALIGN: usize = PAGE_SIZE;
    pub const MASK: usize = Self::ALIGN - 1;

    /// Returns a new Va constructed from the given virtual
    /// address, which must be page aligned.
    pub const fn new(va: usize) -> Va {
        assert!(va & Self::MASK == 0);
        Va(va)
    }

    /// Returns the Va of the page containing the given address.
    pub const fn trunc(va: usize) -> Va {
        Va(va & !Self::MASK)
    }

    /// Returns the integer value of the raw virtual address.
    pub const fn addr(self) -> usize {
        self.0
    }

    /// Returns true IFF the page lies in user space.
    pub const fn is_user(self) -> bool {
        self.0 < USER_SUP
    }

    /// Returns the address of the following page.
    pub(crate) fn next(self) -> Va {
        Va(self.0.checked_add(PAGE_SIZE).expect("address space overflow"))
    }
}

/// Returns an iterator over the pages in the half-open range.
pub(crate) fn pages(range: Range<Va>) -> impl Iterator<Item = Va> {
    (range.start.0..range.end.0).step_by(PAGE_SIZE).map(Va)
}

/// A Pfn names a page of physical memory.  We never dereference
/// one; it is only ever stored in, or compared against, page
/// table entries.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Pfn(u32);

impl Pfn {
    /// The largest frame number a PTE can hold; physical
    /// addresses are limited to 32 bits.
    pub const MAX: u32 = (1 << 20) - 1;

    /// Constructs a new Pfn from the given frame number.
    pub const fn new(pfn: u32) -> Pfn {
        assert!(pfn <= Self::MAX);
        Pfn(pfn)
    }

    /// Constructs the Pfn for the frame containing the given
    /// physical address.
    pub const fn from_phys_addr(pa: u64) -> Pfn {
        Pfn::new((pa >> PAGE_SHIFT) as u32)
    }

    /// Returns the frame number.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns the physical address of the start of the frame.
    pub const fn phys_addr(self) -> u64 {
        (self.0 as u64) << PAGE_SHIFT
    }
}

/// Records the permissions of a mapping in a virtual address
/// space.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Prot {
    /// True if readable.
    r: bool,
    /// True if writable.
    w: bool,
    /// True if executable.
    x: bool,
}

impl Prot {
    /// Returns a new Prot with the given permissions.
    pub const fn new(r: bool, w: bool, x: bool) -> Prot {
        Prot { r, w, x }
    }

    /// No access at all.
    pub const fn none() -> Prot {
        Self::new(false, false, false)
    }

    /// Read-only data.
    pub const fn read() -> Prot {
        Self::new(true, false, false)
    }

    /// Read/write data.
    pub const fn read_write() -> Prot {
        Self::new(true, true, false)
    }

    /// Everything.
    pub const fn all() -> Prot {
        Self::new(true, true, true)
    }

    /// Returns true IFF readable.
    pub const fn r(&self) -> bool {
        self.r
    }

    /// Returns true IFF writeable.
    pub const fn w(&self) -> bool {
        self.w
    }

    /// Returns true IFF executable.
    pub const fn x(&self) -> bool {
        self.x
    }
}

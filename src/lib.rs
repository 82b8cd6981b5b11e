// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # MIPS physical map.
//!
//! Maintains the translations between virtual addresses in a
//! set of address spaces and physical page frames, keeps the
//! hardware TLB consistent with them, and tracks every virtual
//! address mapping each managed frame.
//!
//! The consumer is the machine-independent VM system: a fault
//! handler decides *what* to map and calls in here with an
//! already resolved virtual address, frame, and protection.
//! The scheduler calls `activate` on every address space switch.
//! Physical memory, the TLB, and the data cache are reached
//! through the traits in `machine`.
//!
//! All state lives in a `Pmap`; `VirtualMemoryManager` wraps it
//! in a single lock so that it can be shared.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

mod allocator;
mod config;
mod kmap;
mod machine;
mod mem;
mod pmap;
mod pte;
mod pv;
mod segtab;
mod tlbpid;
mod vmm;

#[cfg(test)]
mod fakes;

use core::fmt;

pub use config::{CacheAlias, Config};
pub use machine::{DataCache, HardwareTlb, PhysPages};
pub use mem::{Pfn, Prot, Va, KSEG2_BASE, PAGE_SIZE, USER_SUP};
pub use pmap::{Pmap, SpaceId};
pub use pte::{CacheMode, Pte};
pub use tlbpid::TlbPid;
pub use vmm::VirtualMemoryManager;

/// Errors the pmap reports to its caller.  Everything else is
/// either resolved internally or is a contract violation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// The physical page allocator could not supply a page to
    /// hold a page table or segment table.
    NoMemory,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoMemory => write!(f, "out of page table memory"),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

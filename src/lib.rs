//! # nearalloc - Executable Memory Near Target Addresses
//!
//! This crate hands out small blocks of executable-capable memory that sit
//! within a bounded distance of one or more target addresses. Code patching
//! needs this: a `jmp rel32` written over a function can only reach ±2 GiB, so
//! the trampoline it jumps to must live nearby.
//!
//! ## Overview
//!
//! ```text
//!   Address space around a patch site:
//!
//!   ◄──────────── max_distance ────────────┼──────────── max_distance ────────────►
//!                                          │
//!   ┌──────────┐        ┌──────────────────┼──┐            ┌──────────────┐
//!   │ chunk A  │        │  .text (target)  ▼  │            │   chunk B    │
//!   │ ▓▓░░░░░░ │        │        jmp rel32 ───┼──────────► │ ▓▓▓▓░░▓░░░░░ │
//!   └──────────┘        └─────────────────────┘            └──────────────┘
//!
//!   ▓ allocated   ░ free
//! ```
//!
//! Chunks are reserved from the operating system (64 KiB by default) and carved
//! up with a first-fit free list. Freed blocks are merged with free neighbours.
//!
//! ## Crate Structure
//!
//! ```text
//!   nearalloc
//!   ├── align       - Page alignment macros (align_up!, align_down!)
//!   ├── allocation  - Allocation, the RAII handle
//!   ├── allocator   - Allocator: chunk search, placement, locking
//!   ├── block       - Free block record (internal)
//!   ├── chunk       - Chunk and its free list (internal)
//!   ├── config      - Config
//!   ├── error       - Error, VmError
//!   ├── vm          - VirtualMemory trait, mmap-backed implementation
//!   └── window      - Proximity window (internal)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nearalloc::{Allocator, DEFAULT_MAX_DISTANCE};
//!
//! fn patch_site() {}
//!
//! let target = patch_site as fn() as usize;
//! let trampoline = Allocator::global()
//!   .allocate_near(&[target], 64, DEFAULT_MAX_DISTANCE)
//!   .expect("no memory near target");
//!
//! assert!(trampoline.address().abs_diff(target) <= DEFAULT_MAX_DISTANCE);
//! // `trampoline` goes back to the allocator when dropped.
//! ```
//!
//! ## Limitations
//!
//! - **Unix-only**: chunks come from `mmap(2)`; other systems need their own
//!   [`VirtualMemory`] implementation.
//! - **No shrinking**: a chunk stays reserved until its allocator is dropped,
//!   even when it is completely free.
//! - **Coarse locking**: one mutex per allocator serializes every call.

pub mod align;
mod allocation;
mod allocator;
mod block;
mod chunk;
mod config;
mod error;
mod vm;
mod window;

pub use allocation::Allocation;
pub use allocator::{Allocator, DEFAULT_MAX_DISTANCE, Stats};
pub use config::Config;
pub use error::{Error, VmError};
pub use vm::{SystemVirtualMemory, VirtualMemory};

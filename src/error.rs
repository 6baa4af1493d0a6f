use std::io;

/// Failure reported by a [`VirtualMemory`](crate::VirtualMemory) backend.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
  /// The requested placement is already in use or was not honoured.
  #[error("address {address:#x} is unavailable")]
  Unavailable { address: usize },
  #[error("size overflows the address space")]
  SizeOverflow,
  #[error("virtual memory call failed: {0}")]
  Os(#[from] io::Error),
}

/// The error type returned by [`Allocator::allocate`](crate::Allocator::allocate)
/// and [`Allocator::allocate_near`](crate::Allocator::allocate_near).
#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("bad virtual alloc")]
  BadVirtualAlloc(#[source] VmError),
  #[error("no memory in range")]
  NoMemoryInRange,
  #[error("zero-sized allocation")]
  ZeroSize,
}

use std::{fmt, ops::Range, sync::Arc};

use crate::allocator::Allocator;

/// A block of memory carved out of an [`Allocator`].
///
/// The block goes back to its allocator when the handle is dropped or
/// [`free`](Self::free)d, whichever comes first. The handle also keeps the
/// allocator, and with it the underlying chunk, alive.
///
/// A default or freed `Allocation` is invalid: its address and size are zero.
#[derive(Default)]
pub struct Allocation {
  allocator: Option<Arc<Allocator>>,
  address: usize,
  size: usize,
}

impl Allocation {
  pub(crate) fn new(
    allocator: Arc<Allocator>,
    address: usize,
    size: usize,
  ) -> Self {
    Self {
      allocator: Some(allocator),
      address,
      size,
    }
  }

  /// Returns the block to its allocator. Does nothing if already invalid.
  pub fn free(&mut self) {
    if let Some(allocator) = self.allocator.take() {
      if self.is_valid() {
        allocator.free(self.address, self.size);
      }
    }

    self.address = 0;
    self.size = 0;
  }

  pub fn address(&self) -> usize {
    self.address
  }

  pub fn size(&self) -> usize {
    self.size
  }

  pub fn as_ptr(&self) -> *mut u8 {
    self.address as *mut u8
  }

  pub fn range(&self) -> Range<usize> {
    self.address..self.address + self.size
  }

  pub fn allocator(&self) -> Option<&Arc<Allocator>> {
    self.allocator.as_ref()
  }

  pub fn is_valid(&self) -> bool {
    self.address != 0 && self.size != 0
  }
}

impl Drop for Allocation {
  fn drop(&mut self) {
    self.free();
  }
}

impl fmt::Debug for Allocation {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("Allocation")
      .field("address", &format_args!("{:#x}", self.address))
      .field("size", &self.size)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{config::Config, vm::fake::FakeVirtualMemory};

  #[test]
  fn test_default_is_invalid() {
    let mut allocation = Allocation::default();

    assert!(!allocation.is_valid());
    assert!(allocation.allocator().is_none());
    assert_eq!(allocation.range(), 0..0);

    allocation.free();
    assert!(!allocation.is_valid());
  }

  #[test]
  fn test_free_invalidates() {
    let allocator = Allocator::with_backend(FakeVirtualMemory::new(), Config::default());

    let mut allocation = allocator.allocate(48).unwrap();
    assert!(allocation.is_valid());
    assert!(Arc::ptr_eq(allocation.allocator().unwrap(), &allocator));
    assert_eq!(allocation.range().len(), 48);

    allocation.free();

    assert!(!allocation.is_valid());
    assert_eq!((allocation.address(), allocation.size()), (0, 0));
    assert!(allocation.allocator().is_none());
    assert_eq!(allocator.stats().free_bytes, allocator.stats().reserved_bytes);
  }

  #[test]
  fn test_drop_frees() {
    let allocator = Allocator::with_backend(FakeVirtualMemory::new(), Config::default());

    {
      let _allocation = allocator.allocate(48).unwrap();
      assert_eq!(allocator.stats().free_bytes, Config::DEFAULT_CHUNK_SIZE - 48);
    }

    assert_eq!(allocator.stats().free_bytes, Config::DEFAULT_CHUNK_SIZE);
    assert_eq!(allocator.stats().free_blocks, 1);
  }

  #[test]
  fn test_early_return_frees() {
    let allocator = Allocator::with_backend(FakeVirtualMemory::new(), Config::default());

    let install = |fail: bool| -> Result<Allocation, &'static str> {
      let trampoline = allocator.allocate(32).map_err(|_| "allocation failed")?;
      if fail {
        return Err("patch failed");
      }
      Ok(trampoline)
    };

    assert!(install(true).is_err());
    assert_eq!(allocator.stats().free_bytes, Config::DEFAULT_CHUNK_SIZE);

    let kept = install(false).unwrap();
    assert_eq!(allocator.stats().free_bytes, Config::DEFAULT_CHUNK_SIZE - kept.size());
  }
}

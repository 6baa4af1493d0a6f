use std::{io, ops::Range, ptr};

use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_EXEC, PROT_READ, PROT_WRITE, c_int, c_void};

use log::debug;

use crate::error::VmError;

/// The operating system service chunks are carved from.
///
/// Implementations hand out page-aligned, executable-capable regions and take
/// them back. A released region must be immediately reusable.
pub trait VirtualMemory: Send + Sync {
  /// Granularity of reservations, a power of two.
  fn page_size(&self) -> usize;

  /// The span of addresses a reservation may ever be placed in.
  fn address_bounds(&self) -> Range<usize>;

  /// Reserves and commits `size` bytes, exactly at `address` if one is given.
  ///
  /// A placement that is taken or not honoured must be reported as
  /// [`VmError::Unavailable`] so that callers can keep probing; anything else is
  /// treated as a hard failure.
  fn reserve(
    &self,
    address: Option<usize>,
    size: usize,
  ) -> Result<usize, VmError>;

  /// Returns a region obtained from [`reserve`](Self::reserve) to the system.
  ///
  /// # Safety
  ///
  /// `[address, address + size)` must be exactly one region previously returned
  /// by `reserve` on this backend, and nothing may access it afterwards.
  unsafe fn release(
    &self,
    address: usize,
    size: usize,
  ) -> Result<(), VmError>;
}

#[cfg(target_os = "linux")]
const MAP_NOREPLACE: c_int = libc::MAP_FIXED_NOREPLACE;
#[cfg(not(target_os = "linux"))]
const MAP_NOREPLACE: c_int = 0;

const PROT_RWX: c_int = PROT_READ | PROT_WRITE | PROT_EXEC;

// Below the default `vm.mmap_min_addr` nothing can be mapped anyway.
const MIN_ADDRESS: usize = 0x10000;

#[cfg(target_pointer_width = "64")]
const MAX_ADDRESS: usize = 0x7fff_ffff_0000;
#[cfg(not(target_pointer_width = "64"))]
const MAX_ADDRESS: usize = 0xffff_0000;

/// [`VirtualMemory`] backed by anonymous `mmap(2)` mappings.
#[derive(Debug, Clone, Copy)]
pub struct SystemVirtualMemory {
  page_size: usize,
}

impl SystemVirtualMemory {
  pub fn new() -> Self {
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

    Self {
      page_size: if page_size > 0 { page_size as usize } else { 0x1000 },
    }
  }
}

impl Default for SystemVirtualMemory {
  fn default() -> Self {
    Self::new()
  }
}

impl VirtualMemory for SystemVirtualMemory {
  fn page_size(&self) -> usize {
    self.page_size
  }

  fn address_bounds(&self) -> Range<usize> {
    MIN_ADDRESS..MAX_ADDRESS
  }

  fn reserve(
    &self,
    address: Option<usize>,
    size: usize,
  ) -> Result<usize, VmError> {
    let (hint, flags) = match address {
      Some(address) => (address as *mut c_void, MAP_PRIVATE | MAP_ANONYMOUS | MAP_NOREPLACE),
      None => (ptr::null_mut(), MAP_PRIVATE | MAP_ANONYMOUS),
    };

    let mapped = unsafe { libc::mmap(hint, size, PROT_RWX, flags, -1, 0) };

    if mapped == MAP_FAILED {
      return Err(mmap_error(address, io::Error::last_os_error()));
    }

    let mapped = mapped as usize;

    if let Some(address) = address {
      if mapped != address {
        // The kernel treated the address as a hint and put the mapping elsewhere.
        unsafe { libc::munmap(mapped as *mut c_void, size) };
        return Err(VmError::Unavailable { address });
      }
    }

    Ok(mapped)
  }

  unsafe fn release(
    &self,
    address: usize,
    size: usize,
  ) -> Result<(), VmError> {
    if unsafe { libc::munmap(address as *mut c_void, size) } != 0 {
      return Err(VmError::Os(io::Error::last_os_error()));
    }

    Ok(())
  }
}

/// Classifies a failed `mmap` call.
///
/// `EEXIST` means a hinted range overlaps an existing mapping. `ENOMEM` on a
/// hinted call also covers ranges past the top of the process address space,
/// which is narrower than [`MAX_ADDRESS`] on some kernels, so it stays
/// probeable. An unhinted call has nowhere else to go.
fn mmap_error(
  address: Option<usize>,
  err: io::Error,
) -> VmError {
  match (address, err.raw_os_error()) {
    (Some(address), Some(libc::EEXIST)) => VmError::Unavailable { address },
    (Some(address), Some(libc::ENOMEM)) => {
      debug!("mmap at {address:#x} failed with ENOMEM, treating it as unavailable");
      VmError::Unavailable { address }
    }
    _ => VmError::Os(err),
  }
}

#[cfg(test)]
pub(crate) mod fake {
  use std::{
    collections::BTreeMap,
    io,
    ops::Range,
    sync::{Arc, Mutex},
  };

  use super::VirtualMemory;
  use crate::error::VmError;

  pub const PAGE_SIZE: usize = 0x1000;
  pub const BOUNDS: Range<usize> = 0x10000..0x7fff_ffff_0000;

  const UNHINTED_BASE: usize = 0x5000_0000_0000;

  /// A simulated address space; no memory behind the addresses is ever touched.
  #[derive(Clone, Default)]
  pub struct FakeVirtualMemory {
    state: Arc<Mutex<FakeState>>,
  }

  #[derive(Default)]
  struct FakeState {
    mapped: BTreeMap<usize, usize>,
    occupied: BTreeMap<usize, usize>,
    next_unhinted: usize,
    reservations: usize,
    attempts: usize,
    failing: bool,
  }

  impl FakeState {
    fn overlaps(
      &self,
      start: usize,
      len: usize,
    ) -> bool {
      self
        .mapped
        .iter()
        .chain(self.occupied.iter())
        .any(|(&s, &l)| s < start + len && start < s + l)
    }
  }

  impl FakeVirtualMemory {
    pub fn new() -> Self {
      Self::default()
    }

    /// Marks `[start, start + len)` as mapped by someone else.
    pub fn occupy(
      &self,
      start: usize,
      len: usize,
    ) {
      self.state.lock().unwrap().occupied.insert(start, len);
    }

    pub fn set_failing(
      &self,
      failing: bool,
    ) {
      self.state.lock().unwrap().failing = failing;
    }

    /// Number of successful reservations so far.
    pub fn reservations(&self) -> usize {
      self.state.lock().unwrap().reservations
    }

    /// Number of reservation calls, successful or not.
    pub fn attempts(&self) -> usize {
      self.state.lock().unwrap().attempts
    }

    /// Regions reserved and not yet released, as `(address, size)`.
    pub fn live(&self) -> Vec<(usize, usize)> {
      self.state.lock().unwrap().mapped.iter().map(|(&a, &s)| (a, s)).collect()
    }
  }

  impl VirtualMemory for FakeVirtualMemory {
    fn page_size(&self) -> usize {
      PAGE_SIZE
    }

    fn address_bounds(&self) -> Range<usize> {
      BOUNDS
    }

    fn reserve(
      &self,
      address: Option<usize>,
      size: usize,
    ) -> Result<usize, VmError> {
      let mut state = self.state.lock().unwrap();
      state.attempts += 1;

      if state.failing {
        return Err(VmError::Os(io::Error::other("injected failure")));
      }

      assert_eq!(size % PAGE_SIZE, 0, "unaligned reservation size {size:#x}");

      let address = match address {
        Some(address) => {
          assert_eq!(address % PAGE_SIZE, 0, "unaligned reservation {address:#x}");

          let fits = address >= BOUNDS.start && address.checked_add(size).is_some_and(|end| end <= BOUNDS.end);

          if !fits || state.overlaps(address, size) {
            return Err(VmError::Unavailable { address });
          }

          address
        }
        None => {
          let mut address = state.next_unhinted.max(UNHINTED_BASE);

          while state.overlaps(address, size) {
            address += PAGE_SIZE;
          }

          state.next_unhinted = address + size + PAGE_SIZE;
          address
        }
      };

      state.mapped.insert(address, size);
      state.reservations += 1;
      Ok(address)
    }

    unsafe fn release(
      &self,
      address: usize,
      size: usize,
    ) -> Result<(), VmError> {
      let mut state = self.state.lock().unwrap();

      match state.mapped.remove(&address) {
        Some(mapped) if mapped == size => Ok(()),
        _ => panic!("release of unknown region {address:#x}+{size:#x}"),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_mmap_error_classification() {
    let errno = |code| io::Error::from_raw_os_error(code);

    assert!(matches!(
      mmap_error(Some(0x10_0000), errno(libc::EEXIST)),
      VmError::Unavailable { address: 0x10_0000 }
    ));
    assert!(matches!(
      mmap_error(Some(0x10_0000), errno(libc::ENOMEM)),
      VmError::Unavailable { .. }
    ));
    assert!(matches!(mmap_error(Some(0x10_0000), errno(libc::EACCES)), VmError::Os(_)));
    assert!(matches!(mmap_error(Some(0x10_0000), errno(libc::EPERM)), VmError::Os(_)));
    assert!(matches!(mmap_error(None, errno(libc::ENOMEM)), VmError::Os(_)));
  }

  #[test]
  fn test_system_page_size() {
    let vm = SystemVirtualMemory::new();

    assert!(vm.page_size().is_power_of_two());
  }

  #[test]
  fn test_system_reserve_release() {
    let vm = SystemVirtualMemory::new();
    let size = vm.page_size() * 2;

    let address = vm.reserve(None, size).unwrap();
    assert_eq!(address % vm.page_size(), 0);

    unsafe {
      ptr::write_bytes(address as *mut u8, 0xcc, size);
      assert_eq!(*((address + size - 1) as *const u8), 0xcc);
      vm.release(address, size).unwrap();
    }

    // Other tests map concurrently, so the spot may have been reused already.
    match vm.reserve(Some(address), size) {
      Ok(again) => {
        assert_eq!(again, address);
        unsafe { vm.release(again, size).unwrap() };
      }
      Err(err) => assert!(matches!(err, VmError::Unavailable { .. })),
    }
  }

  #[test]
  fn test_system_reserve_taken_address() {
    let vm = SystemVirtualMemory::new();
    let size = vm.page_size();

    let address = vm.reserve(None, size).unwrap();

    assert!(matches!(
      vm.reserve(Some(address), size),
      Err(VmError::Unavailable { address: a }) if a == address
    ));

    unsafe { vm.release(address, size).unwrap() };
  }
}

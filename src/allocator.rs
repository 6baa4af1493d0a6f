use std::{
  fmt, iter,
  sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
};

use log::{debug, error, trace, warn};

use crate::{
  align_down, align_up,
  allocation::Allocation,
  chunk::Chunk,
  config::Config,
  error::{Error, VmError},
  vm::{SystemVirtualMemory, VirtualMemory},
  window::Window,
};

/// The displacement reachable by a signed 32-bit relative operand.
pub const DEFAULT_MAX_DISTANCE: usize = 0x7fff_ffff;

static GLOBAL: OnceLock<Arc<Allocator>> = OnceLock::new();

/// Hands out small blocks of executable memory, optionally near given addresses.
///
/// Chunks are reserved from a [`VirtualMemory`] backend and subdivided with a
/// first-fit free list. All state sits behind one lock; allocation happens when
/// hooks are installed, never on a hot path.
pub struct Allocator {
  vm: Box<dyn VirtualMemory>,
  config: Config,
  chunks: Mutex<Vec<Chunk>>,
}

/// A point-in-time summary of an allocator's chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
  pub chunks: usize,
  pub reserved_bytes: usize,
  pub free_bytes: usize,
  pub free_blocks: usize,
}

impl Allocator {
  /// Returns the process-wide allocator, creating it on first use.
  pub fn global() -> Arc<Allocator> {
    Arc::clone(GLOBAL.get_or_init(Allocator::create))
  }

  /// Creates an allocator with its own chunks and lock.
  pub fn create() -> Arc<Allocator> {
    Self::with_config(Config::default())
  }

  /// Creates an independent allocator backed by `mmap`, tuned by `config`.
  pub fn with_config(config: Config) -> Arc<Allocator> {
    Self::with_backend(SystemVirtualMemory::new(), config)
  }

  /// Creates an independent allocator that reserves its chunks from `vm`.
  pub fn with_backend(
    vm: impl VirtualMemory + 'static,
    config: Config,
  ) -> Arc<Allocator> {
    Arc::new(Self {
      vm: Box::new(vm),
      config,
      chunks: Mutex::new(Vec::new()),
    })
  }

  /// The configuration this allocator was created with.
  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Allocates `size` bytes anywhere.
  pub fn allocate(
    self: &Arc<Self>,
    size: usize,
  ) -> Result<Allocation, Error> {
    self.allocate_near(&[], size, DEFAULT_MAX_DISTANCE)
  }

  /// Allocates `size` bytes such that every byte of the block lies within
  /// `max_distance` of every address in `desired_addresses`.
  ///
  /// Existing chunks are searched first. Failing that, a new chunk is reserved
  /// inside the reachable window, probing outward from the first desired
  /// address. An empty `desired_addresses` behaves like [`allocate`](Self::allocate).
  pub fn allocate_near(
    self: &Arc<Self>,
    desired_addresses: &[usize],
    size: usize,
    max_distance: usize,
  ) -> Result<Allocation, Error> {
    if size == 0 {
      return Err(Error::ZeroSize);
    }

    let window = Window::around(desired_addresses, max_distance).ok_or(Error::NoMemoryInRange)?;

    let mut chunks = self.lock();

    let address = match Self::carve_existing(&mut chunks, size, &window) {
      Some(address) => address,
      None => self.carve_new(&mut chunks, desired_addresses, size, &window)?,
    };

    drop(chunks);

    trace!("allocated {size:#x} bytes at {address:#x}");

    Ok(Allocation::new(Arc::clone(self), address, size))
  }

  /// Returns `[address, address + size)` to the chunk it was carved from.
  pub(crate) fn free(
    &self,
    address: usize,
    size: usize,
  ) {
    let mut chunks = self.lock();

    match chunks.iter_mut().find(|chunk| chunk.contains(address)) {
      Some(chunk) => {
        chunk.release(address, size);
        trace!("freed {size:#x} bytes at {address:#x}");

        if chunk.is_unused() {
          debug!("chunk {:#x} is empty, keeping it reserved", chunk.address());
        }
      }
      None => error!("free of {size:#x} bytes at {address:#x} outside every chunk"),
    }
  }

  /// Takes a snapshot of chunk and free-list usage under the lock.
  pub fn stats(&self) -> Stats {
    let chunks = self.lock();

    chunks.iter().fold(Stats::default(), |stats, chunk| Stats {
      chunks: stats.chunks + 1,
      reserved_bytes: stats.reserved_bytes + chunk.size(),
      free_bytes: stats.free_bytes + chunk.free_bytes(),
      free_blocks: stats.free_blocks + chunk.free_blocks().len(),
    })
  }

  fn lock(&self) -> MutexGuard<'_, Vec<Chunk>> {
    self.chunks.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn carve_existing(
    chunks: &mut [Chunk],
    size: usize,
    window: &Window,
  ) -> Option<usize> {
    chunks.iter_mut().find_map(|chunk| {
      let (index, start) = chunk.find_fit(size, window)?;
      chunk.carve(index, start, size);
      Some(start)
    })
  }

  fn carve_new(
    &self,
    chunks: &mut Vec<Chunk>,
    desired_addresses: &[usize],
    size: usize,
    window: &Window,
  ) -> Result<usize, Error> {
    let page_size = self.vm.page_size();

    let min_size = align_up!(size, page_size).ok_or(Error::BadVirtualAlloc(VmError::SizeOverflow))?;
    let preferred = align_up!(self.config.chunk_size, page_size)
      .unwrap_or(min_size)
      .max(min_size);

    let chunk = if window.is_unbounded() {
      let address = self.vm.reserve(None, preferred).map_err(Error::BadVirtualAlloc)?;
      debug!("reserved chunk {address:#x}+{preferred:#x}");
      Chunk::new(address, preferred)
    } else {
      self.reserve_near(desired_addresses, min_size, preferred, window)?
    };

    chunks.push(chunk);

    let chunk = chunks.last_mut().ok_or(Error::NoMemoryInRange)?;
    let (index, start) = chunk.find_fit(size, window).ok_or(Error::NoMemoryInRange)?;
    chunk.carve(index, start, size);

    Ok(start)
  }

  /// Reserves a chunk lying wholly inside `window`.
  ///
  /// The first attempts use `preferred` bytes, shrunk to what the window can
  /// hold. When every page-aligned base has been tried at one size, the size is
  /// halved, never below `min_size`. All attempts share `max_probes`.
  fn reserve_near(
    &self,
    desired_addresses: &[usize],
    min_size: usize,
    preferred: usize,
    window: &Window,
  ) -> Result<Chunk, Error> {
    let page_size = self.vm.page_size();
    let bounds = self.vm.address_bounds();

    let lo = align_up!(window.lo.max(bounds.start), page_size).ok_or(Error::NoMemoryInRange)?;
    let end = align_down!(window.hi.saturating_add(1).min(bounds.end), page_size);

    if end <= lo || end - lo < min_size {
      return Err(Error::NoMemoryInRange);
    }

    let center = desired_addresses.first().copied().unwrap_or(lo);
    let largest = preferred.min(align_down!(end - lo, page_size));

    let sizes = iter::successors(Some(largest), move |&size| {
      (size > min_size).then(|| align_down!(size / 2, page_size).max(min_size))
    });

    let candidates = sizes.flat_map(move |size| {
      let last = end - size;
      let first = align_down!(center.saturating_sub(size / 2), page_size).clamp(lo, last);

      Probes::covering(first, lo, last, size, page_size).map(move |base| (base, size))
    });

    for (base, size) in candidates.take(self.config.max_probes) {
      match self.vm.reserve(Some(base), size) {
        Ok(address) => {
          debug_assert_eq!(address, base);
          debug!("reserved chunk {address:#x}+{size:#x} in {:#x}..={:#x}", window.lo, window.hi);
          return Ok(Chunk::new(address, size));
        }
        Err(VmError::Unavailable { .. }) => continue,
        Err(err) => return Err(Error::BadVirtualAlloc(err)),
      }
    }

    warn!(
      "no room for {min_size:#x} bytes in {:#x}..={:#x} within {} probes",
      window.lo, window.hi, self.config.max_probes
    );

    Err(Error::NoMemoryInRange)
  }
}

impl Drop for Allocator {
  fn drop(&mut self) {
    let chunks = self.chunks.get_mut().unwrap_or_else(PoisonError::into_inner);

    for chunk in chunks.drain(..) {
      // Every allocation holds an `Arc` to us, so nothing references the chunk.
      match unsafe { self.vm.release(chunk.address(), chunk.size()) } {
        Ok(()) => debug!("released chunk {:#x}+{:#x}", chunk.address(), chunk.size()),
        Err(err) => error!("failed to release chunk {:#x}: {err}", chunk.address()),
      }
    }
  }
}

impl fmt::Debug for Allocator {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("Allocator")
      .field("config", &self.config)
      .field("stats", &self.stats())
      .finish_non_exhaustive()
  }
}

/// Candidate chunk bases inside `[lo, last]`, walking outward from `first`,
/// alternately one stride above and below.
///
/// A `grid` walk starts at `first` itself. A `between` walk only visits odd
/// multiples of its stride, the midpoints of a grid twice as coarse.
struct Probes {
  first: usize,
  lo: usize,
  last: usize,
  stride: usize,
  step: usize,
  increment: usize,
  pending: Option<usize>,
}

impl Probes {
  fn grid(
    first: usize,
    lo: usize,
    last: usize,
    stride: usize,
  ) -> Self {
    Self {
      first,
      lo,
      last,
      stride,
      step: 0,
      increment: 1,
      pending: None,
    }
  }

  fn between(
    first: usize,
    lo: usize,
    last: usize,
    stride: usize,
  ) -> Self {
    Self {
      step: 1,
      increment: 2,
      ..Self::grid(first, lo, last, stride)
    }
  }

  /// Every page-aligned base in `[lo, last]`, each once: a grid at the largest
  /// power of two not above `size`, then successively halved midpoints down to
  /// `page_size`.
  fn covering(
    first: usize,
    lo: usize,
    last: usize,
    size: usize,
    page_size: usize,
  ) -> impl Iterator<Item = usize> {
    let coarsest = 1usize << size.ilog2();

    iter::successors(Some(coarsest), move |&stride| (stride > page_size).then_some(stride / 2)).flat_map(
      move |stride| {
        if stride == coarsest {
          Probes::grid(first, lo, last, stride)
        } else {
          Probes::between(first, lo, last, stride)
        }
      },
    )
  }
}

impl Iterator for Probes {
  type Item = usize;

  fn next(&mut self) -> Option<usize> {
    if let Some(base) = self.pending.take() {
      return Some(base);
    }

    let step = self.step;
    let offset = step.checked_mul(self.stride)?;
    self.step = step.checked_add(self.increment)?;

    if step == 0 {
      return Some(self.first);
    }

    let above = self.first.checked_add(offset).filter(|&base| base <= self.last);
    let below = self.first.checked_sub(offset).filter(|&base| base >= self.lo);

    match above {
      Some(base) => {
        self.pending = below;
        Some(base)
      }
      None => below,
    }
  }
}

use crate::{block::FreeBlock, window::Window};

/// One region reserved from the operating system, subdivided on demand.
///
/// # Invariants
/// - `address` and `size` never change after reservation.
/// - `free` is sorted by address and every block lies in `[address, address + size)`.
/// - Blocks never overlap, and after [`coalesce`](Self::coalesce) no two touch.
#[derive(Debug)]
pub struct Chunk {
  address: usize,
  size: usize,
  free: Vec<FreeBlock>,
}

impl Chunk {
  /// Wraps a freshly reserved region whose whole span is free.
  pub fn new(
    address: usize,
    size: usize,
  ) -> Self {
    Self {
      address,
      size,
      free: vec![FreeBlock::new(address, address + size)],
    }
  }

  pub fn address(&self) -> usize {
    self.address
  }

  pub fn size(&self) -> usize {
    self.size
  }

  pub fn free_blocks(&self) -> &[FreeBlock] {
    &self.free
  }

  pub fn free_bytes(&self) -> usize {
    self.free.iter().map(FreeBlock::len).sum()
  }

  pub fn contains(
    &self,
    address: usize,
  ) -> bool {
    address >= self.address && address - self.address < self.size
  }

  /// First-fit search for `size` bytes whose whole range lies in `window`.
  ///
  /// Returns the index of the block and the start address to carve at.
  pub fn find_fit(
    &self,
    size: usize,
    window: &Window,
  ) -> Option<(usize, usize)> {
    if self.size < size {
      return None;
    }

    self.free.iter().enumerate().find_map(|(index, block)| {
      let start = block.start.max(window.lo);
      let end = start.checked_add(size)?;

      (end <= block.end && window.contains(start, size)).then_some((index, start))
    })
  }

  /// Removes `[start, start + size)` from the free block at `index`.
  ///
  /// The range must lie within that block. Carving from the middle splits it.
  pub fn carve(
    &mut self,
    index: usize,
    start: usize,
    size: usize,
  ) {
    let block = self.free[index];
    let end = start + size;

    debug_assert!(block.start <= start && end <= block.end);

    match (block.start == start, block.end == end) {
      (true, true) => {
        self.free.remove(index);
      }
      (true, false) => self.free[index].start = end,
      (false, true) => self.free[index].end = start,
      (false, false) => {
        self.free[index].end = start;
        self.free.insert(index + 1, FreeBlock::new(end, block.end));
      }
    }
  }

  /// Puts `[address, address + size)` back on the free list and merges neighbours.
  pub fn release(
    &mut self,
    address: usize,
    size: usize,
  ) {
    let index = self.free.partition_point(|block| block.start < address);

    debug_assert!(index == 0 || self.free[index - 1].end <= address, "double free at {address:#x}");
    debug_assert!(
      index == self.free.len() || address + size <= self.free[index].start,
      "double free at {address:#x}"
    );

    self.free.insert(index, FreeBlock::new(address, address + size));
    self.coalesce();
  }

  /// Merges every run of touching free blocks into a single block.
  pub fn coalesce(&mut self) {
    self.free.dedup_by(|next, prev| {
      if prev.touches(next) {
        prev.end = next.end;
        true
      } else {
        false
      }
    });
  }

  /// Returns `true` if nothing has been carved out of this chunk.
  pub fn is_unused(&self) -> bool {
    matches!(self.free.as_slice(), [block] if block.start == self.address && block.len() == self.size)
  }
}

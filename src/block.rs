use std::fmt;

/// A maximal free range `[start, end)` inside a chunk.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
  pub start: usize,
  pub end: usize,
}

impl FreeBlock {
  pub fn new(
    start: usize,
    end: usize,
  ) -> Self {
    debug_assert!(start < end, "empty free block {start:#x}..{end:#x}");
    Self { start, end }
  }

  pub fn len(&self) -> usize {
    self.end - self.start
  }

  /// Returns `true` if `self` ends exactly where `next` begins.
  pub fn touches(
    &self,
    next: &FreeBlock,
  ) -> bool {
    self.end == next.start
  }
}

impl fmt::Debug for FreeBlock {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "{:#x}..{:#x}", self.start, self.end)
  }
}

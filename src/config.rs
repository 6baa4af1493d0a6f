/// Tuning knobs for an [`Allocator`](crate::Allocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// Preferred size of a freshly reserved chunk, rounded up to the page size.
  pub chunk_size: usize,
  /// Upper bound on reservation attempts made by one `allocate_near` call.
  pub max_probes: usize,
}

impl Config {
  pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
  pub const DEFAULT_MAX_PROBES: usize = 4096;

  pub fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = chunk_size;
    self
  }

  pub fn with_max_probes(
    mut self,
    max_probes: usize,
  ) -> Self {
    self.max_probes = max_probes;
    self
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      chunk_size: Self::DEFAULT_CHUNK_SIZE,
      max_probes: Self::DEFAULT_MAX_PROBES,
    }
  }
}

use crate::error::{HeapError, Result};

/// Default number of segregated size classes.
pub const DEFAULT_SIZE_CLASSES: usize = 12;
/// Default minimum number of bytes requested from the source per growth.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 5;

/// Tuning knobs for a [`SegAllocator`](crate::SegAllocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Number of free lists. Class `k` holds blocks in `[2^k, 2^(k+1))`,
  /// the last class is unbounded.
  pub size_classes: usize,
  /// Lower bound on every growth request, and the size of the initial one.
  pub chunk_size: usize,
  /// On a miss in the request's own class, keep looking in larger classes
  /// before growing the heap.
  pub search_larger_classes: bool,
  /// Run the consistency checker after every release and log the outcome.
  pub check_on_release: bool,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      size_classes: DEFAULT_SIZE_CLASSES,
      chunk_size: DEFAULT_CHUNK_SIZE,
      search_larger_classes: false,
      check_on_release: false,
    }
  }
}

impl HeapConfig {
  pub fn with_size_classes(
    mut self,
    size_classes: usize,
  ) -> Self {
    self.size_classes = size_classes;
    self
  }

  pub fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = chunk_size;
    self
  }

  pub fn with_search_larger_classes(
    mut self,
    enabled: bool,
  ) -> Self {
    self.search_larger_classes = enabled;
    self
  }

  pub fn with_check_on_release(
    mut self,
    enabled: bool,
  ) -> Self {
    self.check_on_release = enabled;
    self
  }

  pub fn validate(&self) -> Result<()> {
    if self.size_classes == 0 {
      return Err(HeapError::InvalidConfig("size_classes must be at least 1"));
    }
    // Class k needs 2^k to be representable as a 32-bit block size.
    if self.size_classes > 32 {
      return Err(HeapError::InvalidConfig("size_classes must be at most 32"));
    }
    if self.chunk_size == 0 {
      return Err(HeapError::InvalidConfig("chunk_size must be positive"));
    }
    if u32::try_from(self.chunk_size).is_err() {
      return Err(HeapError::InvalidConfig("chunk_size must fit in 32 bits"));
    }
    Ok(())
  }
}

use thiserror::Error;

/// Failures surfaced by the allocator's public operations.
///
/// Every variant is a local, recoverable result: the heap is left exactly
/// as it was before the failing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
  /// The memory source cannot supply `requested` more bytes.
  #[error("memory source exhausted while requesting {requested} bytes")]
  Exhausted { requested: usize },
  /// `allocate(0)` is a no-op failure.
  #[error("zero-sized allocation request")]
  ZeroSize,
  /// `resize` was handed a negative size.
  #[error("negative resize request: {0}")]
  NegativeSize(isize),
  /// The request does not fit in the heap's 32-bit offset space.
  #[error("allocation size overflows the heap address space")]
  SizeOverflow,
  /// A block tag was built from a size that is not a multiple of 8.
  #[error("block size {0} is not a multiple of 8")]
  MisalignedSize(usize),
  /// A [`HeapConfig`](crate::HeapConfig) field is out of range.
  #[error("invalid heap configuration: {0}")]
  InvalidConfig(&'static str),
  /// The process break moved underneath the allocator.
  #[error("memory source returned a non-contiguous region")]
  Discontiguous,
}

pub type Result<T> = core::result::Result<T, HeapError>;

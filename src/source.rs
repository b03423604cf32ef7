//! Memory-extension services the allocator grows its heap from.
//!
//! The allocator only ever asks a source for "N more contiguous bytes at
//! the end". Offsets returned by [`MemorySource::extend`] are relative to
//! the start of the source's region, so the allocator never handles raw
//! addresses itself.

use core::{ptr, slice};

use libc::{c_void, intptr_t, sbrk};

use crate::{
  align::ALIGNMENT,
  error::{HeapError, Result},
};

/// Default capacity of a [`MemLib`] region.
pub const DEFAULT_MAX_HEAP: usize = 20 * (1 << 20);

/// A contiguous region that only grows at its end.
pub trait MemorySource {
  /// Appends `bytes` to the region and returns the offset of the new space.
  ///
  /// `bytes` is always a positive multiple of 8. On failure the region is
  /// left as it was.
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<usize>;

  /// Drops the region back to empty. Storage already obtained may be reused.
  fn reset(&mut self);

  /// Current length of the region in bytes.
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn bytes(&self) -> &[u8];

  fn bytes_mut(&mut self) -> &mut [u8];
}

/// Simulated heap: a fixed-capacity, 8-byte aligned buffer with a moving
/// break, failing once `max_heap` would be exceeded.
pub struct MemLib {
  storage: Box<[u64]>,
  brk: usize,
  extend_calls: u64,
}

impl MemLib {
  pub fn new(max_heap: usize) -> Self {
    let words = max_heap / ALIGNMENT;
    Self {
      storage: vec![0u64; words].into_boxed_slice(),
      brk: 0,
      extend_calls: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.storage.len() * ALIGNMENT
  }

  /// Number of successful `extend` calls since the last reset.
  pub fn extend_calls(&self) -> u64 {
    self.extend_calls
  }
}

impl Default for MemLib {
  fn default() -> Self {
    Self::new(DEFAULT_MAX_HEAP)
  }
}

impl MemorySource for MemLib {
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<usize> {
    let old_brk = self.brk;
    match old_brk.checked_add(bytes) {
      Some(new_brk) if new_brk <= self.capacity() => {
        self.brk = new_brk;
        self.extend_calls += 1;
        Ok(old_brk)
      }
      _ => {
        log::warn!(
          "[segalloc] memlib: ran out of memory ({} + {} > {})",
          old_brk,
          bytes,
          self.capacity()
        );
        Err(HeapError::Exhausted { requested: bytes })
      }
    }
  }

  fn reset(&mut self) {
    self.brk = 0;
    self.extend_calls = 0;
  }

  fn len(&self) -> usize {
    self.brk
  }

  fn bytes(&self) -> &[u8] {
    // SAFETY: `storage` owns `capacity()` initialized bytes and `brk` never
    // exceeds it; u8 has no alignment requirement.
    unsafe { slice::from_raw_parts(self.storage.as_ptr().cast::<u8>(), self.brk) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    // SAFETY: as in `bytes`, and `&mut self` guarantees exclusive access.
    unsafe { slice::from_raw_parts_mut(self.storage.as_mut_ptr().cast::<u8>(), self.brk) }
  }
}

/// Grows the heap by moving the program break with `sbrk(2)`.
///
/// The first extension reserves at least `reserve` bytes so the initial
/// heap layout never straddles two break moves. Memory is never handed back
/// to the system; after a [`reset`](MemorySource::reset) the reserved range
/// is reused before the break moves again.
pub struct SbrkSource {
  base: *mut u8,
  reserved: usize,
  len: usize,
  reserve: usize,
}

impl SbrkSource {
  pub fn new(reserve: usize) -> Self {
    Self {
      base: ptr::null_mut(),
      reserved: 0,
      len: 0,
      reserve: crate::align!(reserve),
    }
  }

  /// Bytes obtained from the system so far.
  pub fn reserved(&self) -> usize {
    self.reserved
  }

  unsafe fn move_break(increment: usize) -> Result<*mut u8> {
    let increment = intptr_t::try_from(increment).map_err(|_| HeapError::SizeOverflow)?;
    let address = unsafe { sbrk(increment) };
    if address == usize::MAX as *mut c_void {
      return Err(HeapError::Exhausted {
        requested: increment as usize,
      });
    }
    Ok(address.cast::<u8>())
  }

  unsafe fn reserve_more(
    &mut self,
    needed: usize,
  ) -> Result<()> {
    unsafe {
      if self.base.is_null() {
        // One break move, with slack to align the start inside it.
        let grant = needed.max(self.reserve);
        let start = Self::move_break(grant + ALIGNMENT)?;
        let padding = start.align_offset(ALIGNMENT);
        self.base = start.add(padding);
        self.reserved = grant + ALIGNMENT - padding;
        log::debug!("[segalloc] sbrk: reserved {} bytes at {:?}", self.reserved, self.base);
        return Ok(());
      }

      let grant = needed.max(self.reserve);
      let address = Self::move_break(grant)?;
      if address != self.base.add(self.reserved) {
        // Someone else moved the break; the new range is not ours to merge.
        log::warn!(
          "[segalloc] sbrk: break moved to {:?}, expected {:?}",
          address,
          self.base.add(self.reserved)
        );
        return Err(HeapError::Discontiguous);
      }
      self.reserved += grant;
      log::debug!("[segalloc] sbrk: reserved {} more bytes, total {}", grant, self.reserved);
      Ok(())
    }
  }
}

impl MemorySource for SbrkSource {
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<usize> {
    let old_len = self.len;
    let new_len = old_len.checked_add(bytes).ok_or(HeapError::SizeOverflow)?;
    if new_len > self.reserved {
      unsafe { self.reserve_more(new_len - self.reserved)? };
    }
    self.len = new_len;
    Ok(old_len)
  }

  fn reset(&mut self) {
    self.len = 0;
  }

  fn len(&self) -> usize {
    self.len
  }

  fn bytes(&self) -> &[u8] {
    if self.base.is_null() {
      return &[];
    }
    // SAFETY: [base, base + reserved) was granted to us by sbrk and is only
    // touched through this source.
    unsafe { slice::from_raw_parts(self.base, self.len) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    if self.base.is_null() {
      return &mut [];
    }
    // SAFETY: as in `bytes`, with exclusive access through `&mut self`.
    unsafe { slice::from_raw_parts_mut(self.base, self.len) }
  }
}

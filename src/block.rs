//! Physical encoding of a heap block.
//!
//! ```text
//!            header                                   footer
//!   ┌──────────────────┬─────────────────────────────┬──────────────────┐
//!   │ size | allocated │  payload (prev, next links  │ size | allocated │
//!   │     (4 bytes)    │   overlaid while free)      │     (4 bytes)    │
//!   └──────────────────┴─────────────────────────────┴──────────────────┘
//!                      ▲
//!                      └── BlockRef (payload offset)
//! ```

use crate::{
  align::is_aligned,
  error::{HeapError, Result},
};

/// Word size of tags and links.
pub const WSIZE: usize = 4;
/// Double word: header plus footer overhead, and the payload alignment.
pub const DSIZE: usize = 8;
/// Smallest block that can carry both tags and both free-list links.
pub const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

const ALLOCATED_BIT: u32 = 0x1;
const SIZE_MASK: u32 = !0x7;

/// A `(size, allocated)` boundary tag, stored identically in header and footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
  size: u32,
  allocated: bool,
}

impl Tag {
  /// Zero-size allocated tag terminating the heap.
  pub const EPILOGUE: Tag = Tag {
    size: 0,
    allocated: true,
  };

  /// Builds a tag, rejecting sizes that would clobber the flag bits.
  pub fn new(
    size: usize,
    allocated: bool,
  ) -> Result<Self> {
    if !is_aligned(size) {
      return Err(HeapError::MisalignedSize(size));
    }
    let size = u32::try_from(size).map_err(|_| HeapError::SizeOverflow)?;
    Ok(Self { size, allocated })
  }

  /// Tag for a size the caller already knows to be aligned.
  pub(crate) const fn aligned(
    size: usize,
    allocated: bool,
  ) -> Self {
    debug_assert!(size & 0x7 == 0);
    Self {
      size: size as u32,
      allocated,
    }
  }

  pub const fn pack(self) -> u32 {
    self.size | if self.allocated { ALLOCATED_BIT } else { 0 }
  }

  pub const fn unpack(word: u32) -> Self {
    Self {
      size: word & SIZE_MASK,
      allocated: word & ALLOCATED_BIT != 0,
    }
  }

  pub const fn size(self) -> usize {
    self.size as usize
  }

  pub const fn is_allocated(self) -> bool {
    self.allocated
  }
}

pub(crate) fn read_word(
  heap: &[u8],
  offset: usize,
) -> u32 {
  let mut word = [0u8; WSIZE];
  word.copy_from_slice(&heap[offset..offset + WSIZE]);
  u32::from_ne_bytes(word)
}

pub(crate) fn write_word(
  heap: &mut [u8],
  offset: usize,
  value: u32,
) {
  heap[offset..offset + WSIZE].copy_from_slice(&value.to_ne_bytes());
}

/// Handle to a block: the heap offset of its payload.
///
/// This is what the allocator hands out in place of a raw pointer. Offset
/// zero always falls inside the size-class table, so it doubles as the
/// "no block" marker in free-list links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockRef(u32);

impl BlockRef {
  pub(crate) const fn new(offset: usize) -> Self {
    Self(offset as u32)
  }

  pub(crate) fn from_link(link: u32) -> Option<Self> {
    (link != 0).then_some(Self(link))
  }

  pub(crate) fn to_link(block: Option<Self>) -> u32 {
    block.map_or(0, |b| b.0)
  }

  /// Offset of the payload from the start of the heap.
  pub const fn offset(self) -> usize {
    self.0 as usize
  }

  pub(crate) const fn header(self) -> usize {
    self.offset() - WSIZE
  }

  pub(crate) fn footer(
    self,
    heap: &[u8],
  ) -> usize {
    self.offset() + self.size(heap) - DSIZE
  }

  pub(crate) fn tag(
    self,
    heap: &[u8],
  ) -> Tag {
    Tag::unpack(read_word(heap, self.header()))
  }

  pub(crate) fn footer_tag(
    self,
    heap: &[u8],
  ) -> Tag {
    Tag::unpack(read_word(heap, self.footer(heap)))
  }

  pub(crate) fn size(
    self,
    heap: &[u8],
  ) -> usize {
    self.tag(heap).size()
  }

  pub(crate) fn is_allocated(
    self,
    heap: &[u8],
  ) -> bool {
    self.tag(heap).is_allocated()
  }

  /// Writes `tag` to the header, then to the footer its size implies.
  pub(crate) fn write_tags(
    self,
    heap: &mut [u8],
    tag: Tag,
  ) {
    write_word(heap, self.header(), tag.pack());
    write_word(heap, self.offset() + tag.size() - DSIZE, tag.pack());
  }

  /// Physical successor. Never call this on the epilogue.
  pub(crate) fn next(
    self,
    heap: &[u8],
  ) -> BlockRef {
    BlockRef::new(self.offset() + self.size(heap))
  }

  /// Physical predecessor, found through its footer.
  pub(crate) fn prev(
    self,
    heap: &[u8],
  ) -> BlockRef {
    let prev_size = Tag::unpack(read_word(heap, self.offset() - DSIZE)).size();
    BlockRef::new(self.offset() - prev_size)
  }

  pub(crate) fn prev_free(
    self,
    heap: &[u8],
  ) -> Option<BlockRef> {
    BlockRef::from_link(read_word(heap, self.offset()))
  }

  pub(crate) fn next_free(
    self,
    heap: &[u8],
  ) -> Option<BlockRef> {
    BlockRef::from_link(read_word(heap, self.offset() + WSIZE))
  }

  pub(crate) fn set_prev_free(
    self,
    heap: &mut [u8],
    prev: Option<BlockRef>,
  ) {
    write_word(heap, self.offset(), BlockRef::to_link(prev));
  }

  pub(crate) fn set_next_free(
    self,
    heap: &mut [u8],
    next: Option<BlockRef>,
  ) {
    write_word(heap, self.offset() + WSIZE, BlockRef::to_link(next));
  }
}

/// One entry of a physical heap walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub block: BlockRef,
  pub size: usize,
  pub allocated: bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tag_pack_keeps_flag_in_low_bit() {
    let tag = Tag::new(48, true).unwrap();
    assert_eq!(tag.pack(), 49);
    assert_eq!(Tag::unpack(49), tag);
    assert!(!Tag::unpack(48).is_allocated());
    assert_eq!(Tag::EPILOGUE.pack(), 1);
  }

  #[test]
  fn tag_rejects_unaligned_sizes() {
    assert_eq!(Tag::new(20, false), Err(HeapError::MisalignedSize(20)));
    assert_eq!(Tag::new(1, true), Err(HeapError::MisalignedSize(1)));
  }

  #[test]
  fn neighbors_follow_sizes() {
    let mut heap = vec![0u8; 64];
    let first = BlockRef::new(8);
    first.write_tags(&mut heap, Tag::aligned(16, true));
    let second = first.next(&heap);
    second.write_tags(&mut heap, Tag::aligned(24, false));

    assert_eq!(second.offset(), 24);
    assert_eq!(second.prev(&heap), first);
    assert_eq!(second.footer_tag(&heap), second.tag(&heap));
    assert!(!second.is_allocated(&heap));
    assert_eq!(second.size(&heap), 24);
  }

  #[test]
  fn free_links_round_through_payload() {
    let mut heap = vec![0u8; 64];
    let block = BlockRef::new(16);
    block.set_prev_free(&mut heap, None);
    block.set_next_free(&mut heap, Some(BlockRef::new(40)));

    assert_eq!(block.prev_free(&heap), None);
    assert_eq!(block.next_free(&heap), Some(BlockRef::new(40)));
  }
}

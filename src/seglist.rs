//! Segregated free lists.
//!
//! One list head per size class lives in a table at the very start of the
//! heap. Each list is doubly linked through the payloads of its free blocks
//! and kept in insertion order (new blocks go to the head).
//!
//! ```text
//!   heap offset 0
//!   ┌────┬────┬────┬─────┬────┐
//!   │ c0 │ c1 │ c2 │ ... │ cN │   one u32 head offset per class, 0 = empty
//!   └────┴────┴─┬──┴─────┴────┘
//!               │
//!               ▼
//!            ┌──────┐ next ┌──────┐ next ┌──────┐
//!            │ free │ ───► │ free │ ───► │ free │ ───► 0
//!       0 ◄─ │  B1  │ ◄─── │  B2  │ ◄─── │  B3  │
//!       prev └──────┘ prev └──────┘ prev └──────┘
//! ```

use crate::{
  align,
  block::{BlockRef, WSIZE, read_word, write_word},
};

/// Maps a block size to its class: the number of halvings it takes to bring
/// `size` down to 1, capped at the last class.
///
/// Class `k` below the cap therefore covers `[2^k, 2^(k+1))`.
pub fn class_index(
  size: usize,
  classes: usize,
) -> usize {
  let mut class = 0;
  let mut remaining = size;
  while class + 1 < classes && remaining > 1 {
    remaining >>= 1;
    class += 1;
  }
  class
}

/// View over the class table of one heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SegList {
  classes: usize,
}

impl SegList {
  pub(crate) const fn new(classes: usize) -> Self {
    Self { classes }
  }

  pub(crate) const fn classes(&self) -> usize {
    self.classes
  }

  /// Bytes the table occupies, padded to keep payloads 8-byte aligned.
  pub(crate) const fn table_size(&self) -> usize {
    align!(self.classes * WSIZE)
  }

  pub(crate) fn class_of(
    &self,
    size: usize,
  ) -> usize {
    class_index(size, self.classes)
  }

  pub(crate) fn head(
    &self,
    heap: &[u8],
    class: usize,
  ) -> Option<BlockRef> {
    BlockRef::from_link(read_word(heap, class * WSIZE))
  }

  fn set_head(
    &self,
    heap: &mut [u8],
    class: usize,
    block: Option<BlockRef>,
  ) {
    write_word(heap, class * WSIZE, BlockRef::to_link(block));
  }

  /// Empties every list.
  pub(crate) fn reset(
    &self,
    heap: &mut [u8],
  ) {
    for class in 0..self.classes {
      self.set_head(heap, class, None);
    }
  }

  /// Pushes `block` onto the head of the list for `size`.
  pub(crate) fn insert(
    &self,
    heap: &mut [u8],
    block: BlockRef,
    size: usize,
  ) {
    let class = self.class_of(size);
    let old_head = self.head(heap, class);

    if let Some(old_head) = old_head {
      old_head.set_prev_free(heap, Some(block));
    }
    block.set_next_free(heap, old_head);
    block.set_prev_free(heap, None);
    self.set_head(heap, class, Some(block));
  }

  /// Unlinks `block` from the list its header size maps to.
  ///
  /// The block must be free and on that list; nothing here checks it.
  pub(crate) fn remove(
    &self,
    heap: &mut [u8],
    block: BlockRef,
  ) {
    let class = self.class_of(block.size(heap));
    let prev = block.prev_free(heap);
    let next = block.next_free(heap);

    match (prev, next) {
      (Some(prev), Some(next)) => {
        prev.set_next_free(heap, Some(next));
        next.set_prev_free(heap, Some(prev));
      }
      (Some(prev), None) => prev.set_next_free(heap, None),
      (None, Some(next)) => {
        self.set_head(heap, class, Some(next));
        next.set_prev_free(heap, None);
      }
      (None, None) => self.set_head(heap, class, None),
    }
  }

  pub(crate) fn iter<'h>(
    &self,
    heap: &'h [u8],
    class: usize,
  ) -> ListIter<'h> {
    ListIter {
      heap,
      current: self.head(heap, class),
    }
  }
}

/// Walks one class list from its head.
pub(crate) struct ListIter<'h> {
  heap: &'h [u8],
  current: Option<BlockRef>,
}

impl Iterator for ListIter<'_> {
  type Item = BlockRef;

  fn next(&mut self) -> Option<BlockRef> {
    let block = self.current?;
    self.current = block.next_free(self.heap);
    Some(block)
  }
}

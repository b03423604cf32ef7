//! The allocator proper: placement, coalescing, growth and the public
//! allocate / release / resize surface.

use crate::{
  align,
  block::{BlockInfo, BlockRef, DSIZE, MIN_BLOCK_SIZE, Tag, WSIZE, write_word},
  config::HeapConfig,
  error::{HeapError, Result},
  seglist::SegList,
  source::{MemLib, MemorySource},
};

/// Total block size (payload rounded to 8, plus header and footer) needed
/// to hold `size` user bytes.
pub fn block_size_for(size: usize) -> Result<usize> {
  let padded = size
    .checked_add(DSIZE + align::ALIGNMENT - 1)
    .ok_or(HeapError::SizeOverflow)?;
  let block_size = (padded & !(align::ALIGNMENT - 1)).max(MIN_BLOCK_SIZE);
  if block_size > u32::MAX as usize {
    return Err(HeapError::SizeOverflow);
  }
  Ok(block_size)
}

/// Snapshot of the heap's shape, gathered by a physical walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapStats {
  /// Bytes obtained from the memory source, table and sentinels included.
  pub heap_bytes: usize,
  /// Growth requests served since the last `init`, the initial one included.
  pub grow_calls: u64,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  /// Number of blocks on each size-class list.
  pub list_lengths: Vec<usize>,
}

/// A segregated-fit allocator over a single heap grown from `S`.
///
/// Every block handed out is identified by a [`BlockRef`]; the payload is
/// reachable through [`payload`](Self::payload),
/// [`payload_mut`](Self::payload_mut) or [`as_ptr`](Self::as_ptr).
pub struct SegAllocator<S: MemorySource = MemLib> {
  source: S,
  config: HeapConfig,
  lists: SegList,
  prologue: BlockRef,
  grow_calls: u64,
}

impl SegAllocator<MemLib> {
  /// Allocator over a default-sized simulated heap.
  pub fn with_memlib() -> Result<Self> {
    Self::new(MemLib::default())
  }
}

impl<S: MemorySource> SegAllocator<S> {
  pub fn new(source: S) -> Result<Self> {
    Self::with_config(source, HeapConfig::default())
  }

  pub fn with_config(
    source: S,
    config: HeapConfig,
  ) -> Result<Self> {
    config.validate()?;
    let lists = SegList::new(config.size_classes);
    let mut allocator = Self {
      source,
      config,
      lists,
      prologue: BlockRef::new(lists.table_size() + 2 * WSIZE),
      grow_calls: 0,
    };
    allocator.init()?;
    Ok(allocator)
  }

  /// Resets the heap: empty class table, fresh sentinels, one initial growth.
  pub fn init(&mut self) -> Result<()> {
    self.source.reset();
    self.grow_calls = 0;

    let table = self.lists.table_size();
    let base = self.source.extend(table + 4 * WSIZE)?;
    debug_assert_eq!(base, 0);

    let lists = self.lists;
    let heap = self.source.bytes_mut();
    lists.reset(heap);
    write_word(heap, table, 0);
    self.prologue = BlockRef::new(table + 2 * WSIZE);
    self.prologue.write_tags(heap, Tag::aligned(DSIZE, true));
    write_word(heap, table + 3 * WSIZE, Tag::EPILOGUE.pack());

    log::debug!(
      "[segalloc] init: {} size classes, {} byte chunks",
      self.config.size_classes,
      self.config.chunk_size
    );

    self.extend(self.config.chunk_size)?;
    Ok(())
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  /// Growth requests served since the last `init`.
  pub fn grow_calls(&self) -> u64 {
    self.grow_calls
  }

  pub fn heap_size(&self) -> usize {
    self.source.len()
  }

  pub(crate) fn heap(&self) -> &[u8] {
    self.source.bytes()
  }

  #[cfg(test)]
  pub(crate) fn heap_mut(&mut self) -> &mut [u8] {
    self.source.bytes_mut()
  }

  pub(crate) fn lists(&self) -> SegList {
    self.lists
  }

  pub(crate) fn prologue(&self) -> BlockRef {
    self.prologue
  }

  /// Grows the heap by at least `bytes` and returns the resulting free
  /// block, already merged with a free block that ended the heap.
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<BlockRef> {
    let size = align!(bytes).max(MIN_BLOCK_SIZE);
    let fits = self
      .source
      .len()
      .checked_add(size)
      .is_some_and(|end| end <= u32::MAX as usize);
    if !fits {
      return Err(HeapError::SizeOverflow);
    }

    let offset = self.source.extend(size).inspect_err(|err| {
      log::warn!("[segalloc] extend({}) failed: {}", size, err);
    })?;

    // The old epilogue header becomes the new block's header.
    let block = BlockRef::new(offset);
    let heap = self.source.bytes_mut();
    block.write_tags(heap, Tag::aligned(size, false));
    let epilogue = block.next(heap).header();
    write_word(heap, epilogue, Tag::EPILOGUE.pack());

    self.grow_calls += 1;
    log::debug!(
      "[segalloc] extend({}) -> {}, heap is now {} bytes",
      size,
      offset,
      self.source.len()
    );

    Ok(self.coalesce(block))
  }

  /// Merges a free `block` with its free physical neighbors and files the
  /// result under its final size.
  fn coalesce(
    &mut self,
    block: BlockRef,
  ) -> BlockRef {
    let lists = self.lists;
    let heap = self.source.bytes_mut();

    let mut size = block.size(heap);
    let prev = block.prev(heap);
    let next = block.next(heap);
    let prev_allocated = prev.is_allocated(heap);
    let next_allocated = next.is_allocated(heap);

    let merged = match (prev_allocated, next_allocated) {
      (true, true) => block,
      (false, true) => {
        lists.remove(heap, prev);
        size += prev.size(heap);
        prev
      }
      (true, false) => {
        lists.remove(heap, next);
        size += next.size(heap);
        block
      }
      (false, false) => {
        lists.remove(heap, prev);
        lists.remove(heap, next);
        size += prev.size(heap) + next.size(heap);
        prev
      }
    };

    merged.write_tags(heap, Tag::aligned(size, false));
    lists.insert(heap, merged, size);
    merged
  }

  /// Carves `asize` bytes off the front of the free `block`.
  fn place(
    &mut self,
    block: BlockRef,
    asize: usize,
  ) -> BlockRef {
    let lists = self.lists;
    let heap = self.source.bytes_mut();
    let block_size = block.size(heap);

    lists.remove(heap, block);

    if block_size - asize >= MIN_BLOCK_SIZE {
      block.write_tags(heap, Tag::aligned(asize, true));
      let remainder = block.next(heap);
      let remainder_size = block_size - asize;
      remainder.write_tags(heap, Tag::aligned(remainder_size, false));
      lists.insert(heap, remainder, remainder_size);
    } else {
      block.write_tags(heap, Tag::aligned(block_size, true));
    }

    block
  }

  /// First fit within the request's own size class, and optionally the
  /// classes above it.
  fn find_fit(
    &self,
    asize: usize,
  ) -> Option<BlockRef> {
    let heap = self.heap();
    let first = self.lists.class_of(asize);
    let last = if self.config.search_larger_classes {
      self.lists.classes()
    } else {
      first + 1
    };
    (first..last).find_map(|class| {
      self
        .lists
        .iter(heap, class)
        .find(|block| block.size(heap) >= asize)
    })
  }

  /// Shrinks the allocated `block` (currently `block_size` bytes) to `keep`
  /// bytes when the tail is large enough to stand alone as a free block.
  fn trim(
    &mut self,
    block: BlockRef,
    block_size: usize,
    keep: usize,
  ) {
    let heap = self.source.bytes_mut();
    if block_size - keep < MIN_BLOCK_SIZE {
      block.write_tags(heap, Tag::aligned(block_size, true));
      return;
    }

    block.write_tags(heap, Tag::aligned(keep, true));
    let remainder = block.next(heap);
    remainder.write_tags(heap, Tag::aligned(block_size - keep, false));
    self.coalesce(remainder);
  }

  /// Allocates a block with room for at least `size` bytes.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<BlockRef> {
    if size == 0 {
      return Err(HeapError::ZeroSize);
    }
    let asize = block_size_for(size)?;

    let block = match self.find_fit(asize) {
      Some(block) => block,
      None => self.extend(asize.max(self.config.chunk_size)).inspect_err(|_| {
        log::warn!("[segalloc] allocate({}) -> exhausted", size);
      })?,
    };
    let block = self.place(block, asize);

    log::trace!("[segalloc] allocate({}) -> {}", size, block.offset());
    Ok(block)
  }

  /// Allocates room for `count` elements of `size` bytes, zero-filled.
  pub fn zeroed(
    &mut self,
    count: usize,
    size: usize,
  ) -> Result<BlockRef> {
    let total = count.checked_mul(size).ok_or(HeapError::SizeOverflow)?;
    let block = self.allocate(total)?;
    self.payload_mut(block).fill(0);
    Ok(block)
  }

  /// Returns a block to the heap. `None` is ignored.
  ///
  /// Releasing anything but a live block from this heap corrupts it; the
  /// checker is the only thing that will notice.
  pub fn release(
    &mut self,
    block: impl Into<Option<BlockRef>>,
  ) {
    let Some(block) = block.into() else {
      return;
    };

    let heap = self.source.bytes_mut();
    let size = block.size(heap);
    block.write_tags(heap, Tag::aligned(size, false));
    self.coalesce(block);

    log::trace!("[segalloc] release({}) size={}", block.offset(), size);

    if self.config.check_on_release {
      if self.check() {
        log::debug!("[segalloc] heap check passed");
      } else {
        log::warn!("[segalloc] heap check failed after release({})", block.offset());
      }
    }
  }

  /// Resizes `block` to hold `size` bytes, in place when possible.
  ///
  /// - negative `size`: error, nothing changes
  /// - `None` block: behaves like [`allocate`](Self::allocate)
  /// - zero `size`: releases the block and returns `Ok(None)`
  ///
  /// If the block has to move and the new allocation fails, the original
  /// block is left untouched and still valid.
  pub fn resize(
    &mut self,
    block: impl Into<Option<BlockRef>>,
    size: isize,
  ) -> Result<Option<BlockRef>> {
    if size < 0 {
      return Err(HeapError::NegativeSize(size));
    }
    let size = size.unsigned_abs();

    let Some(block) = block.into() else {
      return self.allocate(size).map(Some);
    };
    if size == 0 {
      self.release(block);
      return Ok(None);
    }

    let new_size = block_size_for(size)?;
    let heap = self.heap();
    let old_size = block.size(heap);

    if new_size == old_size {
      return Ok(Some(block));
    }

    if new_size < old_size {
      self.trim(block, old_size, new_size);
      log::trace!(
        "[segalloc] resize({}) {} -> {} SHRINK in place",
        block.offset(),
        old_size,
        new_size
      );
      return Ok(Some(block));
    }

    let next = block.next(heap);
    let next_size = next.size(heap);
    if !next.is_allocated(heap) && old_size + next_size >= new_size {
      let lists = self.lists;
      let heap = self.source.bytes_mut();
      lists.remove(heap, next);
      block.write_tags(heap, Tag::aligned(old_size + next_size, true));
      self.trim(block, old_size + next_size, new_size);
      log::trace!(
        "[segalloc] resize({}) {} -> {} GREW in place",
        block.offset(),
        old_size,
        new_size
      );
      return Ok(Some(block));
    }

    let moved = self.allocate(size).inspect_err(|err| {
      log::warn!(
        "[segalloc] resize({}) {} -> {} FAILED: {}",
        block.offset(),
        old_size,
        new_size,
        err
      );
    })?;
    let copy = (old_size - DSIZE).min(self.usable_size(moved));
    let heap = self.source.bytes_mut();
    heap.copy_within(block.offset()..block.offset() + copy, moved.offset());
    self.release(block);

    log::trace!(
      "[segalloc] resize({}) {} -> {} COPIED to {}",
      block.offset(),
      old_size,
      new_size,
      moved.offset()
    );
    Ok(Some(moved))
  }

  /// Bytes the caller may use in a live block.
  pub fn usable_size(
    &self,
    block: BlockRef,
  ) -> usize {
    block.size(self.heap()) - DSIZE
  }

  pub fn payload(
    &self,
    block: BlockRef,
  ) -> &[u8] {
    let len = self.usable_size(block);
    &self.heap()[block.offset()..block.offset() + len]
  }

  pub fn payload_mut(
    &mut self,
    block: BlockRef,
  ) -> &mut [u8] {
    let len = self.usable_size(block);
    &mut self.source.bytes_mut()[block.offset()..block.offset() + len]
  }

  /// Raw address of a block's payload, valid until the heap is reset.
  pub fn as_ptr(
    &mut self,
    block: BlockRef,
  ) -> *mut u8 {
    self.payload_mut(block).as_mut_ptr()
  }

  /// Walks every block between the prologue and the epilogue.
  pub fn blocks(&self) -> Blocks<'_> {
    let heap = self.heap();
    Blocks {
      heap,
      current: self.prologue.next(heap),
    }
  }

  pub fn stats(&self) -> HeapStats {
    let heap = self.heap();
    let mut stats = HeapStats {
      heap_bytes: self.source.len(),
      grow_calls: self.grow_calls,
      list_lengths: (0..self.lists.classes())
        .map(|class| self.lists.iter(heap, class).count())
        .collect(),
      ..HeapStats::default()
    };

    for info in self.blocks() {
      if info.allocated {
        stats.allocated_blocks += 1;
        stats.allocated_bytes += info.size;
      } else {
        stats.free_blocks += 1;
        stats.free_bytes += info.size;
      }
    }

    stats
  }
}

/// Physical walk over the heap, see [`SegAllocator::blocks`].
pub struct Blocks<'h> {
  heap: &'h [u8],
  current: BlockRef,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    let tag = self.current.tag(self.heap);
    if tag.size() == 0 {
      return None;
    }
    let info = BlockInfo {
      block: self.current,
      size: tag.size(),
      allocated: tag.is_allocated(),
    };
    self.current = BlockRef::new(self.current.offset() + tag.size());
    Some(info)
  }
}

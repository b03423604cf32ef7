//! Whole-heap consistency checker.
//!
//! A diagnostic pass, never run on the allocation path unless
//! [`HeapConfig::check_on_release`](crate::HeapConfig::check_on_release) asks
//! for it. It scans the heap physically, then walks every free list and
//! cross-checks the two views. Each broken invariant is reported as its own
//! [`Violation`].

use std::collections::BTreeSet;

use thiserror::Error;

use crate::{
  align::is_aligned,
  block::{BlockRef, DSIZE, MIN_BLOCK_SIZE, Tag, WSIZE, read_word},
  heap::SegAllocator,
  source::MemorySource,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
  #[error("sentinel at offset {offset} reads {found:#x}")]
  BadSentinel { offset: usize, found: u32 },
  #[error("block {block} is on free list {class} but tagged allocated")]
  ListedBlockAllocated { block: usize, class: usize },
  #[error("free block {block} has a free physical neighbor {neighbor}")]
  UncoalescedNeighbor { block: usize, neighbor: usize },
  #[error("{listed} blocks on the free lists, {scanned} free blocks in the heap")]
  FreeCountMismatch { listed: usize, scanned: usize },
  #[error("block {block} ends at {end}, past {limit}")]
  Overlap { block: usize, end: usize, limit: usize },
  #[error("block {block} has size {size}")]
  Undersized { block: usize, size: usize },
  #[error("block {block} header {header:#x} disagrees with footer {footer:#x}")]
  TagMismatch { block: usize, header: u32, footer: u32 },
  #[error("block {block} of size {size} is on list {class}, belongs on {expected}")]
  WrongClass {
    block: usize,
    size: usize,
    class: usize,
    expected: usize,
  },
  #[error("free list {class} links to invalid offset {link}")]
  BadLink { class: usize, link: usize },
  #[error("block {block} has a stale back link")]
  BrokenBackLink { block: usize },
  #[error("free list {class} does not terminate")]
  ListCycle { class: usize },
  #[error("free list entry {block} does not start a block in the heap")]
  StrayListEntry { block: usize },
}

/// Outcome of one checker pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
  pub violations: Vec<Violation>,
  /// Blocks found by walking every free list.
  pub listed_free: usize,
  /// Free blocks found by the physical scan.
  pub scanned_free: usize,
  /// Blocks found by the physical scan, sentinels excluded.
  pub blocks: usize,
}

impl CheckReport {
  pub fn is_ok(&self) -> bool {
    self.violations.is_empty()
  }
}

impl<S: MemorySource> SegAllocator<S> {
  /// Runs every consistency check and returns the individual findings.
  pub fn check_heap(&self) -> CheckReport {
    let mut report = CheckReport::default();
    let starts = self.scan_blocks(&mut report);
    self.walk_lists(&starts, &mut report);

    if report.listed_free != report.scanned_free {
      report.violations.push(Violation::FreeCountMismatch {
        listed: report.listed_free,
        scanned: report.scanned_free,
      });
    }

    for violation in &report.violations {
      log::warn!("[segalloc] check: {}", violation);
    }
    report
  }

  /// `true` when [`check_heap`](Self::check_heap) finds nothing.
  pub fn check(&self) -> bool {
    self.check_heap().is_ok()
  }

  /// Physical walk from the first block to the epilogue. Returns the payload
  /// offset of every block seen.
  fn scan_blocks(
    &self,
    report: &mut CheckReport,
  ) -> BTreeSet<usize> {
    let heap = self.heap();
    let len = heap.len();
    let prologue = self.prologue();
    let mut starts = BTreeSet::new();

    let sentinel = Tag::aligned(DSIZE, true).pack();
    for offset in [prologue.header(), prologue.offset()] {
      let found = read_word(heap, offset);
      if found != sentinel {
        report.violations.push(Violation::BadSentinel { offset, found });
      }
    }

    let mut offset = prologue.offset() + DSIZE;
    loop {
      let header = read_word(heap, offset - WSIZE);
      let tag = Tag::unpack(header);
      let size = tag.size();

      if size == 0 {
        if offset != len {
          report.violations.push(Violation::Undersized { block: offset, size });
        } else if !tag.is_allocated() {
          report.violations.push(Violation::BadSentinel {
            offset: offset - WSIZE,
            found: header,
          });
        }
        break;
      }

      if size < MIN_BLOCK_SIZE {
        report.violations.push(Violation::Undersized { block: offset, size });
      }
      if offset + size > len {
        report.violations.push(Violation::Overlap {
          block: offset,
          end: offset + size,
          limit: len,
        });
        break;
      }

      let footer = read_word(heap, offset + size - DSIZE);
      if footer != header {
        report.violations.push(Violation::TagMismatch {
          block: offset,
          header,
          footer,
        });
      }

      starts.insert(offset);
      report.blocks += 1;
      if !tag.is_allocated() {
        report.scanned_free += 1;
      }
      offset += size;
    }

    starts
  }

  fn walk_lists(
    &self,
    starts: &BTreeSet<usize>,
    report: &mut CheckReport,
  ) {
    let heap = self.heap();
    let len = heap.len();
    let lists = self.lists();
    let prologue = self.prologue();
    let first = prologue.offset() + DSIZE;
    let max_steps = len / MIN_BLOCK_SIZE + 1;

    for class in 0..lists.classes() {
      let mut prev_listed: Option<BlockRef> = None;
      let mut link = read_word(heap, class * WSIZE) as usize;
      let mut steps = 0;

      while link != 0 {
        steps += 1;
        if steps > max_steps {
          report.violations.push(Violation::ListCycle { class });
          break;
        }
        if link < first || !is_aligned(link) || link + MIN_BLOCK_SIZE > len {
          report.violations.push(Violation::BadLink { class, link });
          break;
        }

        let block = BlockRef::new(link);
        let tag = block.tag(heap);
        let size = tag.size();
        if size < MIN_BLOCK_SIZE || link + size > len {
          report.violations.push(Violation::BadLink { class, link });
          break;
        }

        report.listed_free += 1;
        if tag.is_allocated() {
          report
            .violations
            .push(Violation::ListedBlockAllocated { block: link, class });
        }
        if !starts.contains(&link) {
          report.violations.push(Violation::StrayListEntry { block: link });
        }
        let expected = lists.class_of(size);
        if expected != class {
          report.violations.push(Violation::WrongClass {
            block: link,
            size,
            class,
            expected,
          });
        }
        if block.prev_free(heap) != prev_listed {
          report.violations.push(Violation::BrokenBackLink { block: link });
        }

        let next = block.next(heap);
        if !next.is_allocated(heap) {
          report.violations.push(Violation::UncoalescedNeighbor {
            block: link,
            neighbor: next.offset(),
          });
        }
        let prev_size = Tag::unpack(read_word(heap, link - DSIZE)).size();
        if prev_size != 0 && link >= prologue.offset() + prev_size {
          let prev = block.prev(heap);
          if !prev.is_allocated(heap) {
            report.violations.push(Violation::UncoalescedNeighbor {
              block: link,
              neighbor: prev.offset(),
            });
          }
        }

        prev_listed = Some(block);
        link = read_word(heap, link + WSIZE) as usize;
      }
    }
  }
}

use segalloc::{BlockRef, HeapConfig, HeapError, MIN_BLOCK_SIZE, MemLib, SbrkSource, SegAllocator};

fn fresh(max_heap: usize) -> SegAllocator {
  SegAllocator::new(MemLib::new(max_heap)).unwrap()
}

/// Asserts the quiescent-state invariants through the public walk.
fn assert_invariants(heap: &SegAllocator) {
  let report = heap.check_heap();
  assert!(report.is_ok(), "{:?}", report.violations);

  let blocks: Vec<_> = heap.blocks().collect();
  for info in &blocks {
    assert!(info.size >= MIN_BLOCK_SIZE);
    assert_eq!(info.size % 8, 0);
    assert_eq!(info.block.offset() % 8, 0);
  }
  for pair in blocks.windows(2) {
    assert!(pair[0].allocated || pair[1].allocated, "adjacent free blocks {:?}", pair);
    assert_eq!(pair[0].block.offset() + pair[0].size, pair[1].block.offset());
  }
}

#[test]
fn scenario_a_allocate_returns_aligned_memory() {
  let mut heap = fresh(1 << 20);

  let block = heap.allocate(100).unwrap();

  assert_eq!(heap.as_ptr(block) as usize % 8, 0);
  assert!(heap.usable_size(block) >= 100);
  assert!(heap.check());
}

#[test]
fn scenario_b_released_space_is_reused_without_growth() {
  let mut heap = fresh(1 << 20);
  let first = heap.allocate(100).unwrap();
  let _second = heap.allocate(200).unwrap();
  heap.release(first);
  let grows = heap.grow_calls();
  let heap_size = heap.heap_size();

  let reused = heap.allocate(50).unwrap();

  assert_eq!(reused, first);
  assert_eq!(heap.grow_calls(), grows);
  assert_eq!(heap.heap_size(), heap_size);
  assert_invariants(&heap);
}

#[test]
fn scenario_c_shrink_keeps_address() {
  let mut heap = fresh(1 << 20);
  let block = heap.allocate(64).unwrap();
  heap.payload_mut(block)[..32].fill(0x5A);

  let shrunk = heap.resize(block, 32).unwrap().unwrap();

  assert_eq!(shrunk, block);
  assert!(heap.usable_size(shrunk) >= 32);
  assert!(heap.payload(shrunk)[..32].iter().all(|&byte| byte == 0x5A));
  assert_invariants(&heap);
}

#[test]
fn scenario_c_tiny_shrink_keeps_whole_block() {
  let mut heap = fresh(1 << 20);
  let block = heap.allocate(64).unwrap();
  let before = heap.usable_size(block);

  // 72-byte block, 64-byte target: an 8-byte tail cannot stand alone.
  let shrunk = heap.resize(block, 56).unwrap().unwrap();

  assert_eq!(shrunk, block);
  assert_eq!(heap.usable_size(shrunk), before);
  assert_invariants(&heap);
}

#[test]
fn scenario_d_grow_in_place_absorbs_free_successor() {
  let mut heap = fresh(1 << 20);
  let first = heap.allocate(64).unwrap();
  let second = heap.allocate(64).unwrap();
  assert_eq!(first.offset() + heap.usable_size(first) + 8, second.offset());
  heap.payload_mut(first)[..64].copy_from_slice(&[0xC3; 64]);
  heap.release(second);
  let grows = heap.grow_calls();

  let grown = heap.resize(first, 100).unwrap().unwrap();

  assert_eq!(grown, first);
  assert!(heap.usable_size(grown) >= 100);
  assert_eq!(&heap.payload(grown)[..64], &[0xC3; 64]);
  assert_eq!(heap.grow_calls(), grows);
  assert_invariants(&heap);
}

#[test]
fn scenario_e_exhaustion_leaves_heap_intact() {
  // Sentinels, initial chunk and a single 112-byte extension fit; nothing more.
  let mut heap = fresh(256);
  let block = heap.allocate(100).unwrap();
  let before = heap.stats();

  let result = heap.allocate(100);

  assert!(matches!(result, Err(HeapError::Exhausted { .. })));
  assert_eq!(heap.stats(), before);
  assert!(heap.check());

  // The heap still serves requests that fit the space it has: the released
  // block merges with its 32-byte neighbor into one 144-byte block.
  heap.release(block);
  assert_eq!(heap.allocate(136).unwrap(), block);
  assert_invariants(&heap);
}

#[test]
fn failed_relocation_keeps_the_original_block() {
  let mut heap = fresh(256);
  let block = heap.allocate(100).unwrap();
  heap.payload_mut(block)[..4].copy_from_slice(b"keep");

  let result = heap.resize(block, 1000);

  assert!(matches!(result, Err(HeapError::Exhausted { .. })));
  assert_eq!(&heap.payload(block)[..4], b"keep");
  heap.release(block);
  assert_invariants(&heap);
}

#[test]
fn release_then_allocate_reuses_an_isolated_block() {
  for size in [1, 8, 24, 100, 1000, 5000] {
    let config = HeapConfig::default().with_chunk_size(16);
    let mut heap = SegAllocator::with_config(MemLib::new(1 << 20), config).unwrap();
    let block = heap.allocate(size).unwrap();
    let fence = heap.allocate(8).unwrap();
    assert_eq!(fence.offset(), block.offset() + heap.usable_size(block) + 8);
    heap.release(block);
    let grows = heap.grow_calls();

    let again = heap.allocate(size).unwrap();

    assert_eq!(again, block, "size {}", size);
    assert_eq!(heap.grow_calls(), grows, "size {}", size);
    assert_invariants(&heap);
  }
}

#[test]
fn release_then_allocate_round_trips_with_class_escalation() {
  let config = HeapConfig::default().with_search_larger_classes(true);
  let mut heap = SegAllocator::with_config(MemLib::new(1 << 20), config).unwrap();
  for size in [1, 8, 24, 100, 1000, 5000] {
    let block = heap.allocate(size).unwrap();
    heap.release(block);
    let grows = heap.grow_calls();

    let again = heap.allocate(size).unwrap();

    assert_eq!(heap.grow_calls(), grows, "size {}", size);
    heap.release(again);
    assert_invariants(&heap);
  }
}

#[test]
fn sbrk_backed_heap_behaves_like_memlib() {
  let mut heap = SegAllocator::new(SbrkSource::new(1 << 16)).unwrap();

  let a = heap.allocate(40).unwrap();
  let b = heap.allocate(400).unwrap();
  heap.payload_mut(a)[..3].copy_from_slice(b"abc");
  heap.release(b);
  let a = heap.resize(a, 300).unwrap().unwrap();

  assert_eq!(&heap.payload(a)[..3], b"abc");
  assert_eq!(heap.as_ptr(a) as usize % 8, 0);
  assert!(heap.check());
}

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
  state: u64,
}

impl XorShift64 {
  fn new(seed: u64) -> Self {
    Self { state: seed }
  }

  fn next_u64(&mut self) -> u64 {
    let mut x = self.state;
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    self.state = x;
    x.wrapping_mul(0x2545_F491_4F6C_DD1D)
  }

  fn gen_range_usize(
    &mut self,
    low: usize,
    high_inclusive: usize,
  ) -> usize {
    let span = high_inclusive - low + 1;
    low + (self.next_u64() as usize % span)
  }
}

#[test]
fn deterministic_sequences_hold_heap_invariants() {
  const SEEDS: [u64; 4] = [1, 2, 3, 4];
  const STEPS: usize = 1_500;
  const SLOTS: usize = 24;

  for seed in SEEDS {
    let mut heap = fresh(1 << 22);
    let mut rng = XorShift64::new(seed);
    let mut live: [Option<(BlockRef, usize, u8)>; SLOTS] = [None; SLOTS];

    for step in 0..STEPS {
      let slot = rng.gen_range_usize(0, SLOTS - 1);
      let size = rng.gen_range_usize(1, 2_048);
      let fill = (step % 251) as u8;

      match (live[slot], rng.gen_range_usize(0, 2)) {
        (None, _) => {
          let block = heap.allocate(size).unwrap();
          heap.payload_mut(block)[..size].fill(fill);
          live[slot] = Some((block, size, fill));
        }
        (Some((block, _, _)), 0) => {
          heap.release(block);
          live[slot] = None;
        }
        (Some((block, old_size, old_fill)), _) => {
          let moved = heap.resize(block, size as isize).unwrap().unwrap();
          let kept = old_size.min(size);
          assert!(
            heap.payload(moved)[..kept].iter().all(|&byte| byte == old_fill),
            "seed {} step {}: payload lost on resize",
            seed,
            step
          );
          heap.payload_mut(moved)[..size].fill(fill);
          live[slot] = Some((moved, size, fill));
        }
      }

      if step % 50 == 0 {
        assert_invariants(&heap);
      }
    }

    for (block, size, fill) in live.iter().flatten() {
      assert!(heap.payload(*block)[..*size].iter().all(|byte| byte == fill));
      heap.release(*block);
    }
    assert_invariants(&heap);
    assert_eq!(heap.stats().allocated_blocks, 0);
  }
}

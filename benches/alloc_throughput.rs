use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use segalloc::{HeapConfig, MemLib, SegAllocator};
use std::hint::black_box;

const OPS: u64 = 10_000;

/// allocate/release pairs against a freshly reset heap.
///
/// Small requests whose released block coalesces into a larger class miss
/// their own list and grow the heap, so every run starts from `init`.
fn segalloc_allocate_release(
  heap: &mut SegAllocator,
  size: usize,
) {
  heap.init().unwrap();
  for _ in 0..OPS {
    let block = heap.allocate(size).unwrap();
    black_box(block);
    heap.release(block);
  }
}

/// Grows one block step by step, mostly in place.
fn segalloc_resize_chain(
  heap: &mut SegAllocator,
  step: usize,
) {
  heap.init().unwrap();
  let mut block = heap.allocate(step).unwrap();
  for i in 2..=64 {
    block = heap.resize(block, (step * i) as isize).unwrap().unwrap();
  }
  heap.release(block);
}

fn benchmark_allocate_release(c: &mut Criterion) {
  let mut group = c.benchmark_group("allocate_release");

  for size in [16, 64, 256, 1024, 4096] {
    group.throughput(Throughput::Elements(OPS));

    group.bench_with_input(BenchmarkId::new("class_only", size), &size, |b, &size| {
      let mut heap = SegAllocator::new(MemLib::new(1 << 24)).unwrap();
      b.iter(|| segalloc_allocate_release(&mut heap, size))
    });

    group.bench_with_input(BenchmarkId::new("escalating", size), &size, |b, &size| {
      let config = HeapConfig::default().with_search_larger_classes(true);
      let mut heap = SegAllocator::with_config(MemLib::new(1 << 24), config).unwrap();
      b.iter(|| segalloc_allocate_release(&mut heap, size))
    });
  }

  group.finish();
}

fn benchmark_resize(c: &mut Criterion) {
  let mut group = c.benchmark_group("resize_chain");

  for step in [8, 64, 512] {
    group.bench_with_input(BenchmarkId::new("segalloc", step), &step, |b, &step| {
      let mut heap = SegAllocator::new(MemLib::new(1 << 24)).unwrap();
      b.iter(|| segalloc_resize_chain(&mut heap, step))
    });
  }

  group.finish();
}

criterion_group!(benches, benchmark_allocate_release, benchmark_resize);
criterion_main!(benches);

use std::io::Read;

use libc::sbrk;
use segalloc::{BlockRef, HeapConfig, SbrkSource, SegAllocator};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect the process with tools like `pmap` or
/// `gdb` between steps, or just follow how the heap changes.
fn block_until_enter_pressed() {
  if std::env::var_os("SEGALLOC_DEMO_NO_PAUSE").is_some() {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

/// Prints every block between the prologue and the epilogue.
fn print_heap(heap: &SegAllocator<SbrkSource>) {
  println!("    offset      size  state");
  for info in heap.blocks() {
    println!(
      "    {:>6}  {:>8}  {}",
      info.block.offset(),
      info.size,
      if info.allocated { "allocated" } else { "free" }
    );
  }
  let stats = heap.stats();
  println!(
    "    heap = {} bytes, {} growth requests, free lists = {:?}",
    stats.heap_bytes, stats.grow_calls, stats.list_lengths
  );
}

fn print_alloc(
  heap: &mut SegAllocator<SbrkSource>,
  label: &str,
  block: BlockRef,
) {
  println!(
    "{}: offset = {}, usable = {} bytes, address = {:?}",
    label,
    block.offset(),
    heap.usable_size(block),
    heap.as_ptr(block)
  );
}

fn main() {
  // The heap lives behind the program break; the first growth reserves a
  // 64 KiB slab so the break only moves again once that is used up.
  let config = HeapConfig::default().with_check_on_release(true);
  let mut heap = match SegAllocator::with_config(SbrkSource::new(64 * 1024), config) {
    Ok(heap) => heap,
    Err(err) => {
      eprintln!("could not set up the heap: {}", err);
      return;
    }
  };

  unsafe { print_program_break("start") };
  print_heap(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Allocate 100 bytes. The initial 32-byte chunk is too small, so the
  //    heap grows and the new space merges with it before being split.
  // --------------------------------------------------------------------
  let first = heap.allocate(100).unwrap();
  println!("\n[1] Allocate 100 bytes");
  print_alloc(&mut heap, "[1]", first);
  heap.payload_mut(first)[..4].copy_from_slice(&0xDEADBEEF_u32.to_ne_bytes());
  print_heap(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Allocate 200 bytes right behind it.
  // --------------------------------------------------------------------
  let second = heap.allocate(200).unwrap();
  println!("\n[2] Allocate 200 bytes");
  print_alloc(&mut heap, "[2]", second);
  print_heap(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Release the first block. Both neighbors are allocated, so it goes
  //    onto its size-class list as it is.
  // --------------------------------------------------------------------
  heap.release(first);
  println!("\n[3] Released the first block");
  print_heap(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Allocate 50 bytes: served from the block released in step 3.
  // --------------------------------------------------------------------
  let grows = heap.grow_calls();
  let third = heap.allocate(50).unwrap();
  println!("\n[4] Allocate 50 bytes (check reuse of the released block)");
  print_alloc(&mut heap, "[4]", third);
  println!(
    "[4] third == first? {}, heap grew? {}",
    third == first,
    heap.grow_calls() != grows
  );
  print_heap(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Grow the second block. Its successor is free but too small, so the
  //    contents move to a new block.
  // --------------------------------------------------------------------
  let second = heap.resize(second, 1000).unwrap().unwrap();
  println!("\n[5] Resize the second block to 1000 bytes");
  print_alloc(&mut heap, "[5]", second);
  print_heap(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 6) Allocate a large block to move the program break.
  // --------------------------------------------------------------------
  unsafe { print_program_break("before large alloc") };
  println!("\n[6] Allocate a 128 KiB block");
  let big = match heap.allocate(128 * 1024) {
    Ok(big) => {
      print_alloc(&mut heap, "[6]", big);
      Some(big)
    }
    // The C runtime may have moved the break since our first reservation.
    Err(err) => {
      println!("[6] allocation failed: {}", err);
      None
    }
  };
  unsafe { print_program_break("after large alloc") };
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 7) Release everything and verify the heap.
  // --------------------------------------------------------------------
  heap.release(second);
  heap.release(third);
  heap.release(big);
  println!("\n[7] Released everything, heap check passed: {}", heap.check());
  print_heap(&heap);
}

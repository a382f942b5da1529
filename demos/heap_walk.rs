//! Walks through a few allocations and prints the heap after each step.
//!
//! ```text
//! cargo run --example heap_walk -- [first|next|best] [--sbrk]
//! RUST_LOG=trace cargo run --example heap_walk -- best
//! ```
//!
//! With `--sbrk` the heap lives in the real process data segment instead of a
//! simulated one. The system allocator may move the break as well, in which
//! case growing the heap fails and the walk stops.

use std::env;

use log::LevelFilter;
use tagalloc::{DataSegment, Heap, HeapConfig, Policy, SbrkSegment, SimulatedSegment};

fn print_heap<S: DataSegment>(
  label: &str,
  heap: &Heap<S>,
) {
  println!(
    "\n[{label}] heap [{:#x}, {:#x}), break = {:#x}",
    heap.heap_start(),
    heap.heap_end(),
    heap.segment().brk()
  );
  for block in heap.blocks() {
    println!(
      "    {:#x}: size {:6}, {}",
      block.address,
      block.size,
      if block.is_free() { "free" } else { "allocated" }
    );
  }

  let report = heap.check_consistency();
  println!(
    "    {} blocks, {} errors{}",
    report.blocks,
    report.error_count(),
    if report.is_coherent() { ", coherent" } else { "" }
  );
}

fn walk<S: DataSegment>(mut heap: Heap<S>) {
  print_heap("start", &heap);

  let a = heap.allocate(24);
  let b = heap.allocate(200);
  let c = heap.zero_allocate(10, 8);
  heap.payload_mut(a)[..5].copy_from_slice(b"hello");
  print_heap("three allocations", &heap);

  heap.deallocate(b);
  print_heap("release the middle one", &heap);

  heap.deallocate(b);
  print_heap("release it again", &heap);

  let a = match heap.reallocate(a, 120) {
    Ok(handle) => handle,
    Err(err) => {
      eprintln!("reallocate failed: {err}");
      return;
    }
  };
  println!(
    "\n    payload after reallocate: {:?}",
    String::from_utf8_lossy(&heap.payload(a)[..5])
  );
  print_heap("reallocate into the hole", &heap);

  match heap.try_allocate(3 * 4096) {
    Ok(big) => {
      print_heap("grow the heap", &heap);
      heap.deallocate(big);
    }
    Err(err) => eprintln!("growing the heap failed: {err}"),
  }

  heap.deallocate(a);
  heap.deallocate(c);
  print_heap("everything released", &heap);
}

fn main() {
  env_logger::Builder::from_default_env()
    .filter_level(LevelFilter::Warn)
    .parse_default_env()
    .init();

  let mut policy = Policy::FirstFit;
  let mut use_sbrk = false;
  for arg in env::args().skip(1) {
    if arg == "--sbrk" {
      use_sbrk = true;
      continue;
    }
    match arg.parse() {
      Ok(parsed) => policy = parsed,
      Err(err) => {
        eprintln!("{err}");
        std::process::exit(2);
      }
    }
  }

  println!("policy: {policy}");
  let config = HeapConfig::new(policy).with_log_level(LevelFilter::Trace);

  let result = if use_sbrk {
    Heap::with_config(SbrkSegment::new(), config).map(walk)
  } else {
    Heap::with_config(SimulatedSegment::new(1 << 20), config).map(walk)
  };

  if let Err(err) = result {
    eprintln!("cannot set up the heap: {err}");
    std::process::exit(1);
  }
}

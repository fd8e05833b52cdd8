/// Microbenchmarks for lowalloc.
///
/// Plain `Instant` timing loops, one line per measurement, plus a
/// machine-parseable SUMMARY line at the end for comparison scripts.

use lowalloc::arena::{self, Arena};
use lowalloc::{delete_arena, new_arena, size_class, ArenaFlags, MetadataAllocator, OS_PAGES};
use std::hint::black_box;
use std::time::Instant;

/// Measure classify latency over a sweep of sizes.
fn bench_classify(iterations: usize) -> f64 {
    let map = size_class::size_map();
    let max = map.max_size();
    let start = Instant::now();
    let mut acc = 0usize;
    for i in 0..iterations {
        let size = (i * 7919) % max + 1;
        acc = acc.wrapping_add(map.classify(black_box(size)).size);
    }
    black_box(acc);
    let elapsed = start.elapsed();
    elapsed.as_nanos() as f64 / iterations as f64
}

/// Measure alloc/free latency for a given size on one arena.
fn bench_alloc_free(a: &Arena, size: usize, iterations: usize) -> f64 {
    // Warmup
    for _ in 0..1000 {
        let ptr = a.alloc(black_box(size));
        unsafe {
            std::ptr::write_bytes(ptr, 0xAB, std::cmp::min(size, 64));
            arena::free(black_box(ptr));
        }
    }
    let start = Instant::now();
    for _ in 0..iterations {
        let ptr = a.alloc(black_box(size));
        unsafe {
            std::ptr::write_bytes(ptr, 0xAB, std::cmp::min(size, 64));
            arena::free(black_box(ptr));
        }
    }
    let elapsed = start.elapsed();
    elapsed.as_nanos() as f64 / iterations as f64
}

/// Measure metadata bump allocation latency.
fn bench_metadata(iterations: usize) -> f64 {
    let meta = MetadataAllocator::new(&OS_PAGES, 8 << 20);
    let start = Instant::now();
    for i in 0..iterations {
        black_box(meta.alloc(black_box(16 + i % 200)));
    }
    let elapsed = start.elapsed();
    elapsed.as_nanos() as f64 / iterations as f64
}

/// Measure multi-threaded throughput on one shared arena.
fn bench_threaded_throughput(a: &'static Arena, num_threads: usize, ops_per_thread: usize, size: usize) -> f64 {
    let start = Instant::now();
    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            std::thread::spawn(move || {
                for _ in 0..ops_per_thread {
                    let ptr = a.alloc(black_box(size));
                    unsafe {
                        std::ptr::write_bytes(ptr, 0xCD, std::cmp::min(size, 16));
                        arena::free(black_box(ptr));
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    let elapsed = start.elapsed();
    let total_ops = num_threads * ops_per_thread;
    total_ops as f64 / elapsed.as_secs_f64() // ops/sec
}

fn main() {
    let iterations = 1_000_000;

    println!("=== lowalloc microbenchmarks ===\n");

    println!("--- classify latency (ns/op) ---");
    let classify_ns = bench_classify(iterations * 10);
    println!("  sweep: {:>8.2} ns", classify_ns);

    let mut latencies: Vec<(&str, usize, f64)> = Vec::new();
    for (label, flags) in [
        ("plain", ArenaFlags::empty()),
        ("signal_safe", ArenaFlags::ASYNC_SIGNAL_SAFE),
    ] {
        println!("\n--- {} arena alloc/free latency (ns/op) ---", label);
        let handle = new_arena(flags);
        let a = unsafe { handle.as_ref() };
        for &size in &[16, 64, 256, 1024, 4096, 65536] {
            let ns = bench_alloc_free(a, size, iterations / 4);
            println!("  size={:>8}: {:>8.1} ns", size, ns);
            latencies.push((label, size, ns));
        }
        unsafe { delete_arena(handle).expect("benchmark arena leaked blocks") };
    }

    println!("\n--- metadata alloc latency (ns/op) ---");
    let meta_ns = bench_metadata(iterations);
    println!("  16..216 bytes: {:.1} ns", meta_ns);

    println!("\n--- shared arena throughput (Mops/sec) ---");
    let handle = new_arena(ArenaFlags::empty());
    let shared: &'static Arena = unsafe { &*handle.as_ptr() };
    let mut key_throughput_4t = 0.0f64;
    for &threads in &[1, 2, 4, 8] {
        let ops_sec = bench_threaded_throughput(shared, threads, iterations / threads / 4, 64);
        let mops = ops_sec / 1_000_000.0;
        println!("  threads={}: {:>6.2} Mops/sec", threads, mops);
        if threads == 4 {
            key_throughput_4t = mops;
        }
    }
    let stats = shared.stats();
    println!("  arena: {:?}", stats);
    unsafe { delete_arena(handle).expect("benchmark arena leaked blocks") };

    // Print machine-parseable summary line
    print!("\nSUMMARY|classify={:.2}|metadata={:.1}", classify_ns, meta_ns);
    for &(label, size, ns) in &latencies {
        print!("|{}_{}={:.1}", label, size, ns);
    }
    println!("|throughput_4t={:.2}", key_throughput_4t);

    println!("\nDone.");
}

/// Arena churn benchmark: multi-threaded producer/consumer pattern on one
/// shared arena. Each thread keeps a window of live blocks, replaces random
/// ones, and hands a batch to its neighbor every round so frees cross
/// threads and fragment the free-list.
///
/// Usage: arena_churn [threads] [seconds] [signal-safe: 0|1]

use lowalloc::arena::{self, Arena};
use lowalloc::{delete_arena, new_arena, ArenaFlags};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const DEFAULT_DURATION_SECS: u64 = 5;
const WINDOW: usize = 1000;
const HANDOFF: usize = 100;
const MIN_SIZE: usize = 8;
const MAX_SIZE: usize = 2048;

#[derive(Clone, Copy)]
struct SendPtr(*mut u8);
unsafe impl Send for SendPtr {}

type Mailbox = Mutex<Vec<SendPtr>>;

fn main() {
    let num_threads: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(4);
    let duration_secs: u64 = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_DURATION_SECS);
    let signal_safe = std::env::args().nth(3).as_deref() == Some("1");

    let flags = if signal_safe {
        ArenaFlags::ASYNC_SIGNAL_SAFE
    } else {
        ArenaFlags::empty()
    };
    println!(
        "Arena churn: {} threads, {} seconds, flags {:?}",
        num_threads, duration_secs, flags
    );

    let handle = new_arena(flags);
    let a: &'static Arena = unsafe { &*handle.as_ptr() };
    let mailboxes: Arc<Vec<Mailbox>> = Arc::new((0..num_threads).map(|_| Mutex::new(Vec::new())).collect());
    let running = Arc::new(AtomicBool::new(true));
    let total_ops = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..num_threads)
        .map(|tid| {
            let running = Arc::clone(&running);
            let total_ops = Arc::clone(&total_ops);
            let mailboxes = Arc::clone(&mailboxes);
            std::thread::spawn(move || {
                churn_worker(a, tid, &mailboxes, &running, &total_ops);
            })
        })
        .collect();

    let start = Instant::now();
    std::thread::sleep(Duration::from_secs(duration_secs));
    running.store(false, Ordering::Release);

    for h in handles {
        h.join().unwrap();
    }
    let elapsed = start.elapsed().as_secs_f64();

    // Whatever is still in flight.
    for mailbox in mailboxes.iter() {
        for p in mailbox.lock().unwrap().drain(..) {
            unsafe { arena::free(p.0) };
        }
    }

    let stats = a.stats();
    let ops = total_ops.load(Ordering::Relaxed);
    let mops = ops as f64 / elapsed / 1_000_000.0;

    println!("Total operations: {}", ops);
    println!("Throughput: {:.2} Mops/sec", mops);
    println!("Per-thread: {:.2} Mops/sec", mops / num_threads as f64);
    println!(
        "Arena: mapped {} bytes, {} free intervals at exit",
        stats.mapped_bytes, stats.free_intervals
    );
    unsafe { delete_arena(handle).expect("blocks leaked during churn") };
}

fn churn_worker(
    a: &Arena,
    tid: usize,
    mailboxes: &[Mailbox],
    running: &AtomicBool,
    total_ops: &AtomicUsize,
) {
    let mut seed = (tid as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut next = move || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        seed as usize
    };

    let mut live: Vec<*mut u8> = (0..WINDOW)
        .map(|_| a.alloc(MIN_SIZE + next() % (MAX_SIZE - MIN_SIZE)))
        .collect();
    let neighbor = (tid + 1) % mailboxes.len();
    let mut ops = 0usize;

    while running.load(Ordering::Acquire) {
        for _ in 0..WINDOW {
            let idx = next() % WINDOW;
            unsafe { arena::free(live[idx]) };
            live[idx] = a.alloc(MIN_SIZE + next() % (MAX_SIZE - MIN_SIZE));
            ops += 2;
        }

        let batch: Vec<SendPtr> = live[..HANDOFF].iter().map(|&p| SendPtr(p)).collect();
        mailboxes[neighbor].lock().unwrap().extend(batch);
        for slot in &mut live[..HANDOFF] {
            *slot = a.alloc(MIN_SIZE + next() % (MAX_SIZE - MIN_SIZE));
        }

        let inbox: Vec<SendPtr> = mailboxes[tid].lock().unwrap().drain(..).collect();
        for p in inbox {
            unsafe { arena::free(p.0) };
        }
        ops += 2 * HANDOFF;
    }

    for p in live {
        unsafe { arena::free(p) };
    }
    total_ops.fetch_add(ops, Ordering::Relaxed);
}

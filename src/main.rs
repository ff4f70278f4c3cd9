/// usage: ./idlescan [interval] [sampling]
///
/// Continuously scans physical memory through the kernel's idle page
/// tracking facility and prints, after every full cycle, how much of each
/// memory cgroup's anon and file memory sat idle for the whole cycle.
/// Iterations are spread out so one cycle takes about `interval` seconds
/// (default 300); `sampling` scans only that fraction of memory
/// (default 1.0).
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{env, process, thread};

use idlescan::util::{size_to_str, PAGE_SIZE};
use idlescan::{IdleMemScanner, MemType, ScanConfig};

fn pages_to_str(pages: u64) -> String {
    size_to_str(pages as usize * *PAGE_SIZE)
}

fn report(scanner: &IdleMemScanner) {
    let result = match scanner.result() {
        Ok(result) => result,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let mut paths = result.keys().collect::<Vec<_>>();
    paths.sort();

    for path in paths {
        let stat = &result[path];
        let idle_anon = stat.nr_idle_by_age(MemType::Anon)[0];
        let idle_file = stat.nr_idle_by_age(MemType::File)[0];
        println!(
            "{}: anon {} ({} idle), file {} ({} idle)",
            path,
            pages_to_str(stat.nr_total(MemType::Anon)),
            pages_to_str(idle_anon),
            pages_to_str(stat.nr_total(MemType::File)),
            pages_to_str(idle_file),
        );
    }
    println!();
}

/* Spread the remaining iterations over what is left of the interval, so
 * that a full scan takes about one interval instead of one CPU burst. */
fn throttle(interval: Duration, cycle_start: Instant, scan_time: Duration, done: usize, left: usize) {
    let time_left = interval.saturating_sub(cycle_start.elapsed());
    let time_required = scan_time.mul_f64(left as f64 / done as f64);

    if time_required > time_left {
        eprintln!(
            "warning: scan lagging behind interval ({:?} left, {:?} required)",
            time_left, time_required
        );
        return;
    }
    thread::sleep((time_left - time_required) / left as u32);
}

fn main() {
    let interval = Duration::from_secs(
        env::args().nth(1).map_or(300, |v| v.parse().unwrap()),
    );
    let sampling: f64 = env::args().nth(2).map_or(1.0, |v| v.parse().unwrap());

    if !idlescan::available() {
        eprintln!("idle page tracking not supported by this kernel");
        process::exit(1);
    }

    let running = Arc::new(AtomicBool::new(true));
    let binding = running.clone();
    ctrlc::set_handler(move || binding.store(false, Ordering::SeqCst)).unwrap();

    let mut scanner = match IdleMemScanner::new(&ScanConfig::default()) {
        Ok(scanner) => scanner,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    scanner.set_sampling(sampling).unwrap();

    while running.load(Ordering::SeqCst) {
        let cycle_start = Instant::now();
        let mut scan_time = Duration::ZERO;

        loop {
            let iter_start = Instant::now();
            let (done, left) = match scanner.iter() {
                Ok(progress) => progress,
                Err(e) => {
                    eprintln!("{}", e);
                    process::exit(1);
                }
            };
            scan_time += iter_start.elapsed();

            if left == 0 {
                break;
            }
            if !running.load(Ordering::SeqCst) {
                return;
            }
            throttle(interval, cycle_start, scan_time, done, left);
        }

        report(&scanner);

        while running.load(Ordering::SeqCst) && cycle_start.elapsed() < interval {
            thread::sleep(Duration::from_millis(100));
        }
    }
}

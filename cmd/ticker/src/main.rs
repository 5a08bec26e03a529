//! Periodic timer probe
//!
//! Runs ITERATIONS firings of one periodic Event, first with the coarse
//! (millisecond epoll timeout) timer, then with the precise timerfd, and
//! prints how far each run drifted from `ITERATIONS * PERIOD`.
//!
//! Usage:
//!     ./target/release/ioloop-ticker [ITERATIONS] [PERIOD_US]
//!
//! Defaults: 1000 iterations of 250us.

use ioloop::{init_logging, kerror, EventAction, EventReactor, ReactorConfig, Result};

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

struct Run {
    elapsed: Duration,
    max_gap: Duration,
}

fn run(precise: bool, iterations: u64, period: Duration) -> Result<Run> {
    let mut reactor = EventReactor::with_config(ReactorConfig::new().precise_timer(precise));

    let fired = Rc::new(Cell::new(0u64));
    let max_gap = Rc::new(Cell::new(Duration::ZERO));
    let last = Rc::new(Cell::new(Instant::now()));

    let (count, gap, prev) = (Rc::clone(&fired), Rc::clone(&max_gap), Rc::clone(&last));
    reactor.add_periodic_event(period, move |_| {
        let now = Instant::now();
        gap.set(gap.get().max(now - prev.get()));
        prev.set(now);
        count.set(count.get() + 1);
        if count.get() >= iterations {
            EventAction::ExitLoop
        } else {
            EventAction::Continue
        }
    })?;

    let start = Instant::now();
    last.set(start);
    reactor.run_loop()?;
    Ok(Run {
        elapsed: start.elapsed(),
        max_gap: max_gap.get(),
    })
}

fn report(label: &str, iterations: u64, period: Duration, run: &Run) {
    let ideal = period.mul_f64(iterations as f64);
    let drift = run.elapsed.as_secs_f64() - ideal.as_secs_f64();
    println!(
        "{:>8}: {} x {:?} in {:?} (ideal {:?}, drift {:+.3}ms, max gap {:?})",
        label,
        iterations,
        period,
        run.elapsed,
        ideal,
        drift * 1e3,
        run.max_gap
    );
}

fn main() {
    init_logging();

    let args: Vec<String> = std::env::args().collect();
    let iterations: u64 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(1000).max(1);
    let period_us: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(250).max(1);
    let period = Duration::from_micros(period_us);

    for (label, precise) in [("coarse", false), ("precise", true)] {
        match run(precise, iterations, period) {
            Ok(r) => report(label, iterations, period, &r),
            Err(e) => {
                kerror!("ioloop-ticker: {} run failed: {}", label, e);
                std::process::exit(1);
            }
        }
    }
}

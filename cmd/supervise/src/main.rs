//! Workload supervisor
//!
//! Starts a child process and runs an `EventReactor` until one of:
//! - the child exits (SIGCHLD)
//! - SIGINT / SIGTERM, or SIGHUP unless it was inherited as ignored (nohup)
//! - `--duration SECS` elapses
//! - stdin reaches EOF, with `--stdio-controls`
//!
//! With `--stdio-controls`, stdin takes one command per line: `pause`
//! stops the heartbeat Event, `resume` restarts it. Each command is
//! answered on stdout with `ok` or `error`.
//!
//! Usage:
//!     ./target/release/ioloop-supervise [--duration SECS] [--stdio-controls] [-- CMD ARGS...]
//!
//! Without CMD only the other stop conditions apply, so `--duration` or
//! `--stdio-controls` is required.

mod controls;
mod workload;

use controls::add_control_event;
use workload::ChildWorkload;

use ioloop::{
    init_logging, kdebug, kerror, kinfo, kwarn, signal_is_ignored, EventAction, EventReactor,
    EventRef, Result, Workload,
};

use nix::sys::signal::Signal;
use std::io::Write;
use std::time::{Duration, Instant};

const HEARTBEAT: Duration = Duration::from_secs(1);

struct Options {
    duration: Option<Duration>,
    stdio_controls: bool,
    command: Vec<String>,
}

fn usage() -> ! {
    eprintln!("usage: ioloop-supervise [--duration SECS] [--stdio-controls] [-- CMD ARGS...]");
    std::process::exit(2);
}

fn parse_args() -> Options {
    let mut opts = Options {
        duration: None,
        stdio_controls: false,
        command: Vec::new(),
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--duration" => {
                let secs: f64 = match args.next().and_then(|s| s.parse::<f64>().ok()) {
                    Some(secs) if secs > 0.0 && secs.is_finite() => secs,
                    _ => usage(),
                };
                opts.duration = Some(Duration::from_secs_f64(secs));
            }
            "--stdio-controls" => opts.stdio_controls = true,
            "--" => {
                opts.command = args.by_ref().collect();
                break;
            }
            _ => usage(),
        }
    }
    if opts.command.is_empty() && opts.duration.is_none() && !opts.stdio_controls {
        usage();
    }
    opts
}

fn reply(ok: bool) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{}", if ok { "ok" } else { "error" });
    let _ = out.flush();
}

fn supervise(opts: Options) -> Result<i32> {
    let mut reactor = EventReactor::new();

    // Signals first: a child that exits right away must not be missed.
    reactor.add_signal_events(
        &[libc::SIGCHLD, libc::SIGINT, libc::SIGTERM],
        |_| EventAction::ExitLoop,
    )?;
    if !signal_is_ignored(libc::SIGHUP) {
        reactor.add_signal_event(libc::SIGHUP, |_| EventAction::ExitLoop)?;
    }

    if let Some(duration) = opts.duration {
        reactor.add_periodic_event(duration, |_| {
            kinfo!("duration elapsed");
            EventAction::ExitLoop
        })?;
    }

    let mut workload = match opts.command.split_first() {
        Some((program, args)) => {
            let mut w = ChildWorkload::new(program.as_str(), args.to_vec());
            w.start()?;
            Some(w)
        }
        None => None,
    };
    let pid = workload.as_ref().and_then(|w| w.pid());

    let started = Instant::now();
    let heartbeat = reactor.add_periodic_event(HEARTBEAT, move |_| {
        match pid {
            Some(pid) => kinfo!("pid {} running for {:.0?}", pid, started.elapsed()),
            None => kinfo!("monitoring for {:.0?}", started.elapsed()),
        }
        EventAction::Continue
    })?;

    if opts.stdio_controls {
        add_control_event(&mut reactor, libc::STDIN_FILENO, heartbeat, reply)?;
    }

    let loop_result = reactor.run_loop();
    drop(reactor);

    let Some(workload) = workload.as_mut() else {
        return loop_result.map(|()| 0);
    };
    if !workload.has_exited() {
        kinfo!("stopping pid {}", pid.unwrap_or(-1));
        if let Err(e) = workload.signal(Signal::SIGTERM) {
            kwarn!("signalling workload failed: {}", e);
        }
    }
    let code = workload.wait_child_process()?;
    kinfo!("workload exited with code {}", code);
    loop_result.map(|()| code)
}

fn main() {
    init_logging();

    match supervise(parse_args()) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            kerror!("ioloop-supervise: {}", e);
            std::process::exit(1);
        }
    }
}

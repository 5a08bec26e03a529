//! Echo over an abstract-namespace Unix socket.
//!
//! The server answers every message with `type + 1` and the same payload,
//! and closes its side after answering type 10. The client sends types
//! 1..=10 and expects exactly 2..=11 back before the close.
//!
//! Usage:
//!     cargo build --release -p ioloop-echo
//!     ./target/release/ioloop-echo server NAME
//!     ./target/release/ioloop-echo client NAME
//!     ./target/release/ioloop-echo both
//!
//! `both` runs the server on the main thread and the client on a second
//! thread with its own reactor, then stops the server through its handle.
//!
//! Logging: IOLOOP_LOG_LEVEL=debug shows Event registration and socket
//! lifecycle.

use ioloop::{
    init_logging, kerror, kinfo, EventAction, EventReactor, Message, ReactorHandle, Result,
    UnixSocketConnection, UnixSocketListener,
};

use std::cell::Cell;
use std::rc::Rc;

const ROUNDS: u32 = 10;

fn usage() -> ! {
    eprintln!("usage: ioloop-echo server NAME | client NAME | both");
    std::process::exit(2);
}

fn main() {
    init_logging();

    let args: Vec<String> = std::env::args().collect();
    let result = match (args.get(1).map(String::as_str), args.get(2)) {
        (Some("server"), Some(name)) => run_server(name, None),
        (Some("client"), Some(name)) => run_client(name),
        (Some("both"), _) => run_both(),
        _ => usage(),
    };

    if let Err(e) = result {
        kerror!("ioloop-echo: {}", e);
        std::process::exit(1);
    }
}

/// Serve until SIGINT/SIGTERM, or until `ready` has handed out the handle
/// and someone calls `exit_loop()` on it.
fn run_server(name: &str, ready: Option<std::sync::mpsc::Sender<ReactorHandle>>) -> Result<()> {
    let listener = UnixSocketListener::create(name, true)?;
    let mut reactor = EventReactor::new();

    let served = Rc::new(Cell::new(0u64));
    let counter = Rc::clone(&served);
    reactor.add_read_event(listener.fd(), move |reactor| loop {
        let conn = match listener.accept_connection() {
            Ok(conn) => conn,
            Err(e) if e.is_would_block() => return EventAction::Continue,
            Err(e) => {
                kerror!("accept failed: {}", e);
                return EventAction::Fatal;
            }
        };
        let reply = conn.clone();
        let counter = Rc::clone(&counter);
        let prepared = conn.prepare_for_io(
            reactor,
            move |_, msg| {
                counter.set(counter.get() + 1);
                let out = Message::new(msg.msg_type.wrapping_add(1), msg.payload);
                if reply.send_message(&out, true).is_err() {
                    return EventAction::Fatal;
                }
                if msg.msg_type == ROUNDS {
                    reply.no_more_message();
                }
                EventAction::Continue
            },
            |_| {
                kinfo!("client disconnected");
                EventAction::Continue
            },
        );
        if let Err(e) = prepared {
            kerror!("attaching client failed: {}", e);
        }
    })?;
    reactor.add_signal_events(&[libc::SIGINT, libc::SIGTERM], |_| EventAction::ExitLoop)?;

    if let Some(ready) = ready {
        // The receiver only goes away if the client thread died.
        let _ = ready.send(reactor.handle()?);
    }
    println!("ioloop-echo: serving @{}", name);
    reactor.run_loop()?;
    println!("ioloop-echo: served {} messages", served.get());
    Ok(())
}

fn run_client(name: &str) -> Result<()> {
    let conn = UnixSocketConnection::connect(name, true)?;
    let mut reactor = EventReactor::new();

    // Queue every request up front; the last one kicks the flush.
    for t in 1..=ROUNDS {
        let msg = Message::new(t, format!("ping {}", t));
        conn.send_message(&msg, t == ROUNDS)?;
    }

    let expected = Rc::new(Cell::new(2u32));
    let next = Rc::clone(&expected);
    conn.prepare_for_io(
        &mut reactor,
        move |_, msg| {
            if msg.msg_type != next.get() {
                kerror!("expected type {}, got {}", next.get(), msg.msg_type);
                return EventAction::Fatal;
            }
            println!(
                "ioloop-echo: reply {} {:?}",
                msg.msg_type,
                String::from_utf8_lossy(msg.payload)
            );
            next.set(next.get() + 1);
            EventAction::Continue
        },
        |_| EventAction::ExitLoop,
    )?;

    reactor.run_loop()?;
    if expected.get() != ROUNDS + 2 {
        kerror!("connection closed after {} replies", expected.get() - 2);
        return Err(ioloop::LoopError::ConnectionClosed);
    }
    println!("ioloop-echo: handshake complete");
    Ok(())
}

fn run_both() -> Result<()> {
    let name = format!("ioloop-echo-{}", std::process::id());
    let (tx, rx) = std::sync::mpsc::channel::<ReactorHandle>();

    let client_name = name.clone();
    let client = std::thread::spawn(move || -> Result<()> {
        // Wait until the server is listening.
        let Ok(server) = rx.recv() else {
            return Ok(());
        };
        let result = run_client(&client_name);
        server.exit_loop();
        result
    });

    let served = run_server(&name, Some(tx));
    let client = client.join().unwrap_or(Err(ioloop::LoopError::CallbackFailed));
    served.and(client)
}

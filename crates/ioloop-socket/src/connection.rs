//! `UnixSocketConnection`: message-framed, reactor-driven stream socket.
//!
//! # Threads
//!
//! ```text
//!  any thread                        reactor thread
//!  ──────────                        ──────────────
//!  send_message() ─┐                 read-Event  ─► recv ─► decode ─► on_message
//!  no_more_message()┴► Mutex<SendState>
//!                        │ ring       write-Event ─► peek ─► send ─► commit
//!                        └ enable ──► ReactorHandle (queued, eventfd wakeup)
//! ```
//!
//! Only the reactor thread touches the socket. Senders store whole messages
//! in the ring under the mutex and, when the write-Event is idle, ask the
//! reactor to enable it. The same mutex guards `write_enabled`, so an
//! enable request is never lost against the reactor disabling the Event
//! after draining.
//!
//! # Lifecycle
//!
//! Connected → Closing → Closed. Closing starts on peer EOF, on a drained
//! ring after `no_more_message()`, or on a fatal I/O error. Closing deletes
//! both Events, closes the fd exactly once, then runs the close handler.

use crate::config::SocketConfig;
use crate::listener::{unix_addr, unix_stream_socket};

use ioloop_core::error::{LoopError, Result};
use ioloop_core::message::{try_parse_header, Message, MessageRef, HEADER_SIZE};
use ioloop_core::ring::MessageRingBuffer;
use ioloop_core::{kdebug, kerror, ktrace};
use ioloop_reactor::{EventAction, EventReactor, EventRef, ReactorHandle};

use nix::errno::Errno;
use std::cell::RefCell;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Called on the reactor thread for every complete message.
pub type MessageHandler = Box<dyn FnMut(&mut EventReactor, &MessageRef<'_>) -> EventAction>;

/// Called on the reactor thread once the connection has closed.
pub type CloseHandler = Box<dyn FnMut(&mut EventReactor) -> EventAction>;

struct SendState {
    ring: MessageRingBuffer,
    write_enabled: bool,
    no_more_message: bool,
}

/// Reactor binding, fixed by `prepare_for_io()`.
struct IoBinding {
    handle: ReactorHandle,
    write_event: EventRef,
}

struct ConnShared {
    fd: RawFd,
    closed: AtomicBool,
    send: Mutex<SendState>,
    io: OnceLock<IoBinding>,
    read_buffer_size: usize,
}

impl ConnShared {
    fn send_state(&self) -> MutexGuard<'_, SendState> {
        self.send.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the fd the first time only.
    fn close_fd(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        unsafe { libc::close(self.fd) };
        true
    }
}

impl Drop for ConnShared {
    fn drop(&mut self) {
        if self.close_fd() {
            kdebug!("fd {} closed on drop", self.fd);
        }
    }
}

/// Reactor-thread state shared by the read and write callbacks.
struct ConnIo {
    buf: Vec<u8>,
    /// Bytes of `buf` holding received, unconsumed data.
    len: usize,
    on_message: MessageHandler,
    on_close: Option<CloseHandler>,
    read_event: Option<EventRef>,
    write_event: Option<EventRef>,
    /// Copy of the ring run being sent, so `send(2)` runs unlocked.
    staging: Vec<u8>,
}

/// Upper bound on one `send(2)` from the staging copy.
const SEND_CHUNK: usize = 64 * 1024;

/// Cloneable handle to one connection. Clones share the socket, the send
/// ring and the close state.
#[derive(Clone)]
pub struct UnixSocketConnection {
    shared: Arc<ConnShared>,
}

impl UnixSocketConnection {
    pub(crate) fn from_fd(fd: OwnedFd, config: &SocketConfig) -> Self {
        Self {
            shared: Arc::new(ConnShared {
                fd: fd.into_raw_fd(),
                closed: AtomicBool::new(false),
                send: Mutex::new(SendState {
                    ring: MessageRingBuffer::new(config.send_buffer_size),
                    write_enabled: false,
                    no_more_message: false,
                }),
                io: OnceLock::new(),
                read_buffer_size: config.read_buffer_size,
            }),
        }
    }

    /// Connect to a listener, using the environment's `SocketConfig`.
    pub fn connect(path: &str, is_abstract: bool) -> Result<Self> {
        Self::connect_with_config(path, is_abstract, &SocketConfig::from_env())
    }

    pub fn connect_with_config(path: &str, is_abstract: bool, config: &SocketConfig) -> Result<Self> {
        let (addr, len) = unix_addr(path, is_abstract)?;
        let fd = unix_stream_socket()?;
        loop {
            let ret = unsafe {
                libc::connect(
                    fd.as_raw_fd(),
                    &addr as *const libc::sockaddr_un as *const libc::sockaddr,
                    len,
                )
            };
            if ret == 0 {
                break;
            }
            match Errno::last() {
                Errno::EINTR => continue,
                errno => {
                    kdebug!("connect({}) failed: {}", path, errno);
                    return Err(LoopError::Os(errno));
                }
            }
        }
        kdebug!("connected to {} (fd {})", path, fd.as_raw_fd());
        Ok(Self::from_fd(fd, config))
    }

    /// Connected pair of endpoints, for in-process links.
    pub fn pair(config: &SocketConfig) -> Result<(Self, Self)> {
        let mut fds = [-1; 2];
        let ret = unsafe {
            libc::socketpair(
                libc::AF_UNIX,
                libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
                0,
                fds.as_mut_ptr(),
            )
        };
        if ret != 0 {
            return Err(LoopError::last_os_error());
        }
        // SAFETY: both descriptors were just created by socketpair().
        let (a, b) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok((Self::from_fd(a, config), Self::from_fd(b, config)))
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.shared.fd
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Bytes queued and not yet sent.
    pub fn pending_bytes(&self) -> usize {
        self.shared.send_state().ring.len()
    }

    /// Attach to `reactor`: a read-Event decoding messages into
    /// `on_message`, and a write-Event (initially disabled) draining the
    /// send ring. `on_close` runs once after the fd is closed.
    ///
    /// `on_message` and `on_close` are boxed into a [`MessageHandler`] and
    /// a [`CloseHandler`]; they live until the connection closes.
    ///
    /// Messages queued before this call are flushed once the loop runs.
    pub fn prepare_for_io<M, C>(&self, reactor: &mut EventReactor, on_message: M, on_close: C) -> Result<()>
    where
        M: FnMut(&mut EventReactor, &MessageRef<'_>) -> EventAction + 'static,
        C: FnMut(&mut EventReactor) -> EventAction + 'static,
    {
        if self.shared.io.get().is_some() {
            return Err(LoopError::AlreadyPrepared);
        }
        if self.is_closed() {
            return Err(LoopError::ConnectionClosed);
        }
        let handle = reactor.handle()?;

        let io = Rc::new(RefCell::new(ConnIo {
            buf: vec![0u8; self.shared.read_buffer_size],
            len: 0,
            on_message: Box::new(on_message),
            on_close: Some(Box::new(on_close)),
            read_event: None,
            write_event: None,
            staging: Vec::new(),
        }));

        let fd = self.fd();
        let read_event = reactor.add_read_event(fd, {
            let shared = Arc::clone(&self.shared);
            let io = Rc::clone(&io);
            move |reactor| read_data(&shared, &io, reactor)
        })?;
        let write_event = match reactor.add_write_event(fd, {
            let shared = Arc::clone(&self.shared);
            let io = Rc::clone(&io);
            move |reactor| write_data(&shared, &io, reactor)
        }) {
            Ok(ev) => ev,
            Err(e) => {
                let _ = reactor.del_event(read_event);
                return Err(e);
            }
        };
        let detach = |reactor: &mut EventReactor| {
            let _ = reactor.del_event(read_event);
            let _ = reactor.del_event(write_event);
        };
        if let Err(e) = reactor.disable_event(write_event) {
            detach(reactor);
            return Err(e);
        }
        {
            let mut io = io.borrow_mut();
            io.read_event = Some(read_event);
            io.write_event = Some(write_event);
        }
        if self.shared.io.set(IoBinding { handle, write_event }).is_err() {
            detach(reactor);
            return Err(LoopError::AlreadyPrepared);
        }

        // Senders that ran before the binding existed could not enable.
        let mut state = self.shared.send_state();
        if !state.ring.is_empty() || state.no_more_message {
            state.write_enabled = true;
            reactor.enable_event(write_event)?;
        }
        kdebug!("fd {} attached (read {}, write {})", fd, read_event, write_event);
        Ok(())
    }

    /// Queue `msg` for sending. Safe from any thread.
    ///
    /// With `undelayed`, or once the ring is half full, the write-Event is
    /// enabled right away. Otherwise the message rides along with the next
    /// flush. Fails with `ConnectionClosed` after `no_more_message()` and
    /// with `BufferFull` when the ring has no room; nothing is queued then.
    pub fn send_message(&self, msg: &Message, undelayed: bool) -> Result<()> {
        let mut state = self.shared.send_state();
        if state.no_more_message {
            return Err(LoopError::ConnectionClosed);
        }
        state.ring.store_message(msg)?;
        if !state.write_enabled && (undelayed || state.ring.is_half_full()) {
            self.request_flush(&mut state);
        }
        Ok(())
    }

    /// Stop accepting sends. The connection closes once everything already
    /// queued has been sent. Safe from any thread; idempotent.
    pub fn no_more_message(&self) {
        let mut state = self.shared.send_state();
        if state.no_more_message {
            return;
        }
        state.no_more_message = true;
        if !state.write_enabled {
            self.request_flush(&mut state);
        }
    }

    /// Enable the write-Event through the reactor handle. Before
    /// `prepare_for_io()` there is nothing to enable; it checks the ring
    /// itself.
    fn request_flush(&self, state: &mut SendState) {
        if let Some(io) = self.shared.io.get() {
            state.write_enabled = true;
            io.handle.enable_event(io.write_event);
        }
    }
}

impl std::fmt::Debug for UnixSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixSocketConnection")
            .field("fd", &self.shared.fd)
            .field("closed", &self.is_closed())
            .field("prepared", &self.shared.io.get().is_some())
            .finish()
    }
}

// ============================================================================
// Reactor-thread I/O
// ============================================================================

fn read_data(shared: &ConnShared, io_cell: &RefCell<ConnIo>, reactor: &mut EventReactor) -> EventAction {
    let mut io = io_cell.borrow_mut();
    if io.len == io.buf.len() {
        let grown = io.buf.len() * 2;
        io.buf.resize(grown, 0);
    }

    let len = io.len;
    let spare = &mut io.buf[len..];
    let n = unsafe {
        libc::recv(
            shared.fd,
            spare.as_mut_ptr() as *mut libc::c_void,
            spare.len(),
            libc::MSG_DONTWAIT,
        )
    };
    if n > 0 {
        io.len += n as usize;
        ktrace!("fd {} read {} bytes", shared.fd, n);
        let action = consume_read_buffer(&mut io, reactor);
        drop(io);
        // Replies queued without `undelayed` ride on incoming traffic.
        flush_if_pending(shared);
        return action;
    }
    if n == 0 {
        drop(io);
        kdebug!("fd {} closed by peer", shared.fd);
        return close(shared, io_cell, reactor);
    }
    match Errno::last() {
        Errno::EAGAIN | Errno::EINTR => EventAction::Continue,
        errno => {
            kerror!("recv on fd {} failed: {}", shared.fd, errno);
            EventAction::Fatal
        }
    }
}

/// Dispatch every complete message in the decode buffer, then move the
/// partial tail to the front.
fn consume_read_buffer(io: &mut ConnIo, reactor: &mut EventReactor) -> EventAction {
    let mut action = EventAction::Continue;
    let mut offset = 0;

    while let Some(header) = try_parse_header(&io.buf[offset..io.len]) {
        if !header.is_valid() {
            kerror!("{}", LoopError::MalformedMessage(header.len));
            return EventAction::Fatal;
        }
        let aligned = header.aligned_len();
        if io.len - offset < aligned {
            break;
        }
        let payload = &io.buf[offset + HEADER_SIZE..offset + header.len as usize];
        let msg = MessageRef {
            msg_type: header.msg_type,
            payload,
        };
        action = action.merge((io.on_message)(&mut *reactor, &msg));
        if action == EventAction::Fatal {
            return action;
        }
        offset += aligned;
    }

    if offset > 0 {
        io.buf.copy_within(offset..io.len, 0);
        io.len -= offset;
    }
    // Make room for the whole partial message.
    if let Some(header) = try_parse_header(&io.buf[..io.len]) {
        let aligned = header.aligned_len();
        if aligned > io.buf.len() {
            io.buf.resize(aligned, 0);
        }
    }
    action
}

fn flush_if_pending(shared: &ConnShared) {
    let mut state = shared.send_state();
    if state.write_enabled || state.ring.is_empty() {
        return;
    }
    if let Some(io) = shared.io.get() {
        state.write_enabled = true;
        io.handle.enable_event(io.write_event);
    }
}

fn write_data(shared: &ConnShared, io_cell: &RefCell<ConnIo>, reactor: &mut EventReactor) -> EventAction {
    let mut io = io_cell.borrow_mut();
    let write_event = io.write_event;

    // Only this thread commits, and senders only append, so the staged
    // bytes stay at the ring's read cursor until committed below.
    io.staging.clear();
    {
        let state = shared.send_state();
        let data = state.ring.peek_data();
        io.staging.extend_from_slice(&data[..data.len().min(SEND_CHUNK)]);
    }

    let mut sent = 0;
    if !io.staging.is_empty() {
        let n = unsafe {
            libc::send(
                shared.fd,
                io.staging.as_ptr() as *const libc::c_void,
                io.staging.len(),
                libc::MSG_NOSIGNAL | libc::MSG_DONTWAIT,
            )
        };
        if n < 0 {
            return match Errno::last() {
                Errno::EAGAIN | Errno::EINTR => EventAction::Continue,
                errno => {
                    kerror!("send on fd {} failed: {}", shared.fd, errno);
                    EventAction::Fatal
                }
            };
        }
        ktrace!("fd {} sent {} bytes", shared.fd, n);
        sent = n as usize;
    }
    drop(io);

    let mut state = shared.send_state();
    state.ring.commit_data(sent);
    if !state.ring.is_empty() {
        return EventAction::Continue;
    }
    if state.no_more_message {
        drop(state);
        return close(shared, io_cell, reactor);
    }
    // Disabled under the lock: a sender can't slip an enable in between.
    state.write_enabled = false;
    match write_event.map(|ev| reactor.disable_event(ev)) {
        Some(Err(e)) => {
            kerror!("disabling write on fd {} failed: {}", shared.fd, e);
            EventAction::Fatal
        }
        _ => EventAction::Continue,
    }
}

fn close(shared: &ConnShared, io_cell: &RefCell<ConnIo>, reactor: &mut EventReactor) -> EventAction {
    {
        let mut state = shared.send_state();
        state.no_more_message = true;
        state.write_enabled = false;
    }
    let (read_event, write_event, on_close) = {
        let mut io = io_cell.borrow_mut();
        (io.read_event.take(), io.write_event.take(), io.on_close.take())
    };
    for event in [read_event, write_event].into_iter().flatten() {
        let _ = reactor.del_event(event);
    }
    if shared.close_fd() {
        kdebug!("fd {} closed", shared.fd);
    }
    match on_close {
        Some(mut on_close) => on_close(reactor),
        None => EventAction::Continue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::UnixSocketListener;
    use ioloop_reactor::ReactorConfig;
    use std::cell::Cell;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn reactor() -> EventReactor {
        EventReactor::with_config(ReactorConfig::new())
    }

    fn pair_with(config: SocketConfig) -> (UnixSocketConnection, UnixSocketConnection) {
        UnixSocketConnection::pair(&config).unwrap()
    }

    fn pair() -> (UnixSocketConnection, UnixSocketConnection) {
        pair_with(SocketConfig::new())
    }

    type Inbox = Rc<RefCell<Vec<Message>>>;

    fn collect_until_close(reactor: &mut EventReactor, conn: &UnixSocketConnection) -> Inbox {
        let inbox: Inbox = Rc::new(RefCell::new(Vec::new()));
        let sink = inbox.clone();
        conn.prepare_for_io(
            reactor,
            move |_, msg| {
                sink.borrow_mut().push(msg.to_message());
                EventAction::Continue
            },
            |_| EventAction::ExitLoop,
        )
        .unwrap();
        inbox
    }

    fn ignore_all(reactor: &mut EventReactor, conn: &UnixSocketConnection) {
        conn.prepare_for_io(reactor, |_, _| EventAction::Continue, |_| EventAction::Continue)
            .unwrap();
    }

    #[test]
    fn test_echo_handshake_over_listener() {
        static SEQ: AtomicUsize = AtomicUsize::new(0);
        let name = format!(
            "ioloop-echo-{}-{}",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let listener = UnixSocketListener::create(&name, true).unwrap();

        let server = thread::spawn(move || {
            let mut reactor = reactor();
            let closed = Rc::new(Cell::new(false));
            let c = closed.clone();
            reactor
                .add_read_event(listener.fd(), move |reactor| {
                    let conn = match listener.accept_connection() {
                        Ok(conn) => conn,
                        Err(e) => return EventAction::from(e.is_would_block()),
                    };
                    let reply = conn.clone();
                    let c = c.clone();
                    let prepared = conn.prepare_for_io(
                        reactor,
                        move |_, msg| {
                            let out = Message::new(msg.msg_type.wrapping_add(1), msg.payload);
                            reply.send_message(&out, true).is_ok().into()
                        },
                        move |_| {
                            c.set(true);
                            EventAction::ExitLoop
                        },
                    );
                    prepared.is_ok().into()
                })
                .unwrap();
            reactor.run_loop().unwrap();
            closed.get()
        });

        let mut reactor = reactor();
        let client = UnixSocketConnection::connect(&name, true).unwrap();
        let replies: Inbox = Rc::new(RefCell::new(Vec::new()));
        let sink = replies.clone();
        let me = client.clone();
        client
            .prepare_for_io(
                &mut reactor,
                move |_, msg| {
                    sink.borrow_mut().push(msg.to_message());
                    if sink.borrow().len() == 10 {
                        me.no_more_message();
                    }
                    EventAction::Continue
                },
                |_| EventAction::ExitLoop,
            )
            .unwrap();
        for t in 1..=10u32 {
            client.send_message(&Message::empty(t), true).unwrap();
        }
        reactor.run_loop().unwrap();

        let types: Vec<u32> = replies.borrow().iter().map(|m| m.msg_type).collect();
        assert_eq!(types, (2..=11).collect::<Vec<u32>>());
        assert!(client.is_closed());
        assert!(server.join().unwrap());
    }

    #[test]
    fn test_buffer_full_then_in_order_delivery() {
        let (a, b) = pair_with(SocketConfig::new().send_buffer_size(64));

        // 16 bytes each once padded: four fit.
        for i in 0..4u8 {
            a.send_message(&Message::new(1, vec![i; 8]), false).unwrap();
        }
        assert_eq!(
            a.send_message(&Message::new(1, vec![9u8; 8]), false),
            Err(LoopError::BufferFull)
        );
        assert_eq!(a.pending_bytes(), 64);

        let mut reactor = reactor();
        let inbox: Inbox = Rc::new(RefCell::new(Vec::new()));
        let sink = inbox.clone();
        b.prepare_for_io(
            &mut reactor,
            move |_, msg| {
                sink.borrow_mut().push(msg.to_message());
                if sink.borrow().len() == 4 {
                    EventAction::ExitLoop
                } else {
                    EventAction::Continue
                }
            },
            |_| EventAction::Continue,
        )
        .unwrap();
        ignore_all(&mut reactor, &a);
        reactor.run_loop().unwrap();

        let payloads: Vec<u8> = inbox.borrow().iter().map(|m| m.payload[0]).collect();
        assert_eq!(payloads, vec![0, 1, 2, 3]);
        assert_eq!(a.pending_bytes(), 0);
        a.send_message(&Message::new(1, vec![4u8; 8]), false).unwrap();
    }

    #[test]
    fn test_no_more_message_drains_before_close() {
        // A tiny decode buffer forces partial tails and growth.
        let (a, b) = pair_with(SocketConfig::new().read_buffer_size(16));
        let mut reactor = reactor();
        ignore_all(&mut reactor, &a);
        let inbox = collect_until_close(&mut reactor, &b);

        let sent: Vec<Message> = (0..20u32)
            .map(|i| Message::new(i, vec![i as u8; (i * 3) as usize]))
            .collect();
        for msg in &sent {
            a.send_message(msg, false).unwrap();
        }
        a.no_more_message();
        a.no_more_message();
        assert_eq!(
            a.send_message(&Message::empty(99), true),
            Err(LoopError::ConnectionClosed)
        );

        reactor.run_loop().unwrap();
        assert_eq!(*inbox.borrow(), sent);
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert_eq!(reactor.event_count(), 0);
    }

    #[test]
    fn test_message_larger_than_read_buffer() {
        let (a, b) = pair_with(SocketConfig::new().read_buffer_size(64));
        let mut reactor = reactor();
        ignore_all(&mut reactor, &a);
        let inbox = collect_until_close(&mut reactor, &b);

        let big = Message::new(3, (0..100_000u32).map(|i| i as u8).collect::<Vec<u8>>());
        a.send_message(&big, true).unwrap();
        a.no_more_message();
        reactor.run_loop().unwrap();
        assert_eq!(*inbox.borrow(), vec![big]);
    }

    #[test]
    fn test_reply_to_max_type_wraps() {
        let (a, b) = pair();
        let mut reactor = reactor();
        let reply = b.clone();
        b.prepare_for_io(
            &mut reactor,
            move |_, msg| {
                let out = Message::new(msg.msg_type.wrapping_add(1), msg.payload);
                reply.send_message(&out, true).is_ok().into()
            },
            |_| EventAction::Continue,
        )
        .unwrap();
        let got = Rc::new(Cell::new(None));
        let sink = got.clone();
        a.prepare_for_io(
            &mut reactor,
            move |_, msg| {
                sink.set(Some(msg.msg_type));
                EventAction::ExitLoop
            },
            |_| EventAction::Continue,
        )
        .unwrap();

        a.send_message(&Message::new(u32::MAX, b"edge".to_vec()), true).unwrap();
        reactor.run_loop().unwrap();
        assert_eq!(got.get(), Some(0));
    }

    #[test]
    fn test_send_spans_several_chunks() {
        let (a, b) = pair();
        let mut reactor = reactor();
        ignore_all(&mut reactor, &a);
        let inbox = collect_until_close(&mut reactor, &b);

        // Larger than three staging chunks, plus an odd tail.
        let payload: Vec<u8> = (0..(SEND_CHUNK * 3 + 5)).map(|i| (i % 251) as u8).collect();
        let big = Message::new(11, payload);
        a.send_message(&big, false).unwrap();
        a.send_message(&Message::empty(12), false).unwrap();
        a.no_more_message();

        reactor.run_loop().unwrap();
        assert_eq!(*inbox.borrow(), vec![big, Message::empty(12)]);
        assert_eq!(a.pending_bytes(), 0);
    }

    #[test]
    fn test_cross_thread_sender() {
        let (a, b) = pair();
        let mut reactor = reactor();
        ignore_all(&mut reactor, &a);
        let inbox = collect_until_close(&mut reactor, &b);

        let sender = thread::spawn(move || {
            for i in 0..200u32 {
                let msg = Message::new(i, i.to_ne_bytes().to_vec());
                a.send_message(&msg, i % 7 == 0).unwrap();
            }
            a.no_more_message();
        });
        reactor.run_loop().unwrap();
        sender.join().unwrap();

        let types: Vec<u32> = inbox.borrow().iter().map(|m| m.msg_type).collect();
        assert_eq!(types, (0..200).collect::<Vec<u32>>());
    }

    #[test]
    fn test_peer_eof_runs_close_handler() {
        let (a, b) = pair();
        let mut reactor = reactor();
        let closes = Rc::new(Cell::new(0u32));
        let c = closes.clone();
        b.prepare_for_io(
            &mut reactor,
            |_, _| EventAction::Continue,
            move |_| {
                c.set(c.get() + 1);
                EventAction::Continue
            },
        )
        .unwrap();
        drop(a);
        // Nothing enabled is left after the close: the loop ends by itself.
        reactor.run_loop().unwrap();
        assert_eq!(closes.get(), 1);
        assert!(b.is_closed());
        assert_eq!(b.send_message(&Message::empty(1), true), Err(LoopError::ConnectionClosed));
    }

    #[test]
    fn test_malformed_length_is_fatal() {
        let (a, b) = pair();
        let mut reactor = reactor();
        b.prepare_for_io(&mut reactor, |_, _| EventAction::Continue, |_| EventAction::Continue)
            .unwrap();

        let mut bad = Vec::new();
        bad.extend_from_slice(&4u32.to_ne_bytes());
        bad.extend_from_slice(&1u32.to_ne_bytes());
        let n = unsafe { libc::write(a.fd(), bad.as_ptr() as *const libc::c_void, bad.len()) };
        assert_eq!(n, 8);

        assert_eq!(reactor.run_loop(), Err(LoopError::CallbackFailed));
        assert!(reactor.has_error());
    }

    #[test]
    fn test_handler_failure_is_fatal() {
        let (a, b) = pair();
        let mut reactor = reactor();
        b.prepare_for_io(&mut reactor, |_, _| EventAction::Fatal, |_| EventAction::Continue)
            .unwrap();
        ignore_all(&mut reactor, &a);
        a.send_message(&Message::empty(1), true).unwrap();
        assert_eq!(reactor.run_loop(), Err(LoopError::CallbackFailed));
    }

    #[test]
    fn test_prepare_twice_rejected() {
        let (a, _b) = pair();
        let mut reactor = reactor();
        ignore_all(&mut reactor, &a);
        assert_eq!(
            a.prepare_for_io(&mut reactor, |_, _| EventAction::Continue, |_| EventAction::Continue),
            Err(LoopError::AlreadyPrepared)
        );
        assert_eq!(reactor.event_count(), 2);
    }

    #[test]
    fn test_drop_unprepared_closes_fd() {
        let (a, b) = pair();
        let _queued = a.send_message(&Message::empty(1), true);
        drop(a);
        // Never prepared, so nothing was sent; the peer sees EOF only.
        let mut buf = [0u8; 1];
        let n = unsafe { libc::recv(b.fd(), buf.as_mut_ptr() as *mut libc::c_void, 1, 0) };
        assert_eq!(n, 0);
    }
}

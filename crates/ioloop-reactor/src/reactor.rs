//! `EventReactor`: single-threaded readiness loop over epoll.
//!
//! # Architecture
//!
//! ```text
//!  any thread                          reactor thread
//!  ──────────                          ──────────────
//!  ReactorHandle::enable_event ─┐
//!  ReactorHandle::exit_loop    ─┼─► SegQueue<Command> ──► apply_commands()
//!                               └─► eventfd.notify() ───► epoll_wait() returns
//!
//!  signal handler ─► self-pipe ─► epoll ─► signal-Event callbacks
//!  timerfd / wait timeout ───────► epoll ─► periodic-Event callbacks
//!  user fds ─────────────────────► epoll ─► read/write-Event callbacks
//! ```
//!
//! Everything except `ReactorHandle` is owned by the reactor thread.
//! Callbacks get `&mut EventReactor` and may add, enable, disable or delete
//! any Event, including the one being dispatched.

use crate::config::ReactorConfig;
use crate::event::{EventAction, EventCallback, EventEntry, EventKind, EventRef, EventTable};
use crate::notifier::EventFdNotifier;
use crate::poller::{Interest, Poller, Readiness};
use crate::signal::SignalPipe;
use crate::timer::{next_deadline, until, PreciseTimer};

use ioloop_core::error::{LoopError, Result};
use ioloop_core::{kdebug, kerror, ktrace, kwarn};

use crossbeam_queue::SegQueue;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::cell::RefCell;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
enum Command {
    Enable(EventRef),
    Disable(EventRef),
    Exit,
}

/// State shared between the reactor and its handles.
struct Remote {
    commands: SegQueue<Command>,
    notifier: EventFdNotifier,
    running: AtomicBool,
}

/// Thread-safe control surface of an `EventReactor`.
///
/// Commands are queued and applied by the reactor thread before its next
/// wait (or right after the callback it is running). Refs that went stale
/// in between are ignored.
#[derive(Clone)]
pub struct ReactorHandle {
    remote: Arc<Remote>,
}

impl ReactorHandle {
    pub fn enable_event(&self, event: EventRef) {
        self.post(Command::Enable(event));
    }

    pub fn disable_event(&self, event: EventRef) {
        self.post(Command::Disable(event));
    }

    /// Ask a running loop to return. Returns false if no loop is running.
    pub fn exit_loop(&self) -> bool {
        if !self.remote.running.load(Ordering::Acquire) {
            return false;
        }
        self.post(Command::Exit);
        true
    }

    fn post(&self, cmd: Command) {
        self.remote.commands.push(cmd);
        if let Err(e) = self.remote.notifier.notify() {
            kwarn!("reactor wakeup failed: {}", e);
        }
    }
}

impl std::fmt::Debug for ReactorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("notifier_fd", &self.remote.notifier.fd())
            .field("pending", &self.remote.commands.len())
            .finish()
    }
}

/// Kernel-side resources, created on first use.
struct Core {
    poller: Poller,
    remote: Arc<Remote>,
    signals: Option<SignalPipe>,
    precise: Option<PreciseTimer>,
}

impl Core {
    fn new(config: &ReactorConfig) -> Result<Self> {
        let poller = Poller::new(config.max_events)?;
        let notifier = EventFdNotifier::create()?;
        poller.add(notifier.fd(), Interest::READ)?;
        let precise = if config.precise_timer {
            let timer = PreciseTimer::new()?;
            poller.add(timer.fd(), Interest::READ)?;
            Some(timer)
        } else {
            None
        };
        kdebug!(
            "reactor multiplexer created (max_events={}, precise_timer={})",
            config.max_events,
            config.precise_timer
        );
        Ok(Self {
            poller,
            remote: Arc::new(Remote {
                commands: SegQueue::new(),
                notifier,
                running: AtomicBool::new(false),
            }),
            signals: None,
            precise,
        })
    }
}

/// Events attached to one descriptor and the interest currently in epoll.
#[derive(Debug, Default)]
struct FdEvents {
    read: Option<EventRef>,
    write: Option<EventRef>,
    registered: Interest,
}

enum Source {
    Waker,
    Timer,
    Signals,
    User,
}

pub struct EventReactor {
    config: ReactorConfig,
    events: EventTable,
    fds: HashMap<RawFd, FdEvents>,
    core: Option<Core>,
    running: bool,
    exit_requested: bool,
    has_error: bool,
}

impl Default for EventReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl EventReactor {
    /// Reactor configured from the environment.
    pub fn new() -> Self {
        Self::with_config(ReactorConfig::from_env())
    }

    pub fn with_config(config: ReactorConfig) -> Self {
        Self {
            config,
            events: EventTable::new(),
            fds: HashMap::new(),
            core: None,
            running: false,
            exit_requested: false,
            has_error: false,
        }
    }

    fn core(&mut self) -> Result<&mut Core> {
        let core = match self.core.take() {
            Some(core) => core,
            None => Core::new(&self.config)?,
        };
        Ok(self.core.insert(core))
    }

    /// Switch periodic Events to the nanosecond-resolution timerfd source.
    ///
    /// Only possible before the first registration or `handle()` call.
    pub fn use_precise_timer(&mut self) -> Result<()> {
        if self.core.is_some() {
            return Err(LoopError::TimerModeLocked);
        }
        self.config.precise_timer = true;
        Ok(())
    }

    #[inline]
    pub fn is_precise_timer(&self) -> bool {
        self.config.precise_timer
    }

    /// Cross-thread handle. Creates the multiplexer if needed.
    pub fn handle(&mut self) -> Result<ReactorHandle> {
        let core = self.core()?;
        Ok(ReactorHandle {
            remote: Arc::clone(&core.remote),
        })
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Call `callback` once per dispatch pass while `fd` is readable.
    ///
    /// `fd` is switched to non-blocking mode. At most one read-Event per fd.
    pub fn add_read_event<F>(&mut self, fd: RawFd, callback: F) -> Result<EventRef>
    where
        F: FnMut(&mut EventReactor) -> EventAction + 'static,
    {
        self.add_fd_event(EventKind::Read(fd), Box::new(callback))
    }

    /// Call `callback` once per dispatch pass while `fd` is writable.
    pub fn add_write_event<F>(&mut self, fd: RawFd, callback: F) -> Result<EventRef>
    where
        F: FnMut(&mut EventReactor) -> EventAction + 'static,
    {
        self.add_fd_event(EventKind::Write(fd), Box::new(callback))
    }

    fn add_fd_event(&mut self, kind: EventKind, callback: EventCallback) -> Result<EventRef> {
        let Some(fd) = kind.fd() else {
            return Err(LoopError::InvalidEvent);
        };
        self.core()?;
        if let Err(e) = set_nonblocking(fd) {
            kerror!("can't make fd {} non-blocking: {}", fd, e);
            return Err(e);
        }

        let slots = self.fds.entry(fd).or_default();
        let slot = match kind {
            EventKind::Read(_) => &mut slots.read,
            _ => &mut slots.write,
        };
        if slot.is_some() {
            return Err(LoopError::AlreadyRegistered);
        }
        let event = self.events.insert(EventEntry::new(kind, callback));
        *slot = Some(event);

        if let Err(e) = self.sync_fd(fd) {
            kerror!("registering fd {} failed: {}", fd, e);
            let _ = self.del_event(event);
            return Err(e);
        }
        kdebug!("{} added: {:?}", event, kind);
        Ok(event)
    }

    /// Call `callback` for every delivery of `signo`.
    ///
    /// Installs a process-wide handler; the previous disposition comes back
    /// when the last signal-Event for `signo` is deleted or the reactor is
    /// dropped.
    pub fn add_signal_event<F>(&mut self, signo: i32, callback: F) -> Result<EventRef>
    where
        F: FnMut(&mut EventReactor) -> EventAction + 'static,
    {
        let core = self.core()?;
        let pipe = match core.signals.take() {
            Some(pipe) => pipe,
            None => {
                let pipe = SignalPipe::new()?;
                core.poller.add(pipe.read_fd(), Interest::READ)?;
                pipe
            }
        };
        if let Err(e) = core.signals.insert(pipe).route(signo) {
            kerror!("can't handle signal {}: {}", signo, e);
            return Err(e);
        }

        let event = self
            .events
            .insert(EventEntry::new(EventKind::Signal(signo), Box::new(callback)));
        kdebug!("{} added: signal {}", event, signo);
        Ok(event)
    }

    /// One Event per signal, all sharing `callback`.
    ///
    /// All-or-nothing: if any signal can't be handled, the Events already
    /// added are deleted again.
    pub fn add_signal_events<F>(&mut self, signals: &[i32], callback: F) -> Result<Vec<EventRef>>
    where
        F: FnMut(&mut EventReactor) -> EventAction + 'static,
    {
        let shared = Rc::new(RefCell::new(callback));
        let mut added = Vec::with_capacity(signals.len());
        for &signo in signals {
            let cb = Rc::clone(&shared);
            match self.add_signal_event(signo, move |reactor| (&mut *cb.borrow_mut())(reactor)) {
                Ok(event) => added.push(event),
                Err(e) => {
                    for event in added {
                        let _ = self.del_event(event);
                    }
                    return Err(e);
                }
            }
        }
        Ok(added)
    }

    /// Call `callback` every `period`, first after one period.
    pub fn add_periodic_event<F>(&mut self, period: Duration, callback: F) -> Result<EventRef>
    where
        F: FnMut(&mut EventReactor) -> EventAction + 'static,
    {
        self.core()?;
        let event = self
            .events
            .insert(EventEntry::new(EventKind::Periodic(period), Box::new(callback)));
        kdebug!("{} added: every {:?}", event, period);
        Ok(event)
    }

    // ========================================================================
    // Event state
    // ========================================================================

    /// Put the Event back into the wait set. Idempotent. A periodic Event
    /// restarts its period from now.
    pub fn enable_event(&mut self, event: EventRef) -> Result<()> {
        let entry = self.events.get_mut(event).ok_or(LoopError::InvalidEvent)?;
        if entry.enabled {
            return Ok(());
        }
        let kind = entry.kind;
        if let EventKind::Periodic(period) = kind {
            entry.deadline = Some(Instant::now() + period);
        }
        self.events.set_enabled(event, true);

        if let Some(fd) = kind.fd() {
            if let Err(e) = self.sync_fd(fd) {
                self.events.set_enabled(event, false);
                return Err(e);
            }
        }
        ktrace!("{} enabled", event);
        Ok(())
    }

    /// Take the Event out of the wait set without destroying it. Idempotent.
    pub fn disable_event(&mut self, event: EventRef) -> Result<()> {
        let entry = self.events.get_mut(event).ok_or(LoopError::InvalidEvent)?;
        if !entry.enabled {
            return Ok(());
        }
        entry.deadline = None;
        let kind = entry.kind;
        self.events.set_enabled(event, false);

        if let Some(fd) = kind.fd() {
            self.sync_fd(fd)?;
        }
        ktrace!("{} disabled", event);
        Ok(())
    }

    /// Disable and destroy the Event. `event` is invalid afterwards.
    pub fn del_event(&mut self, event: EventRef) -> Result<()> {
        let entry = self.events.remove(event).ok_or(LoopError::InvalidEvent)?;
        match entry.kind {
            EventKind::Read(fd) | EventKind::Write(fd) => {
                if let Some(slots) = self.fds.get_mut(&fd) {
                    if slots.read == Some(event) {
                        slots.read = None;
                    }
                    if slots.write == Some(event) {
                        slots.write = None;
                    }
                }
                if let Err(e) = self.sync_fd(fd) {
                    // The fd may already be closed; epoll forgot it then.
                    kdebug!("deregistering fd {}: {}", fd, e);
                }
                if let Some(slots) = self.fds.get(&fd) {
                    if slots.read.is_none() && slots.write.is_none() {
                        self.fds.remove(&fd);
                    }
                }
            }
            EventKind::Signal(signo) => {
                let still_used = self
                    .events
                    .iter()
                    .any(|(_, e)| e.kind == EventKind::Signal(signo));
                if !still_used {
                    if let Some(pipe) = self.core.as_mut().and_then(|c| c.signals.as_mut()) {
                        pipe.unroute(signo);
                    }
                }
            }
            EventKind::Periodic(_) => {}
        }
        kdebug!("{} deleted", event);
        Ok(())
    }

    /// True if `event` is live and enabled.
    pub fn is_enabled(&self, event: EventRef) -> bool {
        self.events.get(event).map_or(false, |e| e.enabled)
    }

    /// Kind of a live Event.
    pub fn event_kind(&self, event: EventRef) -> Option<EventKind> {
        self.events.get(event).map(|e| e.kind)
    }

    /// Live Events, enabled or not.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Make epoll's interest for `fd` match its enabled Events.
    fn sync_fd(&mut self, fd: RawFd) -> Result<()> {
        let (read, write, registered) = match self.fds.get(&fd) {
            Some(slots) => (slots.read, slots.write, slots.registered),
            None => return Ok(()),
        };
        let want = Interest {
            read: read.map_or(false, |r| self.is_enabled(r)),
            write: write.map_or(false, |w| self.is_enabled(w)),
        };
        if want == registered {
            return Ok(());
        }

        let core = self.core()?;
        if registered.is_empty() {
            core.poller.add(fd, want)?;
        } else if want.is_empty() {
            core.poller.delete(fd)?;
        } else {
            core.poller.modify(fd, want)?;
        }
        if let Some(slots) = self.fds.get_mut(&fd) {
            slots.registered = want;
        }
        Ok(())
    }

    // ========================================================================
    // Loop
    // ========================================================================

    /// Dispatch Events until a callback asks to exit, a callback fails, or
    /// no enabled Event is left.
    ///
    /// Returns `Err(LoopError::CallbackFailed)` when a callback returned
    /// `Fatal`; `has_error()` is set in that case.
    pub fn run_loop(&mut self) -> Result<()> {
        if self.running {
            return Err(LoopError::AlreadyRunning);
        }
        let remote = Arc::clone(&self.core()?.remote);

        self.running = true;
        self.exit_requested = false;
        remote.running.store(true, Ordering::Release);
        kdebug!("event loop started with {} events", self.events.len());

        let result = self.dispatch_until_exit();

        remote.running.store(false, Ordering::Release);
        self.running = false;
        match &result {
            Ok(()) => kdebug!("event loop finished"),
            Err(e) => {
                self.has_error = true;
                kerror!("event loop aborted: {}", e);
            }
        }
        result
    }

    /// Request `run_loop()` to return after the current dispatch pass.
    ///
    /// Returns false (and does nothing) when no loop is running.
    pub fn exit_loop(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.exit_requested = true;
        true
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// True once a loop was aborted by a failing callback or OS error.
    #[inline]
    pub fn has_error(&self) -> bool {
        self.has_error
    }

    fn dispatch_until_exit(&mut self) -> Result<()> {
        let mut ready: Vec<Readiness> = Vec::with_capacity(self.config.max_events);
        let mut signals: Vec<i32> = Vec::new();
        loop {
            self.apply_commands();
            if self.exit_requested {
                return Ok(());
            }
            if self.events.enabled_count() == 0 {
                kdebug!("no enabled events left");
                return Ok(());
            }

            let timeout = self.arm_timer()?;
            ready.clear();
            self.core()?.poller.wait(timeout, &mut ready)?;

            self.fire_expired_timers()?;
            for readiness in ready.drain(..) {
                self.dispatch_ready(readiness, &mut signals)?;
            }
        }
    }

    /// Earliest enabled periodic deadline, as a wait timeout (coarse) or
    /// by arming the timerfd (precise).
    fn arm_timer(&mut self) -> Result<Option<Duration>> {
        let earliest = self
            .events
            .iter()
            .filter(|(_, e)| e.enabled)
            .filter_map(|(_, e)| e.deadline)
            .min();
        let now = Instant::now();
        let core = self.core()?;
        match core.precise.as_mut() {
            Some(timer) => {
                timer.arm(earliest, now)?;
                Ok(None)
            }
            None => Ok(earliest.map(|deadline| until(deadline, now))),
        }
    }

    fn fire_expired_timers(&mut self) -> Result<()> {
        let now = Instant::now();
        let mut due: Vec<(Instant, EventRef)> = self
            .events
            .iter()
            .filter(|(_, e)| e.enabled)
            .filter_map(|(r, e)| e.deadline.filter(|d| *d <= now).map(|d| (d, r)))
            .collect();
        due.sort_by_key(|(deadline, _)| *deadline);

        for (_, event) in due {
            // An earlier callback may have disabled, re-armed or deleted it.
            let Some(entry) = self.events.get_mut(event) else {
                continue;
            };
            let (Some(deadline), EventKind::Periodic(period)) = (entry.deadline, entry.kind) else {
                continue;
            };
            if deadline > now {
                continue;
            }
            entry.deadline = Some(next_deadline(deadline, period, Instant::now()));
            self.invoke(event)?;
        }
        Ok(())
    }

    fn dispatch_ready(&mut self, ready: Readiness, signals: &mut Vec<i32>) -> Result<()> {
        let source = match self.core.as_ref() {
            Some(core) if ready.fd == core.remote.notifier.fd() => Source::Waker,
            Some(core) if core.precise.as_ref().map(|t| t.fd()) == Some(ready.fd) => Source::Timer,
            Some(core) if core.signals.as_ref().map(|p| p.read_fd()) == Some(ready.fd) => {
                Source::Signals
            }
            _ => Source::User,
        };

        match source {
            // Commands are applied at the top of the next pass.
            Source::Waker => {
                if let Some(core) = self.core.as_ref() {
                    core.remote.notifier.drain();
                }
            }
            // Expired timers were already fired for this pass.
            Source::Timer => {
                if let Some(timer) = self.core.as_mut().and_then(|c| c.precise.as_mut()) {
                    timer.acknowledge();
                }
            }
            Source::Signals => {
                signals.clear();
                if let Some(pipe) = self.core.as_ref().and_then(|c| c.signals.as_ref()) {
                    pipe.drain(signals);
                }
                for &signo in signals.iter() {
                    ktrace!("signal {} delivered", signo);
                    self.dispatch_signal(signo)?;
                }
            }
            Source::User => {
                let Some(slots) = self.fds.get(&ready.fd) else {
                    return Ok(());
                };
                let (read, write) = (slots.read, slots.write);
                if ready.readable {
                    if let Some(event) = read {
                        self.invoke(event)?;
                    }
                }
                if ready.writable {
                    if let Some(event) = write {
                        self.invoke(event)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn dispatch_signal(&mut self, signo: i32) -> Result<()> {
        let targets: Vec<EventRef> = self
            .events
            .iter()
            .filter(|(_, e)| e.kind == EventKind::Signal(signo))
            .map(|(r, _)| r)
            .collect();
        for event in targets {
            self.invoke(event)?;
        }
        Ok(())
    }

    /// Run one callback if its Event is still live and enabled.
    fn invoke(&mut self, event: EventRef) -> Result<()> {
        let mut callback = match self.events.get_mut(event) {
            Some(entry) if entry.enabled => match entry.callback.take() {
                Some(cb) => cb,
                None => return Ok(()),
            },
            _ => return Ok(()),
        };

        ktrace!("dispatch {}", event);
        let action = callback(&mut *self);

        // Deleted by its own callback: the closure is dropped here.
        if let Some(entry) = self.events.get_mut(event) {
            entry.callback = Some(callback);
        }
        self.apply_commands();

        match action {
            EventAction::Continue => Ok(()),
            EventAction::ExitLoop => {
                self.exit_requested = true;
                Ok(())
            }
            EventAction::Fatal => {
                kerror!("callback of {} failed", event);
                Err(LoopError::CallbackFailed)
            }
        }
    }

    /// Apply commands queued by `ReactorHandle`s.
    fn apply_commands(&mut self) {
        let Some(remote) = self.core.as_ref().map(|c| Arc::clone(&c.remote)) else {
            return;
        };
        while let Some(cmd) = remote.commands.pop() {
            let result = match cmd {
                Command::Enable(event) => self.enable_event(event),
                Command::Disable(event) => self.disable_event(event),
                Command::Exit => {
                    self.exit_loop();
                    Ok(())
                }
            };
            if let Err(e) = result {
                ktrace!("queued {:?} skipped: {}", cmd, e);
            }
        }
    }
}

impl std::fmt::Debug for EventReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReactor")
            .field("events", &self.events.len())
            .field("enabled", &self.events.enabled_count())
            .field("running", &self.running)
            .field("has_error", &self.has_error)
            .field("precise_timer", &self.config.precise_timer)
            .finish()
    }
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    if !flags.contains(OFlag::O_NONBLOCK) {
        fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::os::fd::{AsRawFd, OwnedFd};
    use std::thread;

    // Signal-routing is process-wide; every test owns distinct signals.

    fn pipe() -> (OwnedFd, OwnedFd) {
        nix::unistd::pipe2(OFlag::O_CLOEXEC).unwrap()
    }

    fn write_byte(fd: RawFd) {
        let n = unsafe { libc::write(fd, b"x".as_ptr() as *const libc::c_void, 1) };
        assert_eq!(n, 1);
    }

    fn coarse() -> EventReactor {
        EventReactor::with_config(ReactorConfig::new())
    }

    #[test]
    fn test_read_event_drains_slow_writer() {
        let (r, w) = pipe();
        let mut reactor = coarse();

        let bytes = Rc::new(Cell::new(0usize));
        let calls = Rc::new(Cell::new(0usize));
        let eagain = Rc::new(Cell::new(0usize));
        let (b, c, e) = (bytes.clone(), calls.clone(), eagain.clone());
        let fd = r.as_raw_fd();
        reactor
            .add_read_event(fd, move |_| {
                c.set(c.get() + 1);
                let mut buf = [0u8; 16];
                loop {
                    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, 16) };
                    if n > 0 {
                        b.set(b.get() + n as usize);
                        continue;
                    }
                    if n < 0 && nix::errno::Errno::last() == nix::errno::Errno::EAGAIN {
                        e.set(e.get() + 1);
                    }
                    break;
                }
                if b.get() == 100 {
                    EventAction::ExitLoop
                } else {
                    EventAction::Continue
                }
            })
            .unwrap();

        let writer = thread::spawn(move || {
            for _ in 0..100 {
                write_byte(w.as_raw_fd());
                thread::sleep(Duration::from_millis(1));
            }
            w
        });
        reactor.run_loop().unwrap();
        drop(writer.join().unwrap());

        assert_eq!(bytes.get(), 100);
        assert!(eagain.get() >= 1);
        assert!(calls.get() <= 100);
        assert!(!reactor.has_error());
    }

    #[test]
    fn test_write_event_fires_each_pass() {
        let (_r, w) = pipe();
        let mut reactor = coarse();
        let calls = Rc::new(Cell::new(0u32));
        let c = calls.clone();
        reactor
            .add_write_event(w.as_raw_fd(), move |_| {
                c.set(c.get() + 1);
                if c.get() == 100 {
                    EventAction::ExitLoop
                } else {
                    EventAction::Continue
                }
            })
            .unwrap();
        reactor.run_loop().unwrap();
        assert_eq!(calls.get(), 100);
    }

    #[test]
    fn test_second_read_event_on_fd_rejected() {
        let (r, _w) = pipe();
        let mut reactor = coarse();
        reactor
            .add_read_event(r.as_raw_fd(), |_| EventAction::Continue)
            .unwrap();
        assert_eq!(
            reactor
                .add_read_event(r.as_raw_fd(), |_| EventAction::Continue)
                .unwrap_err(),
            LoopError::AlreadyRegistered
        );
        // A write-Event may share the fd.
        reactor
            .add_write_event(r.as_raw_fd(), |_| EventAction::Continue)
            .unwrap();
    }

    #[test]
    fn test_bad_fd_rejected() {
        let mut reactor = coarse();
        assert!(matches!(
            reactor.add_read_event(-1, |_| EventAction::Continue),
            Err(LoopError::Os(_))
        ));
        assert_eq!(reactor.event_count(), 0);
    }

    #[test]
    fn test_signal_event() {
        let mut reactor = coarse();
        let seen = Rc::new(Cell::new(0u32));
        let s = seen.clone();
        reactor
            .add_signal_event(libc::SIGALRM, move |_| {
                s.set(s.get() + 1);
                if s.get() == 10 {
                    EventAction::ExitLoop
                } else {
                    EventAction::Continue
                }
            })
            .unwrap();
        reactor
            .add_periodic_event(Duration::from_millis(1), |_| {
                unsafe { libc::raise(libc::SIGALRM) };
                EventAction::Continue
            })
            .unwrap();
        reactor.run_loop().unwrap();
        assert_eq!(seen.get(), 10);
    }

    #[test]
    fn test_shared_signal_callback() {
        let mut reactor = coarse();
        let seen = Rc::new(Cell::new(0u32));
        let s = seen.clone();
        let events = reactor
            .add_signal_events(&[libc::SIGPROF, libc::SIGVTALRM], move |_| {
                s.set(s.get() + 1);
                if s.get() == 2 {
                    EventAction::ExitLoop
                } else {
                    EventAction::Continue
                }
            })
            .unwrap();
        assert_eq!(events.len(), 2);
        reactor
            .add_periodic_event(Duration::from_millis(1), |_| {
                unsafe {
                    libc::raise(libc::SIGPROF);
                    libc::raise(libc::SIGVTALRM);
                }
                EventAction::Continue
            })
            .unwrap();
        reactor.run_loop().unwrap();
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn test_signal_owned_by_one_reactor() {
        let mut a = coarse();
        let mut b = coarse();
        let ev = a.add_signal_event(libc::SIGTTIN, |_| EventAction::Continue).unwrap();
        assert_eq!(
            b.add_signal_event(libc::SIGTTIN, |_| EventAction::Continue)
                .unwrap_err(),
            LoopError::SignalInUse(libc::SIGTTIN)
        );
        a.del_event(ev).unwrap();
        b.add_signal_event(libc::SIGTTIN, |_| EventAction::Continue)
            .unwrap();
    }

    #[test]
    fn test_shared_signal_callback_rolls_back() {
        let mut reactor = coarse();
        assert_eq!(
            reactor
                .add_signal_events(&[libc::SIGTTOU, libc::SIGKILL], |_| EventAction::Continue)
                .unwrap_err(),
            LoopError::InvalidSignal(libc::SIGKILL)
        );
        assert_eq!(reactor.event_count(), 0);
    }

    fn run_periodic(reactor: &mut EventReactor, iterations: u32, period: Duration) -> Duration {
        let count = Rc::new(Cell::new(0u32));
        let c = count.clone();
        // The schedule starts at registration.
        let start = Instant::now();
        reactor
            .add_periodic_event(period, move |_| {
                c.set(c.get() + 1);
                if c.get() == iterations {
                    EventAction::ExitLoop
                } else {
                    EventAction::Continue
                }
            })
            .unwrap();
        reactor.run_loop().unwrap();
        assert_eq!(count.get(), iterations);
        start.elapsed()
    }

    #[test]
    fn test_periodic_coarse() {
        let mut reactor = coarse();
        let elapsed = run_periodic(&mut reactor, 100, Duration::from_millis(1));
        assert!(elapsed >= Duration::from_millis(100), "{:?}", elapsed);
        // Millisecond wait timeouts cost up to a tick per firing.
        assert!(elapsed < Duration::from_millis(150), "{:?}", elapsed);
    }

    #[test]
    fn test_periodic_precise() {
        let mut reactor = coarse();
        reactor.use_precise_timer().unwrap();
        assert!(reactor.is_precise_timer());
        let elapsed = run_periodic(&mut reactor, 100, Duration::from_millis(1));
        assert!(elapsed >= Duration::from_millis(100), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(120), "{:?}", elapsed);
    }

    #[test]
    fn test_precise_timer_locked_after_first_use() {
        let mut reactor = coarse();
        reactor.handle().unwrap();
        assert_eq!(reactor.use_precise_timer(), Err(LoopError::TimerModeLocked));
        assert!(!reactor.is_precise_timer());
    }

    #[test]
    fn test_disabled_read_event_enabled_from_timer() {
        let (r, w) = pipe();
        write_byte(w.as_raw_fd());
        let mut reactor = coarse();

        let ticks = Rc::new(Cell::new(0u32));
        let read_at = Rc::new(Cell::new(0u32));
        let (t, ra) = (ticks.clone(), read_at.clone());
        let read = reactor
            .add_read_event(r.as_raw_fd(), move |_| {
                ra.set(t.get());
                EventAction::ExitLoop
            })
            .unwrap();
        reactor.disable_event(read).unwrap();
        // Idempotent.
        reactor.disable_event(read).unwrap();
        assert!(!reactor.is_enabled(read));

        let t = ticks.clone();
        reactor
            .add_periodic_event(Duration::from_millis(2), move |reactor| {
                t.set(t.get() + 1);
                if t.get() == 3 {
                    reactor.enable_event(read).unwrap();
                    reactor.enable_event(read).unwrap();
                }
                EventAction::Continue
            })
            .unwrap();
        reactor.run_loop().unwrap();
        assert_eq!(read_at.get(), 3);
    }

    #[test]
    fn test_stale_ref_rejected() {
        let mut reactor = coarse();
        let ev = reactor
            .add_periodic_event(Duration::from_secs(1), |_| EventAction::Continue)
            .unwrap();
        assert_eq!(reactor.event_kind(ev), Some(EventKind::Periodic(Duration::from_secs(1))));
        reactor.del_event(ev).unwrap();
        assert_eq!(reactor.enable_event(ev), Err(LoopError::InvalidEvent));
        assert_eq!(reactor.disable_event(ev), Err(LoopError::InvalidEvent));
        assert_eq!(reactor.del_event(ev), Err(LoopError::InvalidEvent));
        assert!(!reactor.is_enabled(ev));

        // Refs never cross reactors.
        let mut other = coarse();
        let foreign = other
            .add_periodic_event(Duration::from_secs(1), |_| EventAction::Continue)
            .unwrap();
        assert_eq!(reactor.del_event(foreign), Err(LoopError::InvalidEvent));
    }

    #[test]
    fn test_fatal_callback_aborts_loop() {
        let mut reactor = coarse();
        let after = Rc::new(Cell::new(false));
        let a = after.clone();
        reactor
            .add_periodic_event(Duration::from_millis(1), |_| EventAction::Fatal)
            .unwrap();
        reactor
            .add_periodic_event(Duration::from_millis(50), move |_| {
                a.set(true);
                EventAction::ExitLoop
            })
            .unwrap();
        assert_eq!(reactor.run_loop(), Err(LoopError::CallbackFailed));
        assert!(reactor.has_error());
        assert!(!after.get());
        assert!(!reactor.is_running());
    }

    #[test]
    fn test_exit_finishes_current_pass() {
        let (_r, w) = pipe();
        let mut reactor = coarse();
        let writes = Rc::new(Cell::new(0u32));
        let c = writes.clone();
        reactor
            .add_write_event(w.as_raw_fd(), move |_| {
                c.set(c.get() + 1);
                EventAction::Continue
            })
            .unwrap();
        // Due immediately; timers run before fd callbacks in a pass.
        reactor
            .add_periodic_event(Duration::ZERO, |_| EventAction::ExitLoop)
            .unwrap();
        reactor.run_loop().unwrap();
        assert_eq!(writes.get(), 1);
    }

    #[test]
    fn test_loop_ends_without_enabled_events() {
        let mut reactor = coarse();
        reactor.run_loop().unwrap();

        let count = Rc::new(Cell::new(0u32));
        let c = count.clone();
        reactor
            .add_periodic_event(Duration::from_millis(1), move |reactor| {
                c.set(c.get() + 1);
                assert!(reactor.is_running());
                assert!(reactor.exit_loop());
                EventAction::Continue
            })
            .unwrap();
        reactor.run_loop().unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_callback_deletes_itself() {
        let mut reactor = coarse();
        let count = Rc::new(Cell::new(0u32));
        let me: Rc<Cell<Option<EventRef>>> = Rc::new(Cell::new(None));
        let (c, m) = (count.clone(), me.clone());
        let ev = reactor
            .add_periodic_event(Duration::from_millis(1), move |reactor| {
                c.set(c.get() + 1);
                if let Some(ev) = m.get() {
                    reactor.del_event(ev).unwrap();
                }
                EventAction::Continue
            })
            .unwrap();
        me.set(Some(ev));
        reactor.run_loop().unwrap();
        assert_eq!(count.get(), 1);
        assert_eq!(reactor.event_count(), 0);
    }

    #[test]
    fn test_reentrant_run_loop_rejected() {
        let mut reactor = coarse();
        reactor
            .add_periodic_event(Duration::from_millis(1), |reactor| {
                assert_eq!(reactor.run_loop(), Err(LoopError::AlreadyRunning));
                EventAction::ExitLoop
            })
            .unwrap();
        reactor.run_loop().unwrap();
        assert!(!reactor.has_error());
    }

    #[test]
    fn test_exit_loop_without_loop() {
        let mut reactor = coarse();
        assert!(!reactor.exit_loop());
        let handle = reactor.handle().unwrap();
        assert!(!handle.exit_loop());
    }

    #[test]
    fn test_handle_exit_from_other_thread() {
        let (r, _w) = pipe();
        let mut reactor = coarse();
        // Idle Event keeps the loop alive.
        reactor
            .add_read_event(r.as_raw_fd(), |_| EventAction::Continue)
            .unwrap();
        let handle = reactor.handle().unwrap();
        let stopper = thread::spawn(move || {
            while !handle.exit_loop() {
                thread::sleep(Duration::from_millis(1));
            }
        });
        reactor.run_loop().unwrap();
        stopper.join().unwrap();
    }

    #[test]
    fn test_handle_enable_from_other_thread() {
        let (r, w) = pipe();
        let mut reactor = coarse();
        reactor
            .add_read_event(r.as_raw_fd(), |_| EventAction::Continue)
            .unwrap();
        let write = reactor
            .add_write_event(w.as_raw_fd(), |_| EventAction::ExitLoop)
            .unwrap();
        reactor.disable_event(write).unwrap();

        let handle = reactor.handle().unwrap();
        let enabler = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            handle.enable_event(write);
        });
        reactor.run_loop().unwrap();
        enabler.join().unwrap();
        assert!(reactor.is_enabled(write));
    }
}

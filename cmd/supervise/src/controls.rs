//! Line-based pause/resume commands read from a descriptor (stdin).

use ioloop::{kdebug, kerror, kinfo, EventAction, EventReactor, EventRef, Result};

use nix::errno::Errno;
use std::os::unix::io::RawFd;

/// Line-buffered reader over a non-blocking descriptor.
struct ControlInput {
    fd: RawFd,
    pending: Vec<u8>,
}

struct ControlRead {
    lines: Vec<String>,
    eof: bool,
}

impl ControlInput {
    /// Read everything available, returning the complete lines. Lines that
    /// arrived together with EOF are still returned.
    fn read(&mut self) -> Result<ControlRead> {
        let mut buf = [0u8; 256];
        let mut eof = false;
        loop {
            let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n == 0 {
                eof = true;
                break;
            }
            if n < 0 {
                match Errno::last() {
                    Errno::EINTR => continue,
                    Errno::EAGAIN => break,
                    errno => return Err(errno.into()),
                }
            }
            self.pending.extend_from_slice(&buf[..n as usize]);
        }

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim().to_owned());
        }
        // An unterminated last line still counts once the writer is gone.
        if eof && !self.pending.is_empty() {
            let line: Vec<u8> = self.pending.drain(..).collect();
            lines.push(String::from_utf8_lossy(&line).trim().to_owned());
        }
        Ok(ControlRead { lines, eof })
    }
}

/// Apply one command to `heartbeat`. False for unknown commands.
fn run_control(reactor: &mut EventReactor, heartbeat: EventRef, cmd: &str) -> bool {
    kdebug!("control command: {}", cmd);
    match cmd {
        "pause" => reactor.disable_event(heartbeat).is_ok(),
        "resume" => reactor.enable_event(heartbeat).is_ok(),
        _ => {
            kerror!("unknown control command: {}", cmd);
            false
        }
    }
}

/// Register a read-Event on `fd` that takes `pause`/`resume` lines for
/// `heartbeat`. `reply` gets each command's outcome; EOF exits the loop.
pub fn add_control_event<R>(
    reactor: &mut EventReactor,
    fd: RawFd,
    heartbeat: EventRef,
    mut reply: R,
) -> Result<EventRef>
where
    R: FnMut(bool) + 'static,
{
    let mut input = ControlInput {
        fd,
        pending: Vec::new(),
    };
    reactor.add_read_event(fd, move |reactor| {
        let read = match input.read() {
            Ok(read) => read,
            Err(e) => {
                kerror!("reading control input failed: {}", e);
                return EventAction::Fatal;
            }
        };
        for cmd in read.lines.iter().filter(|l| !l.is_empty()) {
            reply(run_control(reactor, heartbeat, cmd));
        }
        if read.eof {
            kinfo!("control input closed");
            return EventAction::ExitLoop;
        }
        EventAction::Continue
    })
}

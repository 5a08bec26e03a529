//! `Workload` backed by `std::process::Command`.

use ioloop::{kdebug, LoopError, Result, Workload};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus};

pub struct ChildWorkload {
    program: String,
    args: Vec<String>,
    child: Option<Child>,
}

fn io_error(e: std::io::Error) -> LoopError {
    LoopError::Os(Errno::from_raw(e.raw_os_error().unwrap_or(libc::EIO)))
}

fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signo)) => 128 + signo,
        (None, None) => 1,
    }
}

impl ChildWorkload {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            child: None,
        }
    }

    /// True once the child has exited. Reaps it if so.
    pub fn has_exited(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => false,
        }
    }

    /// Send `signal` to a child that is still running.
    pub fn signal(&mut self, signal: Signal) -> Result<()> {
        let pid = self.pid().ok_or(LoopError::Os(Errno::ECHILD))?;
        if self.has_exited() {
            return Ok(());
        }
        kill(Pid::from_raw(pid), signal)?;
        Ok(())
    }
}

impl Workload for ChildWorkload {
    fn start(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Err(LoopError::Os(Errno::EALREADY));
        }
        let child = Command::new(&self.program)
            .args(&self.args)
            .spawn()
            .map_err(io_error)?;
        kdebug!("started {} as pid {}", self.program, child.id());
        self.child = Some(child);
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.child.is_some()
    }

    fn pid(&self) -> Option<i32> {
        self.child.as_ref().map(|c| c.id() as i32)
    }

    fn wait_child_process(&mut self) -> Result<i32> {
        let child = self.child.as_mut().ok_or(LoopError::Os(Errno::ECHILD))?;
        let status = child.wait().map_err(io_error)?;
        Ok(exit_code(status))
    }
}

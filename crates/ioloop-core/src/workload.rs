//! Workload contract.
//!
//! The controller forks a workload child and learns about its exit through
//! a SIGCHLD signal-Event registered on the reactor. Process spawning
//! itself lives outside this workspace's libraries; a concrete
//! implementation lives in `cmd/supervise`.

use crate::error::Result;

/// A child process the controller starts and reaps.
pub trait Workload {
    /// Start the child. Fails if it is already started or can't be spawned.
    fn start(&mut self) -> Result<()>;

    fn is_started(&self) -> bool;

    /// Pid of the started child.
    fn pid(&self) -> Option<i32>;

    /// Block until the child exits and return its exit code.
    ///
    /// A child killed by a signal reports `128 + signo`.
    fn wait_child_process(&mut self) -> Result<i32>;
}

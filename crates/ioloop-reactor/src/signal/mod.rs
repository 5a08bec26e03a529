//! Signal delivery into the event loop
//!
//! Handlers only write the signal number into a self-pipe; callbacks run
//! later on the reactor thread like any other Event.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::signal_is_ignored;
        pub(crate) use unix::SignalPipe;
    }
}

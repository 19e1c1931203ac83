//! Process-group signalling.
//!
//! Children are spawned as leaders of their own process group so a signal
//! reaches any grandchildren a script may have forked.

use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
}

/// Make the child the leader of a new process group.
pub fn isolate(command: &mut Command) {
    #[cfg(unix)]
    command.process_group(0);
    #[cfg(not(unix))]
    let _ = command;
}

/// Signal the process group led by `pid`. Returns false if it no longer exists.
#[cfg(unix)]
pub fn signal_group(pid: u32, signal: Signal) -> bool {
    use nix::sys::signal::{Signal as OsSignal, killpg};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(pid) else {
        return false;
    };
    if pgid <= 0 {
        return false;
    }
    let signal = match signal {
        Signal::Terminate => OsSignal::SIGTERM,
        Signal::Kill => OsSignal::SIGKILL,
    };
    killpg(Pid::from_raw(pgid), signal).is_ok()
}

#[cfg(not(unix))]
pub fn signal_group(_pid: u32, _signal: Signal) -> bool {
    false
}

//! Process liveness probing.
//!
//! A PID lock is only as good as the liveness test behind it. We probe with the null
//! signal and distinguish three outcomes:
//!
//! - delivered → alive
//! - `EPERM` → alive, owned by another user (never treat as dead)
//! - `ESRCH` → dead
//!
//! Any other errno is treated as alive: a false "alive" only delays a restore until
//! the next startup, a false "dead" would tear down a live session's overlay.

use std::cell::RefCell;

use sysinfo::{Pid, ProcessRefreshKind, System};

thread_local! {
    static SYSTEM_CACHE: RefCell<Option<System>> = const { RefCell::new(None) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// Exists but we may not signal it.
    AliveOtherUser,
    Dead,
}

impl Liveness {
    pub fn is_alive(self) -> bool {
        !matches!(self, Liveness::Dead)
    }
}

/// Probes a PID with signal 0.
#[cfg(unix)]
pub fn probe_pid(pid: u32) -> Liveness {
    // kill(0, ..) and negative pids address process groups.
    if pid == 0 || pid > i32::MAX as u32 {
        return Liveness::Dead;
    }
    // SAFETY: signal 0 performs permission and existence checks only.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return Liveness::Alive;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(code) if code == libc::ESRCH => Liveness::Dead,
        Some(code) if code == libc::EPERM => Liveness::AliveOtherUser,
        _ => Liveness::Alive,
    }
}

#[cfg(not(unix))]
pub fn probe_pid(pid: u32) -> Liveness {
    if process_start_time(pid).is_some() {
        Liveness::Alive
    } else {
        Liveness::Dead
    }
}

pub fn is_pid_alive(pid: u32) -> bool {
    probe_pid(pid).is_alive()
}

/// Start time of a process (Unix seconds), if it can be queried.
/// Refreshes only the requested PID.
pub fn process_start_time(pid: u32) -> Option<u64> {
    with_process(pid, |process| process.start_time())
}

/// Executable name of a process, for diagnostics.
pub fn process_name(pid: u32) -> Option<String> {
    with_process(pid, |process| process.name().to_string())
}

fn with_process<T>(pid: u32, f: impl FnOnce(&sysinfo::Process) -> T) -> Option<T> {
    SYSTEM_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        let sys = cache.get_or_insert_with(System::new);
        let sys_pid = Pid::from(pid as usize);
        sys.refresh_process_specifics(sys_pid, ProcessRefreshKind::new());
        sys.process(sys_pid).map(f)
    })
}

/*
 * kill.rs
 *
 * SIGKILL a process and everything below it.
 *
 * The root is nearly always `sh -c ...`, and the real work happens in its
 * children and grandchildren. Killing only the shell orphans them to init
 * and they keep running. So: enumerate children, kill the parent, recurse.
 *
 * Children are enumerated fresh at every level, never cached from launch.
 * Anything can fork between launch and timeout.
 *
 * ESRCH everywhere is normal. Processes die while we're looking at them.
 */

use std::collections::HashSet;

use sysinfo::{Pid, ProcessRefreshKind, System};
use tracing::{debug, warn};

/// What happened when we sent SIGKILL to one pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signalled {
    Killed,
    /// already exited (ESRCH)
    Gone,
    /// EPERM - setuid child or similar, nothing we can do
    Denied,
}

/// Seam between the tree walk and the OS.
///
/// `children` returns `None` when the process no longer exists.
pub trait ProcessTable {
    fn children(&mut self, pid: u32) -> Option<Vec<u32>>;
    fn kill(&mut self, pid: u32) -> Signalled;
}

/* counts, for the log line. never an error. */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KillReport {
    pub killed: usize,
    pub gone: usize,
    pub denied: usize,
}

impl KillReport {
    fn record(&mut self, outcome: Signalled) {
        match outcome {
            Signalled::Killed => self.killed += 1,
            Signalled::Gone => self.gone += 1,
            Signalled::Denied => self.denied += 1,
        }
    }
}

/// Walk the tree rooted at `root` and SIGKILL every process in it.
///
/// For each process: enumerate direct children first, then kill it, then
/// descend into the children. A process that vanished before we could list
/// it is skipped. The visited set guards against pid reuse looping us.
pub fn kill_tree<T: ProcessTable>(table: &mut T, root: u32) -> KillReport {
    let mut report = KillReport::default();
    let mut visited = HashSet::new();
    let mut stack = vec![root];

    while let Some(pid) = stack.pop() {
        if !visited.insert(pid) {
            continue;
        }

        /* list before killing: once dead, its children get reparented */
        let Some(children) = table.children(pid) else {
            debug!(pid, "process already gone");
            report.gone += 1;
            continue;
        };

        let outcome = table.kill(pid);
        debug!(pid, ?outcome, children = children.len(), "sent SIGKILL");
        report.record(outcome);

        stack.extend(children);
    }

    report
}

/// Kill `pid` and all of its descendants using the live process table.
pub fn kill_process_tree(pid: u32) -> KillReport {
    let mut table = SystemProcessTable::new();
    let report = kill_tree(&mut table, pid);
    if report.denied > 0 {
        warn!(
            pid,
            denied = report.denied,
            "some processes in the tree could not be killed"
        );
    }
    report
}

/// `ProcessTable` backed by a sysinfo snapshot plus `kill(2)`.
pub struct SystemProcessTable {
    sys: System,
}

impl SystemProcessTable {
    #[must_use]
    pub fn new() -> Self {
        Self { sys: System::new() }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn children(&mut self, pid: u32) -> Option<Vec<u32>> {
        /* parent pids come with every refresh, no extra kinds needed */
        self.sys.refresh_processes_specifics(ProcessRefreshKind::new());

        let target = Pid::from_u32(pid);
        self.sys.process(target)?;

        let children = self
            .sys
            .processes()
            .iter()
            .filter(|(child, proc_)| **child != target && proc_.parent() == Some(target))
            .map(|(child, _)| child.as_u32())
            .collect();
        Some(children)
    }

    fn kill(&mut self, pid: u32) -> Signalled {
        send_sigkill(pid)
    }
}

/* SIGKILL one pid. ESRCH = already dead, that's fine. */
pub(crate) fn send_sigkill(pid: u32) -> Signalled {
    send_signal(pid, libc::SIGKILL)
}

/* any signal to one pid */
#[allow(clippy::cast_possible_wrap)]
pub(crate) fn send_signal(pid: u32, sig: i32) -> Signalled {
    /* pid 0 / -1 would hit our own group or everything we can see */
    if pid == 0 || pid > i32::MAX as u32 {
        return Signalled::Gone;
    }

    // SAFETY: kill() is safe with any pid/signal combo, returns -1 on error
    let ret = unsafe { libc::kill(pid as i32, sig) };
    if ret == 0 {
        return Signalled::Killed;
    }

    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => Signalled::Gone,
        _ => Signalled::Denied,
    }
}

/* SIGKILL a whole process group. used after the tree walk to catch strays. */
pub(crate) fn kill_process_group(pgid: u32) -> Signalled {
    signal_process_group(pgid, libc::SIGKILL)
}

/* any signal to a whole process group */
#[allow(clippy::cast_possible_wrap)]
pub(crate) fn signal_process_group(pgid: u32, sig: i32) -> Signalled {
    if pgid <= 1 || pgid > i32::MAX as u32 {
        return Signalled::Gone;
    }

    // SAFETY: killpg() is safe with any pgid/signal combo, returns -1 on error
    let ret = unsafe { libc::killpg(pgid as i32, sig) };
    if ret == 0 {
        return Signalled::Killed;
    }

    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => Signalled::Gone,
        _ => Signalled::Denied,
    }
}

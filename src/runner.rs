/*
 * runner.rs
 *
 * Spawn child, watch clock, kill the whole tree if needed.
 *
 * Polling, not waiting on an event. Every iteration: has it exited? did we
 * catch a signal? is the deadline gone? if none of those, sleep
 * min(poll interval, time left). One deadline comparison per turn, so the
 * overshoot is at most one interval and usually zero since the last sleep
 * is clamped to the time left. A zero timeout has no deadline at all but
 * still polls, so signals are still noticed.
 *
 * On timeout:
 *   1. tell stderr which pid we're killing (cron mails it)
 *   2. walk the tree from the child, SIGKILL everything found
 *   3. killpg the child's group for anything that escaped the walk
 *   4. reap the child so it doesn't sit around as a zombie
 * None of that can fail the run. It's already a timeout.
 *
 * On SIGTERM/SIGINT/SIGHUP: pass the same signal to the child's group (or
 * just the child in foreground mode), give it SIGNAL_GRACE to exit, then
 * tear down like a timeout. We only return once the tree is gone, so the
 * lock is never released while the job still runs.
 */

use std::path::PathBuf;
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Result, WrapError, exit_codes};
use crate::kill::{
    KillReport, kill_process_group, kill_process_tree, send_signal, signal_process_group,
};
use crate::process::{spawn_shell, status_to_exit_code};
use crate::signal::{SignalGuard, signal_name};

/// Default hard timeout for a run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// How often the child is checked while it runs.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long a forwarded signal gets before the tree is SIGKILLed.
pub const SIGNAL_GRACE: Duration = Duration::from_secs(2);

/* how often the child is checked during the grace period */
const GRACE_POLL: Duration = Duration::from_millis(50);

/* runtime config for one supervised command */
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub timeout: Duration,        /* zero = no deadline */
    pub shell: Option<PathBuf>,   /* None = /bin/sh */
    pub foreground: bool,         /* don't create a process group */
    pub poll_interval: Duration,  /* liveness check granularity */
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            shell: None,
            foreground: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/* what happened to the command */
#[derive(Debug)]
pub enum RunResult {
    Completed(ExitStatus),
    TimedOut {
        pid: u32,           /* root of the tree we killed */
        report: KillReport, /* how the teardown went */
    },
    Interrupted {
        signal: i32,                /* what we caught and passed on */
        status: Option<ExitStatus>, /* None if it had to be SIGKILLed */
    },
}

impl RunResult {
    /// Exit code cronwrap should return for this result.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Completed(status) => status_to_exit_code(status),
            Self::TimedOut { .. } => exit_codes::TIMEOUT,
            Self::Interrupted { signal, status } => status.as_ref().map_or_else(
                || u8::try_from(128 + signal).unwrap_or(exit_codes::INTERNAL_ERROR),
                status_to_exit_code,
            ),
        }
    }

    #[must_use]
    pub fn timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/* one turn of the poll loop */
#[derive(Debug)]
enum Poll {
    Exited(ExitStatus),
    Signalled(i32),
    DeadlineReached,
    Sleep(Duration),
}

/* decide what to do this turn. pure, so the loop stays trivial. */
fn next_step(
    exited: Option<ExitStatus>,
    pending: Option<i32>,
    elapsed: Duration,
    config: &RunConfig,
) -> Poll {
    if let Some(status) = exited {
        return Poll::Exited(status);
    }
    if let Some(sig) = pending {
        return Poll::Signalled(sig);
    }
    if config.timeout.is_zero() {
        return Poll::Sleep(config.poll_interval);
    }
    if elapsed >= config.timeout {
        return Poll::DeadlineReached;
    }
    Poll::Sleep(config.poll_interval.min(config.timeout - elapsed))
}

/// Spawn `command` under the configured shell and enforce the timeout.
///
/// SIGTERM, SIGINT and SIGHUP received meanwhile are passed on to the
/// command; see [`RunResult::Interrupted`].
///
/// # Errors
/// Spawn failures (shell missing, not executable) and `waitpid` failures.
/// A timeout is not an error, it's `RunResult::TimedOut`.
pub fn run_command(command: &str, config: &RunConfig) -> Result<RunResult> {
    /* before spawn, so a signal can't slip in between */
    let signals = SignalGuard::install();

    let use_process_group = !config.foreground;
    let mut child = spawn_shell(command, config.shell.as_deref(), use_process_group)?;

    monitor(&mut child, &signals, config)
}

fn monitor(child: &mut Child, signals: &SignalGuard, config: &RunConfig) -> Result<RunResult> {
    let start = Instant::now();

    loop {
        let exited = child.try_wait().map_err(WrapError::Wait)?;
        match next_step(exited, signals.take_pending(), start.elapsed(), config) {
            Poll::Exited(status) => {
                debug!(pid = child.id(), ?status, "command exited");
                return Ok(RunResult::Completed(status));
            }
            Poll::Signalled(sig) => return Ok(forward_and_wait(child, sig, config.foreground)),
            Poll::DeadlineReached => break,
            Poll::Sleep(d) => thread::sleep(d),
        }
    }

    let pid = child.id();
    eprintln!("timeout => kill -9 {pid}");
    info!(pid, timeout_secs = config.timeout.as_secs(), "timeout reached, killing process tree");

    let report = teardown(child, config.foreground);
    Ok(RunResult::TimedOut { pid, report })
}

/* pass the signal on, wait out the grace period, then force it */
fn forward_and_wait(child: &mut Child, sig: i32, foreground: bool) -> RunResult {
    let pid = child.id();
    let outcome = if foreground {
        send_signal(pid, sig)
    } else {
        signal_process_group(pid, sig)
    };
    info!(pid, signal = signal_name(sig), ?outcome, "forwarded signal to command");

    let deadline = Instant::now() + SIGNAL_GRACE;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(status)) => {
                /* root is gone; sweep whatever else is left in its group */
                if !foreground {
                    let swept = kill_process_group(pid);
                    debug!(pgid = pid, ?swept, "swept process group after signal");
                }
                return RunResult::Interrupted {
                    signal: sig,
                    status: Some(status),
                };
            }
            Ok(None) => thread::sleep(GRACE_POLL),
            Err(e) => {
                debug!(pid, error = %e, "try_wait failed during grace period");
                break;
            }
        }
    }

    warn!(pid, signal = signal_name(sig), "command ignored forwarded signal, killing process tree");
    teardown(child, foreground);
    RunResult::Interrupted {
        signal: sig,
        status: None,
    }
}

/* kill everything and reap. best-effort end to end. */
fn teardown(child: &mut Child, foreground: bool) -> KillReport {
    let pid = child.id();
    let report = kill_process_tree(pid);

    /* the root's pid is its pgid (set at spawn) */
    if !foreground {
        let outcome = kill_process_group(pid);
        debug!(pgid = pid, ?outcome, "sent SIGKILL to process group");
    }

    /* SIGKILL can't be caught, so this returns promptly */
    if let Err(e) = child.wait() {
        debug!(pid, error = %e, "could not reap killed command");
    }

    debug!(
        pid,
        killed = report.killed,
        gone = report.gone,
        denied = report.denied,
        "process tree torn down"
    );
    report
}

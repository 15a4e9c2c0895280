/*
 * job.rs
 *
 * One cron invocation, start to finish:
 *
 *   delay -> lock -> run -> release
 *
 * Lock contention is not an error. Cron fired while the previous run is
 * still going; skipping is the whole point of --lock. Exit 0 so nobody
 * gets paged.
 *
 * The lock handle is held across run_command and released after it
 * returns, whatever it returned. A run that errors out (shell missing)
 * releases too: `?` drops the handle, and Drop releases.
 */

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use crate::args::{Args, LockTimeoutBehaviour};
use crate::command::{CommandSpec, join_command};
use crate::delay::random_sleep;
use crate::error::{Result, exit_codes};
use crate::lock::{LockKey, SingleInstanceLock};
use crate::runner::{RunConfig, RunResult, run_command};

/// How one invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// command exited on its own, with this exit code
    Completed(u8),
    /// command hit the timeout and its tree was killed
    TimedOut,
    /// another run holds the lock; nothing was started
    LockUnavailable,
    /// we caught a terminating signal and passed it on; carries the exit code
    Interrupted(u8),
}

impl RunOutcome {
    #[must_use]
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Completed(code) | Self::Interrupted(code) => code,
            Self::TimedOut => exit_codes::TIMEOUT,
            Self::LockUnavailable => exit_codes::SUCCESS,
        }
    }
}

impl From<&RunResult> for RunOutcome {
    fn from(result: &RunResult) -> Self {
        match result {
            RunResult::Completed(_) => Self::Completed(result.exit_code()),
            RunResult::TimedOut { .. } => Self::TimedOut,
            RunResult::Interrupted { .. } => Self::Interrupted(result.exit_code()),
        }
    }
}

/* lock settings, present only when --lock is on */
#[derive(Debug, Clone)]
pub struct LockConfig {
    pub dir: PathBuf,                         /* where lock files live */
    pub wait: Duration,                       /* bounded acquisition wait */
    pub on_unavailable: LockTimeoutBehaviour, /* message routing */
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir(),
            wait: crate::lock::DEFAULT_WAIT,
            on_unavailable: LockTimeoutBehaviour::PrintStdout,
        }
    }
}

/* everything one invocation needs */
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub original_command: String, /* what the user asked for, for messages */
    pub command: String,          /* what the shell runs, also the lock key input */
    pub random_sleep: Duration,   /* upper bound, zero = no delay */
    pub lock: Option<LockConfig>,
    pub run: RunConfig,
}

impl JobConfig {
    /// Config for running `command` as-is, no lock, no delay.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            original_command: command.clone(),
            command,
            random_sleep: Duration::ZERO,
            lock: None,
            run: RunConfig::default(),
        }
    }

    /// Build from parsed CLI args.
    #[must_use]
    pub fn from_args(args: &Args) -> Self {
        let (first, rest) = args
            .command
            .split_first()
            .map_or(("", &[][..]), |(first, rest)| (first.as_str(), rest));
        let original_command = join_command(first, rest);

        let spec = CommandSpec {
            command: original_command.clone(),
            env_file: args.load_env.then(|| args.load_env_file.clone()),
            nice: args.effective_nice(),
            ionice: args.effective_ionice(),
            log_capture_to: args.log_capture_to.clone(),
        };

        let lock = args.lock.then(|| LockConfig {
            wait: Duration::from_secs(args.wait_for_lock_timeout),
            on_unavailable: args.lock_timeout_behaviour,
            ..LockConfig::default()
        });

        Self {
            original_command,
            command: spec.build(),
            random_sleep: Duration::from_secs(args.random_sleep),
            lock,
            run: RunConfig {
                timeout: Duration::from_secs(args.timeout),
                shell: args.shell.clone(),
                foreground: args.foreground,
                ..RunConfig::default()
            },
        }
    }
}

/// Run one invocation: delay, lock, supervise, release.
///
/// # Errors
/// Only spawn/wait failures. Lock contention and timeouts are outcomes.
pub fn run_job(config: &JobConfig) -> Result<RunOutcome> {
    if !config.random_sleep.is_zero() {
        random_sleep(config.random_sleep);
    }

    let handle = match config.lock {
        Some(ref lock_cfg) => {
            let key = LockKey::from_command(&config.command);
            let lock = SingleInstanceLock::new(&lock_cfg.dir, &key);
            match lock.acquire(lock_cfg.wait) {
                Some(handle) => Some(handle),
                None => {
                    info!(lock_path = %lock.path().display(), "lock held by another run, skipping");
                    report_lock_unavailable(lock_cfg.on_unavailable, &config.original_command);
                    return Ok(RunOutcome::LockUnavailable);
                }
            }
        }
        None => None,
    };

    let result = run_command(&config.command, &config.run)?;
    let outcome = RunOutcome::from(&result);
    debug!(?outcome, "run finished");

    if let Some(handle) = handle {
        handle.release();
    }

    Ok(outcome)
}

/* the skip message. wording kept from cron-wrapper, people grep for it */
fn lock_unavailable_message(original_command: &str) -> String {
    format!("can't acquire lock for executing {original_command} => can be a normal behaviour")
}

fn report_lock_unavailable(behaviour: LockTimeoutBehaviour, original_command: &str) {
    match behaviour {
        LockTimeoutBehaviour::PrintStdout => println!("{}", lock_unavailable_message(original_command)),
        LockTimeoutBehaviour::PrintStderr => eprintln!("{}", lock_unavailable_message(original_command)),
        LockTimeoutBehaviour::Nothing => {}
    }
}

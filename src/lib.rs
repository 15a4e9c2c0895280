/*
 * lib.rs
 *
 * The binary is a thin shell over this. Every stage of a cron run (delay,
 * lock, supervise, tree kill) is a public module so it can be driven and
 * tested on its own.
 */

//! # cronwrap
//!
//! A cron job wrapper: single-instance locking, a hard timeout that kills
//! the whole process tree, random startup delay, env loading and
//! `nice`/`ionice` prefixes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cronwrap::job::{JobConfig, run_job};
//! use std::time::Duration;
//!
//! let mut config = JobConfig::new("backup.sh --full");
//! config.run.timeout = Duration::from_secs(600);
//!
//! let outcome = run_job(&config).unwrap();
//! std::process::exit(i32::from(outcome.exit_code()));
//! ```

pub mod args;
pub mod command;
pub mod delay;
pub mod error;
pub mod job;
pub mod kill;
pub mod lock;
pub mod logging;
pub mod process;
pub mod runner;
pub mod signal;

pub use args::{Args, LockTimeoutBehaviour};
pub use command::CommandSpec;
pub use error::{Result, WrapError, exit_codes};
pub use job::{JobConfig, LockConfig, RunOutcome, run_job};
pub use kill::{KillReport, kill_process_tree};
pub use lock::{LockHandle, LockKey, SingleInstanceLock};
pub use runner::{RunConfig, RunResult, run_command};

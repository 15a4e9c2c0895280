/*
 * process.rs
 *
 * Start `<shell> -c <command>` and turn its exit status into a byte.
 *
 * The child goes into its own process group (pgid = its pid) unless the
 * caller asks for foreground mode. That gives the timeout path a second
 * net: after the tree walk, killpg() catches anything that slipped out of
 * the parent/child chain but stayed in the group.
 *
 * stdin/stdout/stderr are inherited. cron mails whatever the job prints.
 */

use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};

use tracing::debug;

use crate::error::{Result, WrapError};

/// Shell used when none is given.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Build the `Command` for `<shell> -c <command>`.
#[must_use]
pub fn shell_command(command: &str, shell: Option<&Path>, use_process_group: bool) -> Command {
    let shell = shell.unwrap_or_else(|| Path::new(DEFAULT_SHELL));
    let mut cmd = Command::new(shell);
    cmd.arg("-c").arg(command);
    if use_process_group {
        cmd.process_group(0); /* own group */
    }
    cmd
}

/// Spawn `command` under `shell`.
///
/// # Errors
/// `ShellNotFound` / `ShellPermissionDenied` when the shell itself can't be
/// started, `Spawn` for anything else. A command that doesn't exist *inside*
/// the shell is the shell's problem (it exits 127 on its own).
pub fn spawn_shell(command: &str, shell: Option<&Path>, use_process_group: bool) -> Result<Child> {
    let child = shell_command(command, shell, use_process_group)
        .spawn()
        .map_err(|e| {
            let shell = shell.map_or_else(|| PathBuf::from(DEFAULT_SHELL), Path::to_path_buf);
            WrapError::from_spawn(shell, e)
        })?;

    debug!(pid = child.id(), process_group = use_process_group, "spawned command");
    Ok(child)
}

/* exit status to 8-bit code, POSIX style: 128 + signum when signalled */
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub fn status_to_exit_code(status: &ExitStatus) -> u8 {
    if let Some(sig) = status.signal() {
        return ((128 + sig) & 0xFF) as u8;
    }

    (status.code().unwrap_or(1) & 0xFF) as u8
}

/*
 * These tests are skipped under Miri because process spawning and waitpid
 * are unsupported foreign functions.
 */

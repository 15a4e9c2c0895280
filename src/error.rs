/*
 * error.rs
 *
 * 12 = killed on timeout. cron jobs and monitoring already key on it,
 * so it stays 12 even though GNU timeout uses 124.
 * 125..127 follow the usual shell convention for our own failures.
 */

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// exit codes. don't change these.
pub mod exit_codes {
    /// Command completed successfully, or the run was skipped (lock held)
    pub const SUCCESS: u8 = 0;
    /// Command ran too long and was killed
    pub const TIMEOUT: u8 = 12;
    /// cronwrap itself failed (internal error)
    pub const INTERNAL_ERROR: u8 = 125;
    /// Shell found but couldn't be executed (permissions)
    pub const CANNOT_INVOKE: u8 = 126;
    /// Shell not found
    pub const NOT_FOUND: u8 = 127;
}

/* everything that can go wrong */
#[derive(Debug, Error)]
pub enum WrapError {
    #[error("shell not found: {}", .0.display())]
    ShellNotFound(PathBuf),

    #[error("permission denied: {}", .0.display())]
    ShellPermissionDenied(PathBuf),

    #[error("failed to spawn {}: {source}", shell.display())]
    Spawn {
        shell: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for command: {0}")]
    Wait(#[source] io::Error),
}

impl WrapError {
    /* map errors to exit codes. 126 vs 127 matters to scripts. */
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::ShellNotFound(_) => exit_codes::NOT_FOUND,
            Self::ShellPermissionDenied(_) => exit_codes::CANNOT_INVOKE,
            Self::Spawn { .. } | Self::Wait(_) => exit_codes::INTERNAL_ERROR,
        }
    }

    /* classify a spawn failure by errno */
    pub(crate) fn from_spawn(shell: PathBuf, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::ShellNotFound(shell),
            io::ErrorKind::PermissionDenied => Self::ShellPermissionDenied(shell),
            _ => Self::Spawn { shell, source },
        }
    }
}

pub type Result<T> = std::result::Result<T, WrapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_not_found_maps_to_127() {
        let err = WrapError::from_spawn(
            PathBuf::from("/nonexistent/sh"),
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert!(matches!(err, WrapError::ShellNotFound(_)));
        assert_eq!(err.exit_code(), exit_codes::NOT_FOUND);
        assert!(err.to_string().contains("/nonexistent/sh"));
    }

    #[test]
    fn test_spawn_permission_denied_maps_to_126() {
        let err = WrapError::from_spawn(
            PathBuf::from("/etc/passwd"),
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert_eq!(err.exit_code(), exit_codes::CANNOT_INVOKE);
    }

    #[test]
    fn test_other_spawn_errors_are_internal() {
        let err = WrapError::from_spawn(PathBuf::from("/bin/sh"), io::Error::other("boom"));
        assert_eq!(err.exit_code(), exit_codes::INTERNAL_ERROR);
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_timeout_code_is_not_a_common_shell_code() {
        /* 12 must not collide with the shell's own 126/127/128+N range */
        assert!(exit_codes::TIMEOUT < 126);
        assert_ne!(exit_codes::TIMEOUT, exit_codes::SUCCESS);
    }
}

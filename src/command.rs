/*
 * command.rs
 *
 * Turn flags into the one string the shell runs:
 *
 *   [ -r ENVFILE ] && . ENVFILE >/dev/null 2>&1 ; nice -n N ionice -c C log_proxy_wrapper --stdout LOG --stderr STDOUT -- COMMAND
 *
 * Every piece is optional except COMMAND. Order is fixed: env first so the
 * rest can see PATH from it, then priority, then capture, then the job.
 *
 * The result is also the lock key input, so two crontab lines that differ
 * only in --nice are two different locks.
 *
 * `.` rather than `source`: /bin/sh is dash on plenty of boxes. A failed
 * `.` aborts a non-interactive sh, hence the -r test in front of it.
 */

use std::fmt::Write as _;

/// Everything that goes into the final shell string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// user's command, already joined with its args
    pub command: String,
    /// env file to source first, if any
    pub env_file: Option<String>,
    /// `nice -n` value
    pub nice: Option<i32>,
    /// `ionice -c` class
    pub ionice: Option<u8>,
    /// log_proxy_wrapper target
    pub log_capture_to: Option<String>,
}

impl CommandSpec {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Assemble the full command string.
    ///
    /// ```
    /// use cronwrap::command::CommandSpec;
    ///
    /// let spec = CommandSpec {
    ///     nice: Some(19),
    ///     ionice: Some(3),
    ///     ..CommandSpec::new("backup.sh")
    /// };
    /// assert_eq!(spec.build(), "nice -n 19 ionice -c 3 backup.sh");
    /// ```
    #[must_use]
    pub fn build(&self) -> String {
        let mut out = String::with_capacity(self.command.len() + 64);

        if let Some(ref env_file) = self.env_file {
            let _ = write!(out, "[ -r {env_file} ] && . {env_file} >/dev/null 2>&1 ; ");
        }
        if let Some(nice) = self.nice {
            let _ = write!(out, "nice -n {nice} ");
        }
        if let Some(class) = self.ionice {
            let _ = write!(out, "ionice -c {class} ");
        }
        if let Some(ref log) = self.log_capture_to {
            let _ = write!(out, "log_proxy_wrapper --stdout {log} --stderr STDOUT -- ");
        }

        out.push_str(&self.command);
        out
    }
}

/// Join COMMAND and its trailing args the way the user typed them.
#[must_use]
pub fn join_command(command: &str, args: &[String]) -> String {
    let mut out = String::from(command);
    for arg in args {
        out.push(' ');
        out.push_str(arg);
    }
    out
}

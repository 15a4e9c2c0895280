/*
 * args.rs
 *
 * Clap derive macros handle parsing. Life's too short to do this by hand.
 *
 * Flag names and short forms match the old cron-wrapper tool so existing
 * crontabs keep working. New flags (--foreground, --log-level) are long-only.
 *
 * COMMAND is a trailing var arg: `cronwrap -t 60 ls -l /tmp` hands
 * `ls -l /tmp` to the shell without clap trying to parse `-l` as --lock.
 * Quoting the whole thing (`cronwrap "ls -l /tmp"`) works too.
 */

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// What to print when the lock is held by another run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LockTimeoutBehaviour {
    #[default]
    #[value(name = "print_stdout")]
    PrintStdout,
    #[value(name = "print_stderr")]
    PrintStderr,
    #[value(name = "nothing")]
    Nothing,
}

#[derive(Parser, Debug)]
#[command(
    name = "cronwrap",
    version,
    about = "A cron job wrapper to add some missing features (locks, timeouts, random sleeps, env loading...)",
    long_about = "Run COMMAND through a shell with a hard timeout, an optional single-instance \
                  lock and an optional random startup delay.\n\n\
                  On timeout the command and every process it spawned are killed with SIGKILL.\n\n\
                  With --lock, a second run of the exact same command is skipped (exit 0) while \
                  the first one is still going.\n\n\
                  Examples:\n\
                    cronwrap --lock --timeout 600 backup.sh --full\n\
                    cronwrap -r 300 --low -e -- rsync -a /src /dst",
    after_help = "Exit status:\n\
                  0   if COMMAND succeeded, or the run was skipped because the lock is held\n\
                  12  if COMMAND timed out and was killed\n\
                  125 if cronwrap itself fails\n\
                  126 if the shell is found but cannot be invoked\n\
                  127 if the shell cannot be found\n\
                  the exit status of COMMAND otherwise (128+N if it died from signal N)"
)]
pub struct Args {
    /// Command timeout in seconds; 0 means no timeout.
    #[arg(
        short = 't',
        long = "timeout",
        value_name = "SECONDS",
        default_value_t = 3600,
        env = "CRONWRAP_TIMEOUT"
    )]
    pub timeout: u64,

    /// Wait a random number of seconds between 0 and SECONDS before running.
    #[arg(
        short = 'r',
        long = "random-sleep",
        value_name = "SECONDS",
        default_value_t = 0,
        env = "CRONWRAP_RANDOM_SLEEP"
    )]
    pub random_sleep: u64,

    /// Don't run the command if another run of it is still going.
    #[arg(short = 'l', long = "lock")]
    pub lock: bool,

    /// How long to wait for the lock before giving up, in seconds.
    #[arg(
        short = 'w',
        long = "wait-for-lock-timeout",
        value_name = "SECONDS",
        default_value_t = 1
    )]
    pub wait_for_lock_timeout: u64,

    /// What to do when the lock can't be acquired.
    #[arg(
        short = 'b',
        long = "lock-timeout-behaviour",
        visible_alias = "lock-timeout-behavior",
        value_enum,
        default_value_t = LockTimeoutBehaviour::PrintStdout
    )]
    pub lock_timeout_behaviour: LockTimeoutBehaviour,

    /// Load the environment file before running the command.
    #[arg(short = 'e', long = "load-env")]
    pub load_env: bool,

    /// Environment file to load when --load-env is set.
    #[arg(
        short = 'f',
        long = "load-env-file",
        value_name = "PATH",
        default_value = "~/.bashrc"
    )]
    pub load_env_file: String,

    /// Full path of the shell to use (default: /bin/sh).
    #[arg(short = 's', long = "shell", value_name = "PATH", env = "CRONWRAP_SHELL")]
    pub shell: Option<PathBuf>,

    /// 'nice' value, from -20 (most favorable scheduling) to 19 (least favorable).
    #[arg(
        short = 'n',
        long = "nice",
        value_name = "N",
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i32).range(-20..=19)
    )]
    pub nice: Option<i32>,

    /// 'ionice' class: 1 for realtime, 2 for best-effort, 3 for idle.
    #[arg(
        short = 'i',
        long = "ionice",
        value_name = "CLASS",
        value_parser = clap::value_parser!(u8).range(1..=3)
    )]
    pub ionice: Option<u8>,

    /// Shortcut for '-i 3 -n 19' (minimum priority).
    #[arg(long = "low", conflicts_with_all = ["nice", "ionice"])]
    pub low: bool,

    /// Capture stdout/stderr to this log file through log_proxy_wrapper.
    #[arg(long = "log-capture-to", value_name = "PATH")]
    pub log_capture_to: Option<String>,

    /// Keep the command in cronwrap's process group.
    ///
    /// Without this, the command gets its own group so the whole group can
    /// be killed on timeout.
    #[arg(long = "foreground")]
    pub foreground: bool,

    /// Filter for cronwrap's own diagnostics (tracing EnvFilter syntax).
    #[arg(
        long = "log-level",
        value_name = "FILTER",
        default_value = "warn",
        env = "CRONWRAP_LOG"
    )]
    pub log_level: String,

    /// Command to execute, and its arguments.
    #[arg(value_name = "COMMAND", required = true, trailing_var_arg = true)]
    pub command: Vec<String>,
}

impl Args {
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /* nice value after applying --low */
    #[must_use]
    pub fn effective_nice(&self) -> Option<i32> {
        if self.low { Some(19) } else { self.nice }
    }

    /* ionice class after applying --low */
    #[must_use]
    pub fn effective_ionice(&self) -> Option<u8> {
        if self.low { Some(3) } else { self.ionice }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_args() {
        let args = Args::try_parse_from(["cronwrap", "echo"]).unwrap();
        assert_eq!(args.command, vec!["echo"]);
        assert_eq!(args.timeout, 3600);
        assert_eq!(args.random_sleep, 0);
        assert!(!args.lock);
        assert_eq!(args.wait_for_lock_timeout, 1);
        assert_eq!(args.lock_timeout_behaviour, LockTimeoutBehaviour::PrintStdout);
        assert!(!args.load_env);
        assert_eq!(args.load_env_file, "~/.bashrc");
        assert!(args.shell.is_none());
        assert!(args.nice.is_none());
        assert!(args.ionice.is_none());
        assert!(!args.low);
        assert!(args.log_capture_to.is_none());
        assert!(!args.foreground);
    }

    #[test]
    fn test_all_short_options() {
        let args = Args::try_parse_from([
            "cronwrap", "-t", "60", "-r", "30", "-l", "-w", "5", "-b", "nothing", "-e", "-f",
            "/etc/profile", "-s", "/bin/bash", "-n", "10", "-i", "2", "job.sh",
        ])
        .unwrap();

        assert_eq!(args.timeout, 60);
        assert_eq!(args.random_sleep, 30);
        assert!(args.lock);
        assert_eq!(args.wait_for_lock_timeout, 5);
        assert_eq!(args.lock_timeout_behaviour, LockTimeoutBehaviour::Nothing);
        assert!(args.load_env);
        assert_eq!(args.load_env_file, "/etc/profile");
        assert_eq!(args.shell, Some(PathBuf::from("/bin/bash")));
        assert_eq!(args.nice, Some(10));
        assert_eq!(args.ionice, Some(2));
        assert_eq!(args.command, vec!["job.sh"]);
    }

    #[test]
    fn test_long_options() {
        let args = Args::try_parse_from([
            "cronwrap",
            "--timeout=0",
            "--lock",
            "--lock-timeout-behaviour=print_stderr",
            "--log-capture-to",
            "/var/log/x.log",
            "--foreground",
            "x",
        ])
        .unwrap();

        assert_eq!(args.timeout, 0);
        assert!(args.lock);
        assert_eq!(args.lock_timeout_behaviour, LockTimeoutBehaviour::PrintStderr);
        assert_eq!(args.log_capture_to.as_deref(), Some("/var/log/x.log"));
        assert!(args.foreground);
    }

    #[test]
    fn test_trailing_args_not_parsed_as_flags() {
        let args = Args::try_parse_from(["cronwrap", "-t", "5", "ls", "-l", "/tmp"]).unwrap();
        assert_eq!(args.command, vec!["ls", "-l", "/tmp"]);
        assert!(!args.lock, "-l after COMMAND belongs to the command");
    }

    #[test]
    fn test_command_with_dashes() {
        let args = Args::try_parse_from(["cronwrap", "--", "-weird", "arg"]).unwrap();
        assert_eq!(args.command, vec!["-weird", "arg"]);
    }

    #[test]
    fn test_missing_command() {
        assert!(Args::try_parse_from(["cronwrap", "--lock"]).is_err());
    }

    #[test]
    fn test_negative_nice() {
        let args = Args::try_parse_from(["cronwrap", "-n", "-5", "x"]).unwrap();
        assert_eq!(args.nice, Some(-5));
    }

    #[test]
    fn test_nice_out_of_range() {
        assert!(Args::try_parse_from(["cronwrap", "-n", "20", "x"]).is_err());
        assert!(Args::try_parse_from(["cronwrap", "-n", "-21", "x"]).is_err());
    }

    #[test]
    fn test_ionice_out_of_range() {
        assert!(Args::try_parse_from(["cronwrap", "-i", "0", "x"]).is_err());
        assert!(Args::try_parse_from(["cronwrap", "-i", "4", "x"]).is_err());
    }

    #[test]
    fn test_low_sets_both() {
        let args = Args::try_parse_from(["cronwrap", "--low", "x"]).unwrap();
        assert_eq!(args.effective_nice(), Some(19));
        assert_eq!(args.effective_ionice(), Some(3));
    }

    #[test]
    fn test_low_conflicts_with_nice_and_ionice() {
        assert!(Args::try_parse_from(["cronwrap", "--low", "-n", "5", "x"]).is_err());
        assert!(Args::try_parse_from(["cronwrap", "--low", "-i", "2", "x"]).is_err());
    }

    #[test]
    fn test_invalid_lock_behaviour() {
        assert!(Args::try_parse_from(["cronwrap", "-b", "shout", "x"]).is_err());
    }

    #[test]
    fn test_american_spelling_alias() {
        let args =
            Args::try_parse_from(["cronwrap", "--lock-timeout-behavior", "nothing", "x"]).unwrap();
        assert_eq!(args.lock_timeout_behaviour, LockTimeoutBehaviour::Nothing);
    }
}

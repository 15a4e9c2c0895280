/*
 * main.rs
 *
 * Parse args, set up logging, run the job, exit. Boring on purpose.
 * The interesting stuff is in runner.rs, kill.rs and lock.rs.
 */

use cronwrap::args::Args;
use cronwrap::job::{JobConfig, run_job};
use cronwrap::logging;

fn main() {
    std::process::exit(i32::from(run_main()));
}

fn run_main() -> u8 {
    let args = Args::parse_args();
    logging::init(&args.log_level);

    let config = JobConfig::from_args(&args);
    tracing::debug!(command = %config.command, "assembled command");

    match run_job(&config) {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            eprintln!("cronwrap: {e}");
            e.exit_code()
        }
    }
}

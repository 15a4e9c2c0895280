/*
 * fuzz_targets/parse_args.rs
 *
 * fuzz target for CLI argument parsing. try_parse_from plus the derived
 * job config must never panic on arbitrary argument combinations.
 *
 * edge cases: "-lw", "--unknown", "-n" (missing value), "-n -21",
 * --low with -n, trailing args that look like flags
 */

#![no_main]

use clap::Parser;
use cronwrap::args::Args;
use cronwrap::job::JobConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    /* split input on null bytes to simulate multiple arguments */
    let args: Vec<String> = data
        .split(|&b| b == 0)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .map(String::from)
        .collect();

    let argv = std::iter::once("cronwrap".to_string()).chain(args);

    /* errors are fine, panics are not. --help/--version come back as Err too */
    if let Ok(parsed) = Args::try_parse_from(argv) {
        let config = JobConfig::from_args(&parsed);
        assert!(config.command.ends_with(&config.original_command));
    }
});

/*
 * fuzz_targets/build_command.rs
 *
 * fuzz target for command assembly and lock key derivation. arbitrary
 * bytes for the command and env file, any nice/ionice values.
 */

#![no_main]

use cronwrap::command::CommandSpec;
use cronwrap::lock::LockKey;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (String, Option<String>, Option<i32>, Option<u8>, Option<String>)| {
    let (command, env_file, nice, ionice, log_capture_to) = input;

    let spec = CommandSpec {
        command: command.clone(),
        env_file,
        nice,
        ionice,
        log_capture_to,
    };
    let built = spec.build();
    assert!(built.ends_with(&command));

    let key = LockKey::from_command(&built);
    assert_eq!(key.as_str().len(), 32);
});

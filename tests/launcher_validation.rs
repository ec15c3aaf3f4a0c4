//! Failures that must surface before any process is created.

use judgebox::config::validator::validate_run_config;
use judgebox::{fork_attempts, run, EngineError, RunConfig, ARGS_MAX_NUMBER, ENV_MAX_NUMBER};

fn assert_invalid(config: RunConfig, needle: &str) {
    let before = fork_attempts();
    match run(config) {
        Err(EngineError::InvalidConfig(message)) => {
            assert!(message.contains(needle), "{message:?} should mention {needle:?}")
        }
        other => panic!("expected InvalidConfig, got {other:?}"),
    }
    assert_eq!(fork_attempts(), before, "validation failures must not fork");
}

fn base() -> RunConfig {
    RunConfig::new("/bin/sh").with_real_time_ms(1000)
}

#[test]
fn empty_executable_path() {
    assert_invalid(RunConfig::new(""), "executable_path");
}

#[test]
fn missing_executable() {
    assert_invalid(RunConfig::new("/nonexistent/judgebox/solution"), "does not exist");
}

#[test]
fn zero_limits_are_rejected() {
    assert_invalid(base().with_cpu_time_ms(0), "max_cpu_time_ms");
    assert_invalid(base().with_memory_bytes(0), "max_memory_bytes");
    assert_invalid(base().with_stack_bytes(0), "max_stack_bytes");
}

#[test]
fn argument_cap_is_exact() {
    let at_cap: Vec<String> = (0..ARGS_MAX_NUMBER - 2).map(|i| i.to_string()).collect();
    let over_cap: Vec<String> = (0..ARGS_MAX_NUMBER - 1).map(|i| i.to_string()).collect();

    let at_cap = validate_run_config(&base().with_arguments(at_cap));
    assert!(at_cap.is_valid(), "{:?}", at_cap.errors);
    assert_invalid(base().with_arguments(over_cap), "arguments");
}

#[test]
fn environment_cap_is_exact() {
    let over_cap: Vec<String> = (0..ENV_MAX_NUMBER).map(|i| format!("K{i}=v")).collect();
    assert_invalid(base().with_environment(over_cap), "environment");
}

#[test]
fn malformed_environment_entry() {
    assert_invalid(base().with_environment(["NOEQUALS"]), "environment");
}

#[test]
fn nul_byte_in_argument() {
    assert_invalid(base().with_arguments(["a\0b"]), "NUL");
}

#[test]
fn privileged_target_identity_needs_opt_in() {
    assert_invalid(base().with_identity(0, 65534), "uid");
    assert_invalid(base().with_identity(65534, 0), "gid");
}

#[test]
fn unprivileged_launcher_is_refused() {
    if nix::unistd::geteuid().is_root() {
        return;
    }
    let before = fork_attempts();
    match run(base()) {
        Err(EngineError::PrivilegedIdentityRequired { euid }) => assert_ne!(euid, 0),
        other => panic!("expected PrivilegedIdentityRequired, got {other:?}"),
    }
    assert_eq!(fork_attempts(), before);
}

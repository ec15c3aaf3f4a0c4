//! No descriptor or zombie survives a run, whatever its outcome.
//!
//! Kept as a single test in its own binary so nothing else opens descriptors
//! or forks concurrently.

use judgebox::kernel::fd_hygiene::open_descriptors;
use judgebox::{fork_attempts, run, RunConfig};
use nix::errno::Errno;
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use std::fs;
use std::os::unix::fs::PermissionsExt;

#[test]
fn runs_leave_no_descriptors_or_children_behind() {
    if !nix::unistd::geteuid().is_root() {
        eprintln!("not running as root; skipping");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755)).unwrap();
    let probe = dir.path().join("judgebox-probe");
    fs::copy(env!("CARGO_BIN_EXE_judgebox-probe"), &probe).unwrap();
    fs::set_permissions(&probe, fs::Permissions::from_mode(0o755)).unwrap();
    let probe = probe.to_str().unwrap().to_string();
    let out = dir.path().join("out.txt").to_str().unwrap().to_string();
    let not_executable = dir.path().join("data.txt");
    fs::write(&not_executable, "data").unwrap();

    let before = open_descriptors().unwrap();
    let forks_before = fork_attempts();

    let configs = vec![
        RunConfig::new(&*probe).with_arguments(["exit", "0"]),
        RunConfig::new(&*probe).with_arguments(["write"]).with_stdio("", &*out, &*out),
        RunConfig::new(&*probe)
            .with_arguments(["sleep", "5000"])
            .with_real_time_ms(200),
        RunConfig::new(&*probe).with_arguments(["fork"]).with_policy("general"),
        RunConfig::new(not_executable.to_str().unwrap()),
        RunConfig::new(&*probe).with_stdio(dir.path().join("missing").to_str().unwrap(), "", ""),
    ];
    let launched = configs.len() as u64 - 1;
    for config in configs {
        let _ = run(config.with_log_path(dir.path().join("run.log").to_str().unwrap()));
    }

    assert_eq!(fork_attempts() - forks_before, launched);
    assert_eq!(open_descriptors().unwrap(), before);
    assert_eq!(waitpid(Pid::from_raw(-1), None).unwrap_err(), Errno::ECHILD);
}

//! Syscall policies installed in a forked child.
//!
//! These tests need no privileges: NO_NEW_PRIVS makes filter installation
//! available to any user. Where the host forbids seccomp entirely the tests
//! return early.

use judgebox::kernel::seccomp::PolicyLoader;
use judgebox::PolicyError;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};
use std::ffi::{CStr, CString};

const INSTALL_FAILED: i32 = 99;

/// Install `policy` in a child, run `body` there and return the wait status.
/// `None` when the host refused to install the filter.
fn under_policy(policy: &str, exec_target: &CStr, body: impl FnOnce() -> i32) -> Option<WaitStatus> {
    let program = PolicyLoader::load(Some(policy), exec_target)
        .unwrap()
        .expect("named policy yields a program");

    // SAFETY: the child only makes raw syscalls before _exit.
    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            let code = match program.install() {
                Ok(()) => body(),
                Err(_) => INSTALL_FAILED,
            };
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => match waitpid(child, None).unwrap() {
            WaitStatus::Exited(_, INSTALL_FAILED) => {
                eprintln!("seccomp unavailable on this host; skipping");
                None
            }
            status => Some(status),
        },
    }
}

fn killed_by_sigsys(status: WaitStatus) -> bool {
    matches!(status, WaitStatus::Signaled(_, Signal::SIGSYS, _))
}

fn target() -> CString {
    CString::new("/bin/true").unwrap()
}

#[test]
fn general_policy_kills_socket() {
    let exe = target();
    let Some(status) = under_policy("general", &exe, || {
        unsafe { libc::syscall(libc::SYS_socket, libc::AF_UNIX, libc::SOCK_STREAM, 0) };
        0
    }) else {
        return;
    };
    assert!(killed_by_sigsys(status), "{status:?}");
}

#[test]
fn general_policy_kills_process_creation() {
    let exe = target();
    let Some(status) = under_policy("general", &exe, || {
        unsafe { libc::syscall(libc::SYS_clone, libc::SIGCHLD, 0, 0, 0, 0) };
        0
    }) else {
        return;
    };
    assert!(killed_by_sigsys(status), "{status:?}");
}

#[test]
fn general_policy_allows_ordinary_syscalls() {
    let exe = target();
    let Some(status) = under_policy("general", &exe, || {
        let pid = unsafe { libc::syscall(libc::SYS_getpid) };
        if pid > 0 { 0 } else { 1 }
    }) else {
        return;
    };
    assert!(matches!(status, WaitStatus::Exited(_, 0)), "{status:?}");
}

#[test]
fn writable_open_is_killed_read_only_open_is_not() {
    let exe = target();
    let path = CString::new("/dev/null").unwrap();

    let Some(status) = under_policy("general", &exe, || {
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDONLY) };
        if fd >= 0 { 0 } else { 1 }
    }) else {
        return;
    };
    assert!(matches!(status, WaitStatus::Exited(_, 0)), "{status:?}");

    let Some(status) = under_policy("general", &exe, || {
        unsafe { libc::open(path.as_ptr(), libc::O_WRONLY) };
        0
    }) else {
        return;
    };
    assert!(killed_by_sigsys(status), "{status:?}");
}

#[test]
fn file_io_policy_allows_writable_open() {
    let exe = target();
    let path = CString::new("/dev/null").unwrap();
    let Some(status) = under_policy("c_cpp_file_io", &exe, || {
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_WRONLY) };
        if fd >= 0 { 0 } else { 1 }
    }) else {
        return;
    };
    assert!(matches!(status, WaitStatus::Exited(_, 0)), "{status:?}");
}

#[test]
fn allow_list_policy_kills_unlisted_syscall() {
    let exe = target();
    let Some(status) = under_policy("c_cpp", &exe, || {
        unsafe { libc::syscall(libc::SYS_getpid) };
        0
    }) else {
        return;
    };
    assert!(killed_by_sigsys(status), "{status:?}");
}

#[test]
fn execve_only_of_the_configured_path() {
    if !std::path::Path::new("/bin/true").exists() {
        return;
    }
    let exe = target();
    let argv = [exe.as_ptr(), std::ptr::null()];
    let envp = [std::ptr::null()];

    // Same bytes, different pointer: rejected.
    let other = target();
    let Some(status) = under_policy("general", &exe, || {
        unsafe { libc::execve(other.as_ptr(), argv.as_ptr(), envp.as_ptr()) };
        1
    }) else {
        return;
    };
    assert!(killed_by_sigsys(status), "{status:?}");

    let Some(status) = under_policy("general", &exe, || {
        unsafe { libc::execve(exe.as_ptr(), argv.as_ptr(), envp.as_ptr()) };
        1
    }) else {
        return;
    };
    assert!(matches!(status, WaitStatus::Exited(_, 0)), "{status:?}");
}

#[test]
fn unknown_policy_name_is_rejected() {
    let exe = target();
    assert_eq!(
        PolicyLoader::load(Some("python"), &exe).unwrap_err(),
        PolicyError::UnknownPolicy("python".to_string())
    );
    assert!(PolicyLoader::load(None, &exe).unwrap().is_none());
}

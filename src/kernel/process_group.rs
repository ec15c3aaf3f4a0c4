//! Process group containment.
//!
//! The child leads a fresh process group whose id equals its pid. Anything
//! it forks inherits the group, so one `killpg` reaches the whole tree as
//! long as the leader is unreaped and the group id cannot be recycled.

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{setpgid, Pid};

/// Make the calling process the leader of a new group. Async-signal-safe.
pub fn lead_new_group() -> Result<(), Errno> {
    // SAFETY: setpgid(0, 0) only changes the caller's own group.
    if unsafe { libc::setpgid(0, 0) } != 0 {
        return Err(Errno::last());
    }
    Ok(())
}

/// Parent half of the fork race: whichever side runs first creates the group.
/// The child may already have exec'd, in which case EACCES is expected.
pub fn adopt_child(pid: Pid) {
    if let Err(errno) = setpgid(pid, pid) {
        log::debug!("setpgid({pid}) from parent: {errno}");
    }
}

/// SIGKILL every member of `leader`'s group, then `leader` itself in case
/// it moved to another group. Returns whether `leader` was signalled.
pub fn kill_tree(leader: Pid) -> bool {
    match killpg(leader, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(errno) => log::warn!("killpg({leader}) failed: {errno}"),
    }
    kill(leader, Signal::SIGKILL).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, getpgid, ForkResult};
    use std::time::{Duration, Instant};

    fn gone(pid: Pid) -> bool {
        let state = std::fs::read_to_string(format!("/proc/{pid}/stat"));
        match state {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .is_some_and(|s| s == "Z" || s == "X"),
        }
    }

    #[test]
    fn child_leads_its_own_group() {
        // SAFETY: the child only calls setpgid and _exit.
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                let code = if lead_new_group().is_ok() { 0 } else { 1 };
                unsafe { libc::_exit(code) }
            }
            ForkResult::Parent { child } => {
                assert_eq!(waitpid(child, None).unwrap(), WaitStatus::Exited(child, 0));
            }
        }
    }

    #[test]
    fn kill_tree_reaches_grandchildren() {
        let (reader, writer) = std::os::unix::net::UnixStream::pair().unwrap();
        // SAFETY: the child only makes async-signal-safe calls.
        let leader = match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                use std::os::fd::AsRawFd;
                if lead_new_group().is_err() {
                    unsafe { libc::_exit(1) };
                }
                // SAFETY: the grandchild only pauses.
                let grandchild = unsafe { libc::fork() };
                if grandchild == 0 {
                    loop {
                        unsafe { libc::pause() };
                    }
                }
                let bytes = grandchild.to_ne_bytes();
                unsafe { libc::write(writer.as_raw_fd(), bytes.as_ptr().cast(), bytes.len()) };
                loop {
                    unsafe { libc::pause() };
                }
            }
            ForkResult::Parent { child } => child,
        };
        drop(writer);

        use std::io::Read;
        let mut bytes = [0u8; 4];
        (&reader).read_exact(&mut bytes).unwrap();
        let grandchild = Pid::from_raw(i32::from_ne_bytes(bytes));
        assert_eq!(getpgid(Some(grandchild)).unwrap(), leader);

        assert!(kill_tree(leader));
        assert!(matches!(
            waitpid(leader, None).unwrap(),
            WaitStatus::Signaled(_, Signal::SIGKILL, _)
        ));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !gone(grandchild) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(gone(grandchild));
    }
}

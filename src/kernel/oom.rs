//! OOM killer preference for the sandboxed child.

use nix::errno::Errno;

const OOM_SCORE_ADJ_PATH: &[u8] = b"/proc/self/oom_score_adj\0";

/// Highest badness; the host's OOM killer picks the sandboxed program first.
const OOM_SCORE_ADJ_MAX: &[u8] = b"1000";

/// Write `1000` to `/proc/self/oom_score_adj`. Async-signal-safe.
pub fn prefer_oom_kill() -> Result<(), Errno> {
    // SAFETY: NUL-terminated static path; flags are constants.
    let fd = unsafe {
        libc::open(
            OOM_SCORE_ADJ_PATH.as_ptr().cast(),
            libc::O_WRONLY | libc::O_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(Errno::last());
    }

    // SAFETY: fd was just opened; the buffer is a static slice.
    let written = unsafe { libc::write(fd, OOM_SCORE_ADJ_MAX.as_ptr().cast(), OOM_SCORE_ADJ_MAX.len()) };
    let result = if written == OOM_SCORE_ADJ_MAX.len() as isize {
        Ok(())
    } else if written < 0 {
        Err(Errno::last())
    } else {
        Err(Errno::EIO)
    };

    // SAFETY: closing the descriptor opened above.
    unsafe { libc::close(fd) };
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, ForkResult};

    #[test]
    fn child_score_is_raised() {
        // SAFETY: the child only makes async-signal-safe calls before _exit.
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                let code = if prefer_oom_kill().is_ok() { 0 } else { 1 };
                unsafe { libc::_exit(code) };
            }
            ForkResult::Parent { child } => {
                // Raising the score needs no privilege.
                assert_eq!(waitpid(child, None).unwrap(), WaitStatus::Exited(child, 0));
            }
        }
    }
}

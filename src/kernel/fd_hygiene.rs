/// File descriptor hygiene for the sandboxed child
///
/// Every descriptor above stderr is marked close-on-exec so nothing the
/// launcher holds leaks into the untrusted program.
/// - Prefer close_range(CLOSE_RANGE_CLOEXEC)
/// - Fall back to an fcntl sweep up to the descriptor limit
use nix::errno::Errno;
use std::fs;
use std::os::fd::RawFd;

const CLOSE_RANGE_CLOEXEC: libc::c_uint = 1 << 2;

/// Mark fds >= 3 close-on-exec. Async-signal-safe.
pub fn mark_inherited_cloexec() -> Result<(), Errno> {
    // SAFETY: close_range only changes descriptor flags in the given range.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_close_range,
            3 as libc::c_uint,
            libc::c_uint::MAX,
            CLOSE_RANGE_CLOEXEC,
        )
    };
    if rc == 0 {
        return Ok(());
    }

    match Errno::last() {
        // Pre-5.11 kernels lack the flag; container profiles may deny the call.
        Errno::ENOSYS | Errno::EINVAL | Errno::EPERM => mark_cloexec_by_sweep(),
        errno => Err(errno),
    }
}

fn mark_cloexec_by_sweep() -> Result<(), Errno> {
    // SAFETY: sysconf has no memory side effects.
    let max_fd = match unsafe { libc::sysconf(libc::_SC_OPEN_MAX) } {
        n if n > 3 => n as RawFd,
        _ => 1024,
    };

    for fd in 3..max_fd {
        // SAFETY: F_GETFD/F_SETFD on arbitrary descriptor numbers only touch flags.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags < 0 {
            match Errno::last() {
                Errno::EBADF => continue,
                errno => return Err(errno),
            }
        }
        if flags & libc::FD_CLOEXEC == 0
            && unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0
        {
            return Err(Errno::last());
        }
    }
    Ok(())
}

/// Get list of open file descriptors of the calling process.
pub fn open_descriptors() -> std::io::Result<Vec<RawFd>> {
    let mut fds = Vec::new();
    for entry in fs::read_dir("/proc/self/fd")?.flatten() {
        if let Ok(fd) = entry.file_name().to_string_lossy().parse::<RawFd>() {
            fds.push(fd);
        }
    }
    fds.sort_unstable();
    Ok(fds)
}

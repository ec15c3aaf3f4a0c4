//! Child-to-parent setup report channel.
//!
//! A close-on-exec pipe carries fixed-size records. The child writes a
//! checkpoint (errno 0) as it enters each stage, and a failure record
//! (errno != 0) if a step fails. The last checkpoint being `Exec` followed by
//! EOF means `execve` replaced the image. EOF at any earlier checkpoint means
//! the child was killed during setup and never ran the target program.

use crate::config::types::{EngineError, PolicyError};
use crate::kernel::credentials::DropStep;
use crate::kernel::rlimits::LimitKind;
use crate::kernel::stdio::{above_stdio, StdStream};
use nix::errno::Errno;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{FromRawFd, RawFd};

/// Wire size of a record: stage, detail, errno as native-endian 32-bit words.
pub const RECORD_LEN: usize = 12;

/// Detail used when the failing step inside a stage is unknown.
const UNKNOWN_DETAIL: u32 = u32::MAX;

/// Exit status of a child that failed before exec.
pub const SETUP_FAILED_EXIT_CODE: i32 = 127;

/// Child bootstrap stage that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum SetupStage {
    OomScore = 1,
    FdHygiene = 2,
    ResourceLimit = 3,
    SyscallFilter = 4,
    Redirection = 5,
    PrivilegeDrop = 6,
    Exec = 7,
    ProcessGroup = 8,
}

impl SetupStage {
    fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(SetupStage::OomScore),
            2 => Some(SetupStage::FdHygiene),
            3 => Some(SetupStage::ResourceLimit),
            4 => Some(SetupStage::SyscallFilter),
            5 => Some(SetupStage::Redirection),
            6 => Some(SetupStage::PrivilegeDrop),
            7 => Some(SetupStage::Exec),
            8 => Some(SetupStage::ProcessGroup),
            _ => None,
        }
    }
}

/// A setup failure reported by the child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildFailure {
    pub stage: SetupStage,
    /// Stage-specific discriminant (limit kind, stream, drop step).
    pub detail: u32,
    pub errno: Errno,
}

fn encode_record(stage: SetupStage, detail: u32, errno: i32) -> [u8; RECORD_LEN] {
    let mut record = [0u8; RECORD_LEN];
    record[0..4].copy_from_slice(&(stage as u32).to_ne_bytes());
    record[4..8].copy_from_slice(&detail.to_ne_bytes());
    record[8..12].copy_from_slice(&errno.to_ne_bytes());
    record
}

/// `(stage, detail, raw errno)`; `None` for a short record or unknown stage.
fn decode_record(record: &[u8]) -> Option<(SetupStage, u32, i32)> {
    if record.len() != RECORD_LEN {
        return None;
    }
    let word = |at: usize| [record[at], record[at + 1], record[at + 2], record[at + 3]];
    Some((
        SetupStage::from_u32(u32::from_ne_bytes(word(0)))?,
        u32::from_ne_bytes(word(4)),
        i32::from_ne_bytes(word(8)),
    ))
}

impl ChildFailure {
    /// Errno 0 is reserved for checkpoints and is stored as EIO.
    pub fn new(stage: SetupStage, detail: u32, errno: Errno) -> Self {
        let errno = match errno {
            Errno::UnknownErrno => Errno::EIO,
            errno => errno,
        };
        Self {
            stage,
            detail,
            errno,
        }
    }

    /// The child was killed while inside `stage` and reported nothing.
    pub fn interrupted(stage: SetupStage) -> Self {
        Self::new(stage, UNKNOWN_DETAIL, Errno::EINTR)
    }

    pub fn encode(&self) -> [u8; RECORD_LEN] {
        encode_record(self.stage, self.detail, self.errno as i32)
    }

    pub fn decode(record: &[u8]) -> Option<Self> {
        match decode_record(record)? {
            (_, _, 0) => None,
            (stage, detail, errno) => Some(Self::new(stage, detail, Errno::from_raw(errno))),
        }
    }

    /// Map the failed stage to its error kind.
    pub fn into_error(self, executable: &str) -> EngineError {
        let errno = self.errno;
        match self.stage {
            SetupStage::OomScore => EngineError::OutOfMemoryKillFailed(errno),
            SetupStage::FdHygiene => EngineError::SetResourceLimitFailed {
                resource: "inherited descriptors",
                errno,
            },
            SetupStage::ResourceLimit => EngineError::SetResourceLimitFailed {
                resource: LimitKind::from_u32(self.detail)
                    .map(LimitKind::name)
                    .unwrap_or("resource limit"),
                errno,
            },
            SetupStage::SyscallFilter => {
                EngineError::FilterInstallFailed(PolicyError::InstallFailed(errno))
            }
            SetupStage::Redirection => EngineError::RedirectionFailed {
                stream: StdStream::from_u32(self.detail)
                    .map(StdStream::name)
                    .unwrap_or("stdio"),
                reason: format!("dup2: {errno}"),
            },
            SetupStage::PrivilegeDrop => EngineError::PrivilegeDropFailed {
                step: DropStep::from_u32(self.detail)
                    .map(DropStep::name)
                    .unwrap_or("credentials"),
                errno,
            },
            SetupStage::Exec => EngineError::ExecFailed {
                path: executable.to_string(),
                errno,
            },
            SetupStage::ProcessGroup => EngineError::ProcessCreationFailed(errno),
        }
    }
}

/// How the child's setup ended, as seen through the report pipe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildReport {
    /// Reached `execve` and the image was replaced.
    Replaced,
    /// A setup step failed; the child exited with [`SETUP_FAILED_EXIT_CODE`].
    Failed(ChildFailure),
    /// The child died inside this stage without reporting, or before its
    /// first checkpoint when `None`.
    Interrupted(Option<SetupStage>),
}

impl ChildReport {
    /// Setup error for this report, or `None` if the program ran.
    pub fn into_error(self, executable: &str) -> Option<EngineError> {
        match self {
            ChildReport::Replaced => None,
            ChildReport::Failed(failure) => Some(failure.into_error(executable)),
            ChildReport::Interrupted(Some(stage)) => {
                Some(ChildFailure::interrupted(stage).into_error(executable))
            }
            ChildReport::Interrupted(None) => Some(EngineError::ProcessCreationFailed(Errno::EINTR)),
        }
    }
}

/// Create the report pipe: `(reader, writer)`, both close-on-exec and above stdio.
pub fn channel() -> io::Result<(File, File)> {
    let mut fds = [0 as RawFd; 2];
    // SAFETY: fds has room for the two descriptors pipe2 writes.
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: both descriptors were just created and are owned here.
    let (reader, writer) = unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) };
    Ok((above_stdio(reader)?, above_stdio(writer)?))
}

fn write_record(fd: RawFd, record: &[u8; RECORD_LEN]) {
    let mut written = 0;
    while written < RECORD_LEN {
        // SAFETY: writing from a stack buffer to the report pipe.
        let n = unsafe {
            libc::write(
                fd,
                record[written..].as_ptr().cast(),
                RECORD_LEN - written,
            )
        };
        if n > 0 {
            written += n as usize;
        } else if n < 0 && Errno::last() == Errno::EINTR {
            continue;
        } else {
            break;
        }
    }
}

/// Announce entry into `stage`. Async-signal-safe; child only.
pub fn checkpoint(fd: RawFd, stage: SetupStage) {
    write_record(fd, &encode_record(stage, 0, 0));
}

/// Write the failure record and `_exit`. Async-signal-safe; child only.
pub fn send_and_exit(fd: RawFd, failure: &ChildFailure) -> ! {
    write_record(fd, &failure.encode());
    // SAFETY: _exit skips atexit handlers and stdio flushing inherited from the parent.
    unsafe { libc::_exit(SETUP_FAILED_EXIT_CODE) }
}

/// Block until the pipe closes: on exec, on a reported failure, or when the
/// child dies.
pub fn receive(mut reader: File) -> io::Result<ChildReport> {
    let mut bytes = Vec::with_capacity(8 * RECORD_LEN);
    reader.read_to_end(&mut bytes)?;
    if bytes.len() % RECORD_LEN != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("truncated child report ({} bytes)", bytes.len()),
        ));
    }

    let mut reached = None;
    for record in bytes.chunks_exact(RECORD_LEN) {
        let (stage, detail, errno) = decode_record(record).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "unknown setup stage in child report")
        })?;
        if errno != 0 {
            return Ok(ChildReport::Failed(ChildFailure::new(
                stage,
                detail,
                Errno::from_raw(errno),
            )));
        }
        reached = Some(stage);
    }

    Ok(match reached {
        Some(SetupStage::Exec) => ChildReport::Replaced,
        other => ChildReport::Interrupted(other),
    })
}

//! Standard stream redirection.
//!
//! Files are opened in the parent so open failures surface before any
//! process exists. The child only rebinds descriptors with `dup2`.

use crate::config::types::{EngineError, Result, RunConfig};
use nix::errno::Errno;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;

/// One of the three standard streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum StdStream {
    Input = 0,
    Output = 1,
    Error = 2,
}

impl StdStream {
    pub fn name(self) -> &'static str {
        match self {
            StdStream::Input => "stdin",
            StdStream::Output => "stdout",
            StdStream::Error => "stderr",
        }
    }

    pub fn fd(self) -> RawFd {
        self as RawFd
    }

    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(StdStream::Input),
            1 => Some(StdStream::Output),
            2 => Some(StdStream::Error),
            _ => None,
        }
    }
}

/// Move a descriptor to 3 or above so rebinding one stream can never clobber
/// the source of another.
pub(crate) fn above_stdio(file: File) -> std::io::Result<File> {
    if file.as_raw_fd() > 2 {
        return Ok(file);
    }
    // SAFETY: F_DUPFD_CLOEXEC on a descriptor we own; the result is checked.
    let fd = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_DUPFD_CLOEXEC, 3) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: fd is a fresh descriptor returned by fcntl and owned by nobody else.
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// Parent-side handles for the child's standard streams.
///
/// Dropping the redirector closes every handle it opened.
#[derive(Debug, Default)]
pub struct StdioRedirector {
    input: Option<File>,
    output: Option<File>,
    error: Option<File>,
    error_shares_output: bool,
}

impl StdioRedirector {
    /// Open `input_path` read-only and `output_path`/`error_path`
    /// write-create-truncate. Empty paths leave the stream inherited; equal
    /// output and error paths share one open file description.
    pub fn open(config: &RunConfig) -> Result<Self> {
        let mut redirector = StdioRedirector::default();

        if !config.input_path.is_empty() {
            let mut options = OpenOptions::new();
            options.read(true);
            redirector.input = Some(open_stream(StdStream::Input, &config.input_path, &options)?);
        }

        let mut writable = OpenOptions::new();
        writable.write(true).create(true).truncate(true).mode(0o644);

        if !config.output_path.is_empty() {
            redirector.output = Some(open_stream(StdStream::Output, &config.output_path, &writable)?);
        }

        if !config.error_path.is_empty() {
            if config.error_path == config.output_path {
                redirector.error_shares_output = true;
            } else {
                redirector.error = Some(open_stream(StdStream::Error, &config.error_path, &writable)?);
            }
        }

        Ok(redirector)
    }

    /// Raw descriptors for the child. Valid while `self` is alive.
    pub fn bindings(&self) -> StdioBindings {
        let raw = |file: &Option<File>| file.as_ref().map(AsRawFd::as_raw_fd);
        let error = if self.error_shares_output {
            raw(&self.output)
        } else {
            raw(&self.error)
        };
        StdioBindings {
            sources: [raw(&self.input), raw(&self.output), error],
        }
    }
}

fn open_stream(stream: StdStream, path: &str, options: &OpenOptions) -> Result<File> {
    options
        .open(path)
        .and_then(above_stdio)
        .map_err(|e| EngineError::RedirectionFailed {
            stream: stream.name(),
            reason: format!("{path}: {e}"),
        })
}

/// Descriptor plan applied in the child: `sources[i]` becomes fd `i`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StdioBindings {
    sources: [Option<RawFd>; 3],
}

impl StdioBindings {
    pub fn source(&self, stream: StdStream) -> Option<RawFd> {
        self.sources[stream as usize]
    }

    /// Rebind the standard streams. Async-signal-safe.
    pub fn apply(&self) -> std::result::Result<(), (StdStream, Errno)> {
        for stream in [StdStream::Input, StdStream::Output, StdStream::Error] {
            let Some(source) = self.source(stream) else {
                continue;
            };
            loop {
                // SAFETY: dup2 on descriptors owned by the parent-side redirector,
                // which outlives the child's use of them.
                if unsafe { libc::dup2(source, stream.fd()) } >= 0 {
                    break;
                }
                match Errno::last() {
                    Errno::EINTR | Errno::EBUSY => continue,
                    errno => return Err((stream, errno)),
                }
            }
        }
        Ok(())
    }
}

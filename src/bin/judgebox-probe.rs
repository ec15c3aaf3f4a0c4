//! Deterministic misbehaving program for sandbox integration tests.
//!
//! `judgebox-probe <mode> [arg]`:
//! - `exit N`      exit with code N
//! - `sleep MS`    sleep, then exit 0
//! - `spin`        burn CPU forever
//! - `alloc MIB`   allocate and touch MIB mebibytes in 1 MiB chunks, then exit 0
//! - `raise SIG`   raise signal number SIG
//! - `fork`        call fork(2)
//! - `orphan`      fork a child that sleeps for a minute, print its pid, exit 0
//! - `flood BYTES` write BYTES bytes to stdout
//! - `echo`        copy stdin to stdout
//! - `write`       write `out` to stdout and `err` to stderr
//! - `env`         print the environment, one entry per line
//! - `id`          print `uid gid`

use anyhow::{bail, Context, Result};
use std::io::{self, Read, Write};
use std::time::Duration;

fn number(arg: Option<&String>, what: &str) -> Result<u64> {
    arg.with_context(|| format!("missing {what}"))?
        .parse()
        .with_context(|| format!("invalid {what}"))
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = args.first().map(String::as_str).unwrap_or("exit");

    match mode {
        "exit" => {
            let code = number(args.get(1), "exit code").unwrap_or(0);
            std::process::exit(code as i32);
        }
        "sleep" => std::thread::sleep(Duration::from_millis(number(args.get(1), "milliseconds")?)),
        "spin" => {
            let mut x: u64 = 0;
            loop {
                x = std::hint::black_box(x.wrapping_mul(6364136223846793005).wrapping_add(1));
            }
        }
        "alloc" => {
            let mib = number(args.get(1), "mebibytes")? as usize;
            let mut chunks: Vec<Vec<u8>> = Vec::with_capacity(mib);
            for i in 0..mib {
                // Non-zero fill so every page is actually touched.
                chunks.push(vec![(i % 251 + 1) as u8; 1 << 20]);
            }
            std::hint::black_box(&chunks);
        }
        "raise" => {
            let signal = number(args.get(1), "signal")? as libc::c_int;
            // SAFETY: raising a signal on ourselves.
            unsafe { libc::raise(signal) };
            bail!("signal {signal} did not terminate the probe");
        }
        "fork" => {
            // SAFETY: the child exits immediately without touching shared state.
            match unsafe { libc::fork() } {
                0 => unsafe { libc::_exit(0) },
                -1 => bail!("fork failed: {}", io::Error::last_os_error()),
                pid => {
                    let mut status = 0;
                    // SAFETY: reaping our own child.
                    unsafe { libc::waitpid(pid, &mut status, 0) };
                }
            }
        }
        "orphan" => {
            // SAFETY: the child only sleeps and exits.
            match unsafe { libc::fork() } {
                0 => {
                    unsafe { libc::sleep(60) };
                    unsafe { libc::_exit(0) }
                }
                -1 => bail!("fork failed: {}", io::Error::last_os_error()),
                pid => println!("{pid}"),
            }
        }
        "flood" => {
            let mut remaining = number(args.get(1), "byte count")? as usize;
            let chunk = [b'x'; 4096];
            let mut out = io::stdout().lock();
            while remaining > 0 {
                let n = remaining.min(chunk.len());
                out.write_all(&chunk[..n])?;
                remaining -= n;
            }
            out.flush()?;
        }
        "echo" => {
            let mut input = Vec::new();
            io::stdin().read_to_end(&mut input)?;
            io::stdout().write_all(&input)?;
        }
        "write" => {
            io::stdout().write_all(b"out\n")?;
            io::stdout().flush()?;
            io::stderr().write_all(b"err\n")?;
        }
        "env" => {
            let mut out = io::stdout().lock();
            for (key, value) in std::env::vars() {
                writeln!(out, "{key}={value}")?;
            }
        }
        "id" => {
            // SAFETY: getuid/getgid cannot fail.
            let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
            println!("{uid} {gid}");
        }
        other => bail!("unknown mode {other}"),
    }
    Ok(())
}

//! Thin wrappers around Linux kernel primitives.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.
//! Everything a forked child calls from this module is async-signal-safe:
//! no allocation, no locks, no logging.

pub mod credentials;
pub mod fd_hygiene;
pub mod oom;
pub mod process_group;
pub mod rlimits;
pub mod seccomp;
pub mod stdio;

//! judgebox: run one untrusted program under judge limits and classify how it ended
//!
//! # Architecture
//!
//! This crate is organized by Linux kernel primitive families:
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::rlimits`]: Resource limits (address space, stack, CPU, processes, file size, core)
//! - [`kernel::seccomp`]: Named syscall policies compiled to seccomp-BPF
//! - [`kernel::stdio`]: Standard stream redirection
//! - [`kernel::credentials`]: Privilege check and uid/gid transition
//! - [`kernel::oom`]: OOM killer preference
//! - [`kernel::fd_hygiene`]: Close-on-exec for inherited descriptors
//!
//! ## Execution Control ([`exec`])
//! - [`exec::launcher`]: Fork, supervise, reap, classify
//! - [`exec::preexec`]: Type-state enforced child setup ordering
//! - [`exec::report`]: Child-to-parent setup failure channel
//!
//! ## Monitoring ([`monitor`])
//! - [`monitor::watchdog`]: Wall-clock watchdog thread
//!
//! ## Verdict ([`verdict`])
//! - [`verdict::classifier`]: Verdict as a pure function of termination, usage and limits
//!
//! ## Observability ([`observability`])
//! - [`observability::diagnostics`]: Per-run diagnostic log
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: RunConfig, RunResult, JudgeVerdict, EngineError
//! - [`config::validator`]: Structural validation before any process exists
//! - [`config::loader`]: JSON configuration files
//!
//! # Design Principles
//!
//! 1. **Fail before fork** - Everything that can be checked in the parent is
//! 2. **Types prevent errors** - Child setup order is enforced at compile time
//! 3. **Kernel as truth** - Verdicts come from wait status and rusage
//! 4. **Minimal unsafe** - Thin wrappers with explicit SAFETY comments
//! 5. **Always reap** - No call returns with a live or zombie child

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Monitoring
pub mod monitor;

// Verdict
pub mod verdict;

// Observability
pub mod observability;

// Configuration
pub mod config;

// CLI entrypoint wiring for the judgebox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use exec::launcher::{fork_attempts, run, ProcessLauncher};

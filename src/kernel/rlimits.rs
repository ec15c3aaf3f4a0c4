//! Resource limits for the sandboxed child.
//!
//! The plan is computed in the parent from a [`RunConfig`]; the child only
//! walks a prebuilt slice and calls `setrlimit`, so applying it allocates
//! nothing between fork and exec.

use crate::config::types::{MemoryCheckMode, RunConfig, MEMORY_SLACK_BYTES};
use nix::errno::Errno;
use nix::sys::resource::{setrlimit, Resource};

/// The limits the sandbox may install, in install order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum LimitKind {
    AddressSpace = 1,
    Stack = 2,
    Processes = 3,
    CpuTime = 4,
    FileSize = 5,
    CoreDump = 6,
}

impl LimitKind {
    pub fn name(self) -> &'static str {
        match self {
            LimitKind::AddressSpace => "RLIMIT_AS",
            LimitKind::Stack => "RLIMIT_STACK",
            LimitKind::Processes => "RLIMIT_NPROC",
            LimitKind::CpuTime => "RLIMIT_CPU",
            LimitKind::FileSize => "RLIMIT_FSIZE",
            LimitKind::CoreDump => "RLIMIT_CORE",
        }
    }

    pub fn resource(self) -> Resource {
        match self {
            LimitKind::AddressSpace => Resource::RLIMIT_AS,
            LimitKind::Stack => Resource::RLIMIT_STACK,
            LimitKind::Processes => Resource::RLIMIT_NPROC,
            LimitKind::CpuTime => Resource::RLIMIT_CPU,
            LimitKind::FileSize => Resource::RLIMIT_FSIZE,
            LimitKind::CoreDump => Resource::RLIMIT_CORE,
        }
    }

    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(LimitKind::AddressSpace),
            2 => Some(LimitKind::Stack),
            3 => Some(LimitKind::Processes),
            4 => Some(LimitKind::CpuTime),
            5 => Some(LimitKind::FileSize),
            6 => Some(LimitKind::CoreDump),
            _ => None,
        }
    }
}

/// A single soft/hard pair to install.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RlimitSpec {
    pub kind: LimitKind,
    pub soft: u64,
    pub hard: u64,
}

impl RlimitSpec {
    fn fixed(kind: LimitKind, value: u64) -> Self {
        Self {
            kind,
            soft: value,
            hard: value,
        }
    }
}

/// Ordered set of limits derived from a run configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RlimitPlan {
    entries: Vec<RlimitSpec>,
}

impl RlimitPlan {
    pub fn from_config(config: &RunConfig) -> Self {
        let mut entries = Vec::with_capacity(6);

        if config.memory_check_mode == MemoryCheckMode::EnforceViaRlimit {
            if let Some(memory) = config.max_memory_bytes {
                entries.push(RlimitSpec::fixed(
                    LimitKind::AddressSpace,
                    memory.saturating_add(MEMORY_SLACK_BYTES),
                ));
            }
        }

        entries.push(RlimitSpec::fixed(LimitKind::Stack, config.max_stack_bytes));

        if let Some(count) = config.max_process_count {
            entries.push(RlimitSpec::fixed(LimitKind::Processes, count));
        }

        // soft -> SIGXCPU, hard -> SIGKILL one second later.
        if let Some(cpu_ms) = config.max_cpu_time_ms {
            let secs = cpu_ms.div_ceil(1000);
            entries.push(RlimitSpec {
                kind: LimitKind::CpuTime,
                soft: secs,
                hard: secs.saturating_add(1),
            });
        }

        if let Some(output) = config.max_output_bytes {
            entries.push(RlimitSpec::fixed(LimitKind::FileSize, output));
        }

        entries.push(RlimitSpec::fixed(LimitKind::CoreDump, 0));

        Self { entries }
    }

    pub fn entries(&self) -> &[RlimitSpec] {
        &self.entries
    }

    pub fn get(&self, kind: LimitKind) -> Option<&RlimitSpec> {
        self.entries.iter().find(|spec| spec.kind == kind)
    }

    /// Install every limit on the calling process. Async-signal-safe.
    pub fn apply(&self) -> std::result::Result<(), (LimitKind, Errno)> {
        for spec in &self.entries {
            setrlimit(
                spec.kind.resource(),
                spec.soft as libc::rlim_t,
                spec.hard as libc::rlim_t,
            )
            .map_err(|errno| (spec.kind, errno))?;
        }
        Ok(())
    }
}

/// Core types shared by the launcher, the child bootstrap and the classifier
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum argv entries handed to execve, counting the terminating NULL.
pub const ARGS_MAX_NUMBER: usize = 256;

/// Maximum envp entries handed to execve, counting the terminating NULL.
pub const ENV_MAX_NUMBER: usize = 256;

/// Headroom added on top of `max_memory_bytes` when the address-space ceiling
/// is installed. Peak RSS reaches the configured limit well before the
/// address-space ceiling starts failing allocations.
pub const MEMORY_SLACK_BYTES: u64 = 64 * 1024 * 1024;

/// Default stack ceiling (32 MiB).
pub const DEFAULT_STACK_BYTES: u64 = 32 * 1024 * 1024;

/// Default target identity (`nobody`).
pub const DEFAULT_UNPRIVILEGED_ID: u32 = 65534;

/// How the memory budget is enforced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryCheckMode {
    /// Install an address-space ceiling and measure peak RSS.
    #[default]
    #[serde(rename = "enforce_via_rlimit")]
    EnforceViaRlimit,
    /// Only measure peak RSS. Some runtimes crash under a hard address-space
    /// ceiling instead of failing cleanly.
    #[serde(rename = "measure_only")]
    MeasureOnly,
}

/// One sandboxed run. `None` limits are unlimited.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub max_cpu_time_ms: Option<u64>,
    #[serde(default)]
    pub max_real_time_ms: Option<u64>,
    /// Ceiling on virtual address space (plus [`MEMORY_SLACK_BYTES`]).
    #[serde(default)]
    pub max_memory_bytes: Option<u64>,
    #[serde(default = "default_stack_bytes")]
    pub max_stack_bytes: u64,
    #[serde(default)]
    pub max_process_count: Option<u64>,
    #[serde(default)]
    pub max_output_bytes: Option<u64>,
    #[serde(default)]
    pub memory_check_mode: MemoryCheckMode,

    pub executable_path: String,
    /// Empty means the stream is inherited from the launcher.
    #[serde(default)]
    pub input_path: String,
    #[serde(default)]
    pub output_path: String,
    #[serde(default)]
    pub error_path: String,

    /// argv[1..]; argv[0] is always `executable_path`.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// `KEY=VALUE` entries; the child sees exactly these.
    #[serde(default)]
    pub environment: Vec<String>,

    /// Diagnostic sink; empty disables it.
    #[serde(default)]
    pub log_path: String,

    /// `None` disables syscall containment entirely.
    #[serde(default)]
    pub syscall_policy_name: Option<String>,

    #[serde(default = "default_unprivileged_id")]
    pub uid: u32,
    #[serde(default = "default_unprivileged_id")]
    pub gid: u32,
    /// Permit uid 0 / gid 0 as the target identity.
    #[serde(default)]
    pub allow_privileged_identity: bool,
}

fn default_stack_bytes() -> u64 {
    DEFAULT_STACK_BYTES
}

fn default_unprivileged_id() -> u32 {
    DEFAULT_UNPRIVILEGED_ID
}

impl RunConfig {
    /// Config with every limit unlimited, inherited stdio, empty environment,
    /// no syscall policy and the `nobody` identity.
    pub fn new(executable_path: impl Into<String>) -> Self {
        Self {
            max_cpu_time_ms: None,
            max_real_time_ms: None,
            max_memory_bytes: None,
            max_stack_bytes: DEFAULT_STACK_BYTES,
            max_process_count: None,
            max_output_bytes: None,
            memory_check_mode: MemoryCheckMode::default(),
            executable_path: executable_path.into(),
            input_path: String::new(),
            output_path: String::new(),
            error_path: String::new(),
            arguments: Vec::new(),
            environment: Vec::new(),
            log_path: String::new(),
            syscall_policy_name: None,
            uid: DEFAULT_UNPRIVILEGED_ID,
            gid: DEFAULT_UNPRIVILEGED_ID,
            allow_privileged_identity: false,
        }
    }

    pub fn with_cpu_time_ms(mut self, ms: u64) -> Self {
        self.max_cpu_time_ms = Some(ms);
        self
    }

    pub fn with_real_time_ms(mut self, ms: u64) -> Self {
        self.max_real_time_ms = Some(ms);
        self
    }

    pub fn with_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = Some(bytes);
        self
    }

    pub fn with_stack_bytes(mut self, bytes: u64) -> Self {
        self.max_stack_bytes = bytes;
        self
    }

    pub fn with_process_count(mut self, count: u64) -> Self {
        self.max_process_count = Some(count);
        self
    }

    pub fn with_output_bytes(mut self, bytes: u64) -> Self {
        self.max_output_bytes = Some(bytes);
        self
    }

    pub fn with_memory_check_mode(mut self, mode: MemoryCheckMode) -> Self {
        self.memory_check_mode = mode;
        self
    }

    pub fn with_stdio(
        mut self,
        input: impl Into<String>,
        output: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        self.input_path = input.into();
        self.output_path = output.into();
        self.error_path = error.into();
        self
    }

    pub fn with_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_environment<I, S>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.environment = env.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_log_path(mut self, path: impl Into<String>) -> Self {
        self.log_path = path.into();
        self
    }

    pub fn with_policy(mut self, name: impl Into<String>) -> Self {
        self.syscall_policy_name = Some(name.into());
        self
    }

    pub fn with_identity(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    pub fn allow_privileged_identity(mut self, allow: bool) -> Self {
        self.allow_privileged_identity = allow;
        self
    }
}

/// Closed classification of how a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JudgeVerdict {
    Success,
    CpuTimeLimitExceeded,
    RealTimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    SystemError,
}

impl std::fmt::Display for JudgeVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JudgeVerdict::Success => "SUCCESS",
            JudgeVerdict::CpuTimeLimitExceeded => "CPU_TIME_LIMIT_EXCEEDED",
            JudgeVerdict::RealTimeLimitExceeded => "REAL_TIME_LIMIT_EXCEEDED",
            JudgeVerdict::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
            JudgeVerdict::RuntimeError => "RUNTIME_ERROR",
            JudgeVerdict::SystemError => "SYSTEM_ERROR",
        };
        f.write_str(name)
    }
}

/// Measurements and verdict of a run that reached an observable termination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub cpu_time_ms: u64,
    pub real_time_ms: u64,
    /// Peak resident set size.
    pub memory_bytes: u64,
    /// Terminating signal, 0 for a normal exit.
    pub signal: i32,
    /// Meaningless when `signal != 0`.
    pub exit_code: i32,
    pub verdict: JudgeVerdict,
}

/// Syscall policy lookup and installation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Unknown syscall policy: {0}")]
    UnknownPolicy(String),

    #[error("Filter program has {0} instructions, more than the kernel accepts")]
    ProgramTooLarge(usize),

    #[error("Filter jump at instruction {0} is out of range")]
    JumpOutOfRange(usize),

    #[error("Kernel rejected the syscall filter: {0}")]
    InstallFailed(Errno),
}

/// Errors from [`crate::run`]. A run yields either a [`RunResult`] or exactly
/// one of these, never both.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Launcher must run as root to drop privileges (effective uid {euid})")]
    PrivilegedIdentityRequired { euid: u32 },

    #[error("Failed to create child process: {0}")]
    ProcessCreationFailed(Errno),

    #[error("Failed to start wall-clock watchdog: {0}")]
    ConcurrencyInitFailed(#[source] std::io::Error),

    #[error("Failed to wait for child: {0}")]
    WaitFailed(Errno),

    #[error("Failed to set {resource}: {errno}")]
    SetResourceLimitFailed {
        resource: &'static str,
        errno: Errno,
    },

    #[error("Syscall filter error: {0}")]
    FilterInstallFailed(#[from] PolicyError),

    #[error("Failed to redirect {stream}: {reason}")]
    RedirectionFailed {
        stream: &'static str,
        reason: String,
    },

    #[error("Failed to drop privileges ({step}): {errno}")]
    PrivilegeDropFailed { step: &'static str, errno: Errno },

    #[error("Failed to execute {path}: {errno}")]
    ExecFailed { path: String, errno: Errno },

    #[error("Failed to adjust OOM score: {0}")]
    OutOfMemoryKillFailed(Errno),
}

impl EngineError {
    /// Stable snake_case name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidConfig(_) => "invalid_config",
            EngineError::PrivilegedIdentityRequired { .. } => "privileged_identity_required",
            EngineError::ProcessCreationFailed(_) => "process_creation_failed",
            EngineError::ConcurrencyInitFailed(_) => "concurrency_init_failed",
            EngineError::WaitFailed(_) => "wait_failed",
            EngineError::SetResourceLimitFailed { .. } => "set_resource_limit_failed",
            EngineError::FilterInstallFailed(_) => "filter_install_failed",
            EngineError::RedirectionFailed { .. } => "redirection_failed",
            EngineError::PrivilegeDropFailed { .. } => "privilege_drop_failed",
            EngineError::ExecFailed { .. } => "exec_failed",
            EngineError::OutOfMemoryKillFailed(_) => "out_of_memory_kill_failed",
        }
    }
}

/// Result type alias for judgebox operations
pub type Result<T> = std::result::Result<T, EngineError>;

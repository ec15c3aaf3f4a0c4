/// Pre-Exec Ordering Enforcement
///
/// The child setup sequence is FIXED:
/// 1. own process group, OOM score, descriptor hygiene, resource limits
/// 2. syscall filter (NO_NEW_PRIVS + seccomp)
/// 3. stdio redirection
/// 4. setgroups, setresgid, setresuid
/// 5. execve
///
/// Each step consumes the prior state and returns exactly one next state on
/// success, so illegal orderings do not compile. Only
/// `ChildBootstrap<PrivilegesDropped>` can exec.
///
/// Everything here runs between fork and exec in a child of a possibly
/// multithreaded parent. Steps must stay async-signal-safe: no allocation,
/// no locks, no logging. All inputs are prepared by the parent.
use crate::config::types::{EngineError, Result, RunConfig};
use crate::exec::report::{ChildFailure, SetupStage};
use crate::kernel::credentials::{transition_to_unprivileged, PrivilegedLauncher};
use crate::kernel::fd_hygiene::mark_inherited_cloexec;
use crate::kernel::oom::prefer_oom_kill;
use crate::kernel::process_group::lead_new_group;
use crate::kernel::rlimits::RlimitPlan;
use crate::kernel::seccomp::FilterProgram;
use crate::kernel::stdio::StdioBindings;
use nix::errno::Errno;
use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::os::raw::c_char;

/// Type-state marker: freshly forked child, nothing applied
pub struct Fresh;

/// Type-state marker: process group, OOM score, descriptor hygiene and rlimits applied
pub struct LimitsApplied;

/// Type-state marker: syscall filter installed (or explicitly skipped)
pub struct FilterInstalled;

/// Type-state marker: standard streams rebound
pub struct StdioBound;

/// Type-state marker: running as the unprivileged target identity
pub struct PrivilegesDropped;

/// Child bootstrap with type-state tracking. Zero-sized.
///
/// Skipping a step is rejected at compile time:
///
/// ```compile_fail
/// use judgebox::exec::preexec::{ChildBootstrap, ExecImage};
///
/// fn skip_privilege_drop(image: &ExecImage) {
///     let _ = ChildBootstrap::new().exec(image);
/// }
/// ```
///
/// as is installing the filter before the limits:
///
/// ```compile_fail
/// use judgebox::exec::preexec::ChildBootstrap;
/// use judgebox::kernel::seccomp::FilterProgram;
///
/// fn filter_first(program: &FilterProgram) {
///     let _ = ChildBootstrap::new().install_filter(Some(program));
/// }
/// ```
pub struct ChildBootstrap<S> {
    _state: PhantomData<S>,
}

impl<S> ChildBootstrap<S> {
    fn advance<N>(self) -> ChildBootstrap<N> {
        ChildBootstrap {
            _state: PhantomData,
        }
    }
}

impl Default for ChildBootstrap<Fresh> {
    fn default() -> Self {
        Self::new()
    }
}

impl ChildBootstrap<Fresh> {
    pub fn new() -> Self {
        ChildBootstrap {
            _state: PhantomData,
        }
    }

    /// Lead a new process group, raise the OOM score, mark inherited fds
    /// close-on-exec, install rlimits.
    pub fn apply_limits(
        self,
        plan: &RlimitPlan,
    ) -> std::result::Result<ChildBootstrap<LimitsApplied>, ChildFailure> {
        lead_new_group().map_err(|errno| ChildFailure::new(SetupStage::ProcessGroup, 0, errno))?;
        prefer_oom_kill().map_err(|errno| ChildFailure::new(SetupStage::OomScore, 0, errno))?;
        mark_inherited_cloexec()
            .map_err(|errno| ChildFailure::new(SetupStage::FdHygiene, 0, errno))?;
        plan.apply().map_err(|(kind, errno)| {
            ChildFailure::new(SetupStage::ResourceLimit, kind as u32, errno)
        })?;
        Ok(self.advance())
    }
}

impl ChildBootstrap<LimitsApplied> {
    /// `None` installs nothing; syscall containment is then disabled.
    pub fn install_filter(
        self,
        program: Option<&FilterProgram>,
    ) -> std::result::Result<ChildBootstrap<FilterInstalled>, ChildFailure> {
        if let Some(program) = program {
            program
                .install()
                .map_err(|errno| ChildFailure::new(SetupStage::SyscallFilter, 0, errno))?;
        }
        Ok(self.advance())
    }
}

impl ChildBootstrap<FilterInstalled> {
    pub fn redirect_stdio(
        self,
        bindings: &StdioBindings,
    ) -> std::result::Result<ChildBootstrap<StdioBound>, ChildFailure> {
        bindings.apply().map_err(|(stream, errno)| {
            ChildFailure::new(SetupStage::Redirection, stream as u32, errno)
        })?;
        Ok(self.advance())
    }
}

impl ChildBootstrap<StdioBound> {
    /// setgroups([]) -> setresgid -> setresuid. Last step before exec.
    pub fn drop_privileges(
        self,
        proof: &PrivilegedLauncher,
        uid: u32,
        gid: u32,
    ) -> std::result::Result<ChildBootstrap<PrivilegesDropped>, ChildFailure> {
        transition_to_unprivileged(proof, uid, gid).map_err(|(step, errno)| {
            ChildFailure::new(SetupStage::PrivilegeDrop, step as u32, errno)
        })?;
        Ok(self.advance())
    }
}

impl ChildBootstrap<PrivilegesDropped> {
    /// Replace the process image. Only returns on failure.
    pub fn exec(self, image: &ExecImage) -> ChildFailure {
        ChildFailure::new(SetupStage::Exec, 0, image.execve())
    }
}

/// argv/envp prepared in the parent so the child never allocates.
pub struct ExecImage {
    path: CString,
    _argv: Vec<CString>,
    _envp: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
    envp_ptrs: Vec<*const c_char>,
}

impl ExecImage {
    /// argv = `[executable_path, arguments...]`, envp = `environment`.
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let path = c_string("executable_path", &config.executable_path)?;

        let mut argv = Vec::with_capacity(config.arguments.len() + 1);
        argv.push(path.clone());
        for arg in &config.arguments {
            argv.push(c_string("arguments", arg)?);
        }

        let envp = config
            .environment
            .iter()
            .map(|entry| c_string("environment", entry))
            .collect::<Result<Vec<_>>>()?;

        // CString contents live on the heap, so these pointers stay valid
        // when the vectors are moved into Self.
        let argv_ptrs = null_terminated(&argv);
        let envp_ptrs = null_terminated(&envp);

        Ok(Self {
            path,
            _argv: argv,
            _envp: envp,
            argv_ptrs,
            envp_ptrs,
        })
    }

    pub fn path(&self) -> &CStr {
        &self.path
    }

    /// Number of argv entries, excluding the terminating NULL.
    pub fn argc(&self) -> usize {
        self.argv_ptrs.len() - 1
    }

    fn execve(&self) -> Errno {
        // SAFETY: path, argv and envp are NUL-terminated strings owned by self,
        // and both pointer arrays end with NULL.
        unsafe {
            libc::execve(
                self.path.as_ptr(),
                self.argv_ptrs.as_ptr(),
                self.envp_ptrs.as_ptr(),
            )
        };
        Errno::last()
    }
}

fn c_string(field: &str, value: &str) -> Result<CString> {
    CString::new(value)
        .map_err(|_| EngineError::InvalidConfig(format!("{field} contains a NUL byte")))
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

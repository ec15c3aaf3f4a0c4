/// Process launcher
///
/// Parent-side orchestration of a single run:
/// validate -> verify privilege -> prepare (files, argv, filter, limits)
/// -> fork -> child bootstrap | watchdog + wait -> reap -> classify.
///
/// Everything the child needs is built before `fork`, so the child branch
/// only issues syscalls. The child leads its own process group; once it has
/// terminated the rest of the group is killed, and the child is reaped on
/// every path out of `run`, including early returns, through `ChildGuard`.
use crate::config::types::{EngineError, Result, RunConfig, RunResult};
use crate::config::validator::validate_run_config;
use crate::exec::preexec::{ChildBootstrap, ExecImage};
use crate::exec::report::{self, ChildFailure, SetupStage};
use crate::kernel::credentials::PrivilegedLauncher;
use crate::kernel::process_group::{adopt_child, kill_tree};
use crate::kernel::rlimits::RlimitPlan;
use crate::kernel::seccomp::{FilterProgram, PolicyLoader};
use crate::kernel::stdio::{StdioBindings, StdioRedirector};
use crate::monitor::watchdog::Watchdog;
use crate::observability::diagnostics::RunLog;
use crate::verdict::classifier::{Evidence, LimitSnapshot, ResourceUsage, ResultClassifier, Termination};
use nix::errno::Errno;
use nix::sys::wait::{waitid, waitpid, Id, WaitPidFlag};
use nix::unistd::{fork, ForkResult, Pid};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static FORK_ATTEMPTS: AtomicU64 = AtomicU64::new(0);

/// Process-wide number of fork attempts made by `run`.
pub fn fork_attempts() -> u64 {
    FORK_ATTEMPTS.load(Ordering::SeqCst)
}

/// Run `config.executable_path` once under the configured limits.
pub fn run(config: RunConfig) -> Result<RunResult> {
    ProcessLauncher::new(config).run()
}

/// Parent-side inputs to the child bootstrap, built before fork.
struct LaunchPlan {
    stdio: StdioRedirector,
    image: ExecImage,
    filter: Option<FilterProgram>,
    limits: RlimitPlan,
}

impl LaunchPlan {
    fn prepare(config: &RunConfig) -> Result<Self> {
        let stdio = StdioRedirector::open(config)?;
        let image = ExecImage::from_config(config)?;
        let filter = PolicyLoader::load(config.syscall_policy_name.as_deref(), image.path())?;
        let limits = RlimitPlan::from_config(config);
        Ok(Self {
            stdio,
            image,
            filter,
            limits,
        })
    }
}

/// Kills the child's group and reaps the child unless it was reaped explicitly.
struct ChildGuard {
    pid: Pid,
    reaped: bool,
}

impl ChildGuard {
    fn new(pid: Pid) -> Self {
        Self { pid, reaped: false }
    }

    /// Block until the child terminates without reaping it.
    fn observe_termination(&self) -> std::result::Result<(), Errno> {
        loop {
            match waitid(Id::Pid(self.pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno),
            }
        }
    }

    /// SIGKILL whatever is left of the child's process group. Only valid
    /// while the child is unreaped, so the group id cannot be reused.
    fn kill_descendants(&self) {
        kill_tree(self.pid);
    }

    /// Collect the raw wait status and resource usage.
    fn reap(&mut self) -> std::result::Result<(libc::c_int, libc::rusage), Errno> {
        let mut status: libc::c_int = 0;
        // SAFETY: rusage is plain old data; wait4 fills it in.
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        loop {
            // SAFETY: status and usage are valid out-pointers for this call.
            let rc = unsafe { libc::wait4(self.pid.as_raw(), &mut status, 0, &mut usage) };
            if rc == self.pid.as_raw() {
                self.reaped = true;
                return Ok((status, usage));
            }
            match Errno::last() {
                Errno::EINTR => continue,
                errno => return Err(errno),
            }
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        kill_tree(self.pid);
        loop {
            match waitpid(self.pid, None) {
                Err(Errno::EINTR) => continue,
                _ => break,
            }
        }
    }
}

fn io_errno(err: &std::io::Error) -> Errno {
    Errno::from_raw(err.raw_os_error().unwrap_or(libc::EIO))
}

/// Child branch. Returns only when a step failed. Each stage is announced on
/// `report_fd` before it starts.
fn bootstrap(
    plan: &LaunchPlan,
    bindings: &StdioBindings,
    proof: &PrivilegedLauncher,
    uid: u32,
    gid: u32,
    report_fd: RawFd,
) -> ChildFailure {
    let reached = |stage| report::checkpoint(report_fd, stage);

    reached(SetupStage::ProcessGroup);
    let dropped = ChildBootstrap::new()
        .apply_limits(&plan.limits)
        .and_then(|b| {
            reached(SetupStage::SyscallFilter);
            b.install_filter(plan.filter.as_ref())
        })
        .and_then(|b| {
            reached(SetupStage::Redirection);
            b.redirect_stdio(bindings)
        })
        .and_then(|b| {
            reached(SetupStage::PrivilegeDrop);
            b.drop_privileges(proof, uid, gid)
        });
    match dropped {
        Ok(ready) => {
            reached(SetupStage::Exec);
            ready.exec(&plan.image)
        }
        Err(failure) => failure,
    }
}

pub struct ProcessLauncher {
    config: RunConfig,
}

impl ProcessLauncher {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn run(self) -> Result<RunResult> {
        let config = &self.config;

        let warnings = validate_run_config(config).into_result()?;
        let proof = PrivilegedLauncher::verify()?;
        let log = RunLog::open(&config.log_path);
        for warning in &warnings {
            log.warn(format_args!("Configuration warning: {}", warning));
        }

        let plan = match LaunchPlan::prepare(config) {
            Ok(plan) => plan,
            Err(e) => {
                log.error(format_args!("Launch preparation failed: {}", e));
                return Err(e);
            }
        };
        let bindings = plan.stdio.bindings();
        let (reader, writer) =
            report::channel().map_err(|e| EngineError::ProcessCreationFailed(io_errno(&e)))?;

        FORK_ATTEMPTS.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        // SAFETY: the child branch only runs the async-signal-safe bootstrap
        // and then execs or _exits.
        let pid = match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                let report_fd = writer.as_raw_fd();
                let failure = bootstrap(&plan, &bindings, &proof, config.uid, config.gid, report_fd);
                report::send_and_exit(report_fd, &failure)
            }
            Ok(ForkResult::Parent { child }) => child,
            Err(errno) => {
                log.error(format_args!("fork failed: {}", errno));
                return Err(EngineError::ProcessCreationFailed(errno));
            }
        };
        drop(writer);
        adopt_child(pid);
        let mut child = ChildGuard::new(pid);
        log.info(format_args!(
            "Launched {} as pid {} (policy {})",
            config.executable_path,
            pid,
            config.syscall_policy_name.as_deref().unwrap_or("none")
        ));

        let watchdog = match config.max_real_time_ms {
            Some(ms) => match Watchdog::spawn(pid, Duration::from_millis(ms)) {
                Ok(watchdog) => Some(watchdog),
                Err(e) => {
                    log.error(format_args!("Cannot start watchdog: {}", e));
                    return Err(EngineError::ConcurrencyInitFailed(e));
                }
            },
            None => None,
        };

        let report = report::receive(reader).map_err(|e| {
            log.error(format_args!("Child report unreadable: {}", e));
            EngineError::WaitFailed(io_errno(&e))
        })?;

        child.observe_termination().map_err(|errno| {
            log.error(format_args!("waitid failed for pid {}: {}", pid, errno));
            EngineError::WaitFailed(errno)
        })?;
        let real_time = started.elapsed();
        let watchdog_fired = watchdog.map(Watchdog::disarm).unwrap_or(false);
        child.kill_descendants();

        let (status, usage) = child.reap().map_err(|errno| {
            log.error(format_args!("wait4 failed for pid {}: {}", pid, errno));
            EngineError::WaitFailed(errno)
        })?;
        drop(plan);

        let termination = Termination::from_wait_status(status);
        if let Some(err) = report.into_error(&config.executable_path) {
            log.error(format_args!(
                "Child setup failed ({:?}, {:?}): {}",
                report, termination, err
            ));
            return Err(err);
        }

        let evidence = Evidence {
            termination,
            usage: ResourceUsage::from_rusage(&usage, real_time),
            watchdog_fired,
        };
        let result = ResultClassifier::classify(&evidence, &LimitSnapshot::from_config(config));
        log.info(format_args!(
            "pid {} finished: verdict={} cpu={}ms real={}ms memory={}B exit_code={} signal={}",
            pid,
            result.verdict,
            result.cpu_time_ms,
            result.real_time_ms,
            result.memory_bytes,
            result.exit_code,
            result.signal
        ));
        Ok(result)
    }
}

/// Verdict classification
///
/// `verdict = f(termination, usage, limits)`: a pure function over what the
/// launcher observed. No syscalls happen here.
///
/// Decision order, first match wins:
/// 1. unrecognized wait status -> SystemError
/// 2. watchdog SIGKILL, or real time >= limit -> RealTimeLimitExceeded
/// 3. cpu time >= limit -> CpuTimeLimitExceeded
/// 4. peak memory >= limit -> MemoryLimitExceeded
/// 5. any signal or non-zero exit -> RuntimeError
/// 6. Success
use crate::config::types::{JudgeVerdict, RunConfig, RunResult};
use std::time::Duration;

/// How the child ended, decoded from a raw wait status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    /// Neither a normal exit nor a fatal signal; carries the raw status.
    Unrecognized(i32),
}

impl Termination {
    pub fn from_wait_status(status: libc::c_int) -> Self {
        if libc::WIFEXITED(status) {
            Termination::Exited(libc::WEXITSTATUS(status))
        } else if libc::WIFSIGNALED(status) {
            Termination::Signaled(libc::WTERMSIG(status))
        } else {
            Termination::Unrecognized(status)
        }
    }
}

/// Measurements for a reaped child.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub cpu_time_ms: u64,
    pub real_time_ms: u64,
    pub memory_bytes: u64,
}

impl ResourceUsage {
    /// cpu = user + system time; memory = `ru_maxrss` (KiB) in bytes.
    pub fn from_rusage(usage: &libc::rusage, real_time: Duration) -> Self {
        let cpu_micros = timeval_micros(&usage.ru_utime).saturating_add(timeval_micros(&usage.ru_stime));
        Self {
            cpu_time_ms: cpu_micros / 1000,
            real_time_ms: real_time.as_millis() as u64,
            memory_bytes: (usage.ru_maxrss.max(0) as u64).saturating_mul(1024),
        }
    }
}

fn timeval_micros(tv: &libc::timeval) -> u64 {
    let secs = tv.tv_sec.max(0) as u64;
    let micros = tv.tv_usec.max(0) as u64;
    secs.saturating_mul(1_000_000).saturating_add(micros)
}

/// Everything the classifier looks at for one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Evidence {
    pub termination: Termination,
    pub usage: ResourceUsage,
    pub watchdog_fired: bool,
}

/// The limits a run was judged against. `None` = unlimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LimitSnapshot {
    pub cpu_time_ms: Option<u64>,
    pub real_time_ms: Option<u64>,
    pub memory_bytes: Option<u64>,
}

impl LimitSnapshot {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            cpu_time_ms: config.max_cpu_time_ms,
            real_time_ms: config.max_real_time_ms,
            memory_bytes: config.max_memory_bytes,
        }
    }
}

fn reached(measured: u64, limit: Option<u64>) -> bool {
    limit.is_some_and(|limit| measured >= limit)
}

pub struct ResultClassifier;

impl ResultClassifier {
    pub fn classify(evidence: &Evidence, limits: &LimitSnapshot) -> RunResult {
        let usage = evidence.usage;
        let (exit_code, signal) = match evidence.termination {
            Termination::Exited(code) => (code, 0),
            Termination::Signaled(sig) => (0, sig),
            Termination::Unrecognized(_) => (0, 0),
        };

        RunResult {
            cpu_time_ms: usage.cpu_time_ms,
            real_time_ms: usage.real_time_ms,
            memory_bytes: usage.memory_bytes,
            signal,
            exit_code,
            verdict: Self::verdict(evidence, limits),
        }
    }

    fn verdict(evidence: &Evidence, limits: &LimitSnapshot) -> JudgeVerdict {
        let usage = &evidence.usage;

        if let Termination::Unrecognized(_) = evidence.termination {
            return JudgeVerdict::SystemError;
        }

        let killed_by_watchdog = evidence.watchdog_fired
            && evidence.termination == Termination::Signaled(libc::SIGKILL);
        if killed_by_watchdog || reached(usage.real_time_ms, limits.real_time_ms) {
            return JudgeVerdict::RealTimeLimitExceeded;
        }

        if reached(usage.cpu_time_ms, limits.cpu_time_ms) {
            return JudgeVerdict::CpuTimeLimitExceeded;
        }

        if reached(usage.memory_bytes, limits.memory_bytes) {
            return JudgeVerdict::MemoryLimitExceeded;
        }

        match evidence.termination {
            Termination::Exited(0) => JudgeVerdict::Success,
            _ => JudgeVerdict::RuntimeError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn evidence(termination: Termination, cpu: u64, real: u64, mem: u64) -> Evidence {
        Evidence {
            termination,
            usage: ResourceUsage {
                cpu_time_ms: cpu,
                real_time_ms: real,
                memory_bytes: mem,
            },
            watchdog_fired: false,
        }
    }

    fn limits() -> LimitSnapshot {
        LimitSnapshot {
            cpu_time_ms: Some(1000),
            real_time_ms: Some(3000),
            memory_bytes: Some(64 << 20),
        }
    }

    #[test]
    fn test_clean_exit_is_success() {
        let result = ResultClassifier::classify(&evidence(Termination::Exited(0), 10, 20, 1 << 20), &limits());
        assert_eq!(result.verdict, JudgeVerdict::Success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.signal, 0);
        assert_eq!(result.cpu_time_ms, 10);
        assert_eq!(result.real_time_ms, 20);
        assert_eq!(result.memory_bytes, 1 << 20);
    }

    #[test]
    fn test_nonzero_exit_is_runtime_error() {
        let result = ResultClassifier::classify(&evidence(Termination::Exited(3), 10, 20, 0), &limits());
        assert_eq!(result.verdict, JudgeVerdict::RuntimeError);
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.signal, 0);
    }

    #[test]
    fn test_fatal_signal_is_runtime_error() {
        let result = ResultClassifier::classify(
            &evidence(Termination::Signaled(libc::SIGSEGV), 10, 20, 0),
            &limits(),
        );
        assert_eq!(result.verdict, JudgeVerdict::RuntimeError);
        assert_eq!(result.signal, libc::SIGSEGV);
    }

    #[test]
    fn test_watchdog_kill_is_real_time_exceeded() {
        let mut ev = evidence(Termination::Signaled(libc::SIGKILL), 5, 2999, 0);
        ev.watchdog_fired = true;
        assert_eq!(
            ResultClassifier::classify(&ev, &limits()).verdict,
            JudgeVerdict::RealTimeLimitExceeded
        );
    }

    #[test]
    fn test_watchdog_flag_without_sigkill_is_ignored() {
        let mut ev = evidence(Termination::Exited(0), 5, 100, 0);
        ev.watchdog_fired = true;
        assert_eq!(ResultClassifier::classify(&ev, &limits()).verdict, JudgeVerdict::Success);
    }

    #[test]
    fn test_cpu_limit_via_sigxcpu() {
        let result = ResultClassifier::classify(
            &evidence(Termination::Signaled(libc::SIGXCPU), 1003, 1100, 0),
            &limits(),
        );
        assert_eq!(result.verdict, JudgeVerdict::CpuTimeLimitExceeded);
        assert_eq!(result.signal, libc::SIGXCPU);
    }

    #[test]
    fn test_time_beats_memory() {
        let result = ResultClassifier::classify(
            &evidence(Termination::Signaled(libc::SIGKILL), 2000, 3500, 128 << 20),
            &limits(),
        );
        assert_eq!(result.verdict, JudgeVerdict::RealTimeLimitExceeded);

        let result = ResultClassifier::classify(
            &evidence(Termination::Signaled(libc::SIGKILL), 2000, 2500, 128 << 20),
            &limits(),
        );
        assert_eq!(result.verdict, JudgeVerdict::CpuTimeLimitExceeded);
    }

    #[test]
    fn test_memory_limit_on_clean_exit() {
        let result = ResultClassifier::classify(&evidence(Termination::Exited(0), 10, 20, 64 << 20), &limits());
        assert_eq!(result.verdict, JudgeVerdict::MemoryLimitExceeded);
    }

    #[test]
    fn test_unlimited_never_exceeds() {
        let result = ResultClassifier::classify(
            &evidence(Termination::Exited(0), u64::MAX, u64::MAX, u64::MAX),
            &LimitSnapshot::default(),
        );
        assert_eq!(result.verdict, JudgeVerdict::Success);
    }

    #[test]
    fn test_unrecognized_status_is_system_error() {
        let result = ResultClassifier::classify(
            &evidence(Termination::Unrecognized(0x137f), 5000, 5000, 0),
            &limits(),
        );
        assert_eq!(result.verdict, JudgeVerdict::SystemError);
        assert_eq!(result.signal, 0);
    }

    #[test]
    fn test_wait_status_decoding() {
        assert_eq!(Termination::from_wait_status(0), Termination::Exited(0));
        assert_eq!(Termination::from_wait_status(3 << 8), Termination::Exited(3));
        assert_eq!(Termination::from_wait_status(libc::SIGKILL), Termination::Signaled(libc::SIGKILL));
        // stopped by SIGSTOP
        assert_eq!(Termination::from_wait_status(0x137f), Termination::Unrecognized(0x137f));
    }

    #[test]
    fn test_rusage_conversion() {
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        usage.ru_utime.tv_sec = 1;
        usage.ru_utime.tv_usec = 250_000;
        usage.ru_stime.tv_usec = 40_999;
        usage.ru_maxrss = 2048;

        let usage = ResourceUsage::from_rusage(&usage, Duration::from_millis(1500));
        assert_eq!(usage.cpu_time_ms, 1290);
        assert_eq!(usage.real_time_ms, 1500);
        assert_eq!(usage.memory_bytes, 2 << 20);
    }

    #[test]
    fn test_limit_snapshot_from_config() {
        let config = RunConfig::new("/bin/true").with_cpu_time_ms(1000).with_memory_bytes(1 << 26);
        let snapshot = LimitSnapshot::from_config(&config);
        assert_eq!(snapshot.cpu_time_ms, Some(1000));
        assert_eq!(snapshot.real_time_ms, None);
        assert_eq!(snapshot.memory_bytes, Some(1 << 26));
    }

    fn termination() -> impl Strategy<Value = Termination> {
        prop_oneof![
            (0i32..256).prop_map(Termination::Exited),
            (1i32..32).prop_map(Termination::Signaled),
        ]
    }

    proptest! {
        #[test]
        fn real_time_overrun_always_wins(
            term in termination(),
            cpu in any::<u64>(),
            mem in any::<u64>(),
            over in 0u64..1_000_000,
        ) {
            let ev = evidence(term, cpu, 3000 + over, mem);
            prop_assert_eq!(
                ResultClassifier::classify(&ev, &limits()).verdict,
                JudgeVerdict::RealTimeLimitExceeded
            );
        }

        #[test]
        fn within_limits_depends_only_on_termination(
            term in termination(),
            cpu in 0u64..1000,
            real in 0u64..3000,
            mem in 0u64..(64 << 20),
        ) {
            let result = ResultClassifier::classify(&evidence(term, cpu, real, mem), &limits());
            let expected = if term == Termination::Exited(0) {
                JudgeVerdict::Success
            } else {
                JudgeVerdict::RuntimeError
            };
            prop_assert_eq!(result.verdict, expected);
            prop_assert_eq!(result.signal == 0, matches!(term, Termination::Exited(_)));
        }
    }
}

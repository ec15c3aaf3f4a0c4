// Structural validation of a RunConfig
// Runs before any process is created; every problem is collected so a caller
// sees the full list in one InvalidConfig error.

use crate::config::types::{EngineError, Result, RunConfig, ARGS_MAX_NUMBER, ENV_MAX_NUMBER};
use crate::kernel::credentials::validate_identity;
use std::path::Path;

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapse into `InvalidConfig` when any error was recorded.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(EngineError::InvalidConfig(self.errors.join("; ")))
        }
    }
}

/// Validate a run configuration without touching any process state.
pub fn validate_run_config(config: &RunConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    validate_limits(config, &mut result);
    validate_executable(config, &mut result);
    validate_strings(config, &mut result);
    validate_counts(config, &mut result);

    if let Err(e) = validate_identity(config.uid, config.gid, config.allow_privileged_identity) {
        result.add_error(e.to_string());
    }

    if config.syscall_policy_name.is_none() {
        result.add_warning("no syscall policy configured; syscall containment is disabled".into());
    }

    result
}

fn validate_limits(config: &RunConfig, result: &mut ValidationResult) {
    let limits = [
        ("max_cpu_time_ms", config.max_cpu_time_ms),
        ("max_real_time_ms", config.max_real_time_ms),
        ("max_memory_bytes", config.max_memory_bytes),
        ("max_process_count", config.max_process_count),
        ("max_output_bytes", config.max_output_bytes),
    ];
    for (name, value) in limits {
        if value == Some(0) {
            result.add_error(format!("{name} must be positive or unlimited"));
        }
    }

    if config.max_stack_bytes == 0 {
        result.add_error("max_stack_bytes must be positive".into());
    }

    if let Some(memory) = config.max_memory_bytes {
        if memory < 1024 * 1024 {
            result.add_warning(format!(
                "max_memory_bytes {memory} is very low (< 1MB); most programs fail to start"
            ));
        }
    }

    if config.max_real_time_ms.is_none() {
        result.add_warning("max_real_time_ms is unlimited; run may block indefinitely".into());
    }
}

fn validate_executable(config: &RunConfig, result: &mut ValidationResult) {
    if config.executable_path.is_empty() {
        result.add_error("executable_path cannot be empty".into());
        return;
    }

    let path = Path::new(&config.executable_path);
    if !path.exists() {
        result.add_error(format!(
            "executable_path {} does not exist",
            config.executable_path
        ));
    } else if path.is_dir() {
        result.add_error(format!(
            "executable_path {} is a directory",
            config.executable_path
        ));
    }
}

fn validate_strings(config: &RunConfig, result: &mut ValidationResult) {
    let paths = [
        ("executable_path", &config.executable_path),
        ("input_path", &config.input_path),
        ("output_path", &config.output_path),
        ("error_path", &config.error_path),
        ("log_path", &config.log_path),
    ];
    for (name, value) in paths {
        if value.contains('\0') {
            result.add_error(format!("{name} contains a NUL byte"));
        }
    }

    for (index, arg) in config.arguments.iter().enumerate() {
        if arg.contains('\0') {
            result.add_error(format!("arguments[{index}] contains a NUL byte"));
        }
    }

    for (index, entry) in config.environment.iter().enumerate() {
        if entry.contains('\0') {
            result.add_error(format!("environment[{index}] contains a NUL byte"));
            continue;
        }
        match entry.split_once('=') {
            Some((key, _)) if !key.is_empty() => {}
            _ => result.add_error(format!(
                "environment[{index}] must have the form KEY=VALUE, got {entry:?}"
            )),
        }
    }
}

fn validate_counts(config: &RunConfig, result: &mut ValidationResult) {
    // argv = executable + arguments + terminating NULL
    let argv_len = config.arguments.len() + 2;
    if argv_len > ARGS_MAX_NUMBER {
        result.add_error(format!(
            "{} arguments exceed the argv cap of {} entries",
            config.arguments.len(),
            ARGS_MAX_NUMBER
        ));
    }

    let envp_len = config.environment.len() + 1;
    if envp_len > ENV_MAX_NUMBER {
        result.add_error(format!(
            "{} environment entries exceed the envp cap of {} entries",
            config.environment.len(),
            ENV_MAX_NUMBER
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn valid_config() -> RunConfig {
        RunConfig::new("/bin/sh")
            .with_real_time_ms(1000)
            .with_policy("general")
    }

    #[test]
    fn accepts_minimal_config() {
        let result = validate_run_config(&valid_config());
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn rejects_empty_executable() {
        let result = validate_run_config(&RunConfig::new(""));
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("executable_path"));
    }

    #[test]
    fn rejects_missing_executable() {
        let result = validate_run_config(&RunConfig::new("/nonexistent/judgebox/solution"));
        assert!(result.errors.iter().any(|e| e.contains("does not exist")));
    }

    #[test]
    fn rejects_zero_limits() {
        let config = valid_config().with_cpu_time_ms(0).with_memory_bytes(0);
        let result = validate_run_config(&config);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn rejects_zero_stack() {
        let result = validate_run_config(&valid_config().with_stack_bytes(0));
        assert!(result.errors.iter().any(|e| e.contains("max_stack_bytes")));
    }

    #[test]
    fn argument_cap_counts_executable_and_terminator() {
        let at_cap = valid_config().with_arguments(vec!["x"; ARGS_MAX_NUMBER - 2]);
        assert!(validate_run_config(&at_cap).is_valid());

        let over_cap = valid_config().with_arguments(vec!["x"; ARGS_MAX_NUMBER - 1]);
        assert!(!validate_run_config(&over_cap).is_valid());
    }

    #[test]
    fn environment_cap_counts_terminator() {
        let at_cap = valid_config().with_environment(vec!["K=V"; ENV_MAX_NUMBER - 1]);
        assert!(validate_run_config(&at_cap).is_valid());

        let over_cap = valid_config().with_environment(vec!["K=V"; ENV_MAX_NUMBER]);
        assert!(!validate_run_config(&over_cap).is_valid());
    }

    #[test]
    fn rejects_malformed_environment() {
        let config = valid_config().with_environment(["PATH=/bin", "NOEQUALS", "=value"]);
        let result = validate_run_config(&config);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn rejects_nul_bytes() {
        let config = valid_config()
            .with_arguments(["ok", "bad\0arg"])
            .with_stdio("in\0put", "", "");
        let result = validate_run_config(&config);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn rejects_root_identity_unless_permitted() {
        let config = valid_config().with_identity(0, 1000);
        assert!(!validate_run_config(&config).is_valid());

        let config = config.allow_privileged_identity(true);
        assert!(validate_run_config(&config).is_valid());
    }

    #[test]
    fn warns_on_disabled_containment() {
        let mut config = valid_config();
        config.syscall_policy_name = None;
        config.max_real_time_ms = None;
        let warnings = validate_run_config(&config).into_result().unwrap();
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn into_result_reports_every_error() {
        let config = RunConfig::new("").with_cpu_time_ms(0);
        match validate_run_config(&config).into_result() {
            Err(EngineError::InvalidConfig(msg)) => {
                assert!(msg.contains("executable_path"));
                assert!(msg.contains("max_cpu_time_ms"));
            }
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn argument_count_decides_validity(count in 0usize..400) {
            let config = valid_config().with_arguments(vec!["arg"; count]);
            let valid = validate_run_config(&config).is_valid();
            prop_assert_eq!(valid, count + 2 <= ARGS_MAX_NUMBER);
        }

        #[test]
        fn positive_limits_are_accepted(cpu in 1u64..u64::MAX, mem in 1u64..u64::MAX) {
            let config = valid_config().with_cpu_time_ms(cpu).with_memory_bytes(mem);
            let result = validate_run_config(&config);
            prop_assert!(result.is_valid(), "{:?}", result.errors);
        }
    }
}

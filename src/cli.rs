use crate::config::loader::load_run_config;
use crate::config::types::{
    EngineError, MemoryCheckMode, RunConfig, DEFAULT_STACK_BYTES, DEFAULT_UNPRIVILEGED_ID,
};
use crate::exec::launcher;
use crate::kernel::seccomp::POLICY_NAMES;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "judgebox", author, version, about = "Run one untrusted program under judge limits", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a program once and print the result as JSON
    Run(RunArgs),
    /// List the syscall policies the sandbox knows
    Policies,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Read the whole run configuration from a JSON file
    #[arg(long, value_name = "FILE", conflicts_with = "exe")]
    pub config: Option<PathBuf>,
    /// Program to execute
    #[arg(long, required_unless_present = "config")]
    pub exe: Option<String>,
    /// CPU time limit in milliseconds
    #[arg(long)]
    pub cpu_ms: Option<u64>,
    /// Wall clock limit in milliseconds
    #[arg(long)]
    pub real_ms: Option<u64>,
    /// Memory limit in bytes
    #[arg(long)]
    pub memory_bytes: Option<u64>,
    /// Stack limit in bytes
    #[arg(long, default_value_t = DEFAULT_STACK_BYTES)]
    pub stack_bytes: u64,
    /// Maximum number of processes for the target uid
    #[arg(long)]
    pub processes: Option<u64>,
    /// Maximum size of any file the program writes
    #[arg(long)]
    pub output_bytes: Option<u64>,
    /// Measure peak memory without an address-space ceiling
    #[arg(long)]
    pub measure_memory_only: bool,
    #[arg(long, value_name = "FILE", default_value = "")]
    pub stdin: String,
    #[arg(long, value_name = "FILE", default_value = "")]
    pub stdout: String,
    #[arg(long, value_name = "FILE", default_value = "")]
    pub stderr: String,
    /// Environment entry for the program (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,
    /// Append diagnostic records to this file
    #[arg(long, value_name = "FILE", default_value = "")]
    pub log: String,
    /// Syscall policy name (see `judgebox policies`)
    #[arg(long)]
    pub policy: Option<String>,
    #[arg(long, default_value_t = DEFAULT_UNPRIVILEGED_ID)]
    pub uid: u32,
    #[arg(long, default_value_t = DEFAULT_UNPRIVILEGED_ID)]
    pub gid: u32,
    /// Permit uid/gid 0 as the target identity
    #[arg(long)]
    pub allow_privileged_identity: bool,
    /// Arguments passed to the program
    #[arg(last = true)]
    pub args: Vec<String>,
}

impl RunArgs {
    pub fn to_config(&self) -> crate::config::types::Result<RunConfig> {
        if let Some(path) = &self.config {
            return load_run_config(path);
        }

        let exe = self.exe.clone().unwrap_or_default();
        let mut config = RunConfig::new(exe)
            .with_stack_bytes(self.stack_bytes)
            .with_stdio(&*self.stdin, &*self.stdout, &*self.stderr)
            .with_arguments(&self.args)
            .with_environment(&self.env)
            .with_log_path(&*self.log)
            .with_identity(self.uid, self.gid)
            .allow_privileged_identity(self.allow_privileged_identity);

        config.max_cpu_time_ms = self.cpu_ms;
        config.max_real_time_ms = self.real_ms;
        config.max_memory_bytes = self.memory_bytes;
        config.max_process_count = self.processes;
        config.max_output_bytes = self.output_bytes;
        config.syscall_policy_name = self.policy.clone();
        if self.measure_memory_only {
            config.memory_check_mode = MemoryCheckMode::MeasureOnly;
        }
        Ok(config)
    }
}

/// JSON body printed for a failed run.
pub fn error_report(err: &EngineError) -> serde_json::Value {
    serde_json::json!({
        "error": err.kind(),
        "message": err.to_string(),
    })
}

pub fn run() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    dispatch(Cli::parse())
}

pub fn dispatch(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Policies => {
            for name in POLICY_NAMES {
                println!("{}", name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run(args) => match args.to_config().and_then(launcher::run) {
            Ok(result) => {
                println!("{}", serde_json::to_string_pretty(&result)?);
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                log::debug!("run failed: {:?}", e);
                println!("{}", serde_json::to_string_pretty(&error_report(&e))?);
                Ok(ExitCode::from(1))
            }
        },
    }
}

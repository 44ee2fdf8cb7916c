mod nsjail;

use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;

use crate::error::JudgeResult;

pub use nsjail::NsjailSandbox;

/// Exit code the sandbox reports when it killed the process at the wall
/// time limit; anything else nonzero is the program's own failure.
pub const TIME_LIMIT_EXIT_CODE: i32 = 124;

#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub wall_time_secs: u64,
    pub cpu_time_secs: u64,
    pub memory_mb: u64,
    pub file_size_mb: u64,
    pub max_open_files: u64,
    /// Run-stage determinism knob; compile stages leave ASLR on.
    pub disable_aslr: bool,
    /// Scheduling priority for the jailed process, when elevated.
    pub nice_level: Option<i32>,
}

impl SandboxLimits {
    /// Generous but bounded budget for compilers.
    pub fn compile_default() -> Self {
        Self {
            wall_time_secs: 10,
            cpu_time_secs: 10,
            memory_mb: 2048,
            file_size_mb: 512,
            max_open_files: 128,
            disable_aslr: false,
            nice_level: None,
        }
    }

    /// Tighter per-test budget: smaller memory ceiling, deterministic
    /// address layout, elevated priority.
    pub fn run_default() -> Self {
        Self {
            wall_time_secs: 10,
            cpu_time_secs: 10,
            memory_mb: 1024,
            file_size_mb: 64,
            max_open_files: 64,
            disable_aslr: true,
            nice_level: Some(-20),
        }
    }
}

/// Host directory mapped into the jail.
#[derive(Debug, Clone)]
pub struct BindMount {
    pub host: PathBuf,
    pub guest: PathBuf,
    pub writable: bool,
}

/// One jailed invocation. Paths are as seen inside the chroot.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub exec_path: PathBuf,
    pub cwd: PathBuf,
    pub mounts: Vec<BindMount>,
    pub limits: SandboxLimits,
    pub stdin: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub wall_time: Duration,
}

impl RunOutput {
    pub fn timed_out(&self) -> bool {
        self.exit_code == TIME_LIMIT_EXIT_CODE
    }
}

/// A single confined process invocation. A nonzero exit or a limit kill is
/// a normal, representable result; `Err` means the sandbox itself failed.
/// Implementations hold no per-run state and are safe to invoke
/// concurrently for independent runs.
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, spec: RunSpec) -> JudgeResult<RunOutput>;
}

use std::{
    process::Stdio,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::Command,
};

use crate::{
    config::WorkerConfig,
    error::{JudgeError, JudgeResult},
    sandbox::{RunOutput, RunSpec, Sandbox, SandboxLimits, TIME_LIMIT_EXIT_CODE},
};

/// Sandbox executor backed by the nsjail binary. Each run chroots into a
/// prepared root filesystem, drops to an unprivileged uid:gid, applies the
/// requested rlimits and leaves networking disabled (nsjail's default
/// in once-mode with a fresh net namespace).
pub struct NsjailSandbox {
    chroot: String,
    uid: u32,
    max_output_bytes: usize,
}

impl NsjailSandbox {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            chroot: config.chroot_path.display().to_string(),
            uid: config.sandbox_uid,
            max_output_bytes: config.max_output_bytes,
        }
    }

    fn build_args(&self, spec: &RunSpec) -> Vec<String> {
        let identity = format!("{}:{}", self.uid, self.uid);
        let limits = &spec.limits;
        let mut args = vec![
            "--mode".to_string(),
            "o".to_string(),
            "--time_limit".to_string(),
            limits.wall_time_secs.to_string(),
            "--max_cpus".to_string(),
            "1".to_string(),
            "--rlimit_cpu".to_string(),
            limits.cpu_time_secs.to_string(),
            "--rlimit_as".to_string(),
            limits.memory_mb.to_string(),
            "--rlimit_fsize".to_string(),
            limits.file_size_mb.to_string(),
            "--rlimit_nofile".to_string(),
            limits.max_open_files.to_string(),
            "--user".to_string(),
            identity.clone(),
            "--group".to_string(),
            identity,
            "--chroot".to_string(),
            self.chroot.clone(),
        ];
        for mount in &spec.mounts {
            let flag = if mount.writable {
                "--bindmount"
            } else {
                "--bindmount_ro"
            };
            args.push(flag.to_string());
            args.push(format!(
                "{}:{}",
                mount.host.display(),
                mount.guest.display()
            ));
        }
        if limits.disable_aslr {
            args.push("--persona_addr_no_randomize".to_string());
        }
        if let Some(nice) = limits.nice_level {
            args.push("--nice_level".to_string());
            args.push(nice.to_string());
        }
        args.push("--cwd".to_string());
        args.push(spec.cwd.display().to_string());
        args.push("--env".to_string());
        args.push("PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string());
        args.push("--really_quiet".to_string());
        args.push("--exec_file".to_string());
        args.push(spec.exec_path.display().to_string());
        args
    }
}

#[async_trait]
impl Sandbox for NsjailSandbox {
    fn name(&self) -> &'static str {
        "nsjail"
    }

    async fn run(&self, spec: RunSpec) -> JudgeResult<RunOutput> {
        let mut cmd = Command::new("nsjail");
        cmd.args(self.build_args(&spec));
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(JudgeError::SandboxLaunch)?;

        if let Some(mut stdin) = child.stdin.take() {
            let bytes = spec.stdin;
            tokio::spawn(async move {
                let _ = stdin.write_all(&bytes).await;
                let _ = stdin.shutdown().await;
            });
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| JudgeError::SandboxLaunch(std::io::Error::other("missing stdout pipe")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| JudgeError::SandboxLaunch(std::io::Error::other("missing stderr pipe")))?;
        let limit = self.max_output_bytes;
        let stdout_task = tokio::spawn(async move { read_limited(stdout, limit).await });
        let stderr_task = tokio::spawn(async move { read_limited(stderr, limit).await });

        // The wall-time limit is enforced inside the jail; no caller-side
        // timeout races against it.
        let status = child.wait().await?;
        let wall_time = started.elapsed();
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(RunOutput {
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            exit_code: normalize_exit_code(status.code(), wall_time, &spec.limits),
            wall_time,
        })
    }
}

/// nsjail kills the jailed process with SIGKILL at `--time_limit` and then
/// reports its own exit status, never 124. Any failure that consumed the
/// whole wall-time budget is mapped onto the canonical time-limit code so
/// classification does not depend on nsjail's exit-code scheme.
fn normalize_exit_code(code: Option<i32>, elapsed: Duration, limits: &SandboxLimits) -> i32 {
    let code = code.unwrap_or(-1);
    if code != 0 && elapsed.as_secs() >= limits.wall_time_secs {
        TIME_LIMIT_EXIT_CODE
    } else {
        code
    }
}

async fn read_limited<R>(mut reader: R, limit: usize) -> Vec<u8>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut out = Vec::with_capacity(limit.min(8192));
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if out.len() < limit {
                    let remaining = limit - out.len();
                    out.extend_from_slice(&chunk[..remaining.min(n)]);
                }
            }
            Err(_) => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use super::{NsjailSandbox, normalize_exit_code};
    use crate::{
        config::WorkerConfig,
        sandbox::{BindMount, RunSpec, SandboxLimits, TIME_LIMIT_EXIT_CODE},
    };

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            scratch_root: PathBuf::from("/tmp/scratch"),
            chroot_path: PathBuf::from("/chroot"),
            sandbox_uid: 99_999,
            languages_path: None,
            compile_limits: SandboxLimits::compile_default(),
            run_limits: SandboxLimits::run_default(),
            max_output_bytes: 1024,
        }
    }

    #[test]
    fn run_stage_args_pin_determinism_flags() {
        let sandbox = NsjailSandbox::new(&test_config());
        let args = sandbox.build_args(&RunSpec {
            exec_path: PathBuf::from("/executable/main"),
            cwd: PathBuf::from("/executable"),
            mounts: vec![BindMount {
                host: PathBuf::from("/tmp/scratch/x/run"),
                guest: PathBuf::from("/executable"),
                writable: false,
            }],
            limits: SandboxLimits::run_default(),
            stdin: Vec::new(),
        });
        assert!(args.contains(&"--persona_addr_no_randomize".to_string()));
        assert!(args.contains(&"--nice_level".to_string()));
        assert!(args.contains(&"--bindmount_ro".to_string()));
        assert!(args.contains(&"99999:99999".to_string()));
        assert_eq!(args.last().unwrap(), "/executable/main");
    }

    #[test]
    fn compile_stage_args_leave_aslr_on() {
        let sandbox = NsjailSandbox::new(&test_config());
        let args = sandbox.build_args(&RunSpec {
            exec_path: PathBuf::from("/build/build.sh"),
            cwd: PathBuf::from("/build"),
            mounts: vec![BindMount {
                host: PathBuf::from("/tmp/scratch/x/build"),
                guest: PathBuf::from("/build"),
                writable: true,
            }],
            limits: SandboxLimits::compile_default(),
            stdin: Vec::new(),
        });
        assert!(!args.contains(&"--persona_addr_no_randomize".to_string()));
        assert!(args.contains(&"--bindmount".to_string()));
    }

    #[test]
    fn wall_limit_kill_normalizes_to_the_timeout_code() {
        let limits = SandboxLimits::run_default();
        // SIGKILL at the limit: no exit code, full budget consumed.
        assert_eq!(
            normalize_exit_code(None, Duration::from_secs(10), &limits),
            TIME_LIMIT_EXIT_CODE
        );
        // nsjail reporting its own nonzero status at the limit.
        assert_eq!(
            normalize_exit_code(Some(137), Duration::from_secs(11), &limits),
            TIME_LIMIT_EXIT_CODE
        );
    }

    #[test]
    fn failures_under_the_limit_keep_their_exit_code() {
        let limits = SandboxLimits::run_default();
        assert_eq!(normalize_exit_code(Some(1), Duration::from_millis(80), &limits), 1);
        assert_eq!(normalize_exit_code(None, Duration::from_millis(80), &limits), -1);
        // Clean exits are never rewritten.
        assert_eq!(normalize_exit_code(Some(0), Duration::from_secs(10), &limits), 0);
    }
}

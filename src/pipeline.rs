use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use uuid::Uuid;

use crate::{
    compare,
    config::{LanguageSpec, WorkerConfig},
    error::JudgeResult,
    models::{JudgeOutcome, TestCase, Verdict},
    sandbox::{BindMount, RunOutput, RunSpec, Sandbox, SandboxLimits},
};

const BUILD_MOUNT: &str = "/build";
const RUN_MOUNT: &str = "/executable";
const BUILD_SCRIPT: &str = "build.sh";
const RUN_ENTRY: &str = "main";
const IN_FILE_PLACEHOLDER: &str = "{IN_FILE}";

/// Classify one run-stage invocation against its expected output.
pub fn classify_run(output: &RunOutput, expected: &str) -> Verdict {
    if output.timed_out() {
        Verdict::TimeLimitExceeded
    } else if output.exit_code != 0 {
        Verdict::RuntimeError
    } else if compare::outputs_match(expected, &output.stdout) {
        Verdict::Accepted
    } else {
        Verdict::WrongAnswer
    }
}

/// Result of a custom-input run: no comparison, just the program's output.
#[derive(Debug, Clone)]
pub struct CustomOutcome {
    pub status: Verdict,
    pub stdout: String,
    pub stderr: String,
}

/// Build-stage result: how long the jail ran, plus the compiler's stderr
/// when it failed.
struct BuildOutcome {
    wall_time: Duration,
    compile_stderr: Option<String>,
}

/// Per-submission scratch tree: `<root>/<uuid>/{build,run}` on the host,
/// mapped to /build and /executable inside the jail. The build half is
/// dropped as soon as the build stage finishes; the whole tree is deleted
/// at exactly one point in `Pipeline::judge`.
struct ScratchSpace {
    root: PathBuf,
    build_dir: PathBuf,
    run_dir: PathBuf,
}

impl ScratchSpace {
    async fn create(scratch_root: &Path) -> JudgeResult<Self> {
        let root = scratch_root.join(Uuid::new_v4().as_simple().to_string());
        let build_dir = root.join("build");
        let run_dir = root.join("run");
        tokio::fs::create_dir_all(&build_dir).await?;
        tokio::fs::create_dir_all(&run_dir).await?;
        Ok(Self {
            root,
            build_dir,
            run_dir,
        })
    }

    async fn drop_build_dir(&self) {
        let _ = tokio::fs::remove_dir_all(&self.build_dir).await;
    }

    async fn cleanup(&self) {
        let _ = tokio::fs::remove_dir_all(&self.root).await;
    }
}

/// Build/run state machine: write source, compile jailed, then run each
/// test case jailed in order, short-circuiting at the first failure.
pub struct Pipeline {
    sandbox: Arc<dyn Sandbox>,
    scratch_root: PathBuf,
    compile_limits: SandboxLimits,
    run_limits: SandboxLimits,
}

impl Pipeline {
    pub fn new(sandbox: Arc<dyn Sandbox>, config: &WorkerConfig) -> Self {
        Self {
            sandbox,
            scratch_root: config.scratch_root.clone(),
            compile_limits: config.compile_limits.clone(),
            run_limits: config.run_limits.clone(),
        }
    }

    pub async fn judge(
        &self,
        language: &LanguageSpec,
        source_code: &str,
        test_cases: &[TestCase],
    ) -> JudgeResult<JudgeOutcome> {
        let scratch = ScratchSpace::create(&self.scratch_root).await?;
        let outcome = self.judge_inner(&scratch, language, source_code, test_cases).await;
        scratch.cleanup().await;
        outcome
    }

    /// Time charged to the submission is the jailed wall time reported by
    /// the sandbox, summed across build and runs; host-side scratch IO and
    /// queueing are not billed.
    async fn judge_inner(
        &self,
        scratch: &ScratchSpace,
        language: &LanguageSpec,
        source_code: &str,
        test_cases: &[TestCase],
    ) -> JudgeResult<JudgeOutcome> {
        let build = self.build(scratch, language, source_code).await?;
        let mut elapsed = build.wall_time;

        if let Some(compile_stderr) = build.compile_stderr {
            return Ok(JudgeOutcome {
                verdict: Verdict::CompileError,
                failed_test_case: None,
                time_elapsed_ms: elapsed.as_millis() as u64,
                stderr: compile_stderr,
            });
        }

        for (index, case) in test_cases.iter().enumerate() {
            let output = self.run_case(scratch, case.input.as_bytes()).await?;
            elapsed += output.wall_time;
            let verdict = classify_run(&output, &case.expected_output);
            if !verdict.accepted() {
                return Ok(JudgeOutcome {
                    verdict,
                    failed_test_case: Some(index),
                    time_elapsed_ms: elapsed.as_millis() as u64,
                    stderr: output.stderr,
                });
            }
        }

        Ok(JudgeOutcome {
            verdict: Verdict::Accepted,
            failed_test_case: None,
            time_elapsed_ms: elapsed.as_millis() as u64,
            stderr: String::new(),
        })
    }

    /// Compile and run once against the given stdin, with no output
    /// comparison. Used for custom-input submissions.
    pub async fn run_custom(
        &self,
        language: &LanguageSpec,
        source_code: &str,
        stdin: &str,
    ) -> JudgeResult<CustomOutcome> {
        let scratch = ScratchSpace::create(&self.scratch_root).await?;
        let outcome = self
            .run_custom_inner(&scratch, language, source_code, stdin)
            .await;
        scratch.cleanup().await;
        outcome
    }

    async fn run_custom_inner(
        &self,
        scratch: &ScratchSpace,
        language: &LanguageSpec,
        source_code: &str,
        stdin: &str,
    ) -> JudgeResult<CustomOutcome> {
        let build = self.build(scratch, language, source_code).await?;
        if let Some(compile_stderr) = build.compile_stderr {
            return Ok(CustomOutcome {
                status: Verdict::CompileError,
                stdout: String::new(),
                stderr: compile_stderr,
            });
        }
        let output = self.run_case(scratch, stdin.as_bytes()).await?;
        let status = if output.timed_out() {
            Verdict::TimeLimitExceeded
        } else if output.exit_code != 0 {
            Verdict::RuntimeError
        } else {
            Verdict::Accepted
        };
        Ok(CustomOutcome {
            status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Build stage. The build scratch dir is deleted before returning,
    /// whether or not compilation succeeded.
    async fn build(
        &self,
        scratch: &ScratchSpace,
        language: &LanguageSpec,
        source_code: &str,
    ) -> JudgeResult<BuildOutcome> {
        let source_name = format!("input.{}", language.extension);
        tokio::fs::write(scratch.build_dir.join(&source_name), source_code).await?;

        let script = format!(
            "#!/bin/sh\n{}\n",
            language.build.replace(IN_FILE_PLACEHOLDER, &source_name)
        );
        let script_path = scratch.build_dir.join(BUILD_SCRIPT);
        tokio::fs::write(&script_path, script).await?;
        set_executable(&script_path).await?;

        let result = self
            .sandbox
            .run(RunSpec {
                exec_path: Path::new(BUILD_MOUNT).join(BUILD_SCRIPT),
                cwd: PathBuf::from(BUILD_MOUNT),
                mounts: vec![
                    BindMount {
                        host: scratch.build_dir.clone(),
                        guest: PathBuf::from(BUILD_MOUNT),
                        writable: true,
                    },
                    BindMount {
                        host: scratch.run_dir.clone(),
                        guest: PathBuf::from(RUN_MOUNT),
                        writable: true,
                    },
                ],
                limits: self.compile_limits.clone(),
                stdin: Vec::new(),
            })
            .await;
        scratch.drop_build_dir().await;
        let output = result?;

        if output.exit_code != 0 || !output.stderr.trim().is_empty() {
            tracing::debug!(exit_code = output.exit_code, "build stage failed");
            return Ok(BuildOutcome {
                wall_time: output.wall_time,
                compile_stderr: Some(output.stderr),
            });
        }
        Ok(BuildOutcome {
            wall_time: output.wall_time,
            compile_stderr: None,
        })
    }

    async fn run_case(&self, scratch: &ScratchSpace, stdin: &[u8]) -> JudgeResult<RunOutput> {
        self.sandbox
            .run(RunSpec {
                exec_path: Path::new(RUN_MOUNT).join(RUN_ENTRY),
                cwd: PathBuf::from(RUN_MOUNT),
                mounts: vec![BindMount {
                    host: scratch.run_dir.clone(),
                    guest: PathBuf::from(RUN_MOUNT),
                    writable: false,
                }],
                limits: self.run_limits.clone(),
                stdin: stdin.to_vec(),
            })
            .await
    }
}

#[cfg(target_family = "unix")]
async fn set_executable(path: &Path) -> JudgeResult<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

#[cfg(not(target_family = "unix"))]
async fn set_executable(_path: &Path) -> JudgeResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        path::PathBuf,
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;

    use super::{Pipeline, classify_run};
    use crate::{
        config::{LanguageSpec, WorkerConfig},
        error::JudgeResult,
        models::{TestCase, Verdict},
        sandbox::{RunOutput, RunSpec, Sandbox, SandboxLimits, TIME_LIMIT_EXIT_CODE},
    };

    /// Scripted sandbox double: pops one canned output per invocation and
    /// counts how many times it was called.
    struct ScriptedSandbox {
        outputs: Mutex<VecDeque<RunOutput>>,
        calls: AtomicUsize,
    }

    impl ScriptedSandbox {
        fn new(outputs: Vec<RunOutput>) -> Self {
            Self {
                outputs: Mutex::new(outputs.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Sandbox for ScriptedSandbox {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn run(&self, _spec: RunSpec) -> JudgeResult<RunOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .outputs
                .lock()
                .unwrap()
                .pop_front()
                .expect("sandbox invoked more times than scripted"))
        }
    }

    fn ok_output(stdout: &str) -> RunOutput {
        RunOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
            wall_time: Duration::from_millis(5),
        }
    }

    fn failed_output(exit_code: i32, stderr: &str) -> RunOutput {
        RunOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code,
            wall_time: Duration::from_millis(5),
        }
    }

    fn node() -> LanguageSpec {
        LanguageSpec {
            name: "Node".to_string(),
            extension: "js".to_string(),
            build: "cp {IN_FILE} /executable/main".to_string(),
        }
    }

    fn pipeline_with(outputs: Vec<RunOutput>) -> (Pipeline, Arc<ScriptedSandbox>) {
        let sandbox = Arc::new(ScriptedSandbox::new(outputs));
        let config = WorkerConfig {
            scratch_root: std::env::temp_dir().join("gavel-pipeline-tests"),
            chroot_path: PathBuf::from("/chroot"),
            sandbox_uid: 99_999,
            languages_path: None,
            compile_limits: SandboxLimits::compile_default(),
            run_limits: SandboxLimits::run_default(),
            max_output_bytes: 1024,
        };
        (Pipeline::new(sandbox.clone(), &config), sandbox)
    }

    fn case(input: &str, expected: &str) -> TestCase {
        TestCase {
            input: input.to_string(),
            expected_output: expected.to_string(),
            hidden: false,
        }
    }

    #[test]
    fn classifies_exit_codes() {
        let expected = "42";
        assert_eq!(
            classify_run(&failed_output(TIME_LIMIT_EXIT_CODE, ""), expected),
            Verdict::TimeLimitExceeded
        );
        assert_eq!(
            classify_run(&failed_output(1, "boom"), expected),
            Verdict::RuntimeError
        );
        assert_eq!(
            classify_run(&ok_output("41"), expected),
            Verdict::WrongAnswer
        );
        assert_eq!(classify_run(&ok_output("42\n"), expected), Verdict::Accepted);
    }

    #[tokio::test]
    async fn accepted_when_every_case_matches() {
        let (pipeline, sandbox) = pipeline_with(vec![
            ok_output(""),
            ok_output("Hello, World!\n"),
        ]);
        let outcome = pipeline
            .judge(
                &node(),
                "console.log(\"Hello, World!\")",
                &[case("", "Hello, World!")],
            )
            .await
            .unwrap();
        assert_eq!(outcome.verdict, Verdict::Accepted);
        assert!(outcome.passed());
        assert_eq!(outcome.failed_test_case, None);
        assert_eq!(sandbox.calls(), 2);
    }

    #[tokio::test]
    async fn wrong_answer_records_failing_index() {
        let (pipeline, sandbox) = pipeline_with(vec![ok_output(""), ok_output("nope\n")]);
        let outcome = pipeline
            .judge(&node(), "console.log(\"nope\")", &[case("", "Hello, World!")])
            .await
            .unwrap();
        assert_eq!(outcome.verdict, Verdict::WrongAnswer);
        assert!(!outcome.passed());
        assert_eq!(outcome.failed_test_case, Some(0));
        assert_eq!(sandbox.calls(), 2);
    }

    #[tokio::test]
    async fn short_circuits_after_first_failure() {
        // Cases pass, fail, pass: the third must never run.
        let (pipeline, sandbox) = pipeline_with(vec![
            ok_output(""),
            ok_output("ok\n"),
            ok_output("wrong\n"),
        ]);
        let outcome = pipeline
            .judge(
                &node(),
                "whatever",
                &[case("a", "ok"), case("b", "ok"), case("c", "ok")],
            )
            .await
            .unwrap();
        assert_eq!(outcome.verdict, Verdict::WrongAnswer);
        assert_eq!(outcome.failed_test_case, Some(1));
        // One build plus two runs; the scripted queue is exhausted, so a
        // third run would have panicked.
        assert_eq!(sandbox.calls(), 3);
    }

    #[tokio::test]
    async fn compile_failure_skips_all_runs() {
        let (pipeline, sandbox) = pipeline_with(vec![failed_output(
            1,
            "input.js:1: unexpected token",
        )]);
        let outcome = pipeline
            .judge(
                &node(),
                "][",
                &[case("a", "x"), case("b", "y"), case("c", "z")],
            )
            .await
            .unwrap();
        assert_eq!(outcome.verdict, Verdict::CompileError);
        assert_eq!(outcome.failed_test_case, None);
        assert!(outcome.stderr.contains("unexpected token"));
        assert_eq!(sandbox.calls(), 1);
    }

    #[tokio::test]
    async fn nonempty_build_stderr_is_a_compile_error_even_on_exit_zero() {
        let (pipeline, sandbox) = pipeline_with(vec![RunOutput {
            stdout: String::new(),
            stderr: "warning treated as fatal".to_string(),
            exit_code: 0,
            wall_time: Duration::from_millis(5),
        }]);
        let outcome = pipeline
            .judge(&node(), "x", &[case("", "")])
            .await
            .unwrap();
        assert_eq!(outcome.verdict, Verdict::CompileError);
        assert_eq!(sandbox.calls(), 1);
    }

    #[tokio::test]
    async fn runtime_error_surfaces_interpreter_stderr() {
        let (pipeline, _sandbox) = pipeline_with(vec![
            ok_output(""),
            failed_output(1, "ReferenceError: wconsole is not defined"),
        ]);
        let outcome = pipeline
            .judge(
                &node(),
                "wconsole.log(\"Hello, World!\")",
                &[case("", "Hello, World!")],
            )
            .await
            .unwrap();
        assert_eq!(outcome.verdict, Verdict::RuntimeError);
        assert_eq!(outcome.failed_test_case, Some(0));
        assert!(outcome.stderr.contains("ReferenceError"));
    }

    #[tokio::test]
    async fn time_limit_kill_is_not_a_runtime_error() {
        let (pipeline, _sandbox) = pipeline_with(vec![
            ok_output(""),
            failed_output(TIME_LIMIT_EXIT_CODE, ""),
        ]);
        let outcome = pipeline
            .judge(&node(), "while(1){}", &[case("", "never")])
            .await
            .unwrap();
        assert_eq!(outcome.verdict, Verdict::TimeLimitExceeded);
    }

    #[tokio::test]
    async fn elapsed_time_sums_the_jailed_wall_times() {
        let mut build = ok_output("");
        build.wall_time = Duration::from_millis(40);
        let mut run = ok_output("ok\n");
        run.wall_time = Duration::from_millis(25);
        let (pipeline, _sandbox) = pipeline_with(vec![build, run]);
        let outcome = pipeline
            .judge(&node(), "whatever", &[case("", "ok")])
            .await
            .unwrap();
        assert_eq!(outcome.verdict, Verdict::Accepted);
        assert_eq!(outcome.time_elapsed_ms, 65);
    }

    #[tokio::test]
    async fn custom_run_reports_output_without_comparison() {
        let (pipeline, _sandbox) =
            pipeline_with(vec![ok_output(""), ok_output("echoed input\n")]);
        let outcome = pipeline
            .run_custom(&node(), "some code", "echoed input")
            .await
            .unwrap();
        assert_eq!(outcome.status, Verdict::Accepted);
        assert_eq!(outcome.stdout, "echoed input\n");
    }
}

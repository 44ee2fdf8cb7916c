use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Pending,
    Success,
    Fail,
}

impl SubmissionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SubmissionStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub user_id: i64,
    pub problem_id: i64,
    pub source_code: String,
    pub language: String,
    pub status: SubmissionStatus,
    #[serde(default)]
    pub failed_test_case_id: Option<usize>,
    #[serde(default)]
    pub time_elapsed_ms: u64,
    pub submit_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub hidden: bool,
}

/// Shape of the `test_data` RPC reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseSet {
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    RuntimeError,
    CompileError,
}

impl Verdict {
    pub fn accepted(self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// Result of judging one submission against its test cases.
#[derive(Debug, Clone)]
pub struct JudgeOutcome {
    pub verdict: Verdict,
    /// Index of the first non-accepted test case, when one exists.
    pub failed_test_case: Option<usize>,
    pub time_elapsed_ms: u64,
    /// stderr from the failing stage, empty when accepted.
    pub stderr: String,
}

impl JudgeOutcome {
    pub fn passed(&self) -> bool {
        self.verdict.accepted()
    }
}

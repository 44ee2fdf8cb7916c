use thiserror::Error;

pub type JudgeResult<T> = Result<T, JudgeError>;

/// Faults of the judging machinery. Verdicts are values, never errors: a
/// crashing or non-compiling program is a legitimate judging input.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("broker error: {0}")]
    Broker(#[from] redis::RedisError),

    #[error("malformed payload: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("rpc call failed: {0}")]
    Rpc(String),

    #[error("data fetch failed: {0}")]
    Data(String),

    #[error("no build recipe for language {0:?}")]
    UnknownLanguage(String),

    /// The sandbox itself could not be started. Kept apart from
    /// `Verdict::CompileError` so an environment fault is never reported
    /// as a user compile error.
    #[error("sandbox failed to launch: {0}")]
    SandboxLaunch(#[source] std::io::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::{JudgeError, JudgeResult},
    sandbox::SandboxLimits,
};

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub broker: BrokerConfig,
    pub worker: WorkerConfig,
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub url: String,
    pub submission_queue: String,
    pub rpc_queue: String,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Host directory holding per-submission scratch trees.
    pub scratch_root: PathBuf,
    /// Root filesystem the sandbox chroots into.
    pub chroot_path: PathBuf,
    /// uid:gid the sandboxed process runs as; never the worker's own.
    pub sandbox_uid: u32,
    pub languages_path: Option<PathBuf>,
    pub compile_limits: SandboxLimits,
    pub run_limits: SandboxLimits,
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub bind_addr: SocketAddr,
    pub data_service_url: String,
    pub persistence_path: Option<PathBuf>,
}

impl JudgeConfig {
    pub fn from_env() -> Self {
        Self {
            broker: BrokerConfig {
                url: env::var("BROKER_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
                submission_queue: env::var("SUBMISSION_QUEUE")
                    .unwrap_or_else(|_| "submission_queue".to_string()),
                rpc_queue: env::var("BRIDGE_QUEUE").unwrap_or_else(|_| "bridge_queue".to_string()),
                connect_attempts: env_parse("BROKER_CONNECT_ATTEMPTS", 10u32),
                connect_backoff: Duration::from_secs(env_parse("BROKER_CONNECT_BACKOFF_SECS", 2u64)),
            },
            worker: WorkerConfig {
                scratch_root: env_parse("SCRATCH_ROOT", PathBuf::from("/program_files")),
                chroot_path: env_parse("CHROOT_PATH", PathBuf::from("/chroot")),
                sandbox_uid: env_parse("SANDBOX_UID", 99_999u32),
                languages_path: env::var("LANGUAGES_PATH").ok().map(PathBuf::from),
                compile_limits: SandboxLimits::compile_default(),
                run_limits: SandboxLimits::run_default(),
                max_output_bytes: env_parse("MAX_OUTPUT_BYTES", 1024 * 1024usize),
            },
            bridge: BridgeConfig {
                bind_addr: env_parse("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080))),
                data_service_url: env::var("DATA_SERVICE_URL")
                    .unwrap_or_else(|_| "http://localhost:5000/v1".to_string()),
                persistence_path: env::var("PERSIST_SUBMISSIONS_PATH").ok().map(PathBuf::from),
            },
        }
    }
}

/// One entry of the language table: how to turn a source file into the
/// run artifact `/executable/main`. `{IN_FILE}` marks the source file name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageSpec {
    pub name: String,
    pub extension: String,
    pub build: String,
}

#[derive(Debug, Deserialize)]
struct LanguageFile {
    language: Vec<LanguageSpec>,
}

/// Built-in table used when no LANGUAGES_PATH override is given. Build
/// scripts run chrooted with the build dir at /build (cwd) and the run dir
/// at /executable, and must leave an executable at /executable/main.
const DEFAULT_LANGUAGES: &str = r#"
[[language]]
name = "Node"
extension = "js"
build = "cp {IN_FILE} /executable/main.js && printf '#!/bin/sh\nexec node /executable/main.js\n' > /executable/main && chmod +x /executable/main"

[[language]]
name = "Python"
extension = "py"
build = "cp {IN_FILE} /executable/main.py && printf '#!/bin/sh\nexec python3 /executable/main.py\n' > /executable/main && chmod +x /executable/main"

[[language]]
name = "C"
extension = "c"
build = "gcc -O2 {IN_FILE} -o /executable/main"

[[language]]
name = "C++"
extension = "cpp"
build = "g++ -O2 {IN_FILE} -o /executable/main"
"#;

pub fn load_languages(path: Option<&std::path::Path>) -> JudgeResult<Vec<LanguageSpec>> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)?,
        None => DEFAULT_LANGUAGES.to_string(),
    };
    let file: LanguageFile =
        toml::from_str(&raw).map_err(|err| JudgeError::Config(err.to_string()))?;
    if file.language.is_empty() {
        return Err(JudgeError::Config("language table is empty".to_string()));
    }
    Ok(file.language)
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

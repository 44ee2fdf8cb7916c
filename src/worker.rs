use std::sync::Arc;

use crate::{
    broker::{
        Broker,
        envelope::{CustomResultBody, JudgementBody, QueueMessage},
        rpc::RpcClient,
    },
    config::{JudgeConfig, LanguageSpec},
    error::{JudgeError, JudgeResult},
    pipeline::Pipeline,
    sandbox::{NsjailSandbox, Sandbox},
};

/// Judge worker: a blocking consumer loop over the submission queue.
/// Strictly sequential; one submission runs end-to-end before the next is
/// dequeued. Throughput scales by running more worker processes against
/// the same queue.
pub async fn run(config: JudgeConfig) -> anyhow::Result<()> {
    let languages = crate::config::load_languages(config.worker.languages_path.as_deref())?;
    let broker = Broker::connect(&config.broker).await?;
    let mut rpc = RpcClient::new(&broker, config.broker.rpc_queue.clone());
    let sandbox: Arc<dyn Sandbox> = Arc::new(NsjailSandbox::new(&config.worker));
    let pipeline = Pipeline::new(sandbox.clone(), &config.worker);

    tokio::fs::create_dir_all(&config.worker.scratch_root).await?;
    // Parks until the dispatcher is up; requests published before the
    // bridge starts sit on its durable queue until it consumes them.
    rpc.ping().await?;
    sync_languages(&mut rpc, &languages).await;
    tracing::info!(
        queue = %config.broker.submission_queue,
        sandbox = sandbox.name(),
        "judge worker ready"
    );

    loop {
        let raw = broker.pop_submission().await?;
        let message = match serde_json::from_str::<QueueMessage>(&raw) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed queue message");
                continue;
            }
        };
        // A failed item is logged and abandoned, never requeued; the loop
        // must outlive any single bad submission.
        if let Err(err) = handle_message(&mut rpc, &pipeline, &languages, message).await {
            tracing::error!(error = %err, "queue item abandoned");
        }
    }
}

/// Warn about bridge-side languages this worker has no build recipe for.
/// Doubles as a startup liveness check of the dispatcher.
async fn sync_languages(rpc: &mut RpcClient, local: &[LanguageSpec]) {
    match rpc.get_languages().await {
        Ok(remote) => {
            for language in remote {
                if !local.iter().any(|l| l.name == language.name) {
                    tracing::warn!(language = %language.name, "bridge language has no local build recipe");
                }
            }
        }
        Err(err) => tracing::warn!(error = %err, "language sync failed"),
    }
}

async fn handle_message(
    rpc: &mut RpcClient,
    pipeline: &Pipeline,
    languages: &[LanguageSpec],
    message: QueueMessage,
) -> JudgeResult<()> {
    match message {
        QueueMessage::Submission { id } => judge_submission(rpc, pipeline, languages, id).await,
        QueueMessage::Input {
            id,
            code,
            language,
            stdin,
        } => run_custom_input(rpc, pipeline, languages, id, &code, &language, &stdin).await,
    }
}

async fn judge_submission(
    rpc: &mut RpcClient,
    pipeline: &Pipeline,
    languages: &[LanguageSpec],
    submission_id: i64,
) -> JudgeResult<()> {
    tracing::info!(submission_id, "dequeued submission");

    let submission = rpc.submission_data(submission_id).await?;
    let test_cases = rpc.test_data(submission.problem_id).await?;
    let language = find_language(languages, &submission.language)?;

    let outcome = pipeline
        .judge(language, &submission.source_code, &test_cases)
        .await?;
    tracing::info!(
        submission_id,
        verdict = ?outcome.verdict,
        failed_test_case = ?outcome.failed_test_case,
        time_elapsed_ms = outcome.time_elapsed_ms,
        "judged"
    );
    if !outcome.passed() && !outcome.stderr.is_empty() {
        tracing::debug!(submission_id, stderr = %outcome.stderr, "failing stage stderr");
    }

    rpc.send_judgement(JudgementBody::from_outcome(submission_id, &outcome))
        .await
}

async fn run_custom_input(
    rpc: &mut RpcClient,
    pipeline: &Pipeline,
    languages: &[LanguageSpec],
    id: String,
    code: &str,
    language: &str,
    stdin: &str,
) -> JudgeResult<()> {
    tracing::info!(run_id = %id, "dequeued custom-input run");

    let language = find_language(languages, language)?;
    let outcome = pipeline.run_custom(language, code, stdin).await?;

    rpc.send_custom_result(CustomResultBody {
        submission_id: id,
        status: outcome.status,
        stdout: outcome.stdout,
        stderr: outcome.stderr,
    })
    .await
}

fn find_language<'a>(
    languages: &'a [LanguageSpec],
    name: &str,
) -> JudgeResult<&'a LanguageSpec> {
    languages
        .iter()
        .find(|l| l.name == name)
        .ok_or_else(|| JudgeError::UnknownLanguage(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::find_language;
    use crate::config::LanguageSpec;

    #[test]
    fn unknown_language_is_an_error_not_a_verdict() {
        let table = vec![LanguageSpec {
            name: "Node".to_string(),
            extension: "js".to_string(),
            build: "cp {IN_FILE} /executable/main".to_string(),
        }];
        assert!(find_language(&table, "Node").is_ok());
        assert!(find_language(&table, "Cobol").is_err());
    }
}

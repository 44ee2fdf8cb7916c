mod api;
mod data;
mod store;

use std::{future::IntoFuture, sync::Arc};

use async_trait::async_trait;
use tokio::net::TcpListener;

use crate::{
    broker::{
        Broker,
        envelope::{LanguageInfo, RpcRequest},
        rpc::{RpcHandler, RpcServer},
    },
    config::{JudgeConfig, LanguageSpec},
    error::{JudgeError, JudgeResult},
    metrics::MetricsRegistry,
    models::SubmissionStatus,
};

use data::DataService;
use store::SubmissionStore;

/// Bridge process: submission intake over HTTP plus the RPC dispatcher the
/// judge workers call back into.
pub async fn run(config: JudgeConfig) -> anyhow::Result<()> {
    let broker = Broker::connect(&config.broker).await?;
    let store = SubmissionStore::new(config.bridge.persistence_path.clone());
    let metrics = Arc::new(MetricsRegistry::new());
    let languages = crate::config::load_languages(config.worker.languages_path.as_deref())?;
    let data = DataService::new(config.bridge.data_service_url.clone());

    let dispatcher = Arc::new(BridgeRpc {
        store: store.clone(),
        data,
        languages,
        metrics: metrics.clone(),
    });
    let rpc_server = RpcServer::new(&broker, config.broker.rpc_queue.clone());
    let dispatcher_task = tokio::spawn(async move { rpc_server.serve(dispatcher).await });

    let app = api::routes(store, broker, metrics);
    let listener = TcpListener::bind(config.bridge.bind_addr).await?;
    tracing::info!(addr = %config.bridge.bind_addr, "bridge listening");
    // With the dispatcher gone the intake would keep enqueuing submissions
    // no worker can ever fetch; its exit takes the whole process down so
    // the supervisor restarts both halves together.
    tokio::select! {
        served = axum::serve(listener, app).into_future() => Ok(served?),
        exited = dispatcher_task => Err(dispatcher_exit_error(exited)),
    }
}

fn dispatcher_exit_error(
    exited: Result<JudgeResult<()>, tokio::task::JoinError>,
) -> anyhow::Error {
    match exited {
        Ok(Ok(())) => anyhow::anyhow!("rpc dispatcher stopped"),
        Ok(Err(err)) => anyhow::Error::new(err).context("rpc dispatcher failed"),
        Err(err) => anyhow::Error::new(err).context("rpc dispatcher panicked"),
    }
}

/// RPC dispatcher over the closed request set. Handler errors become an
/// error reply rather than silence, since callers wait without a timeout.
struct BridgeRpc {
    store: SubmissionStore,
    data: DataService,
    languages: Vec<LanguageSpec>,
    metrics: Arc<MetricsRegistry>,
}

#[async_trait]
impl RpcHandler for BridgeRpc {
    async fn handle(&self, request: RpcRequest) -> JudgeResult<serde_json::Value> {
        self.metrics.rpc_request();
        let result = self.dispatch(request).await;
        if result.is_err() {
            self.metrics.rpc_error();
        }
        result
    }
}

impl BridgeRpc {
    async fn dispatch(&self, request: RpcRequest) -> JudgeResult<serde_json::Value> {
        match request {
            RpcRequest::SubmissionData(id) => {
                let submission = self
                    .store
                    .get(id)
                    .ok_or_else(|| JudgeError::Data(format!("no submission {id}")))?;
                Ok(serde_json::to_value(submission)?)
            }
            RpcRequest::TestData(problem_id) => self.data.fetch_test_cases(problem_id).await,
            RpcRequest::GetLanguages => {
                let languages: Vec<LanguageInfo> = self
                    .languages
                    .iter()
                    .map(|l| LanguageInfo {
                        name: l.name.clone(),
                        extension: l.extension.clone(),
                    })
                    .collect();
                Ok(serde_json::to_value(languages)?)
            }
            RpcRequest::Judgement(body) => {
                let success = body.success == SubmissionStatus::Success;
                let recorded = self
                    .store
                    .record_judgement(
                        body.submission_id,
                        body.success,
                        body.failed_test_case_id,
                        body.time_elapsed_ms,
                    )
                    .await;
                if recorded {
                    self.metrics.judged(success);
                } else {
                    tracing::warn!(
                        submission_id = body.submission_id,
                        "judgement ignored: unknown submission or not a terminal transition"
                    );
                }
                // Forward best-effort; the judgement itself is already
                // recorded and acknowledged.
                if let Err(err) = self.data.judging_complete(body.submission_id, success).await {
                    tracing::warn!(error = %err, "judging_complete forward failed");
                }
                Ok(serde_json::json!("ok"))
            }
            RpcRequest::CustomResult(body) => {
                self.metrics.custom_run();
                self.store.put_custom_result(body);
                Ok(serde_json::json!("ok"))
            }
            RpcRequest::Test(value) => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::dispatcher_exit_error;
    use crate::error::JudgeError;

    #[tokio::test]
    async fn dispatcher_exit_is_fatal() {
        let handle = tokio::spawn(async {
            Err::<(), JudgeError>(JudgeError::Rpc("connection lost".to_string()))
        });
        let err = dispatcher_exit_error(handle.await);
        let rendered = format!("{err:#}");
        assert!(rendered.contains("rpc dispatcher failed"));
        assert!(rendered.contains("connection lost"));

        // Even a clean return is an error; the dispatcher loop never ends
        // on purpose.
        let handle = tokio::spawn(async { Ok::<(), JudgeError>(()) });
        assert!(
            dispatcher_exit_error(handle.await)
                .to_string()
                .contains("stopped")
        );
    }
}

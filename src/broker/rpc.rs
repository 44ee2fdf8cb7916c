use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use redis::{AsyncCommands, Direction, aio::ConnectionManager};
use uuid::Uuid;

use crate::{
    broker::{
        Broker,
        envelope::{
            CustomResultBody, JudgementBody, LanguageInfo, ReplyEnvelope, RequestEnvelope,
            RpcRequest,
        },
    },
    error::{JudgeError, JudgeResult},
    models::{Submission, SubmissionStatus, TestCase, TestCaseSet},
};

/// Matches replies on a shared reply destination to their callers. The
/// base design has one outstanding request at a time, so this degenerates
/// to "the next reply is mine", but replies arriving out of order are
/// stashed until the call holding their correlation id claims them.
#[derive(Debug, Default)]
pub struct ReplyRouter {
    pending: HashMap<String, serde_json::Value>,
}

impl ReplyRouter {
    pub fn stash(&mut self, reply: ReplyEnvelope) {
        self.pending.insert(reply.correlation_id, reply.body);
    }

    pub fn claim(&mut self, correlation_id: &str) -> Option<serde_json::Value> {
        self.pending.remove(correlation_id)
    }
}

/// Request/reply client over the broker. Each client owns a transient
/// reply list named after a fresh UUID; requests go to the shared bridge
/// queue with that list as `reply_to`.
pub struct RpcClient {
    conn: ConnectionManager,
    request_queue: String,
    reply_queue: String,
    router: ReplyRouter,
}

impl RpcClient {
    pub fn new(broker: &Broker, request_queue: String) -> Self {
        Self {
            conn: broker.connection(),
            request_queue,
            reply_queue: format!("rpc:reply:{}", Uuid::new_v4().as_simple()),
            router: ReplyRouter::default(),
        }
    }

    /// Issue one call and block until its reply arrives. No timeout is
    /// imposed: a lost reply stalls the caller.
    pub async fn call(&mut self, request: RpcRequest) -> JudgeResult<serde_json::Value> {
        let correlation_id = Uuid::new_v4().to_string();
        let envelope = RequestEnvelope {
            correlation_id: correlation_id.clone(),
            reply_to: self.reply_queue.clone(),
            request,
        };
        let payload = serde_json::to_string(&envelope)?;
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(&self.request_queue, payload).await?;

        loop {
            if let Some(body) = self.router.claim(&correlation_id) {
                if let Some(message) = body.get("error").and_then(|e| e.as_str()) {
                    return Err(JudgeError::Rpc(message.to_string()));
                }
                return Ok(body);
            }
            let (_queue, raw): (String, String) = conn.blpop(&self.reply_queue, 0.0).await?;
            let reply: ReplyEnvelope = serde_json::from_str(&raw)?;
            self.router.stash(reply);
        }
    }

    pub async fn submission_data(&mut self, submission_id: i64) -> JudgeResult<Submission> {
        let body = self.call(RpcRequest::SubmissionData(submission_id)).await?;
        serde_json::from_value(body).map_err(|err| JudgeError::Data(err.to_string()))
    }

    pub async fn test_data(&mut self, problem_id: i64) -> JudgeResult<Vec<TestCase>> {
        let body = self.call(RpcRequest::TestData(problem_id)).await?;
        let set: TestCaseSet =
            serde_json::from_value(body).map_err(|err| JudgeError::Data(err.to_string()))?;
        Ok(set.test_cases)
    }

    pub async fn get_languages(&mut self) -> JudgeResult<Vec<LanguageInfo>> {
        let body = self.call(RpcRequest::GetLanguages).await?;
        serde_json::from_value(body).map_err(|err| JudgeError::Data(err.to_string()))
    }

    pub async fn send_judgement(&mut self, body: JudgementBody) -> JudgeResult<()> {
        self.call(RpcRequest::Judgement(body)).await?;
        Ok(())
    }

    pub async fn send_custom_result(&mut self, body: CustomResultBody) -> JudgeResult<()> {
        self.call(RpcRequest::CustomResult(body)).await?;
        Ok(())
    }

    /// Liveness probe: echoes the payload through the dispatcher.
    pub async fn ping(&mut self) -> JudgeResult<()> {
        let nonce = serde_json::json!(Uuid::new_v4().to_string());
        let echoed = self.call(RpcRequest::Test(nonce.clone())).await?;
        if echoed != nonce {
            return Err(JudgeError::Rpc("echo reply did not match".to_string()));
        }
        Ok(())
    }
}

impl JudgementBody {
    pub fn from_outcome(submission_id: i64, outcome: &crate::models::JudgeOutcome) -> Self {
        Self {
            submission_id,
            success: if outcome.passed() {
                SubmissionStatus::Success
            } else {
                SubmissionStatus::Fail
            },
            failed_test_case_id: outcome.failed_test_case,
            time_elapsed_ms: outcome.time_elapsed_ms,
        }
    }
}

/// Handles one parsed request and produces the reply body.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, request: RpcRequest) -> JudgeResult<serde_json::Value>;
}

/// Reply lists are transient: a live caller is already blocked on its
/// list and pops the reply immediately, so anything still there after
/// this window belongs to a caller that died.
const REPLY_TTL_SECS: i64 = 300;

/// Consumer side of the request queue. Requests are handled strictly one
/// at a time: each message is parked on a processing list while in flight
/// and removed only after its reply has been published, so a crash mid-
/// handling leads to redelivery rather than loss.
pub struct RpcServer {
    conn: ConnectionManager,
    request_queue: String,
    processing_queue: String,
}

impl RpcServer {
    pub fn new(broker: &Broker, request_queue: String) -> Self {
        let processing_queue = format!("{request_queue}:processing");
        Self {
            conn: broker.connection(),
            request_queue,
            processing_queue,
        }
    }

    pub async fn serve(&self, handler: Arc<dyn RpcHandler>) -> JudgeResult<()> {
        let mut conn = self.conn.clone();
        self.requeue_stale(&mut conn).await?;

        loop {
            let raw: String = conn
                .blmove(
                    &self.request_queue,
                    &self.processing_queue,
                    Direction::Left,
                    Direction::Right,
                    0.0,
                )
                .await?;

            match serde_json::from_str::<RequestEnvelope>(&raw) {
                Ok(envelope) => {
                    let body = match handler.handle(envelope.request).await {
                        Ok(body) => body,
                        Err(err) => {
                            // Reply with an error instead of starving the
                            // caller, which has no timeout.
                            tracing::error!(error = %err, "rpc handler failed");
                            serde_json::json!({ "error": err.to_string() })
                        }
                    };
                    let reply = ReplyEnvelope {
                        correlation_id: envelope.correlation_id,
                        body,
                    };
                    conn.rpush::<_, _, ()>(&envelope.reply_to, serde_json::to_string(&reply)?)
                        .await?;
                    conn.expire::<_, ()>(&envelope.reply_to, REPLY_TTL_SECS)
                        .await?;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "dropping malformed rpc message");
                }
            }

            // Acknowledge: handled or poison, the message leaves the queue.
            conn.lrem::<_, _, ()>(&self.processing_queue, 1, &raw).await?;
        }
    }

    /// Push messages a crashed predecessor left on the processing list
    /// back to the head of the request queue.
    async fn requeue_stale(&self, conn: &mut ConnectionManager) -> JudgeResult<()> {
        loop {
            let moved: Option<String> = conn
                .lmove(
                    &self.processing_queue,
                    &self.request_queue,
                    Direction::Right,
                    Direction::Left,
                )
                .await?;
            match moved {
                Some(_) => tracing::warn!("requeued stale in-flight rpc message"),
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::ReplyRouter;
    use crate::broker::envelope::ReplyEnvelope;

    #[test]
    fn out_of_order_replies_reach_their_callers() {
        let mut router = ReplyRouter::default();
        // Replies arrive in the reverse of publish order.
        router.stash(ReplyEnvelope {
            correlation_id: "second".to_string(),
            body: json!({"n": 2}),
        });
        router.stash(ReplyEnvelope {
            correlation_id: "first".to_string(),
            body: json!({"n": 1}),
        });

        assert_eq!(router.claim("first"), Some(json!({"n": 1})));
        assert_eq!(router.claim("second"), Some(json!({"n": 2})));
        assert_eq!(router.claim("first"), None);
    }

    #[test]
    fn unclaimed_replies_stay_pending() {
        let mut router = ReplyRouter::default();
        assert_eq!(router.claim("nobody"), None);
        router.stash(ReplyEnvelope {
            correlation_id: "a".to_string(),
            body: json!("ok"),
        });
        assert_eq!(router.claim("b"), None);
        assert_eq!(router.claim("a"), Some(json!("ok")));
    }
}

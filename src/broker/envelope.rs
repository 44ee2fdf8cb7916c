use serde::{Deserialize, Serialize};

use crate::models::{SubmissionStatus, Verdict};

/// Message published to the durable submission queue. Regular submissions
/// carry only the id; custom-input runs carry their payload inline because
/// nothing persists them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueMessage {
    Submission {
        id: i64,
    },
    Input {
        id: String,
        code: String,
        language: String,
        stdin: String,
    },
}

/// The closed set of RPC request kinds. Anything else on the wire fails to
/// parse and is dropped as a poison message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum RpcRequest {
    /// Full submission record by submission id.
    SubmissionData(i64),
    /// Ordered test cases by problem id.
    TestData(i64),
    GetLanguages,
    Judgement(JudgementBody),
    CustomResult(CustomResultBody),
    /// Echo, used as a liveness probe.
    Test(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgementBody {
    pub submission_id: i64,
    pub success: SubmissionStatus,
    #[serde(default)]
    pub failed_test_case_id: Option<usize>,
    #[serde(default)]
    pub time_elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomResultBody {
    pub submission_id: String,
    pub status: Verdict,
    pub stdout: String,
    pub stderr: String,
}

/// Item of the `get_languages` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub name: String,
    pub extension: String,
}

/// Wire wrapper around a request: redis lists carry no per-message
/// properties, so the routing metadata rides alongside the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub correlation_id: String,
    pub reply_to: String,
    #[serde(flatten)]
    pub request: RpcRequest,
}

/// Reply published to the caller's `reply_to` list, echoing the caller's
/// correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub correlation_id: String,
    pub body: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{QueueMessage, RequestEnvelope, RpcRequest};
    use crate::models::SubmissionStatus;

    #[test]
    fn submission_queue_message_wire_shape() {
        let message = QueueMessage::Submission { id: 17 };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"type": "submission", "id": 17})
        );
    }

    #[test]
    fn request_type_tags_match_the_protocol() {
        let cases = [
            (RpcRequest::SubmissionData(5), "submission_data"),
            (RpcRequest::TestData(9), "test_data"),
            (RpcRequest::GetLanguages, "get_languages"),
            (RpcRequest::Test(json!(14)), "test"),
        ];
        for (request, tag) in cases {
            let value = serde_json::to_value(&request).unwrap();
            assert_eq!(value["type"], tag);
        }
    }

    #[test]
    fn judgement_request_round_trips() {
        let raw = json!({
            "type": "judgement",
            "body": {"submission_id": 3, "success": "FAIL", "failed_test_case_id": 1}
        });
        let parsed: RpcRequest = serde_json::from_value(raw).unwrap();
        match parsed {
            RpcRequest::Judgement(body) => {
                assert_eq!(body.submission_id, 3);
                assert_eq!(body.success, SubmissionStatus::Fail);
                assert_eq!(body.failed_test_case_id, Some(1));
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn envelope_carries_routing_beside_the_payload() {
        let envelope = RequestEnvelope {
            correlation_id: "abc".to_string(),
            reply_to: "rpc:reply:xyz".to_string(),
            request: RpcRequest::SubmissionData(8),
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({
                "correlation_id": "abc",
                "reply_to": "rpc:reply:xyz",
                "type": "submission_data",
                "body": 8
            })
        );
        let back: RequestEnvelope = serde_json::from_value(value).unwrap();
        assert_eq!(back.request, RpcRequest::SubmissionData(8));
    }

    #[test]
    fn unknown_request_type_is_rejected() {
        let raw = r#"{"correlation_id":"x","reply_to":"y","type":"drop_tables","body":1}"#;
        assert!(serde_json::from_str::<RequestEnvelope>(raw).is_err());
    }
}

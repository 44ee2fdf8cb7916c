use serde::Serialize;

use crate::error::{JudgeError, JudgeResult};

/// Client for the downstream HTTP data service: test-case payloads come
/// from it, final judgements are forwarded to it.
pub struct DataService {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct JudgingComplete {
    submission_id: i64,
    success: bool,
}

impl DataService {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn fetch_test_cases(&self, problem_id: i64) -> JudgeResult<serde_json::Value> {
        let url = format!("{}/testcases/{}", self.base_url, problem_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| JudgeError::Data(err.to_string()))?;
        if !response.status().is_success() {
            return Err(JudgeError::Data(format!(
                "test-case fetch for problem {problem_id} returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| JudgeError::Data(err.to_string()))
    }

    pub async fn judging_complete(&self, submission_id: i64, success: bool) -> JudgeResult<()> {
        let url = format!("{}/judging_complete", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&JudgingComplete {
                submission_id,
                success,
            })
            .send()
            .await
            .map_err(|err| JudgeError::Data(err.to_string()))?;
        if !response.status().is_success() {
            return Err(JudgeError::Data(format!(
                "judging_complete for submission {submission_id} returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::{
    broker::envelope::CustomResultBody,
    models::{Submission, SubmissionStatus},
};

/// Bridge-side record store. In-memory, standing in for the data layer at
/// its interface; judged records are optionally appended to a JSONL file.
#[derive(Clone)]
pub struct SubmissionStore {
    submissions: Arc<DashMap<i64, Submission>>,
    custom_results: Arc<DashMap<String, CustomResultBody>>,
    next_id: Arc<AtomicI64>,
    persistence_path: Option<PathBuf>,
    write_lock: Arc<Mutex<()>>,
}

impl SubmissionStore {
    pub fn new(persistence_path: Option<PathBuf>) -> Self {
        Self {
            submissions: Arc::new(DashMap::new()),
            custom_results: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicI64::new(1)),
            persistence_path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn create(
        &self,
        user_id: i64,
        problem_id: i64,
        source_code: String,
        language: String,
    ) -> Submission {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let submission = Submission {
            id,
            user_id,
            problem_id,
            source_code,
            language,
            status: SubmissionStatus::Pending,
            failed_test_case_id: None,
            time_elapsed_ms: 0,
            submit_time: Utc::now(),
        };
        self.submissions.insert(id, submission.clone());
        submission
    }

    pub fn get(&self, id: i64) -> Option<Submission> {
        self.submissions.get(&id).map(|entry| entry.value().clone())
    }

    /// Write the terminal status. A judgement carrying a non-terminal
    /// status is refused outright; at-least-once delivery also means a
    /// judgement can arrive twice, so a record already terminal is left
    /// untouched and `false` is returned.
    pub async fn record_judgement(
        &self,
        id: i64,
        status: SubmissionStatus,
        failed_test_case_id: Option<usize>,
        time_elapsed_ms: u64,
    ) -> bool {
        if !status.is_terminal() {
            return false;
        }
        let snapshot = {
            let Some(mut entry) = self.submissions.get_mut(&id) else {
                return false;
            };
            if entry.status.is_terminal() {
                return false;
            }
            entry.status = status;
            entry.failed_test_case_id = failed_test_case_id;
            entry.time_elapsed_ms = time_elapsed_ms;
            entry.clone()
        };
        self.persist(&snapshot).await;
        true
    }

    pub fn put_custom_result(&self, result: CustomResultBody) {
        self.custom_results
            .insert(result.submission_id.clone(), result);
    }

    /// One-shot retrieval: the result is consumed on read.
    pub fn take_custom_result(&self, id: &str) -> Option<CustomResultBody> {
        self.custom_results.remove(id).map(|(_, result)| result)
    }

    async fn persist(&self, submission: &Submission) {
        let Some(path) = &self.persistence_path else {
            return;
        };
        let _guard = self.write_lock.lock().await;
        let line = match serde_json::to_string(submission) {
            Ok(line) => line,
            Err(_) => return,
        };
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).append(true);
        if let Ok(mut file) = options.open(path).await {
            let _ = tokio::io::AsyncWriteExt::write_all(&mut file, line.as_bytes()).await;
            let _ = tokio::io::AsyncWriteExt::write_all(&mut file, b"\n").await;
        }
    }
}

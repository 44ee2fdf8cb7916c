use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    submitted_total: AtomicU64,
    judged_success_total: AtomicU64,
    judged_fail_total: AtomicU64,
    custom_runs_total: AtomicU64,
    rpc_requests_total: AtomicU64,
    rpc_errors_total: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) {
        self.submitted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn judged(&self, success: bool) {
        if success {
            self.judged_success_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.judged_fail_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn custom_run(&self) {
        self.custom_runs_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rpc_request(&self) {
        self.rpc_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rpc_error(&self) {
        self.rpc_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render_prometheus(&self) -> String {
        format!(
            concat!(
                "# TYPE submissions_total counter\n",
                "submissions_total {}\n",
                "# TYPE judgements_success_total counter\n",
                "judgements_success_total {}\n",
                "# TYPE judgements_fail_total counter\n",
                "judgements_fail_total {}\n",
                "# TYPE custom_runs_total counter\n",
                "custom_runs_total {}\n",
                "# TYPE rpc_requests_total counter\n",
                "rpc_requests_total {}\n",
                "# TYPE rpc_errors_total counter\n",
                "rpc_errors_total {}\n"
            ),
            self.submitted_total.load(Ordering::Relaxed),
            self.judged_success_total.load(Ordering::Relaxed),
            self.judged_fail_total.load(Ordering::Relaxed),
            self.custom_runs_total.load(Ordering::Relaxed),
            self.rpc_requests_total.load(Ordering::Relaxed),
            self.rpc_errors_total.load(Ordering::Relaxed),
        )
    }
}

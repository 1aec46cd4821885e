use metrics::{counter, describe_counter, with_local_recorder};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

use crate::domain::SpamAction;

const ACTIONS_TOTAL: &str = "eatspam_actions_total";
const HTTP_REQUESTS_TOTAL: &str = "eatspam_http_requests_total";

/// Process-wide counters, created once in `app.rs` and shared by `Arc` with the
/// coordinator and the dashboard for the lifetime of the process.
///
/// The recorder is owned here instead of being installed globally, so every
/// sink (and every test) keeps its own registry.
pub struct MetricsSink {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl MetricsSink {
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let sink = Self { recorder, handle };

        with_local_recorder(&sink.recorder, || {
            describe_counter!(ACTIONS_TOTAL, "Number of verdicts per action.");
            describe_counter!(HTTP_REQUESTS_TOTAL, "Dashboard requests.");
            for action in SpamAction::ALL {
                counter!(ACTIONS_TOTAL, "action" => action.to_string()).absolute(0);
            }
        });
        sink
    }

    pub fn increment_action(&self, action: SpamAction) {
        with_local_recorder(&self.recorder, || {
            counter!(ACTIONS_TOTAL, "action" => action.to_string()).increment(1);
        });
    }

    pub fn record_request(&self, method: &str, route: &str, status: u16) {
        with_local_recorder(&self.recorder, || {
            counter!(
                HTTP_REQUESTS_TOTAL,
                "method" => method.to_owned(),
                "route" => route.to_owned(),
                "status" => status.to_string()
            )
            .increment(1);
        });
    }

    /// Prometheus text exposition of every counter.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    #[cfg(test)]
    pub fn action_count(&self, action: SpamAction) -> u64 {
        let prefix = format!("{ACTIONS_TOTAL}{{action=\"{action}\"}} ");
        self.render()
            .lines()
            .find_map(|line| line.strip_prefix(prefix.as_str()))
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0)
    }
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

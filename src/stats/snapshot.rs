//! Periodic metrics snapshot and its output renderings

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time aggregate of everything observed in the sliding window
///
/// Latency fields are None until at least one sample exists; renderers show
/// `n/a` for those.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Caller-supplied label, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Seconds since the run started
    pub run_seconds: f64,
    /// Wall-clock time of the snapshot
    pub timestamp: DateTime<Utc>,
    /// Requests completed per minute over the (dynamic) window
    pub rpm: f64,
    /// Requests currently in flight
    pub processing: usize,
    /// Requests completed successfully over the whole run
    pub completed_requests: usize,
    /// Requests that terminally failed over the whole run
    pub failed_requests: usize,
    /// Requests that last returned 429 over the whole run
    pub throttled_requests: usize,
    /// Context tokens per minute over the window
    pub tpm_context: f64,
    /// Generated tokens per minute over the window
    pub tpm_gen: f64,
    /// Context plus generated tokens per minute over the window
    pub tpm_total: f64,
    pub e2e_avg: Option<f64>,
    pub e2e_95th: Option<f64>,
    /// Latency to response headers
    pub response_avg: Option<f64>,
    pub response_95th: Option<f64>,
    pub ttft_avg: Option<f64>,
    pub ttft_95th: Option<f64>,
    pub tbt_avg: Option<f64>,
    pub tbt_95th: Option<f64>,
    /// Average HTTP attempts per request over the window
    pub calls_avg: Option<f64>,
    /// Average context tokens per request over the window
    pub context_tpr_avg: Option<f64>,
    /// Average generated tokens per response over the window
    pub gen_tpr_avg: Option<f64>,
    pub gen_tpr_10th: Option<f64>,
    pub gen_tpr_90th: Option<f64>,
}

impl MetricsSnapshot {
    /// One human-readable key-value line, `n/a` for missing latencies.
    pub fn render_human(&self) -> String {
        let mut line = String::new();
        if let Some(label) = &self.label {
            line.push_str(&format!("{label} "));
        }
        line.push_str(&format!(
            "rpm: {:.1} processing: {} completed: {} failures: {} throttled: {} \
             ctx tpm: {:.1} gen tpm: {:.1} ttft avg: {} ttft 95th: {} \
             tbt avg: {} tbt 95th: {} e2e avg: {} e2e 95th: {} \
             context tpr avg: {} gen tpr 10th: {} gen tpr avg: {} gen tpr 90th: {}",
            self.rpm,
            self.processing,
            self.completed_requests,
            self.failed_requests,
            self.throttled_requests,
            self.tpm_context,
            self.tpm_gen,
            fmt_secs(self.ttft_avg),
            fmt_secs(self.ttft_95th),
            fmt_secs(self.tbt_avg),
            fmt_secs(self.tbt_95th),
            fmt_secs(self.e2e_avg),
            fmt_secs(self.e2e_95th),
            fmt_count(self.context_tpr_avg),
            fmt_count(self.gen_tpr_10th),
            fmt_count(self.gen_tpr_avg),
            fmt_count(self.gen_tpr_90th),
        ));
        line
    }

    /// One JSON object per line.
    pub fn render_jsonl(&self) -> String {
        // MetricsSnapshot contains no map types, so serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn fmt_secs(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.3}"),
        None => "n/a".to_string(),
    }
}

fn fmt_count(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.0}"),
        None => "n/a".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            label: None,
            run_seconds: 12.5,
            timestamp: Utc::now(),
            rpm: 60.0,
            processing: 3,
            completed_requests: 10,
            failed_requests: 1,
            throttled_requests: 2,
            tpm_context: 1000.0,
            tpm_gen: 500.0,
            tpm_total: 1500.0,
            e2e_avg: Some(1.234),
            e2e_95th: Some(2.5),
            response_avg: Some(0.05),
            response_95th: Some(0.08),
            ttft_avg: Some(0.1),
            ttft_95th: Some(0.2),
            tbt_avg: None,
            tbt_95th: None,
            calls_avg: Some(1.0),
            context_tpr_avg: Some(1000.0),
            gen_tpr_avg: Some(480.0),
            gen_tpr_10th: Some(400.0),
            gen_tpr_90th: Some(500.0),
        }
    }

    #[test]
    fn test_render_human_includes_na_for_missing() {
        let line = snapshot().render_human();
        assert!(line.contains("rpm: 60.0"));
        assert!(line.contains("tbt avg: n/a"));
        assert!(line.contains("e2e avg: 1.234"));
    }

    #[test]
    fn test_render_human_prefixes_label() {
        let mut snap = snapshot();
        snap.label = Some("canary".into());
        assert!(snap.render_human().starts_with("canary "));
    }

    #[test]
    fn test_render_jsonl_is_valid_json() {
        let line = snapshot().render_jsonl();
        let parsed: serde_json::Value = serde_json::from_str(&line).expect("valid json");
        assert_eq!(parsed["completed_requests"], 10);
        assert!(parsed["tbt_avg"].is_null());
        assert!(parsed.get("label").is_none());
    }
}

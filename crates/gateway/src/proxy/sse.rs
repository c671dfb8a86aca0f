//! Streaming parser for SSE upstream responses (`§4.4.1`).
//!
//! Bytes are forwarded to the client before they are inspected — client
//! latency must never wait on usage extraction. In parallel, each chunk is
//! decoded into a rolling text buffer and split on the `\n\n` SSE frame
//! separator; `data: ` events are best-effort JSON-parsed for a `usage`
//! object. Parse failures are silently ignored; the stream itself is never
//! aborted because of them.
//!
//! The buffering/parsing/exactly-once-guard logic lives in [`ScanState`],
//! kept free of the `QuotaStore`/`SystemLog` IO it eventually triggers so it
//! can be driven directly in tests.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use chrono::Utc;
use futures_util::Stream;
use lgw_domain::model::RequestLogEntry;
use lgw_storage::QuotaStore;
use serde_json::Value;

use crate::system_log::SystemLog;
use crate::usage;

type UpstreamChunks = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

struct RequestLogTemplate {
    user_id: Option<String>,
    model: String,
    path: String,
    method: String,
    status: i32,
    started_at: chrono::DateTime<Utc>,
}

/// A `usage` event pulled out of one SSE frame, awaiting dispatch to
/// `usage::record_usage`.
struct PendingUsage {
    model: String,
    usage: Value,
}

/// The pure, IO-free half of [`UsageTrackingStream`]: rolling text buffer,
/// last-seen cost, and the exactly-once `finalize` guard.
struct ScanState {
    buffer: String,
    model_fallback: String,
    user_id: Option<String>,
    total_cost: f64,
    logged: bool,
    template: RequestLogTemplate,
}

impl ScanState {
    fn new(
        model_fallback: String,
        user_id: Option<String>,
        path: String,
        method: String,
        status: i32,
        started_at: chrono::DateTime<Utc>,
    ) -> Self {
        Self {
            buffer: String::new(),
            model_fallback: model_fallback.clone(),
            user_id: user_id.clone(),
            total_cost: 0.0,
            logged: false,
            template: RequestLogTemplate {
                user_id,
                model: model_fallback,
                path,
                method,
                status,
                started_at,
            },
        }
    }

    /// Append `chunk` to the rolling buffer and split out every complete
    /// `\n\n`-terminated SSE frame it now contains, returning the `usage`
    /// events found. A frame split across chunk boundaries simply waits in
    /// `buffer` until the rest arrives.
    fn scan(&mut self, chunk: &Bytes) -> Vec<PendingUsage> {
        let Ok(text) = std::str::from_utf8(chunk) else {
            return Vec::new();
        };
        self.buffer.push_str(text);

        let mut pending = Vec::new();
        while let Some(idx) = self.buffer.find("\n\n") {
            let event = self.buffer[..idx].to_string();
            self.buffer.drain(..idx + 2);
            if let Some(found) = self.process_event(&event) {
                pending.push(found);
            }
        }
        pending
    }

    fn process_event(&mut self, event: &str) -> Option<PendingUsage> {
        let data = event
            .lines()
            .find_map(|line| line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")))?;
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return None;
        }
        let parsed: Value = serde_json::from_str(data).ok()?;
        let usage = parsed.get("usage")?.clone();
        self.total_cost = usage::extract_total_cost(&usage);
        let model = parsed
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&self.model_fallback)
            .to_string();
        Some(PendingUsage { model, usage })
    }

    /// Builds the `RequestLog` row the first time it's called; every
    /// subsequent call (natural EOF racing a client-disconnect `Drop`, or
    /// `Drop` running after EOF already fired) returns `None`.
    fn finalize_entry(&mut self) -> Option<RequestLogEntry> {
        if self.logged {
            return None;
        }
        self.logged = true;
        Some(RequestLogEntry {
            user_id: self.template.user_id.clone(),
            model: self.template.model.clone(),
            path: self.template.path.clone(),
            method: self.template.method.clone(),
            status: self.template.status,
            is_stream: true,
            latency_ms: (Utc::now() - self.template.started_at)
                .num_milliseconds()
                .max(0),
            total_cost: self.total_cost,
            started_at: self.template.started_at,
            completed_at: Utc::now(),
        })
    }
}

/// Wraps an upstream byte stream, forwarding every chunk unchanged while
/// scanning it for `usage` events, and guarantees a `RequestLog` row is
/// recorded exactly once — on natural end-of-stream or on early drop (the
/// client disconnected mid-stream).
pub struct UsageTrackingStream {
    inner: UpstreamChunks,
    quota: QuotaStore,
    system_log: Arc<SystemLog>,
    state: ScanState,
}

impl UsageTrackingStream {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        upstream: reqwest::Response,
        model_fallback: String,
        user_id: Option<String>,
        path: String,
        method: String,
        status: i32,
        started_at: chrono::DateTime<Utc>,
        quota: QuotaStore,
        system_log: Arc<SystemLog>,
    ) -> Self {
        Self {
            inner: Box::pin(upstream.bytes_stream()),
            quota,
            system_log,
            state: ScanState::new(model_fallback, user_id, path, method, status, started_at),
        }
    }

    fn dispatch_pending(&self, pending: Vec<PendingUsage>) {
        let Some(user_id) = self.state.user_id.clone() else {
            return;
        };
        for found in pending {
            let quota = self.quota.clone();
            let system_log = self.system_log.clone();
            let user_id = user_id.clone();
            tokio::spawn(async move {
                usage::record_usage(&quota, &system_log, &user_id, &found.model, &found.usage).await;
            });
        }
    }

    fn finalize(&mut self) {
        let Some(entry) = self.state.finalize_entry() else {
            return;
        };
        let quota = self.quota.clone();
        let system_log = self.system_log.clone();
        tokio::spawn(async move {
            usage::record_request_log(&quota, &system_log, &entry).await;
        });
    }
}

impl Stream for UsageTrackingStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let pending = this.state.scan(&chunk);
                this.dispatch_pending(pending);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.system_log.warn(format!("upstream stream error: {err}"));
                this.finalize();
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                this.finalize();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for UsageTrackingStream {
    fn drop(&mut self) {
        self.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ScanState {
        ScanState::new(
            "fallback-model".to_string(),
            Some("a@x.com".to_string()),
            "/v1/chat/completions".to_string(),
            "POST".to_string(),
            200,
            Utc::now(),
        )
    }

    #[test]
    fn scans_usage_event_split_across_chunk_boundary() {
        let mut s = state();
        let full = "data: {\"model\":\"m1\",\"usage\":{\"cost\":0.002,\"total_tokens\":10}}\n\n";
        let (head, tail) = full.split_at(full.len() / 2);

        let first = s.scan(&Bytes::from(head.to_string()));
        assert!(first.is_empty(), "frame not complete yet, nothing should fire");

        let second = s.scan(&Bytes::from(tail.to_string()));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].model, "m1");
        assert_eq!(s.total_cost, 0.002);
    }

    #[test]
    fn scans_multiple_events_sharing_one_chunk() {
        let mut s = state();
        let body = "data: {\"model\":\"m1\"}\n\ndata: {\"model\":\"m2\",\"usage\":{\"total_cost\":0.01}}\n\ndata: [DONE]\n\n";
        let found = s.scan(&Bytes::from(body.to_string()));

        assert_eq!(found.len(), 1, "only the second event carries usage");
        assert_eq!(found[0].model, "m2");
        assert_eq!(s.total_cost, 0.01);
    }

    #[test]
    fn ignores_non_json_and_done_frames() {
        let mut s = state();
        let body = "data: not json\n\ndata: [DONE]\n\n";
        let found = s.scan(&Bytes::from(body.to_string()));
        assert!(found.is_empty());
        assert_eq!(s.total_cost, 0.0);
    }

    #[test]
    fn falls_back_to_model_fallback_when_event_omits_model() {
        let mut s = state();
        let body = "data: {\"usage\":{\"cost\":0.5}}\n\n";
        let found = s.scan(&Bytes::from(body.to_string()));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].model, "fallback-model");
    }

    #[test]
    fn finalize_entry_fires_exactly_once() {
        let mut s = state();
        let first = s.finalize_entry();
        assert!(first.is_some());
        assert!(first.unwrap().is_stream);

        let second = s.finalize_entry();
        assert!(second.is_none(), "a second finalize call (EOF racing Drop) must be a no-op");
    }

    #[test]
    fn finalize_entry_carries_the_last_observed_cost() {
        let mut s = state();
        s.scan(&Bytes::from(
            "data: {\"model\":\"m1\",\"usage\":{\"cost\":0.0042}}\n\n".to_string(),
        ));
        let entry = s.finalize_entry().expect("first finalize must produce a row");
        assert_eq!(entry.total_cost, 0.0042);
        assert_eq!(entry.user_id.as_deref(), Some("a@x.com"));
    }
}

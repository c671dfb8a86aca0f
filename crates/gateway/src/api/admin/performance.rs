//! `GET /admin/performance` — last-24h latency summary plus the latest 200
//! `RequestLog` rows (`§4.6`). Percentiles use exact rank on the selected
//! window.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};

use crate::state::AppState;

use super::AdminGuard;

const LATEST_LIMIT: i64 = 200;

/// Exact-rank percentile over an ascending-sorted sample. `samples` must
/// already be sorted (as `AuditStore::latency_samples` returns it).
pub fn percentile(samples: &[i64], p: f64) -> i64 {
    if samples.is_empty() {
        return 0;
    }
    let rank = ((samples.len() as f64) * p).ceil() as usize;
    let index = rank.saturating_sub(1).min(samples.len() - 1);
    samples[index]
}

pub async fn performance(_guard: AdminGuard, State(state): State<AppState>) -> Response {
    let since_24h = Utc::now() - Duration::hours(24);

    let samples = match state.audit.latency_samples(since_24h).await {
        Ok(rows) => rows,
        Err(err) => return super::storage_error(err),
    };
    let recent = match state.audit.latest_request_logs(LATEST_LIMIT).await {
        Ok(rows) => rows,
        Err(err) => return super::storage_error(err),
    };

    let avg = if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<i64>() as f64 / samples.len() as f64
    };
    let max = samples.iter().copied().max().unwrap_or(0);

    Json(serde_json::json!({
        "summary": {
            "avg_latency_ms": avg,
            "p50_latency_ms": percentile(&samples, 0.50),
            "p95_latency_ms": percentile(&samples, 0.95),
            "p99_latency_ms": percentile(&samples, 0.99),
            "max_latency_ms": max,
            "sample_count": samples.len(),
        },
        "recent": recent,
    }))
    .into_response()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_empty_is_zero() {
        assert_eq!(percentile(&[], 0.95), 0);
    }

    #[test]
    fn exact_rank_percentile_on_ten_samples() {
        let samples: Vec<i64> = (1..=10).collect();
        assert_eq!(percentile(&samples, 0.50), 5);
        assert_eq!(percentile(&samples, 0.95), 10);
        assert_eq!(percentile(&samples, 0.99), 10);
    }

    #[test]
    fn single_sample_percentile_is_itself() {
        assert_eq!(percentile(&[42], 0.50), 42);
    }
}

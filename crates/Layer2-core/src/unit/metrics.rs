//! Metrics - 운영 스냅샷 집계
//!
//! 저장소와 실행 엔진의 카운터를 한 시점의 읽기 전용 뷰로 모읍니다.

use crate::unit::executor::ExecutionEngine;
use crate::unit::store::UnitStore;
use crate::unit::types::UnitStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

// ============================================================================
// MetricsSnapshot
// ============================================================================

/// 한 시점의 운영 지표
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    // 유닛 현황
    pub units_total: usize,
    pub units_loaded: usize,
    pub units_error: usize,
    pub units_reloading: usize,
    pub units_unloaded: usize,

    // 감시 현황
    pub directories_watching: usize,

    // 실행 요청 누계
    pub requests_total: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,

    // 성공 호출 누계
    pub calls_total: u64,
    pub call_time_total_ms: f64,
    pub call_time_avg_ms: f64,

    // 서비스 수명
    pub uptime_secs: f64,
    pub requests_per_second: f64,

    pub captured_at: DateTime<Utc>,
}

// ============================================================================
// MetricsAggregator
// ============================================================================

/// 지표 집계기
pub struct MetricsAggregator {
    store: Arc<UnitStore>,
    engine: Arc<ExecutionEngine>,
    started: Instant,
}

impl MetricsAggregator {
    pub fn new(store: Arc<UnitStore>, engine: Arc<ExecutionEngine>) -> Self {
        Self {
            store,
            engine,
            started: Instant::now(),
        }
    }

    /// 현재 지표 스냅샷 생성
    pub async fn snapshot(&self, directories_watching: usize) -> MetricsSnapshot {
        let status_counts = self.store.status_counts().await;
        let (calls_total, call_time_total) = self.store.aggregate_stats().await;
        let (requests_total, requests_succeeded, requests_failed) =
            self.engine.request_counts();

        let uptime_secs = self.started.elapsed().as_secs_f64();
        let call_time_total_ms = call_time_total.as_secs_f64() * 1000.0;

        MetricsSnapshot {
            units_total: self.store.len().await,
            units_loaded: status_counts.get(&UnitStatus::Loaded).copied().unwrap_or(0),
            units_error: status_counts.get(&UnitStatus::Error).copied().unwrap_or(0),
            units_reloading: status_counts
                .get(&UnitStatus::Reloading)
                .copied()
                .unwrap_or(0),
            units_unloaded: status_counts
                .get(&UnitStatus::Unloaded)
                .copied()
                .unwrap_or(0),
            directories_watching,
            requests_total,
            requests_succeeded,
            requests_failed,
            calls_total,
            call_time_total_ms,
            call_time_avg_ms: if calls_total == 0 {
                0.0
            } else {
                call_time_total_ms / calls_total as f64
            },
            uptime_secs,
            requests_per_second: if uptime_secs > 0.0 {
                requests_total as f64 / uptime_secs
            } else {
                0.0
            },
            captured_at: Utc::now(),
        }
    }
}

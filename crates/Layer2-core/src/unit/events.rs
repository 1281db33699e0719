//! Unit events - 유닛 수명주기 이벤트 버스
//!
//! 로드/리로드/언로드/감시 변경을 구독자에게 브로드캐스트하고,
//! 최근 이벤트를 히스토리로 보관합니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::trace;

// ============================================================================
// 이벤트 타입
// ============================================================================

/// 유닛 이벤트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitEventType {
    ServiceStarted,
    ServiceStopped,
    WatchAdded,
    WatchRemoved,
    UnitLoaded,
    UnitLoadFailed,
    UnitUnloaded,
}

/// 유닛 이벤트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitEvent {
    pub event_type: UnitEventType,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl UnitEvent {
    pub fn new(event_type: UnitEventType, data: Value, source: impl Into<String>) -> Self {
        Self {
            event_type,
            data,
            timestamp: Utc::now(),
            source: source.into(),
        }
    }

    /// 경로 하나만 싣는 이벤트
    pub fn for_path(event_type: UnitEventType, path: &Path, source: impl Into<String>) -> Self {
        Self::new(
            event_type,
            json!({ "path": path.to_string_lossy() }),
            source,
        )
    }
}

// ============================================================================
// UnitEventHandler
// ============================================================================

/// 인프로세스 이벤트 핸들러
///
/// broadcast 구독과 달리 발행 시점에 인라인으로 호출됩니다.
/// 느린 핸들러는 발행자를 지연시키므로 짧게 유지할 것.
#[async_trait]
pub trait UnitEventHandler: Send + Sync {
    async fn handle(&self, event: &UnitEvent);
}

// ============================================================================
// EventBus
// ============================================================================

/// 이벤트 버스 - broadcast 채널 + 인라인 핸들러 + 최근 히스토리
pub struct EventBus {
    sender: broadcast::Sender<UnitEvent>,
    handlers: RwLock<Vec<Arc<dyn UnitEventHandler>>>,
    history: RwLock<VecDeque<UnitEvent>>,
    history_size: usize,
}

impl EventBus {
    pub fn new(history_size: usize) -> Self {
        let (sender, _) = broadcast::channel(history_size.max(16));
        Self {
            sender,
            handlers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::with_capacity(history_size)),
            history_size,
        }
    }

    /// 새 구독자 등록
    pub fn subscribe(&self) -> broadcast::Receiver<UnitEvent> {
        self.sender.subscribe()
    }

    /// 인라인 핸들러 등록
    pub async fn register_handler(&self, handler: Arc<dyn UnitEventHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// 이벤트 발행 (구독자가 없어도 히스토리에는 남음)
    pub async fn publish(&self, event: UnitEvent) {
        trace!(event_type = ?event.event_type, source = %event.source, "Event published");

        {
            let mut history = self.history.write().await;
            if history.len() >= self.history_size {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        for handler in self.handlers.read().await.iter() {
            handler.handle(&event).await;
        }

        let _ = self.sender.send(event);
    }

    /// 최근 이벤트 조회 (오래된 것부터)
    pub async fn recent(&self, limit: usize) -> Vec<UnitEvent> {
        let history = self.history.read().await;
        history
            .iter()
            .skip(history.len().saturating_sub(limit))
            .cloned()
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

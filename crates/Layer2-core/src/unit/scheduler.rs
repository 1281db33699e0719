//! Reload scheduler - 변경 이벤트 디바운스와 리로드 실행
//!
//! 변경 이벤트마다 경로별 타임스탬프를 갱신하고 1회용 타이머를 겁니다.
//! 타이머가 깨어났을 때 그 사이 새 이벤트가 없었던 경우에만 리로드하므로,
//! 저장 직후의 이벤트 폭주는 윈도우가 잠잠해진 뒤 리로드 한 번으로
//! 합쳐집니다.

use crate::unit::loader::UnitLoader;
use crate::unit::watcher::ChangeEvent;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

// ============================================================================
// ReloadScheduler
// ============================================================================

/// 디바운스 리로드 스케줄러
pub struct ReloadScheduler {
    loader: Arc<UnitLoader>,
    debounce: Duration,
    pending: Mutex<HashMap<PathBuf, Instant>>,
}

impl ReloadScheduler {
    pub fn new(loader: Arc<UnitLoader>, debounce: Duration) -> Self {
        Self {
            loader,
            debounce,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// 이벤트 펌프 기동 - 채널이 닫히면 종료
    pub fn spawn(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<ChangeEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                trace!(path = %event.path.display(), kind = ?event.kind, "Change event");
                self.note(event.path);
            }
            debug!("Change channel closed, scheduler stopping");
        })
    }

    /// 변경 이벤트 기록 + 디바운스 타이머 장전
    ///
    /// 윈도우 안의 후속 이벤트는 타임스탬프만 갱신합니다.
    /// 각 타이머는 깨어난 뒤 자신이 최신일 때만 발화하므로,
    /// 이벤트 N개가 몰려도 리로드는 한 번만 일어납니다.
    pub fn note(self: &Arc<Self>, path: PathBuf) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.insert(path.clone(), Instant::now());
        }

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(scheduler.debounce).await;
            scheduler.fire(&path).await;
        });
    }

    /// 타이머 발화 - 자신이 최신 이벤트의 타이머일 때만 리로드 수행
    async fn fire(&self, path: &Path) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            match pending.get(path) {
                Some(recorded) if recorded.elapsed() >= self.debounce => {
                    pending.remove(path);
                }
                // 윈도우 안에 새 이벤트가 왔음 - 그쪽 타이머에 맡긴다
                _ => return,
            }
        }

        debug!(path = %path.display(), "Debounce window settled");
        // 존재하면 리로드, 삭제됐으면 퇴출. load가 Missing 퇴출까지 처리한다.
        if let Err(e) = self.loader.load(path, true).await {
            error!(path = %path.display(), error = %e, "Scheduled reload failed");
        }
    }

    /// 아직 발화하지 않은 경로 수
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

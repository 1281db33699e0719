//! Unit service - 프로그래밍 표면
//!
//! 저장소/런타임/로더/실행기/감시기/스케줄러를 하나로 묶는 파사드.
//! 임베더는 이 타입 하나로 감시 디렉토리 관리, 유닛 조회,
//! 실행, 리로드, 지표 조회를 수행합니다.

use crate::unit::events::{EventBus, UnitEvent, UnitEventType};
use crate::unit::executor::ExecutionEngine;
use crate::unit::loader::{LoadOutcome, UnitLoader};
use crate::unit::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::unit::runtime::WasmRuntime;
use crate::unit::scheduler::ReloadScheduler;
use crate::unit::store::UnitStore;
use crate::unit::types::{
    absolutize, ExecutionRequest, ExecutionResult, UnitSummary, WatchedDirectory,
};
use crate::unit::watcher::{ChangeEvent, ChangeNotifier, PathFilter};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use unitforge_foundation::{Error, Result, ServiceConfig};

// ============================================================================
// ReloadReport
// ============================================================================

/// reload_all 결과 집계
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReloadReport {
    pub reloaded: usize,
    pub failed: usize,
    pub total: usize,
}

// ============================================================================
// UnitService
// ============================================================================

/// 유닛 레지스트리 서비스
pub struct UnitService {
    config: ServiceConfig,
    store: Arc<UnitStore>,
    runtime: Arc<WasmRuntime>,
    loader: Arc<UnitLoader>,
    engine: Arc<ExecutionEngine>,
    events: Arc<EventBus>,
    metrics: MetricsAggregator,
    filter: PathFilter,
    notifier: ChangeNotifier,
    scheduler: Arc<ReloadScheduler>,
    watching: RwLock<HashMap<PathBuf, WatchedDirectory>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    change_rx: Mutex<Option<UnboundedReceiver<ChangeEvent>>>,
}

impl UnitService {
    /// 서비스 조립 (백그라운드 태스크는 [`start`](Self::start)에서 기동)
    pub fn new(config: ServiceConfig) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(UnitStore::new());
        let runtime = Arc::new(WasmRuntime::new(&config)?);
        let events = Arc::new(EventBus::new(config.event_history_size));
        let loader = Arc::new(UnitLoader::new(
            Arc::clone(&store),
            Arc::clone(&runtime),
            config.clone(),
            Arc::clone(&events),
        ));
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&store),
            Arc::clone(&loader),
            Arc::clone(&runtime),
            &config,
        ));
        let metrics = MetricsAggregator::new(Arc::clone(&store), Arc::clone(&engine));
        let scheduler = Arc::new(ReloadScheduler::new(Arc::clone(&loader), config.debounce()));

        let filter = PathFilter::from_config(&config)?;
        let (notifier, change_rx) = ChangeNotifier::new(filter.clone())?;

        Ok(Self {
            config,
            store,
            runtime,
            loader,
            engine,
            events,
            metrics,
            filter,
            notifier,
            scheduler,
            watching: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            change_rx: Mutex::new(Some(change_rx)),
        })
    }

    // ========================================================================
    // 수명주기
    // ========================================================================

    /// 백그라운드 태스크 기동 + 기본 감시 디렉토리 등록 + 초기 스캔
    pub async fn start(&self) -> Result<()> {
        let rx = self
            .change_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| Error::InvalidInput("service already started".into()))?;

        let ticker = self.runtime.start_epoch_ticker();
        let pump = Arc::clone(&self.scheduler).spawn(rx);
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend([ticker, pump]);

        for dir in self.config.watch_dirs.clone() {
            self.add_watch_directory(&dir, self.config.watch_recursive)
                .await?;
        }

        info!(
            max_workers = self.config.max_workers,
            dirs = self.config.watch_dirs.len(),
            "Unit service started"
        );
        self.events
            .publish(UnitEvent::new(
                UnitEventType::ServiceStarted,
                json!({ "units": self.store.len().await }),
                "service",
            ))
            .await;
        Ok(())
    }

    /// 백그라운드 태스크 중지 + 워커 풀 드레인
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for task in tasks {
            task.abort();
        }

        if !self.engine.drain(self.config.call_timeout()).await {
            warn!("Worker pool did not drain within grace period");
        }

        info!("Unit service stopped");
        self.events
            .publish(UnitEvent::new(
                UnitEventType::ServiceStopped,
                serde_json::Value::Null,
                "service",
            ))
            .await;
    }

    // ========================================================================
    // 감시 디렉토리
    // ========================================================================

    /// 감시 디렉토리 추가 (없으면 생성, 이미 감시 중이면 no-op 성공)
    ///
    /// 등록 직후 기존 파일들을 스캔해서 적격 유닛을 로드합니다.
    pub async fn add_watch_directory(&self, dir: &Path, recursive: bool) -> Result<bool> {
        let dir = absolutize(dir);

        if self.watching.read().await.contains_key(&dir) {
            return Ok(true);
        }

        tokio::fs::create_dir_all(&dir).await?;
        self.notifier.watch(&dir, recursive)?;
        self.watching.write().await.insert(
            dir.clone(),
            WatchedDirectory {
                path: dir.clone(),
                recursive,
                include_patterns: self.config.include_patterns.clone(),
                exclude_patterns: self.config.exclude_patterns.clone(),
            },
        );

        let loaded = self.scan_directory(&dir, recursive).await;
        info!(dir = %dir.display(), loaded, "Watch directory added");
        self.events
            .publish(UnitEvent::new(
                UnitEventType::WatchAdded,
                json!({ "path": dir.to_string_lossy(), "loaded": loaded }),
                "service",
            ))
            .await;
        Ok(true)
    }

    /// 감시 디렉토리 제거 - 미등록이면 false, 하위 유닛 전부 퇴출
    pub async fn remove_watch_directory(&self, dir: &Path) -> Result<bool> {
        let dir = absolutize(dir);

        if self.watching.write().await.remove(&dir).is_none() {
            return Ok(false);
        }

        if let Err(e) = self.notifier.unwatch(&dir) {
            // 디렉토리가 이미 지워졌으면 백엔드 해제는 실패할 수 있다
            warn!(dir = %dir.display(), error = %e, "Unwatch failed");
        }

        let evicted = self.store.remove_under(&dir).await;
        info!(dir = %dir.display(), evicted = evicted.len(), "Watch directory removed");
        self.events
            .publish(UnitEvent::new(
                UnitEventType::WatchRemoved,
                json!({ "path": dir.to_string_lossy(), "evicted": evicted.len() }),
                "service",
            ))
            .await;
        Ok(true)
    }

    /// 감시 중인 디렉토리 목록
    pub async fn list_directories(&self) -> Vec<WatchedDirectory> {
        let mut dirs: Vec<WatchedDirectory> =
            self.watching.read().await.values().cloned().collect();
        dirs.sort_by(|a, b| a.path.cmp(&b.path));
        dirs
    }

    /// 디렉토리 스캔 - 적격 파일 로드, 로드 시도 수 반환
    ///
    /// 항목 단위 I/O 실패는 로그만 남기고 계속 진행합니다.
    /// 스캔이 일부 실패해도 디렉토리 등록 자체는 유지됩니다.
    async fn scan_directory(&self, dir: &Path, recursive: bool) -> usize {
        let mut loaded = 0usize;
        let mut stack = vec![dir.to_path_buf()];

        while let Some(current) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %current.display(), error = %e, "Scan skipped unreadable directory");
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(dir = %current.display(), error = %e, "Scan stopped in directory");
                        break;
                    }
                };

                let path = entry.path();
                let is_dir = entry
                    .file_type()
                    .await
                    .map(|t| t.is_dir())
                    .unwrap_or(false);

                if is_dir {
                    if recursive && self.dir_not_excluded(&path) {
                        stack.push(path);
                    }
                } else if self.filter.is_eligible(&path) {
                    match self.loader.load(&path, false).await {
                        Ok(_) => loaded += 1,
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Scan failed to load unit");
                        }
                    }
                }
            }
        }

        loaded
    }

    fn dir_not_excluded(&self, path: &Path) -> bool {
        // 파일 필터를 디렉토리 이름에 재사용할 수 없으니 적당한 프로브로 검사
        self.filter.is_eligible(&path.join("probe.wat"))
    }

    // ========================================================================
    // 조회
    // ========================================================================

    /// 전체 유닛 요약
    pub async fn list_units(&self) -> Vec<UnitSummary> {
        self.store.list().await
    }

    /// 경로 또는 이름으로 유닛 요약 조회
    pub async fn get_unit(&self, path: Option<&Path>, name: Option<&str>) -> Option<UnitSummary> {
        let abs = path.map(absolutize);
        self.store
            .resolve(abs.as_deref(), name)
            .await
            .map(|u| u.summary())
    }

    // ========================================================================
    // 실행
    // ========================================================================

    /// 진입점 실행
    pub async fn execute(&self, mut request: ExecutionRequest) -> ExecutionResult {
        if let Some(path) = request.path.take() {
            request.path = Some(absolutize(&path));
        }
        self.engine.execute(request).await
    }

    // ========================================================================
    // 리로드 / 언로드
    // ========================================================================

    /// 유닛 강제 리로드 - 로드 상태로 끝나면 true
    pub async fn reload_unit(&self, path: &Path) -> Result<bool> {
        let path = absolutize(path);
        let outcome = self.loader.load(&path, true).await?;
        Ok(outcome.is_loaded())
    }

    /// 유닛 언로드 - 등록되어 있었으면 true
    pub async fn unload_unit(&self, path: &Path) -> bool {
        self.loader.unload(&absolutize(path)).await
    }

    /// 등록된 전체 유닛 강제 리로드
    pub async fn reload_all(&self) -> ReloadReport {
        let paths = self.store.paths().await;
        let total = paths.len();
        let mut reloaded = 0usize;
        let mut failed = 0usize;

        for path in paths {
            match self.loader.load(&path, true).await {
                Ok(outcome) if outcome.is_loaded() => reloaded += 1,
                Ok(LoadOutcome::Missing) => {}
                Ok(_) => failed += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Reload failed");
                    failed += 1;
                }
            }
        }

        info!(reloaded, failed, total, "Reload all finished");
        ReloadReport {
            reloaded,
            failed,
            total,
        }
    }

    // ========================================================================
    // 지표 / 이벤트
    // ========================================================================

    /// 운영 지표 스냅샷
    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        let directories = self.watching.read().await.len();
        self.metrics.snapshot(directories).await
    }

    /// 이벤트 버스 접근 (구독용)
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.events
    }
}

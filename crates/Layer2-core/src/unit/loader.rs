//! Unit loader - 유닛 로드/리로드/언로드
//!
//! 파일 -> 컴파일 -> 레지스트리 등록의 단일 경로.
//! 컴파일 실패는 유닛을 Error 상태로 격리할 뿐, 호출자에게
//! 에러로 전파하지 않습니다 (다른 유닛은 영향 없음).

use crate::unit::events::{EventBus, UnitEvent, UnitEventType};
use crate::unit::runtime::WasmRuntime;
use crate::unit::store::UnitStore;
use crate::unit::types::{CodeUnit, UnitMetadata, UnitStatus, UnitSummary};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};
use unitforge_foundation::{Error, Result, ServiceConfig};

// ============================================================================
// LoadOutcome
// ============================================================================

/// 로드 시도의 결과
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    /// 컴파일 후 등록 완료
    Loaded(UnitSummary),

    /// 파일이 변경되지 않아 기존 로드 재사용
    Unchanged(UnitSummary),

    /// 컴파일 실패 - Error 상태로 격리됨
    Failed(UnitSummary),

    /// 파일이 존재하지 않음 - 등록되어 있었다면 퇴출됨
    Missing,
}

impl LoadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_) | Self::Unchanged(_))
    }
}

// ============================================================================
// UnitLoader
// ============================================================================

/// 유닛 로더
pub struct UnitLoader {
    store: Arc<UnitStore>,
    runtime: Arc<WasmRuntime>,
    config: ServiceConfig,
    events: Arc<EventBus>,
    compile_count: AtomicU64,
}

impl UnitLoader {
    pub fn new(
        store: Arc<UnitStore>,
        runtime: Arc<WasmRuntime>,
        config: ServiceConfig,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            runtime,
            config,
            events,
            compile_count: AtomicU64::new(0),
        }
    }

    /// 지금까지 수행한 컴파일 횟수
    pub fn compile_count(&self) -> u64 {
        self.compile_count.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Load / Reload
    // ========================================================================

    /// 유닛 로드 (또는 리로드)
    ///
    /// `force`가 false이면 마지막 성공 로드 이후 파일이 변경되지 않은 경우
    /// 컴파일을 건너뛰고 기존 로드를 재사용합니다.
    pub async fn load(&self, path: &Path, force: bool) -> Result<LoadOutcome> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.unload(path).await {
                    debug!(path = %path.display(), "Unit file gone, evicted");
                }
                return Ok(LoadOutcome::Missing);
            }
            Err(e) => return Err(Error::Io(e)),
        };
        let mtime = metadata.modified()?;

        if !force {
            if let Some(existing) = self.store.get_by_path(path).await {
                if existing.status == UnitStatus::Loaded
                    && existing.last_modified == Some(mtime)
                {
                    debug!(path = %path.display(), "Unit unchanged, skipping compile");
                    return Ok(LoadOutcome::Unchanged(existing.summary()));
                }
            }
        }

        if self.store.contains(path).await {
            self.store.set_status(path, UnitStatus::Reloading).await;
        }

        self.compile_count.fetch_add(1, Ordering::Relaxed);
        let compiled = {
            let runtime = Arc::clone(&self.runtime);
            let path_owned: PathBuf = path.to_path_buf();
            let fallback = self.config.fallback_entry_points.clone();
            tokio::task::spawn_blocking(move || runtime.compile(&path_owned, &fallback))
                .await
                .map_err(|e| Error::Internal(format!("compile task failed: {}", e)))?
        };

        let mut unit = CodeUnit::new(path);
        unit.last_modified = Some(mtime);

        match compiled {
            Ok(compiled) => {
                let line_count = if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("wat")) {
                    tokio::fs::read_to_string(path)
                        .await
                        .map(|s| s.lines().count())
                        .unwrap_or(0)
                } else {
                    0
                };

                unit.status = UnitStatus::Loaded;
                unit.entry_points = compiled.entry_points;
                unit.metadata = Some(UnitMetadata {
                    file_size: metadata.len(),
                    entry_point_names: unit.entry_points.keys().cloned().collect(),
                    line_count,
                    loaded_at: chrono::Utc::now(),
                });
                unit.module = Some(compiled.module);

                self.store.upsert(unit).await;
                let summary = self.summary_of(path).await?;

                info!(
                    path = %path.display(),
                    entry_points = summary.entry_points.len(),
                    "Unit loaded"
                );
                self.events
                    .publish(UnitEvent::new(
                        UnitEventType::UnitLoaded,
                        json!({
                            "path": path.to_string_lossy(),
                            "entry_points": summary.entry_points,
                        }),
                        "loader",
                    ))
                    .await;

                Ok(LoadOutcome::Loaded(summary))
            }
            Err(e) => {
                let message = e.to_string();
                unit.status = UnitStatus::Error;
                unit.error_message = Some(message.clone());

                self.store.upsert(unit).await;
                let summary = self.summary_of(path).await?;

                error!(path = %path.display(), error = %message, "Unit load failed");
                self.events
                    .publish(UnitEvent::new(
                        UnitEventType::UnitLoadFailed,
                        json!({
                            "path": path.to_string_lossy(),
                            "error": message,
                        }),
                        "loader",
                    ))
                    .await;

                Ok(LoadOutcome::Failed(summary))
            }
        }
    }

    // ========================================================================
    // Unload
    // ========================================================================

    /// 유닛 언로드 - 레지스트리에서 제거, 통계 포함 소멸
    pub async fn unload(&self, path: &Path) -> bool {
        match self.store.remove(path).await {
            Some(_) => {
                info!(path = %path.display(), "Unit unloaded");
                self.events
                    .publish(UnitEvent::for_path(
                        UnitEventType::UnitUnloaded,
                        path,
                        "loader",
                    ))
                    .await;
                true
            }
            None => false,
        }
    }

    async fn summary_of(&self, path: &Path) -> Result<UnitSummary> {
        self.store
            .get_by_path(path)
            .await
            .map(|u| u.summary())
            .ok_or_else(|| Error::Internal(format!("unit vanished: {}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const ADD_WAT: &str = r#"
        (module
          (func (export "add") (param i64 i64) (result i64)
            local.get 0
            local.get 1
            i64.add))
    "#;

    fn make_loader() -> (Arc<UnitLoader>, Arc<UnitStore>) {
        let config = ServiceConfig::default();
        let store = Arc::new(UnitStore::new());
        let runtime = Arc::new(WasmRuntime::new(&config).unwrap());
        let events = Arc::new(EventBus::new(config.event_history_size));
        let loader = Arc::new(UnitLoader::new(
            Arc::clone(&store),
            runtime,
            config,
            events,
        ));
        (loader, store)
    }

    #[tokio::test]
    async fn test_load_registers_loaded_unit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("math.wat");
        std::fs::write(&path, ADD_WAT).unwrap();

        let (loader, store) = make_loader();
        let outcome = loader.load(&path, false).await.unwrap();

        assert!(matches!(outcome, LoadOutcome::Loaded(_)));
        let unit = store.get_by_path(&path).await.unwrap();
        assert_eq!(unit.status, UnitStatus::Loaded);
        assert!(unit.entry_points.contains_key("add"));
        assert!(unit.metadata.is_some());
    }

    #[tokio::test]
    async fn test_unchanged_file_skips_compile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("math.wat");
        std::fs::write(&path, ADD_WAT).unwrap();

        let (loader, _store) = make_loader();
        let first = match loader.load(&path, false).await.unwrap() {
            LoadOutcome::Loaded(summary) => summary,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(loader.compile_count(), 1);

        let second = match loader.load(&path, false).await.unwrap() {
            LoadOutcome::Unchanged(summary) => summary,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(loader.compile_count(), 1);
        // 캐시 적중은 기존 로드를 그대로 재사용한다
        assert_eq!(first.loaded_at, second.loaded_at);

        // force는 캐시를 무시한다
        let outcome = loader.load(&path, true).await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Loaded(_)));
        assert_eq!(loader.compile_count(), 2);
    }

    #[tokio::test]
    async fn test_broken_unit_is_quarantined_then_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flaky.wat");
        std::fs::write(&path, "(module (func broken").unwrap();

        let (loader, store) = make_loader();
        let outcome = loader.load(&path, false).await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Failed(_)));

        let unit = store.get_by_path(&path).await.unwrap();
        assert_eq!(unit.status, UnitStatus::Error);
        assert!(unit.error_message.is_some());
        assert!(unit.module.is_none());

        // 파일을 고치고 강제 리로드하면 복구
        std::fs::write(&path, ADD_WAT).unwrap();
        let outcome = loader.load(&path, true).await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Loaded(_)));

        let unit = store.get_by_path(&path).await.unwrap();
        assert_eq!(unit.status, UnitStatus::Loaded);
        assert!(unit.error_message.is_none());
    }

    #[tokio::test]
    async fn test_reload_preserves_stats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("math.wat");
        std::fs::write(&path, ADD_WAT).unwrap();

        let (loader, store) = make_loader();
        loader.load(&path, false).await.unwrap();
        store.record_call(&path, Duration::from_millis(5)).await;

        loader.load(&path, true).await.unwrap();
        let unit = store.get_by_path(&path).await.unwrap();
        assert_eq!(unit.stats.call_count, 1);
    }

    #[tokio::test]
    async fn test_missing_file_evicts_unit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.wat");
        std::fs::write(&path, ADD_WAT).unwrap();

        let (loader, store) = make_loader();
        loader.load(&path, false).await.unwrap();
        assert_eq!(store.len().await, 1);

        std::fs::remove_file(&path).unwrap();
        let outcome = loader.load(&path, false).await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Missing));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_unload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("math.wat");
        std::fs::write(&path, ADD_WAT).unwrap();

        let (loader, store) = make_loader();
        loader.load(&path, false).await.unwrap();

        assert!(loader.unload(&path).await);
        assert!(store.is_empty().await);
        assert!(!loader.unload(&path).await);
    }
}

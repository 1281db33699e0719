//! Execution engine - 경계 있는 실행
//!
//! 워커 풀(semaphore)로 동시 실행을 제한하고, 호출마다 타임아웃을
//! 적용합니다. 유닛 단위 실패(미등록, 진입점 없음, 트랩, 타임아웃)는
//! 전부 [`ExecutionResult`]로 in-band 보고됩니다.
//!
//! 리로드가 진행 중인 유닛은 직전 컴파일 모듈이 남아 있는 한 그대로
//! 서빙합니다 (리로드 창이 호출을 실패시키지 않음).
//!
//! 타임아웃이 지나면 호출자는 즉시 타임아웃 결과를 받지만, 실행 중이던
//! 호출 자체는 epoch deadline이 트랩시킬 때까지 워커 슬롯을 점유합니다.

use crate::unit::loader::UnitLoader;
use crate::unit::runtime::WasmRuntime;
use crate::unit::store::UnitStore;
use crate::unit::types::{ExecutionRequest, ExecutionResult, UnitStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use unitforge_foundation::ServiceConfig;
use uuid::Uuid;

// ============================================================================
// ExecutionEngine
// ============================================================================

/// 경계 있는 실행 엔진
pub struct ExecutionEngine {
    store: Arc<UnitStore>,
    loader: Arc<UnitLoader>,
    runtime: Arc<WasmRuntime>,
    semaphore: Arc<Semaphore>,
    max_workers: usize,
    default_timeout: Duration,
    total_requests: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<UnitStore>,
        loader: Arc<UnitLoader>,
        runtime: Arc<WasmRuntime>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            store,
            loader,
            runtime,
            semaphore: Arc::new(Semaphore::new(config.max_workers)),
            max_workers: config.max_workers,
            default_timeout: config.call_timeout(),
            total_requests: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
        }
    }

    /// 요청 누계 (total, success, failure)
    pub fn request_counts(&self) -> (u64, u64, u64) {
        (
            self.total_requests.load(Ordering::Relaxed),
            self.success_count.load(Ordering::Relaxed),
            self.failure_count.load(Ordering::Relaxed),
        )
    }

    pub fn available_workers(&self) -> usize {
        self.semaphore.available_permits()
    }

    // ========================================================================
    // Execute
    // ========================================================================

    /// 진입점 실행
    ///
    /// 어떤 실패든 결과로 보고하며 패닉/에러를 전파하지 않습니다.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if request.path.is_none() && request.name.is_none() {
            return self.fail(request_id, "unit reference required (path or name)", started);
        }
        if !request.kwargs.is_empty() {
            return self.fail(
                request_id,
                "keyword arguments are not supported, use positional args",
                started,
            );
        }

        // 경로 참조인데 미등록이면 1회 로드를 시도한다 (이름 참조는 시도 안 함)
        let mut unit = self
            .store
            .resolve(request.path.as_deref(), request.name.as_deref())
            .await;
        if unit.is_none() {
            if let Some(path) = &request.path {
                if self.loader.load(path, false).await.is_ok() {
                    unit = self.store.get_by_path(path).await;
                }
            }
        }

        let Some(unit) = unit else {
            let reference = request
                .name
                .clone()
                .or_else(|| request.path.as_ref().map(|p| p.display().to_string()))
                .unwrap_or_default();
            return self.fail(request_id, format!("unit not found: {}", reference), started);
        };

        match unit.status {
            UnitStatus::Loaded => {}
            // 리로드 창 동안은 직전 컴파일 모듈로 서빙한다
            UnitStatus::Reloading if unit.module.is_some() => {}
            UnitStatus::Error => {
                let message = unit
                    .error_message
                    .as_deref()
                    .unwrap_or("unknown load error");
                return self.fail(
                    request_id,
                    format!("unit failed to load: {}", message),
                    started,
                );
            }
            status => {
                return self.fail(
                    request_id,
                    format!("unit is not loaded (status: {})", status),
                    started,
                );
            }
        }

        if !unit.entry_points.contains_key(&request.entry_point) {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
            let mut result = ExecutionResult::entry_point_not_found(
                request_id,
                &request.entry_point,
                unit.entry_point_names(),
                started.elapsed(),
            );
            result.unit = Some(unit.logical_name.clone());
            return result;
        }

        // Loaded 상태이므로 모듈은 항상 존재
        let Some(module) = unit.module.clone() else {
            return self.fail(request_id, "unit module missing", started);
        };

        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return self.fail(request_id, "executor is shut down", started),
        };

        let ticks = self.runtime.deadline_ticks(timeout);
        let runtime = Arc::clone(&self.runtime);
        let entry_point = request.entry_point.clone();
        let args = request.args.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let result = runtime.invoke(&module, &entry_point, &args, ticks);
            // 슬롯은 호출이 실제로 끝났을 때 반환된다 (타임아웃 보고와 무관)
            drop(permit);
            result
        });

        match tokio::time::timeout(timeout, handle).await {
            Err(_) => {
                self.failure_count.fetch_add(1, Ordering::Relaxed);
                warn!(
                    unit = %unit.logical_name,
                    entry_point = %request.entry_point,
                    timeout_ms = timeout.as_millis() as u64,
                    "Execution timed out, worker slot held until trap"
                );
                let mut result = ExecutionResult::timeout(request_id, timeout);
                result.unit = Some(unit.logical_name.clone());
                result
            }
            Ok(Err(join_err)) => self.fail(
                request_id,
                format!("execution task failed: {}", join_err),
                started,
            ),
            Ok(Ok(Err(e))) => {
                self.failure_count.fetch_add(1, Ordering::Relaxed);
                let mut result =
                    ExecutionResult::failure(request_id, e.to_string(), started.elapsed());
                result.unit = Some(unit.logical_name.clone());
                result
            }
            Ok(Ok(Ok(value))) => {
                let elapsed = started.elapsed();
                self.store.record_call(&unit.path, elapsed).await;
                self.success_count.fetch_add(1, Ordering::Relaxed);
                debug!(
                    unit = %unit.logical_name,
                    entry_point = %request.entry_point,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Execution succeeded"
                );
                ExecutionResult::ok(request_id, unit.logical_name.clone(), value, elapsed)
            }
        }
    }

    fn fail(
        &self,
        request_id: Uuid,
        error: impl Into<String>,
        started: Instant,
    ) -> ExecutionResult {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        ExecutionResult::failure(request_id, error, started.elapsed())
    }

    // ========================================================================
    // Drain
    // ========================================================================

    /// 실행 중인 호출이 끝나기를 기다리고 새 실행을 차단
    ///
    /// grace 안에 전부 끝나지 않으면 false를 반환합니다 (그래도 차단은 됨).
    pub async fn drain(&self, grace: Duration) -> bool {
        let all = Arc::clone(&self.semaphore).acquire_many_owned(self.max_workers as u32);
        let drained = matches!(tokio::time::timeout(grace, all).await, Ok(Ok(_)));
        self.semaphore.close();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::events::EventBus;
    use crate::unit::types::ExecutionRequest;
    use serde_json::json;

    const ADD_WAT: &str = r#"
        (module
          (func (export "add") (param i64 i64) (result i64)
            local.get 0
            local.get 1
            i64.add))
    "#;

    const SPIN_WAT: &str = r#"
        (module
          (func (export "spin")
            (loop $l (br $l))))
    "#;

    struct Fixture {
        engine: Arc<ExecutionEngine>,
        loader: Arc<UnitLoader>,
        store: Arc<UnitStore>,
        runtime: Arc<WasmRuntime>,
        _dir: tempfile::TempDir,
    }

    fn fixture(config: ServiceConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(UnitStore::new());
        let runtime = Arc::new(WasmRuntime::new(&config).unwrap());
        let events = Arc::new(EventBus::new(16));
        let loader = Arc::new(UnitLoader::new(
            Arc::clone(&store),
            Arc::clone(&runtime),
            config.clone(),
            events,
        ));
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&store),
            Arc::clone(&loader),
            Arc::clone(&runtime),
            &config,
        ));
        Fixture {
            engine,
            loader,
            store,
            runtime,
            _dir: dir,
        }
    }

    async fn write_and_load(fx: &Fixture, name: &str, wat: &str) -> std::path::PathBuf {
        let path = fx._dir.path().join(name);
        std::fs::write(&path, wat).unwrap();
        fx.loader.load(&path, false).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_execute_success_records_stats() {
        let fx = fixture(ServiceConfig::default());
        let path = write_and_load(&fx, "math.wat", ADD_WAT).await;

        let result = fx
            .engine
            .execute(
                ExecutionRequest::by_name("math", "add")
                    .with_args(vec![json!(10), json!(20)]),
            )
            .await;

        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(result.value, Some(json!(30)));
        assert_eq!(result.unit.as_deref(), Some("math"));
        assert!(!result.timed_out);

        let unit = fx.store.get_by_path(&path).await.unwrap();
        assert_eq!(unit.stats.call_count, 1);
        assert_eq!(fx.engine.request_counts(), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_stats_accumulate_over_calls() {
        let fx = fixture(ServiceConfig::default());
        let path = write_and_load(&fx, "math.wat", ADD_WAT).await;

        for i in 0..3 {
            let result = fx
                .engine
                .execute(
                    ExecutionRequest::by_name("math", "add")
                        .with_args(vec![json!(i), json!(i)]),
                )
                .await;
            assert!(result.success);
        }

        let unit = fx.store.get_by_path(&path).await.unwrap();
        assert_eq!(unit.stats.call_count, 3);
        assert!(unit.stats.total_time >= unit.stats.avg_time());
        assert!(unit.stats.last_call_at.is_some());
        assert_eq!(fx.engine.request_counts(), (3, 3, 0));
    }

    #[tokio::test]
    async fn test_worker_pool_enforces_ceiling() {
        let config = ServiceConfig {
            max_workers: 1,
            ..Default::default()
        };
        let fx = fixture(config);
        write_and_load(&fx, "hog.wat", SPIN_WAT).await;
        write_and_load(&fx, "math.wat", ADD_WAT).await;

        let ticker = fx.runtime.start_epoch_ticker();

        let spin = {
            let engine = Arc::clone(&fx.engine);
            tokio::spawn(async move {
                engine
                    .execute(
                        ExecutionRequest::by_name("hog", "spin")
                            .with_timeout(Duration::from_millis(150)),
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        // 유일한 슬롯이 점유된 상태
        assert_eq!(fx.engine.available_workers(), 0);

        // 두 번째 호출은 슬롯이 트랩으로 풀릴 때까지 기다린 뒤 성공한다
        let result = fx
            .engine
            .execute(
                ExecutionRequest::by_name("math", "add").with_args(vec![json!(1), json!(2)]),
            )
            .await;
        assert!(result.success, "error: {:?}", result.error);

        let spin_result = spin.await.unwrap();
        assert!(spin_result.timed_out);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fx.engine.available_workers(), 1);
        ticker.abort();
    }

    #[tokio::test]
    async fn test_execute_unknown_unit() {
        let fx = fixture(ServiceConfig::default());

        let result = fx
            .engine
            .execute(ExecutionRequest::by_name("ghost", "run"))
            .await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("not found"));
        assert_eq!(fx.engine.request_counts(), (1, 0, 1));
    }

    #[tokio::test]
    async fn test_execute_unknown_entry_point_lists_available() {
        let fx = fixture(ServiceConfig::default());
        write_and_load(&fx, "math.wat", ADD_WAT).await;

        let result = fx
            .engine
            .execute(ExecutionRequest::by_name("math", "subtract"))
            .await;

        assert!(!result.success);
        assert_eq!(
            result.available_entry_points,
            Some(vec!["add".to_string()])
        );
    }

    #[tokio::test]
    async fn test_execute_rejects_kwargs() {
        let fx = fixture(ServiceConfig::default());
        write_and_load(&fx, "math.wat", ADD_WAT).await;

        let mut kwargs = serde_json::Map::new();
        kwargs.insert("x".into(), json!(1));
        let result = fx
            .engine
            .execute(ExecutionRequest::by_name("math", "add").with_kwargs(kwargs))
            .await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("keyword"));
    }

    #[tokio::test]
    async fn test_execute_arity_error_is_in_band() {
        let fx = fixture(ServiceConfig::default());
        write_and_load(&fx, "math.wat", ADD_WAT).await;

        let result = fx
            .engine
            .execute(ExecutionRequest::by_name("math", "add").with_args(vec![json!(1)]))
            .await;

        assert!(!result.success);
        assert!(result.error.is_some());
        // 실패한 호출은 통계에 잡히지 않는다
        let unit = fx.store.get_by_name("math").await.unwrap();
        assert_eq!(unit.stats.call_count, 0);
    }

    #[tokio::test]
    async fn test_execute_by_path_loads_on_demand() {
        let fx = fixture(ServiceConfig::default());
        let path = fx._dir.path().join("lazy.wat");
        std::fs::write(&path, ADD_WAT).unwrap();

        let result = fx
            .engine
            .execute(
                ExecutionRequest::by_path(&path, "add").with_args(vec![json!(2), json!(3)]),
            )
            .await;

        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(result.value, Some(json!(5)));
        assert!(fx.store.contains(&path).await);
    }

    #[tokio::test]
    async fn test_reloading_unit_served_with_previous_module() {
        let fx = fixture(ServiceConfig::default());
        let path = write_and_load(&fx, "math.wat", ADD_WAT).await;

        // 리로드 창을 흉내: 상태만 Reloading, 직전 모듈은 그대로
        fx.store.set_status(&path, UnitStatus::Reloading).await;

        let result = fx
            .engine
            .execute(
                ExecutionRequest::by_name("math", "add").with_args(vec![json!(3), json!(4)]),
            )
            .await;

        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(result.value, Some(json!(7)));
    }

    #[tokio::test]
    async fn test_execute_error_status_unit() {
        let fx = fixture(ServiceConfig::default());
        let path = fx._dir.path().join("broken.wat");
        std::fs::write(&path, "(module (func nope").unwrap();
        fx.loader.load(&path, false).await.unwrap();

        let result = fx
            .engine
            .execute(ExecutionRequest::by_name("broken", "run"))
            .await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("failed to load"));
    }

    #[tokio::test]
    async fn test_timeout_reports_and_trap_frees_slot() {
        let config = ServiceConfig::default();
        let fx = fixture(config);
        write_and_load(&fx, "hog.wat", SPIN_WAT).await;

        let ticker = fx.runtime.start_epoch_ticker();

        let result = fx
            .engine
            .execute(
                ExecutionRequest::by_name("hog", "spin")
                    .with_timeout(Duration::from_millis(100)),
            )
            .await;

        assert!(!result.success);
        assert!(result.timed_out);
        assert_eq!(result.elapsed, Duration::from_millis(100));

        // epoch deadline이 폭주 호출을 트랩시켜 슬롯이 돌아온다
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fx.engine.available_workers(), 8);

        ticker.abort();
    }

    #[tokio::test]
    async fn test_drain_blocks_new_executions() {
        let fx = fixture(ServiceConfig::default());
        write_and_load(&fx, "math.wat", ADD_WAT).await;

        assert!(fx.engine.drain(Duration::from_secs(1)).await);

        let result = fx
            .engine
            .execute(
                ExecutionRequest::by_name("math", "add").with_args(vec![json!(1), json!(2)]),
            )
            .await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("shut down"));
    }
}

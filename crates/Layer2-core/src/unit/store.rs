//! Unit store - 유닛 레지스트리 저장소
//!
//! 경로 테이블과 이름 인덱스를 하나의 락 아래 함께 관리합니다.
//! 두 테이블을 같은 쓰기 락에서 갱신하므로, 조회자는 언제나
//! 일관된 스냅샷을 봅니다 (이름 인덱스가 없는 경로를 가리키는 일 없음).

use crate::unit::types::{CodeUnit, UnitStatus, UnitSummary};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

// ============================================================================
// StoreInner - 락 아래의 실제 테이블
// ============================================================================

#[derive(Default)]
struct StoreInner {
    /// 경로 -> 유닛 (경로가 유일 식별자)
    units: HashMap<PathBuf, CodeUnit>,

    /// 논리 이름 -> 경로 (나중 등록이 우선)
    names: HashMap<String, PathBuf>,
}

// ============================================================================
// UnitStore
// ============================================================================

/// 유닛 레지스트리 저장소
pub struct UnitStore {
    inner: RwLock<StoreInner>,
}

impl UnitStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
        }
    }

    // ========================================================================
    // 등록 / 제거
    // ========================================================================

    /// 유닛 등록 또는 갱신
    ///
    /// 같은 경로의 유닛이 이미 있으면 호출 통계를 새 유닛으로 이월합니다.
    /// 이름 인덱스는 나중 등록이 조용히 덮어씁니다.
    pub async fn upsert(&self, mut unit: CodeUnit) {
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner.units.get(&unit.path) {
            unit.stats = existing.stats.clone();
        }

        if let Some(previous) = inner.names.insert(unit.logical_name.clone(), unit.path.clone()) {
            if previous != unit.path {
                debug!(
                    name = %unit.logical_name,
                    old = %previous.display(),
                    new = %unit.path.display(),
                    "Name index superseded"
                );
            }
        }

        inner.units.insert(unit.path.clone(), unit);
    }

    /// 경로로 유닛 제거
    ///
    /// 이름 인덱스 항목은 이 경로를 가리키고 있을 때만 함께 제거합니다.
    /// (다른 경로가 같은 이름을 덮어쓴 경우 그 매핑은 보존)
    pub async fn remove(&self, path: &Path) -> Option<CodeUnit> {
        let mut inner = self.inner.write().await;
        let removed = inner.units.remove(path)?;

        if inner
            .names
            .get(&removed.logical_name)
            .is_some_and(|p| p.as_path() == path)
        {
            inner.names.remove(&removed.logical_name);
        }

        Some(removed)
    }

    /// 디렉토리 아래의 모든 유닛 제거, 제거된 경로 반환
    pub async fn remove_under(&self, dir: &Path) -> Vec<PathBuf> {
        let mut inner = self.inner.write().await;

        let evicted: Vec<PathBuf> = inner
            .units
            .keys()
            .filter(|p| p.starts_with(dir))
            .cloned()
            .collect();

        for path in &evicted {
            if let Some(removed) = inner.units.remove(path) {
                if inner
                    .names
                    .get(&removed.logical_name)
                    .is_some_and(|p| p.as_path() == path)
                {
                    inner.names.remove(&removed.logical_name);
                }
            }
        }

        evicted
    }

    // ========================================================================
    // 조회
    // ========================================================================

    /// 경로로 조회
    pub async fn get_by_path(&self, path: &Path) -> Option<CodeUnit> {
        self.inner.read().await.units.get(path).cloned()
    }

    /// 논리 이름으로 조회
    pub async fn get_by_name(&self, name: &str) -> Option<CodeUnit> {
        let inner = self.inner.read().await;
        let path = inner.names.get(name)?;
        inner.units.get(path).cloned()
    }

    /// 경로 또는 이름으로 해석 (경로 우선)
    pub async fn resolve(&self, path: Option<&Path>, name: Option<&str>) -> Option<CodeUnit> {
        if let Some(path) = path {
            return self.get_by_path(path).await;
        }
        if let Some(name) = name {
            return self.get_by_name(name).await;
        }
        None
    }

    /// 등록된 유닛 존재 여부
    pub async fn contains(&self, path: &Path) -> bool {
        self.inner.read().await.units.contains_key(path)
    }

    /// 전체 유닛 요약 목록
    pub async fn list(&self) -> Vec<UnitSummary> {
        let inner = self.inner.read().await;
        let mut summaries: Vec<UnitSummary> =
            inner.units.values().map(|u| u.summary()).collect();
        summaries.sort_by(|a, b| a.path.cmp(&b.path));
        summaries
    }

    /// 등록된 전체 경로 목록
    pub async fn paths(&self) -> Vec<PathBuf> {
        self.inner.read().await.units.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.units.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.units.is_empty()
    }

    // ========================================================================
    // 상태 / 통계 갱신
    // ========================================================================

    /// 상태 변경 (유닛이 없으면 no-op)
    pub async fn set_status(&self, path: &Path, status: UnitStatus) {
        let mut inner = self.inner.write().await;
        if let Some(unit) = inner.units.get_mut(path) {
            unit.status = status;
        }
    }

    /// 호출 통계 기록
    pub async fn record_call(&self, path: &Path, elapsed: Duration) {
        let mut inner = self.inner.write().await;
        if let Some(unit) = inner.units.get_mut(path) {
            unit.stats.record(elapsed);
        }
    }

    /// 상태별 유닛 개수
    pub async fn status_counts(&self) -> HashMap<UnitStatus, usize> {
        let inner = self.inner.read().await;
        let mut counts = HashMap::new();
        for unit in inner.units.values() {
            *counts.entry(unit.status).or_insert(0) += 1;
        }
        counts
    }

    /// 전체 호출 누계 (호출 횟수, 총 실행 시간)
    pub async fn aggregate_stats(&self) -> (u64, Duration) {
        let inner = self.inner.read().await;
        inner.units.values().fold(
            (0u64, Duration::ZERO),
            |(calls, time), unit| (calls + unit.stats.call_count, time + unit.stats.total_time),
        )
    }
}

impl Default for UnitStore {
    fn default() -> Self {
        Self::new()
    }
}

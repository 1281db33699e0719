//! Unit subsystem - 코드 유닛 레지스트리
//!
//! 감시 디렉토리에서 유닛(.wat/.wasm)을 발견해서 컴파일하고,
//! 파일 변경을 디바운스 리로드로 반영하며, 경계 있는 워커 풀에서
//! 진입점을 실행합니다.
//!
//! - [`types`]: 유닛/요청/결과 타입
//! - [`store`]: 경로 테이블 + 이름 인덱스 저장소
//! - [`runtime`]: wasmtime 컴파일/호출 래퍼
//! - [`loader`]: 로드/리로드/언로드 단일 경로
//! - [`watcher`]: 파일시스템 변경 감시 + 패턴 필터
//! - [`scheduler`]: 변경 이벤트 디바운스
//! - [`executor`]: 경계 있는 실행 엔진
//! - [`events`]: 수명주기 이벤트 버스
//! - [`metrics`]: 운영 지표 집계
//! - [`service`]: 전체를 묶는 파사드

pub mod events;
pub mod executor;
pub mod loader;
pub mod metrics;
pub mod runtime;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod types;
pub mod watcher;

pub use events::{EventBus, UnitEvent, UnitEventHandler, UnitEventType};
pub use executor::ExecutionEngine;
pub use loader::{LoadOutcome, UnitLoader};
pub use metrics::{MetricsAggregator, MetricsSnapshot};
pub use runtime::{CompiledUnit, WasmRuntime};
pub use scheduler::ReloadScheduler;
pub use service::{ReloadReport, UnitService};
pub use store::UnitStore;
pub use types::{
    CallStats, CodeUnit, ExecutionRequest, ExecutionResult, UnitMetadata, UnitStatus,
    UnitSummary, WatchedDirectory,
};
pub use watcher::{ChangeEvent, ChangeKind, ChangeNotifier, PathFilter};

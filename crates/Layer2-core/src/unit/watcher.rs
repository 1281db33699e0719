//! Change notifier - 파일시스템 변경 감시
//!
//! notify 콜백 스레드에서 이벤트를 받아 패턴 필터를 통과한 것만
//! tokio 채널로 넘깁니다. 디바운스는 여기서 하지 않고
//! [`scheduler`](crate::unit::scheduler)가 담당합니다.

use glob::{MatchOptions, Pattern};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use unitforge_foundation::{Error, Result, ServiceConfig};

// ============================================================================
// ChangeKind / ChangeEvent
// ============================================================================

/// 파일 변경 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Modify,
    Remove,
    Rename,
}

impl ChangeKind {
    /// notify 이벤트 종류를 분류 (관심 없는 종류는 None)
    pub fn classify(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Create),
            EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Rename),
            EventKind::Modify(_) => Some(Self::Modify),
            EventKind::Remove(_) => Some(Self::Remove),
            _ => None,
        }
    }
}

/// 필터를 통과한 변경 이벤트
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

// ============================================================================
// PathFilter
// ============================================================================

/// 유닛 파일 판별 필터 (allow-list + deny-list)
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    options: MatchOptions,
}

impl PathFilter {
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Pattern>> {
            patterns
                .iter()
                .map(|p| {
                    Pattern::new(p)
                        .map_err(|e| Error::Config(format!("invalid pattern '{}': {}", p, e)))
                })
                .collect()
        };

        Ok(Self {
            include: compile(&config.include_patterns)?,
            exclude: compile(&config.exclude_patterns)?,
            // '*'가 경로 구분자를 넘지 않도록 고정
            options: MatchOptions {
                require_literal_separator: true,
                ..MatchOptions::new()
            },
        })
    }

    /// 유닛으로 취급할 경로인지 판정
    ///
    /// 파일명이 include 패턴 중 하나와 일치해야 하고,
    /// 파일명 또는 경로 구성요소가 exclude 패턴과 일치하면 탈락합니다.
    pub fn is_eligible(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };

        if !self
            .include
            .iter()
            .any(|p| p.matches_with(&name, self.options))
        {
            return false;
        }

        for component in path.components() {
            let part = component.as_os_str().to_string_lossy();
            if self
                .exclude
                .iter()
                .any(|p| p.matches_with(&part, self.options))
            {
                return false;
            }
        }

        true
    }
}

// ============================================================================
// ChangeNotifier
// ============================================================================

/// 파일시스템 변경 알림기
///
/// notify 백엔드 하나로 여러 루트를 감시합니다.
pub struct ChangeNotifier {
    watcher: Mutex<RecommendedWatcher>,
}

impl ChangeNotifier {
    /// 알림기 생성, 필터 통과 이벤트 수신 채널 반환
    pub fn new(filter: PathFilter) -> Result<(Self, mpsc::UnboundedReceiver<ChangeEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Watch backend error");
                    return;
                }
            };

            let Some(kind) = ChangeKind::classify(&event.kind) else {
                return;
            };

            for path in event.paths {
                if filter.is_eligible(&path) {
                    // 수신자가 사라진 뒤의 이벤트는 버려도 무방
                    let _ = tx.send(ChangeEvent {
                        path,
                        kind,
                    });
                }
            }
        })
        .map_err(|e| Error::Watch(e.to_string()))?;

        Ok((
            Self {
                watcher: Mutex::new(watcher),
            },
            rx,
        ))
    }

    /// 루트 디렉토리 감시 시작
    pub fn watch(&self, dir: &Path, recursive: bool) -> Result<()> {
        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        self.watcher
            .lock()
            .map_err(|_| Error::Internal("watcher lock poisoned".into()))?
            .watch(dir, mode)
            .map_err(|e| Error::Watch(format!("{}: {}", dir.display(), e)))?;

        debug!(dir = %dir.display(), recursive, "Watch started");
        Ok(())
    }

    /// 루트 디렉토리 감시 해제
    pub fn unwatch(&self, dir: &Path) -> Result<()> {
        self.watcher
            .lock()
            .map_err(|_| Error::Internal("watcher lock poisoned".into()))?
            .unwatch(dir)
            .map_err(|e| Error::Watch(format!("{}: {}", dir.display(), e)))?;

        debug!(dir = %dir.display(), "Watch stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn default_filter() -> PathFilter {
        PathFilter::from_config(&ServiceConfig::default()).unwrap()
    }

    #[test]
    fn test_filter_accepts_unit_sources() {
        let filter = default_filter();
        assert!(filter.is_eligible(Path::new("/units/math.wat")));
        assert!(filter.is_eligible(Path::new("/units/nested/deep/mod.wasm")));
    }

    #[test]
    fn test_filter_rejects_other_extensions() {
        let filter = default_filter();
        assert!(!filter.is_eligible(Path::new("/units/readme.md")));
        assert!(!filter.is_eligible(Path::new("/units/math.wat.tmp")));
        assert!(!filter.is_eligible(Path::new("/units/editor.swp")));
    }

    #[test]
    fn test_filter_rejects_excluded_directories() {
        let filter = default_filter();
        assert!(!filter.is_eligible(Path::new("/units/.git/objects/a.wat")));
        assert!(!filter.is_eligible(Path::new("/units/target/debug/b.wasm")));
        assert!(!filter.is_eligible(Path::new("/units/node_modules/pkg/c.wat")));
    }

    #[test]
    fn test_filter_rejects_test_files() {
        let filter = default_filter();
        assert!(!filter.is_eligible(Path::new("/units/test_math.wat")));
        assert!(!filter.is_eligible(Path::new("/units/math_test.wat")));
        // 이름에 test가 끼어 있어도 패턴과 다르면 통과
        assert!(filter.is_eligible(Path::new("/units/latest.wat")));
    }

    #[test]
    fn test_classify_event_kinds() {
        use notify::event::{CreateKind, RemoveKind};

        assert_eq!(
            ChangeKind::classify(&EventKind::Create(CreateKind::File)),
            Some(ChangeKind::Create)
        );
        assert_eq!(
            ChangeKind::classify(&EventKind::Remove(RemoveKind::File)),
            Some(ChangeKind::Remove)
        );
        assert_eq!(ChangeKind::classify(&EventKind::Any), None);
    }

    #[tokio::test]
    async fn test_notifier_delivers_filtered_events() {
        let dir = tempfile::tempdir().unwrap();
        let (notifier, mut rx) = ChangeNotifier::new(default_filter()).unwrap();
        notifier.watch(dir.path(), true).unwrap();

        // 필터 탈락 파일은 이벤트가 오지 않아야 한다
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("unit.wat"), "(module)").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watch event not delivered")
            .unwrap();
        assert_eq!(
            event.path.file_name().unwrap().to_string_lossy(),
            "unit.wat"
        );
    }
}

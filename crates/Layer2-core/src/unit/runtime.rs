//! Wasm runtime - 유닛 컴파일과 호출
//!
//! 유닛 소스(.wat/.wasm)를 wasmtime 모듈로 컴파일하고,
//! 진입점 자동 발견과 JSON <-> wasm 값 변환을 담당합니다.
//!
//! 엔진은 epoch interruption을 켜고 생성됩니다. 백그라운드 틱 태스크가
//! 주기적으로 epoch을 올리고, 각 호출은 타임아웃에 대응하는 deadline을
//! 설정하므로, 폭주한 호출도 결국 트랩으로 종료됩니다.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use unitforge_foundation::{Error, Result, ServiceConfig};
use wasmtime::{Config, Engine, FuncType, Instance, Module, Store, Val, ValType};

// ============================================================================
// CompiledUnit - 컴파일 결과
// ============================================================================

/// 컴파일 결과: 모듈 + 발견된 진입점들
#[derive(Debug)]
pub struct CompiledUnit {
    pub module: Module,
    pub entry_points: BTreeMap<String, FuncType>,
}

// ============================================================================
// WasmRuntime
// ============================================================================

/// Wasm 실행 런타임
pub struct WasmRuntime {
    engine: Engine,
    epoch_tick: Duration,
}

impl WasmRuntime {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let mut engine_config = Config::new();
        engine_config.epoch_interruption(true);

        let engine = Engine::new(&engine_config)
            .map_err(|e| Error::Internal(format!("engine init failed: {}", e)))?;

        Ok(Self {
            engine,
            epoch_tick: config.epoch_tick(),
        })
    }

    /// epoch 틱 태스크 기동
    ///
    /// 반환된 핸들을 abort하면 틱이 멈춥니다. 틱이 멈춘 동안에는
    /// deadline이 지나도 실행 중인 호출이 트랩되지 않습니다.
    pub fn start_epoch_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(runtime.epoch_tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                runtime.engine.increment_epoch();
            }
        })
    }

    /// 타임아웃을 epoch 틱 수로 환산 (여유분 포함)
    pub fn deadline_ticks(&self, timeout: Duration) -> u64 {
        let tick_ms = self.epoch_tick.as_millis().max(1);
        let ticks = timeout.as_millis() / tick_ms;
        (ticks as u64).max(1) + 2
    }

    // ========================================================================
    // 컴파일 / 진입점 발견
    // ========================================================================

    /// 소스 파일을 컴파일하고 진입점을 발견
    ///
    /// 자동 발견: `_`로 시작하지 않는 export 함수 전부.
    /// 빈손이면 관례적 이름 목록(fallback)과 export를 대조합니다.
    pub fn compile(&self, path: &Path, fallback_names: &[String]) -> Result<CompiledUnit> {
        let module = Module::from_file(&self.engine, path)
            .map_err(|e| Error::load(path.to_string_lossy(), e.to_string()))?;

        let exported: BTreeMap<String, FuncType> = module
            .exports()
            .filter_map(|export| match export.ty() {
                wasmtime::ExternType::Func(func_ty) => {
                    Some((export.name().to_string(), func_ty))
                }
                _ => None,
            })
            .collect();

        let mut entry_points: BTreeMap<String, FuncType> = exported
            .iter()
            .filter(|(name, _)| !name.starts_with('_'))
            .map(|(name, ty)| (name.clone(), ty.clone()))
            .collect();

        if entry_points.is_empty() {
            for name in fallback_names {
                if let Some(ty) = exported.get(name) {
                    entry_points.insert(name.clone(), ty.clone());
                }
            }
        }

        debug!(
            path = %path.display(),
            entry_points = ?entry_points
                .iter()
                .map(|(name, ty)| format!("{} {}", name, format_signature(ty)))
                .collect::<Vec<_>>(),
            "Unit compiled"
        );

        Ok(CompiledUnit {
            module,
            entry_points,
        })
    }

    // ========================================================================
    // 호출
    // ========================================================================

    /// 진입점 호출 (동기, blocking 워커에서 실행됨)
    ///
    /// 인자는 위치 인자만 지원합니다. 개수/타입이 시그니처와 맞지 않으면
    /// 실행 전에 거부합니다.
    pub fn invoke(
        &self,
        module: &Module,
        entry_point: &str,
        args: &[Value],
        deadline_ticks: u64,
    ) -> Result<Value> {
        let mut store = Store::new(&self.engine, ());
        store.set_epoch_deadline(deadline_ticks);

        let instance = Instance::new(&mut store, module, &[])
            .map_err(|e| Error::Execution(format!("instantiation failed: {}", e)))?;

        let func = instance
            .get_func(&mut store, entry_point)
            .ok_or_else(|| Error::Execution(format!("export missing: {}", entry_point)))?;

        let ty = func.ty(&store);
        let param_types: Vec<ValType> = ty.params().collect();

        if args.len() != param_types.len() {
            return Err(Error::InvalidInput(format!(
                "{} expects {} argument(s), got {}",
                entry_point,
                param_types.len(),
                args.len()
            )));
        }

        let params: Vec<Val> = args
            .iter()
            .zip(&param_types)
            .enumerate()
            .map(|(i, (value, ty))| {
                json_to_val(value, ty).map_err(|e| {
                    Error::InvalidInput(format!("argument {}: {}", i, e))
                })
            })
            .collect::<Result<_>>()?;

        let mut results = vec![Val::I32(0); ty.results().len()];
        trace!(entry_point, params = params.len(), "Invoking entry point");

        func.call(&mut store, &params, &mut results)
            .map_err(|e| Error::Execution(format!("{}: {}", entry_point, e)))?;

        results_to_json(&results)
    }
}

// ============================================================================
// JSON <-> Val 변환
// ============================================================================

/// JSON 값을 시그니처 타입에 맞춰 wasm 값으로 변환
fn json_to_val(value: &Value, ty: &ValType) -> std::result::Result<Val, String> {
    match ty {
        ValType::I32 => match value {
            Value::Number(n) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Val::I32)
                .ok_or_else(|| format!("{} does not fit in i32", n)),
            Value::Bool(b) => Ok(Val::I32(*b as i32)),
            other => Err(format!("cannot coerce {} to i32", json_type_name(other))),
        },
        ValType::I64 => match value {
            Value::Number(n) => n
                .as_i64()
                .map(Val::I64)
                .ok_or_else(|| format!("{} does not fit in i64", n)),
            Value::Bool(b) => Ok(Val::I64(*b as i64)),
            other => Err(format!("cannot coerce {} to i64", json_type_name(other))),
        },
        ValType::F32 => match value {
            Value::Number(n) => n
                .as_f64()
                .map(|v| Val::F32((v as f32).to_bits()))
                .ok_or_else(|| format!("{} is not a float", n)),
            other => Err(format!("cannot coerce {} to f32", json_type_name(other))),
        },
        ValType::F64 => match value {
            Value::Number(n) => n
                .as_f64()
                .map(|v| Val::F64(v.to_bits()))
                .ok_or_else(|| format!("{} is not a float", n)),
            other => Err(format!("cannot coerce {} to f64", json_type_name(other))),
        },
        other => Err(format!("unsupported parameter type: {}", other)),
    }
}

/// 반환 값들을 JSON으로 변환 (0개 -> null, 1개 -> 값, 여러 개 -> 배열)
fn results_to_json(results: &[Val]) -> Result<Value> {
    let mut values = Vec::with_capacity(results.len());
    for val in results {
        values.push(val_to_json(val)?);
    }
    Ok(match values.len() {
        0 => Value::Null,
        1 => values.pop().unwrap_or(Value::Null),
        _ => Value::Array(values),
    })
}

fn val_to_json(val: &Val) -> Result<Value> {
    match val {
        Val::I32(v) => Ok(Value::from(*v)),
        Val::I64(v) => Ok(Value::from(*v)),
        Val::F32(bits) => Ok(serde_json::Number::from_f64(f32::from_bits(*bits) as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        Val::F64(bits) => Ok(serde_json::Number::from_f64(f64::from_bits(*bits))
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        _ => Err(Error::Execution("unsupported result type".into())),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 시그니처를 로그/응답용 문자열로 변환
pub fn format_signature(ty: &FuncType) -> String {
    let params: Vec<String> = ty.params().map(|t| t.to_string()).collect();
    let results: Vec<String> = ty.results().map(|t| t.to_string()).collect();
    format!("({}) -> ({})", params.join(", "), results.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const ADD_WAT: &str = r#"
        (module
          (func (export "add") (param i64 i64) (result i64)
            local.get 0
            local.get 1
            i64.add))
    "#;

    const START_ONLY_WAT: &str = r#"
        (module
          (func (export "_start"))
          (func (export "_helper") (result i32) i32.const 1))
    "#;

    fn write_unit(dir: &tempfile::TempDir, name: &str, wat: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(wat.as_bytes()).unwrap();
        path
    }

    fn runtime() -> WasmRuntime {
        WasmRuntime::new(&ServiceConfig::default()).unwrap()
    }

    #[test]
    fn test_compile_discovers_public_exports() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_unit(&dir, "math.wat", ADD_WAT);

        let compiled = runtime().compile(&path, &[]).unwrap();
        assert_eq!(compiled.entry_points.len(), 1);
        assert!(compiled.entry_points.contains_key("add"));
    }

    #[test]
    fn test_compile_falls_back_to_conventional_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_unit(&dir, "boot.wat", START_ONLY_WAT);

        let config = ServiceConfig::default();
        let compiled = runtime()
            .compile(&path, &config.fallback_entry_points)
            .unwrap();

        // 공개 export가 없으므로 관례 이름 목록에서 _start만 채택
        let names: Vec<&str> = compiled.entry_points.keys().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["_start"]);
    }

    #[test]
    fn test_compile_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_unit(&dir, "broken.wat", "(module (func oops");

        let err = runtime().compile(&path, &[]).unwrap_err();
        assert!(matches!(err, Error::Load { .. }));
    }

    #[test]
    fn test_invoke_add() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_unit(&dir, "math.wat", ADD_WAT);

        let rt = runtime();
        let compiled = rt.compile(&path, &[]).unwrap();
        let value = rt
            .invoke(&compiled.module, "add", &[json!(10), json!(20)], u64::MAX)
            .unwrap();
        assert_eq!(value, json!(30));
    }

    #[test]
    fn test_invoke_rejects_arity_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_unit(&dir, "math.wat", ADD_WAT);

        let rt = runtime();
        let compiled = rt.compile(&path, &[]).unwrap();
        let err = rt
            .invoke(&compiled.module, "add", &[json!(1)], u64::MAX)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_invoke_rejects_bad_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_unit(&dir, "math.wat", ADD_WAT);

        let rt = runtime();
        let compiled = rt.compile(&path, &[]).unwrap();
        let err = rt
            .invoke(&compiled.module, "add", &[json!("x"), json!(2)], u64::MAX)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_json_to_val_coercions() {
        assert!(matches!(
            json_to_val(&json!(true), &ValType::I32),
            Ok(Val::I32(1))
        ));
        assert!(json_to_val(&json!(i64::MAX), &ValType::I32).is_err());
        assert!(matches!(
            json_to_val(&json!(1.5), &ValType::F64),
            Ok(Val::F64(_))
        ));
    }

    #[test]
    fn test_deadline_ticks_has_floor() {
        let rt = runtime();
        assert!(rt.deadline_ticks(Duration::from_millis(0)) >= 1);
        assert!(rt.deadline_ticks(Duration::from_secs(1)) > 50);
    }
}

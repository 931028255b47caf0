//! Native backend: Rhai.
//!
//! The engine starts from `Engine::new_raw()` (no packages, no I/O) and only
//! receives the packages listed in [`build_engine`]. Time, blob and bit-field
//! packages are left out on purpose.
//!
//! Console helpers: `log`, `info`, `warn`, `error`, plus `print` and `debug`.
//! `log` called with a single number resolves to the logarithm of the math
//! package instead.
//!
//! ```rhai
//! fn transform(row) {
//!     if is_null(row.height_in) { return #{ height_cm: () }; }
//!     #{ height_cm: row.height_in * 2.54 }
//! }
//! ```

use rhai::packages::{
    BasicArrayPackage, BasicMapPackage, BasicMathPackage, CorePackage, LogicPackage,
    MoreStringPackage, Package,
};
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Scope, AST};
use serde_json::{Map, Number, Value};

use super::{ConsoleSink, RoutineOutput, TransformRoutine, ENTRY_POINT};
use crate::error::{SandboxError, SandboxResult};
use crate::models::{ConsoleLevel, Row};

const MAX_NESTING: usize = 32;

/// A compiled Rhai routine with its own engine.
pub struct NativeRoutine {
    engine: Engine,
    ast: AST,
}

impl NativeRoutine {
    /// Parse `code`, run its top-level statements once, and check for `transform(row)`.
    pub fn compile(code: &str, console: ConsoleSink) -> SandboxResult<Self> {
        let engine = build_engine(&console);

        let ast = engine
            .compile(code)
            .map_err(|e| SandboxError::Compilation(e.to_string()))?;

        let arity = ast
            .iter_functions()
            .find(|f| f.name == ENTRY_POINT)
            .map(|f| f.params.len());
        match arity {
            Some(1) => {}
            Some(n) => {
                return Err(SandboxError::Compilation(format!(
                    "`{}` must take exactly one parameter (the row), found {}",
                    ENTRY_POINT, n
                )))
            }
            None => {
                return Err(SandboxError::Compilation(format!(
                    "`{}` is not defined as a function; define `fn {}(row) {{ ... }}`",
                    ENTRY_POINT, ENTRY_POINT
                )))
            }
        }

        engine
            .run_ast(&ast)
            .map_err(|e| SandboxError::Compilation(e.to_string()))?;

        Ok(Self { engine, ast })
    }
}

impl TransformRoutine for NativeRoutine {
    fn call(&self, row: Row) -> Result<RoutineOutput, String> {
        let argument = row_to_dynamic(row);
        let options = CallFnOptions::new().eval_ast(false);

        let result: Dynamic = self
            .engine
            .call_fn_with_options(options, &mut Scope::new(), &self.ast, ENTRY_POINT, (argument,))
            .map_err(|e| e.to_string())?;

        RoutineOutput::from_value(dynamic_to_json(&result, 0)?)
    }
}

// =============================================================================
// Engine construction
// =============================================================================

fn build_engine(console: &ConsoleSink) -> Engine {
    let mut engine = Engine::new_raw();

    engine.register_global_module(CorePackage::new().as_shared_module());
    engine.register_global_module(LogicPackage::new().as_shared_module());
    engine.register_global_module(BasicMathPackage::new().as_shared_module());
    engine.register_global_module(BasicArrayPackage::new().as_shared_module());
    engine.register_global_module(BasicMapPackage::new().as_shared_module());
    engine.register_global_module(MoreStringPackage::new().as_shared_module());

    let sink = console.clone();
    engine.on_print(move |text| sink.push(ConsoleLevel::Log, text));
    let sink = console.clone();
    engine.on_debug(move |text, _, _| sink.push(ConsoleLevel::Log, text));

    for (name, level) in [
        ("log", ConsoleLevel::Log),
        ("info", ConsoleLevel::Info),
        ("warn", ConsoleLevel::Warn),
        ("error", ConsoleLevel::Error),
    ] {
        let sink = console.clone();
        engine.register_fn(name, move |value: Dynamic| {
            sink.push(level, display(&value));
        });
    }

    engine.register_fn("is_null", |value: Dynamic| value.is_unit());

    engine.register_fn(
        "parse_json",
        |text: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
            Ok(json_to_dynamic(&value))
        },
    );

    engine.register_fn(
        "to_json",
        |value: Dynamic| -> Result<String, Box<EvalAltResult>> {
            let json = dynamic_to_json(&value, 0)?;
            Ok(serde_json::to_string(&json).map_err(|e| e.to_string())?)
        },
    );

    engine
}

fn display(value: &Dynamic) -> String {
    if value.is_string() {
        value.clone().into_string().unwrap_or_default()
    } else if value.is_unit() {
        "null".to_string()
    } else {
        value.to_string()
    }
}

// =============================================================================
// Value conversion
// =============================================================================

fn row_to_dynamic(row: Row) -> Dynamic {
    let mut map = rhai::Map::new();
    for (name, value) in &row {
        map.insert(name.as_str().into(), json_to_dynamic(value));
    }
    Dynamic::from_map(map)
}

fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from_bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Dynamic::from_int(i),
            None => Dynamic::from_float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(items) => Dynamic::from_array(items.iter().map(json_to_dynamic).collect()),
        Value::Object(fields) => {
            let mut map = rhai::Map::new();
            for (name, v) in fields {
                map.insert(name.as_str().into(), json_to_dynamic(v));
            }
            Dynamic::from_map(map)
        }
    }
}

fn dynamic_to_json(value: &Dynamic, depth: usize) -> Result<Value, String> {
    if depth > MAX_NESTING {
        return Err("value is nested too deeply".to_string());
    }

    if value.is_unit() {
        return Ok(Value::Null);
    }
    if let Ok(b) = value.as_bool() {
        return Ok(Value::Bool(b));
    }
    if let Ok(i) = value.as_int() {
        return Ok(Value::Number(i.into()));
    }
    if let Ok(f) = value.as_float() {
        return Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| format!("produced a non-finite number ({})", f));
    }
    if let Ok(c) = value.as_char() {
        return Ok(Value::String(c.to_string()));
    }
    if value.is_string() {
        return Ok(Value::String(value.clone().into_string()?));
    }
    if value.is_array() {
        let items = value.clone().into_array()?;
        return items
            .iter()
            .map(|item| dynamic_to_json(item, depth + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }
    if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        let mut fields = Map::new();
        for (name, v) in &map {
            fields.insert(name.to_string(), dynamic_to_json(v, depth + 1)?);
        }
        return Ok(Value::Object(fields));
    }

    Err(format!("unsupported value of type {}", value.type_name()))
}

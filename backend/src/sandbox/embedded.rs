//! Embedded backend: Lua 5.4 with a statistical prelude.
//!
//! Only the `math`, `string` and `table` libraries are opened. User code runs
//! in a private environment table, so `io`, `os`, `require`, `load` and friends
//! are unreachable even though the base library exists in the state.
//!
//! ```lua
//! function transform(row)
//!   if row.S1 == null and row.S2 == null then
//!     return { T = null }
//!   end
//!   return { T = stats.sum({ row.S1, row.S2 }, true) }
//! end
//! ```

use mlua::{Function, Lua, LuaOptions, StdLib, Table, Value as LuaValue, Variadic};
use serde_json::{Map, Number, Value};

use super::{ConsoleSink, RoutineOutput, TransformRoutine, ENTRY_POINT};
use crate::error::{SandboxError, SandboxResult};
use crate::models::{ConsoleLevel, Row};

const PRELUDE: &str = include_str!("prelude.lua");

const MAX_NESTING: usize = 32;

/// Base-library globals copied into the user environment.
const SAFE_GLOBALS: &[&str] = &[
    "_VERSION", "assert", "error", "ipairs", "next", "pairs", "pcall", "select", "tonumber",
    "tostring", "type", "math", "string", "table",
];

/// Product of a successful bootstrap.
#[derive(Debug, Clone)]
pub struct EmbeddedRuntime {
    /// Interpreter version string, e.g. `Lua 5.4`.
    pub version: String,
}

/// Load the interpreter once and make sure the prelude registers cleanly.
pub fn bootstrap() -> SandboxResult<EmbeddedRuntime> {
    let lua = open_interpreter().map_err(|e| SandboxError::Bootstrap(e.to_string()))?;
    let version: String = lua
        .globals()
        .get("_VERSION")
        .map_err(|e| SandboxError::Bootstrap(e.to_string()))?;

    let env = build_environment(&lua, &ConsoleSink::new())
        .map_err(|e| SandboxError::Bootstrap(e.to_string()))?;
    load_prelude(&lua, &env).map_err(|e| SandboxError::Bootstrap(e.to_string()))?;

    let mean: f64 = lua
        .load("return stats.mean({1, 2, 3})")
        .set_environment(env)
        .eval()
        .map_err(|e| SandboxError::Bootstrap(e.to_string()))?;
    if (mean - 2.0).abs() > f64::EPSILON {
        return Err(SandboxError::Bootstrap(format!(
            "prelude self-check failed: mean of 1,2,3 gave {}",
            mean
        )));
    }

    Ok(EmbeddedRuntime { version })
}

/// A compiled Lua routine with its own interpreter state.
pub struct EmbeddedRoutine {
    lua: Lua,
    transform: Function,
}

impl EmbeddedRoutine {
    pub fn compile(code: &str, console: ConsoleSink) -> SandboxResult<Self> {
        let lua = open_interpreter().map_err(|e| SandboxError::Bootstrap(e.to_string()))?;
        let env = build_environment(&lua, &console)
            .map_err(|e| SandboxError::Bootstrap(e.to_string()))?;
        load_prelude(&lua, &env).map_err(|e| SandboxError::Bootstrap(e.to_string()))?;

        lua.load(code)
            .set_name("transform")
            .set_environment(env.clone())
            .exec()
            .map_err(|e| SandboxError::Compilation(first_line(&e.to_string())))?;

        let entry: LuaValue = env
            .get(ENTRY_POINT)
            .map_err(|e| SandboxError::Compilation(e.to_string()))?;
        let transform = match entry {
            LuaValue::Function(f) => f,
            LuaValue::Nil => {
                return Err(SandboxError::Compilation(format!(
                    "`{}` is not defined; define `function {}(row) ... end`",
                    ENTRY_POINT, ENTRY_POINT
                )))
            }
            other => {
                return Err(SandboxError::Compilation(format!(
                    "`{}` must be a function, found {}",
                    ENTRY_POINT,
                    other.type_name()
                )))
            }
        };

        Ok(Self { lua, transform })
    }
}

impl TransformRoutine for EmbeddedRoutine {
    fn call(&self, row: Row) -> Result<RoutineOutput, String> {
        let argument = json_to_lua(&self.lua, &Value::Object(row)).map_err(|e| e.to_string())?;
        let result: LuaValue = self
            .transform
            .call(argument)
            .map_err(|e| first_line(&e.to_string()))?;
        RoutineOutput::from_value(lua_to_json(&result, 0)?)
    }
}

// =============================================================================
// Interpreter setup
// =============================================================================

fn open_interpreter() -> mlua::Result<Lua> {
    Lua::new_with(
        StdLib::MATH | StdLib::STRING | StdLib::TABLE,
        LuaOptions::default(),
    )
}

fn load_prelude(lua: &Lua, env: &Table) -> mlua::Result<()> {
    lua.load(PRELUDE)
        .set_name("prelude")
        .set_environment(env.clone())
        .exec()
}

fn build_environment(lua: &Lua, console: &ConsoleSink) -> mlua::Result<Table> {
    let globals = lua.globals();
    let env = lua.create_table()?;

    for name in SAFE_GLOBALS {
        let value: LuaValue = globals.get(*name)?;
        env.set(*name, value)?;
    }
    env.set("null", LuaValue::NULL)?;

    let console_table = lua.create_table()?;
    for (name, level) in [
        ("log", ConsoleLevel::Log),
        ("info", ConsoleLevel::Info),
        ("warn", ConsoleLevel::Warn),
        ("error", ConsoleLevel::Error),
    ] {
        let sink = console.clone();
        let function = lua.create_function(move |_, args: Variadic<LuaValue>| {
            let text: Vec<String> = args.iter().map(display).collect();
            sink.push(level, text.join(" "));
            Ok(())
        })?;
        if name == "log" {
            env.set("print", function.clone())?;
        }
        console_table.set(name, function)?;
    }
    env.set("console", console_table)?;

    let json = lua.create_table()?;
    json.set(
        "encode",
        lua.create_function(|_, value: LuaValue| {
            let converted = lua_to_json(&value, 0).map_err(mlua::Error::runtime)?;
            serde_json::to_string(&converted).map_err(mlua::Error::external)
        })?,
    )?;
    json.set(
        "decode",
        lua.create_function(|lua, text: String| {
            let parsed: Value = serde_json::from_str(&text).map_err(mlua::Error::external)?;
            json_to_lua(lua, &parsed)
        })?,
    )?;
    env.set("json", json)?;

    Ok(env)
}

fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or(message).to_string()
}

fn is_null(value: &LuaValue) -> bool {
    matches!(value, LuaValue::LightUserData(ud) if ud.0.is_null())
}

fn display(value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => "nil".to_string(),
        v if is_null(v) => "null".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::String(s) => s.to_string_lossy().to_string(),
        LuaValue::Table(_) => lua_to_json(value, 0)
            .ok()
            .and_then(|json| serde_json::to_string(&json).ok())
            .unwrap_or_else(|| "table".to_string()),
        other => other.type_name().to_string(),
    }
}

// =============================================================================
// Value conversion
// =============================================================================

fn json_to_lua(lua: &Lua, value: &Value) -> mlua::Result<LuaValue> {
    Ok(match value {
        Value::Null => LuaValue::NULL,
        Value::Bool(b) => LuaValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => LuaValue::Integer(i),
            None => LuaValue::Number(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => LuaValue::String(lua.create_string(s)?),
        Value::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, json_to_lua(lua, item)?)?;
            }
            LuaValue::Table(table)
        }
        Value::Object(fields) => {
            let table = lua.create_table()?;
            for (name, item) in fields {
                table.raw_set(name.as_str(), json_to_lua(lua, item)?)?;
            }
            LuaValue::Table(table)
        }
    })
}

fn lua_to_json(value: &LuaValue, depth: usize) -> Result<Value, String> {
    if depth > MAX_NESTING {
        return Err("value is nested too deeply".to_string());
    }

    match value {
        LuaValue::Nil => Ok(Value::Null),
        v if is_null(v) => Ok(Value::Null),
        LuaValue::Boolean(b) => Ok(Value::Bool(*b)),
        LuaValue::Integer(i) => Ok(Value::Number((*i).into())),
        LuaValue::Number(n) => Number::from_f64(*n)
            .map(Value::Number)
            .ok_or_else(|| format!("produced a non-finite number ({})", n)),
        LuaValue::String(s) => Ok(Value::String(s.to_string_lossy().to_string())),
        LuaValue::Table(table) => table_to_json(table, depth),
        other => Err(format!("unsupported value of type {}", other.type_name())),
    }
}

/// Sequences become lists, everything else an object. An empty table is an
/// empty object.
fn table_to_json(table: &Table, depth: usize) -> Result<Value, String> {
    let mut fields = Map::new();
    let mut count = 0usize;

    for pair in table.pairs::<LuaValue, LuaValue>() {
        let (key, item) = pair.map_err(|e| e.to_string())?;
        count += 1;
        let name = match key {
            LuaValue::String(s) => s.to_string_lossy().to_string(),
            LuaValue::Integer(i) => i.to_string(),
            other => return Err(format!("unsupported table key of type {}", other.type_name())),
        };
        fields.insert(name, lua_to_json(&item, depth + 1)?);
    }

    let length = table.raw_len();
    if length > 0 && length == count {
        let mut items = Vec::with_capacity(length);
        for i in 1..=length {
            let item: LuaValue = table.raw_get(i).map_err(|e| e.to_string())?;
            items.push(lua_to_json(&item, depth + 1)?);
        }
        return Ok(Value::Array(items));
    }

    Ok(Value::Object(fields))
}

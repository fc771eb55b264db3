//! Restricted Lua VM that runs sandbox units.
//!
//! Each unit gets a fresh VM. Everything that reaches outside the process is
//! removed from the globals, an instruction hook enforces both the instruction
//! budget and the wall-clock timeout, and `print()` is captured into the
//! unit's stdout. Two pieces of host support are installed: the `NULL`
//! sentinel and the `codec` table that moves frames across the boundary as
//! JSON.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as _;
use mlua::{HookTriggers, Lua, MultiValue, Result as LuaResult, Table as LuaTable, Value, VmState};
use sheetchat_engine::table::{self, Column, Table};

use crate::decoder::{ResultPayload, RESULT_PREFIX};
use crate::executor::ExecOutput;

/// Marker the decoder looks for on stderr to classify a failed run.
pub const TRACEBACK_MARKER: &str = "stack traceback:";

/// Default instruction budget per unit.
pub const INSTRUCTION_LIMIT: i64 = 100_000_000;

/// How often the hook runs (every N instructions).
pub const INSTRUCTION_HOOK_INTERVAL: u32 = 10_000;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Heap ceiling for one unit.
pub const MEMORY_LIMIT: usize = 256 * 1024 * 1024;

/// Lines of print() output kept per unit. RESULT lines are always kept.
pub const MAX_OUTPUT_LINES: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeLimits {
    pub instruction_limit: i64,
    pub timeout: Duration,
    pub memory_limit: usize,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            instruction_limit: INSTRUCTION_LIMIT,
            timeout: DEFAULT_TIMEOUT,
            memory_limit: MEMORY_LIMIT,
        }
    }
}

struct OutputState {
    lines: Vec<String>,
    truncated: bool,
}

impl OutputState {
    fn new() -> Self {
        Self {
            lines: Vec::new(),
            truncated: false,
        }
    }

    fn push(&mut self, line: String) {
        if line.starts_with(RESULT_PREFIX) || self.lines.len() < MAX_OUTPUT_LINES {
            self.lines.push(line);
        } else {
            self.truncated = true;
        }
    }
}

/// A fresh sandboxed VM.
pub struct SandboxRuntime {
    lua: Lua,
    output: Rc<RefCell<OutputState>>,
    limits: RuntimeLimits,
}

impl SandboxRuntime {
    pub fn new(limits: RuntimeLimits) -> LuaResult<Self> {
        let lua = Lua::new();
        let output = Rc::new(RefCell::new(OutputState::new()));

        {
            let state = output.clone();
            let print_fn = lua.create_function(move |_, args: MultiValue| {
                let parts: Vec<String> = args.iter().map(lua_value_to_string).collect();
                state.borrow_mut().push(parts.join("\t"));
                Ok(())
            })?;
            lua.globals().set("print", print_fn)?;
        }

        // Kept: basic, string, table, math, utf8
        let globals = lua.globals();
        for name in ["os", "io", "debug", "package", "require", "loadfile", "dofile", "load"] {
            globals.set(name, Value::Nil)?;
        }

        globals.set("NULL", Value::NULL)?;
        globals.set("codec", create_codec(&lua)?)?;

        lua.set_memory_limit(limits.memory_limit)?;

        Ok(Self { lua, output, limits })
    }

    /// Run a complete unit and collect what it printed. Any Lua error,
    /// including budget and timeout aborts, lands on stderr with a traceback.
    pub fn run(&self, source: &str) -> ExecOutput {
        let started = Instant::now();
        let timeout = self.limits.timeout;
        let limit = self.limits.instruction_limit;
        let budget = Arc::new(AtomicI64::new(limit));
        let budget_clone = budget.clone();
        let timed_out = Arc::new(AtomicBool::new(false));
        let timed_out_clone = timed_out.clone();

        self.lua.set_hook(
            HookTriggers::new().every_nth_instruction(INSTRUCTION_HOOK_INTERVAL),
            move |_lua, _debug| {
                if started.elapsed() > timeout {
                    timed_out_clone.store(true, Ordering::Relaxed);
                    return Err(mlua::Error::RuntimeError(format!(
                        "execution timeout ({}s limit)",
                        timeout.as_secs_f64()
                    )));
                }
                let remaining = budget_clone.fetch_sub(INSTRUCTION_HOOK_INTERVAL as i64, Ordering::Relaxed);
                if remaining <= 0 {
                    Err(mlua::Error::RuntimeError(format!(
                        "instruction limit exceeded ({} instructions)",
                        limit
                    )))
                } else {
                    Ok(VmState::Continue)
                }
            },
        );

        let result = self.lua.load(source).set_name("=unit").exec();
        self.lua.remove_hook();

        let state = self.output.borrow();
        let mut stdout = state.lines.join("\n");
        if !stdout.is_empty() {
            stdout.push('\n');
        }

        let mut stderr = String::new();
        if state.truncated {
            stderr.push_str(&format!("output truncated ({} line limit)\n", MAX_OUTPUT_LINES));
        }
        if let Err(e) = result {
            stderr.push_str(&failure_text(&e));
            log::debug!(
                "unit failed after {:?} (timed out: {}, budget exhausted: {})",
                started.elapsed(),
                timed_out.load(Ordering::Relaxed),
                budget.load(Ordering::Relaxed) <= 0
            );
        }

        ExecOutput { stdout, stderr }
    }
}

/// Build a VM with `limits` and run `source` in it.
pub fn run_unit(source: &str, limits: RuntimeLimits) -> ExecOutput {
    match SandboxRuntime::new(limits) {
        Ok(runtime) => runtime.run(source),
        Err(e) => ExecOutput {
            stdout: String::new(),
            stderr: format!("failed to start sandbox: {}\n{}\n\t[C]: in ?", e, TRACEBACK_MARKER),
        },
    }
}

fn failure_text(error: &mlua::Error) -> String {
    let text = match error {
        mlua::Error::CallbackError { traceback, cause } => {
            format!("{}\n{}", format_lua_error(cause), traceback)
        }
        other => format_lua_error(other),
    };
    if text.contains(TRACEBACK_MARKER) {
        text
    } else {
        format!("{}\n{}\n\t[C]: in ?", text, TRACEBACK_MARKER)
    }
}

fn format_lua_error(error: &mlua::Error) -> String {
    match error {
        mlua::Error::SyntaxError { message, .. } => format!("syntax error: {}", message),
        mlua::Error::RuntimeError(msg) => msg.clone(),
        mlua::Error::CallbackError { cause, .. } => format_lua_error(cause),
        _ => error.to_string(),
    }
}

fn lua_value_to_string(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{:.1}", n)
            } else {
                n.to_string()
            }
        }
        Value::String(s) => s.to_string_lossy().to_string(),
        Value::LightUserData(ud) if ud.0.is_null() => "NULL".to_string(),
        Value::Table(_) => "table".to_string(),
        Value::Function(_) => "function".to_string(),
        other => other.type_name().to_string(),
    }
}

// ============================================================================
// codec: frames in and results out
// ============================================================================

fn create_codec(lua: &Lua) -> LuaResult<LuaTable> {
    let codec = lua.create_table()?;

    codec.set(
        "decode",
        lua.create_function(|lua, json: String| {
            let table: Table = serde_json::from_str(&json)
                .map_err(|e| mlua::Error::RuntimeError(format!("bad frame payload: {}", e)))?;
            table
                .validate()
                .map_err(|e| mlua::Error::RuntimeError(format!("bad frame payload: {}", e)))?;
            frame_to_lua(lua, &table)
        })?,
    )?;

    codec.set(
        "encode",
        lua.create_function(|_, value: Value| {
            let payload = payload_from_lua(&value).map_err(mlua::Error::RuntimeError)?;
            let json = serde_json::to_string(&payload)
                .map_err(|e| mlua::Error::RuntimeError(format!("could not encode result: {}", e)))?;
            Ok(format!(
                "{}{}",
                RESULT_PREFIX,
                base64::engine::general_purpose::STANDARD.encode(json)
            ))
        })?,
    )?;

    Ok(codec)
}

fn frame_to_lua(lua: &Lua, table: &Table) -> LuaResult<LuaTable> {
    let names = lua.create_table()?;
    let data = lua.create_table()?;
    for (i, column) in table.columns().iter().enumerate() {
        names.raw_set(i + 1, column.name.as_str())?;
        let values = lua.create_table_with_capacity(column.values.len(), 0)?;
        for (j, v) in column.values.iter().enumerate() {
            values.raw_set(j + 1, value_to_lua(lua, v)?)?;
        }
        data.raw_set(column.name.as_str(), values)?;
    }

    let frame = lua.create_table()?;
    frame.raw_set("__columns", names)?;
    frame.raw_set("__data", data)?;
    frame.raw_set("__n", table.nrows())?;
    Ok(frame)
}

fn value_to_lua(lua: &Lua, value: &table::Value) -> LuaResult<Value> {
    Ok(match value {
        table::Value::Null => Value::NULL,
        table::Value::Bool(b) => Value::Boolean(*b),
        table::Value::Int(i) => Value::Integer(*i),
        table::Value::Float(f) if f.is_nan() => Value::NULL,
        table::Value::Float(f) => Value::Number(*f),
        table::Value::Text(s) => Value::String(lua.create_string(s)?),
    })
}

fn payload_from_lua(value: &Value) -> Result<ResultPayload, String> {
    match value {
        Value::Nil => Ok(ResultPayload::Nothing),
        Value::Table(t) => {
            let is_frame = matches!(t.raw_get::<Value>("__columns"), Ok(Value::Table(_)));
            if !is_frame {
                return Err("process_data must return a frame or a scalar value".to_string());
            }
            Ok(ResultPayload::Table { table: frame_from_lua(t)? })
        }
        scalar => Ok(ResultPayload::Scalar { value: scalar_from_lua(scalar)? }),
    }
}

fn frame_from_lua(frame: &LuaTable) -> Result<Table, String> {
    let lua_err = |e: mlua::Error| format!("malformed frame: {}", e);

    let names: LuaTable = frame.raw_get("__columns").map_err(lua_err)?;
    let data: LuaTable = frame.raw_get("__data").map_err(lua_err)?;
    let nrows: usize = frame.raw_get::<Option<usize>>("__n").map_err(lua_err)?.unwrap_or(0);

    let mut columns = Vec::new();
    for name in names.sequence_values::<Value>() {
        let name = match name.map_err(lua_err)? {
            Value::String(s) => s.to_string_lossy().to_string(),
            Value::Integer(i) => i.to_string(),
            other => return Err(format!("column names must be strings, got {}", other.type_name())),
        };
        let values: LuaTable = data
            .raw_get::<Option<LuaTable>>(name.as_str())
            .map_err(lua_err)?
            .ok_or_else(|| format!("column '{}' has no values", name))?;
        let mut out = Vec::with_capacity(nrows);
        for i in 1..=nrows {
            let v: Value = values.raw_get(i).map_err(lua_err)?;
            out.push(scalar_from_lua(&v).map_err(|e| format!("column '{}' row {}: {}", name, i, e))?);
        }
        columns.push(Column::new(name, out));
    }

    Table::from_columns(columns).map_err(|e| e.to_string())
}

fn scalar_from_lua(value: &Value) -> Result<table::Value, String> {
    match value {
        Value::Nil => Ok(table::Value::Null),
        Value::LightUserData(ud) if ud.0.is_null() => Ok(table::Value::Null),
        Value::Boolean(b) => Ok(table::Value::Bool(*b)),
        Value::Integer(i) => Ok(table::Value::Int(*i)),
        Value::Number(n) if n.is_nan() => Ok(table::Value::Null),
        Value::Number(n) => Ok(table::Value::Float(*n)),
        Value::String(s) => Ok(table::Value::Text(s.to_string_lossy().to_string())),
        other => Err(format!("unsupported value of type {}", other.type_name())),
    }
}

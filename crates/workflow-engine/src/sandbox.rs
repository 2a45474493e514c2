use common::types::JsonValue;
use mlua::{Lua, LuaSerdeExt, Value as LuaValue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const DEFAULT_INSTRUCTION_BUDGET: u64 = 10_000_000;
const HOOK_INTERVAL_INSTRUCTIONS: u32 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("script compile error: {0}")]
    Compile(String),
    #[error("script runtime error: {0}")]
    Runtime(String),
    #[error("script exceeded its instruction budget")]
    BudgetExceeded,
}

/// Evaluates a Lua expression against a deny-by-default global table: the
/// node's `input` is exposed as a Lua table, but `os`, `io`, `require`, and
/// `dofile`/`loadfile` are absent. An instruction-count hook aborts runaway
/// scripts instead of relying on wall-clock time, since `code` nodes are
/// tenant-untrusted (§9).
pub fn evaluate(code: &str, input: &JsonValue) -> Result<JsonValue, SandboxError> {
    let lua = Lua::new();
    sandbox_globals(&lua).map_err(|e| SandboxError::Runtime(e.to_string()))?;

    let globals = lua.globals();
    let lua_input = lua
        .to_value(input)
        .map_err(|e| SandboxError::Runtime(e.to_string()))?;
    globals
        .set("input", lua_input)
        .map_err(|e| SandboxError::Runtime(e.to_string()))?;

    let budget_remaining = Arc::new(AtomicU64::new(DEFAULT_INSTRUCTION_BUDGET));
    let hook_budget = budget_remaining.clone();
    lua.set_hook(
        mlua::HookTriggers::new().every_nth_instruction(HOOK_INTERVAL_INSTRUCTIONS),
        move |_lua, _debug| {
            let remaining = hook_budget.fetch_sub(
                HOOK_INTERVAL_INSTRUCTIONS as u64,
                Ordering::Relaxed,
            );
            if remaining <= HOOK_INTERVAL_INSTRUCTIONS as u64 {
                return Err(mlua::Error::RuntimeError(
                    "instruction budget exceeded".to_string(),
                ));
            }
            Ok(())
        },
    );

    let chunk = lua.load(code).set_name("code-node");
    let result: LuaValue = chunk.eval().map_err(|e| {
        let msg = e.to_string();
        if msg.contains("instruction budget exceeded") {
            SandboxError::BudgetExceeded
        } else {
            SandboxError::Runtime(msg)
        }
    })?;

    lua.remove_hook();
    lua.from_value(result).map_err(|e| SandboxError::Runtime(e.to_string()))
}

/// Populates only a minimal, side-effect-free standard library: `string`,
/// `table`, `math`. Anything with filesystem, process, or module-loading
/// capability is left unset.
fn sandbox_globals(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in ["os", "io", "require", "dofile", "loadfile", "load", "package"] {
        globals.set(name, mlua::Value::Nil)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evaluates_simple_expression_against_input() {
        let input = json!({"value": 21});
        let result = evaluate("return input.value * 2", &input).unwrap();
        assert_eq!(result, json!(42));
    }

    #[test]
    fn denies_filesystem_access() {
        let input = json!({});
        let result = evaluate("return io.open('/etc/passwd')", &input);
        assert!(result.is_err());
    }

    #[test]
    fn aborts_runaway_loop() {
        let input = json!({});
        let result = evaluate("local i = 0 while true do i = i + 1 end return i", &input);
        assert!(matches!(result, Err(SandboxError::BudgetExceeded)));
    }
}

//! Turning a code fragment from the model into a self-contained Lua unit.
//!
//! A unit is the frame library, the normalized fragment, the input table
//! embedded as a JSON long-string literal, and two trailer lines that call the
//! entry function and print the encoded result. Nothing else is passed in.

use std::sync::OnceLock;

use regex::Regex;
use sheetchat_engine::table::Table;

use crate::response::ENTRY_FUNCTION;

/// The `Frame` library every unit starts with.
pub const PRELUDE: &str = include_str!("prelude.lua");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxUnit {
    pub source: String,
    /// Name of the function the unit calls with `df`
    pub entry: String,
}

fn start_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(local\b|function\b|df\b|--|process_data\b|return\b)").ok())
        .as_ref()
}

fn bare_call_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_]\w*\s*\(\s*df\s*\)\s*:?\s*$").ok())
        .as_ref()
}

fn function_def_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"function\s+([A-Za-z_]\w*)\s*\(").ok())
        .as_ref()
}

pub struct SandboxBuilder;

impl SandboxBuilder {
    /// Build a unit running `fragment` against `table`. None when nothing
    /// runnable is left after cleanup.
    pub fn build(fragment: &str, table: &Table) -> Option<SandboxUnit> {
        let code = normalize(fragment)?;
        let (code, entry) = match entry_function(&code) {
            Some(entry) => (code, entry),
            None => (wrap_in_entry(&code), ENTRY_FUNCTION.to_string()),
        };

        // Tables built in-crate are always serializable; a failure here means
        // there is no input to embed, which is the same as no unit.
        let payload = serde_json::to_string(table).ok()?;
        let (open, close) = long_brackets(&payload);

        let mut source = String::with_capacity(PRELUDE.len() + code.len() + payload.len() + 128);
        source.push_str(PRELUDE);
        source.push('\n');
        source.push_str(&code);
        source.push_str("\n\n");
        source.push_str(&format!("local df = Frame.load({}{}{})\n", open, payload, close));
        source.push_str(&format!("local result = {}(df)\n", entry));
        source.push_str("print(codec.encode(result))\n");

        log::debug!("built sandbox unit: entry '{}', {} bytes", entry, source.len());
        Some(SandboxUnit { source, entry })
    }
}

/// Strip fences and chatter, then keep everything from the first line that
/// looks like Lua.
fn normalize(fragment: &str) -> Option<String> {
    let kept: Vec<&str> = fragment
        .lines()
        .filter(|line| !line.contains("```") && !line.contains("[/CODE]"))
        .filter(|line| {
            let t = line.trim();
            !t.eq_ignore_ascii_case("lua") && !t.eq_ignore_ascii_case("python")
        })
        .collect();

    let start = kept
        .iter()
        .position(|line| start_re().is_some_and(|re| re.is_match(line)))?;
    let code = kept[start..].join("\n");
    let code = code.trim();
    if code.is_empty() {
        return None;
    }

    let first_line = code.lines().next().unwrap_or_default();
    if bare_call_re().is_some_and(|re| re.is_match(first_line)) {
        let fixed = first_line.trim_end().trim_end_matches(':').trim_end();
        let rest = &code[first_line.len()..];
        return Some(format!("function {}{}", fixed, rest));
    }
    Some(code.to_string())
}

fn entry_function(code: &str) -> Option<String> {
    let re = function_def_re()?;
    let mut first = None;
    for caps in re.captures_iter(code) {
        let name = caps.get(1)?.as_str();
        if name == ENTRY_FUNCTION {
            return Some(name.to_string());
        }
        first.get_or_insert_with(|| name.to_string());
    }
    first
}

/// Wrap a loose fragment in the entry function. A fragment with no `return`
/// of its own hands back the frame it was given.
fn wrap_in_entry(code: &str) -> String {
    let mut out = format!("function {}(df)\n", ENTRY_FUNCTION);
    for line in code.lines().filter(|l| !l.trim().is_empty()) {
        out.push_str("    ");
        out.push_str(line);
        out.push('\n');
    }
    if !code.lines().any(|l| l.trim_start().starts_with("return")) {
        out.push_str("    return df\n");
    }
    out.push_str("end");
    out
}

/// Smallest long-bracket level (at least 2) whose closing form does not
/// occur in `payload`.
fn long_brackets(payload: &str) -> (String, String) {
    let mut level = 2;
    loop {
        let eq = "=".repeat(level);
        let close = format!("]{}]", eq);
        if !payload.contains(&close) {
            return (format!("[{}[", eq), close);
        }
        level += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{decode, ResultValue};
    use crate::executor::{Executor, InProcessExecutor};
    use proptest::prelude::*;
    use sheetchat_engine::table::{Column, Value};

    fn sample() -> Table {
        Table::from_columns(vec![
            Column::new("name", vec![Value::Text("Alice".into()), Value::Text("Bob".into()), Value::Null]),
            Column::new("age", vec![Value::Int(30), Value::Int(25), Value::Int(41)]),
            Column::new("score", vec![Value::Float(1.5), Value::Null, Value::Float(-2.25)]),
        ])
        .unwrap()
    }

    fn run(fragment: &str, table: &Table) -> ResultValue {
        let unit = SandboxBuilder::build(fragment, table).expect("unit");
        let out = InProcessExecutor::default().execute(&unit);
        decode(&out).unwrap_or_else(|e| panic!("{}\n--- stdout\n{}", e, out.stdout)).value
    }

    #[test]
    fn test_empty_fragment_is_none() {
        assert!(SandboxBuilder::build("", &sample()).is_none());
        assert!(SandboxBuilder::build("```lua\n```", &sample()).is_none());
        assert!(SandboxBuilder::build("Sorry, I can't help with that.", &sample()).is_none());
    }

    #[test]
    fn test_fences_and_preamble_stripped() {
        let code = normalize("Here is the code:\n```lua\nlua\nfunction process_data(df)\n  return df\nend\n```\n[/CODE]").unwrap();
        assert_eq!(code, "function process_data(df)\n  return df\nend");
    }

    #[test]
    fn test_bare_call_line_gets_function_keyword() {
        let code = normalize("process_data(df):\n  return df\nend").unwrap();
        assert_eq!(code, "function process_data(df)\n  return df\nend");
    }

    #[test]
    fn test_entry_prefers_process_data() {
        assert_eq!(
            entry_function("local function helper(x) return x end\nfunction process_data(df) return df end").as_deref(),
            Some("process_data")
        );
        assert_eq!(entry_function("function transform(df) return df end").as_deref(), Some("transform"));
        assert_eq!(entry_function("df['a'] = 1"), None);
    }

    #[test]
    fn test_wrap_indents_and_returns_df() {
        let wrapped = wrap_in_entry("df[\"b\"] = 1\n\n-- done");
        assert_eq!(wrapped, "function process_data(df)\n    df[\"b\"] = 1\n    -- done\n    return df\nend");
        let wrapped = wrap_in_entry("return df:sum(\"a\")");
        assert!(!wrapped.contains("return df\n"));
    }

    #[test]
    fn test_long_bracket_level_avoids_payload() {
        assert_eq!(long_brackets("abc"), ("[==[".to_string(), "]==]".to_string()));
        assert_eq!(long_brackets("x]==]y"), ("[===[".to_string(), "]===]".to_string()));
        assert_eq!(long_brackets("]==] ]===]"), ("[====[".to_string(), "]====]".to_string()));
    }

    #[test]
    fn test_return_df_round_trips() {
        let table = sample();
        assert_eq!(run("function process_data(df)\n  return df\nend", &table), ResultValue::Table(table));
    }

    #[test]
    fn test_payload_with_closing_brackets_survives() {
        let table = Table::from_columns(vec![Column::new("t", vec![Value::Text("a]==]b]===]c".into())])]).unwrap();
        assert_eq!(run("return df", &table), ResultValue::Table(table));
    }

    #[test]
    fn test_loose_fragment_mutates_frame() {
        let result = run("df[\"double\"] = df:col(\"age\")\ndf:map(\"double\", function(v) return v * 2 end)", &sample());
        let ResultValue::Table(t) = result else { panic!("expected a table") };
        assert_eq!(
            t.column("double").unwrap().values,
            vec![Value::Int(60), Value::Int(50), Value::Int(82)]
        );
    }

    #[test]
    fn test_scalar_and_nothing_results() {
        assert_eq!(
            run("function process_data(df) return df:sum(\"age\") end", &sample()),
            ResultValue::Scalar(Value::Int(96))
        );
        assert_eq!(
            run("function process_data(df) return df:mean(\"score\") end", &sample()),
            ResultValue::Scalar(Value::Float(-0.375))
        );
        assert_eq!(run("function process_data(df) end", &sample()), ResultValue::Nothing);
    }

    #[test]
    fn test_frame_library_operations() {
        let fragment = r#"
function process_data(df)
  local adults = df:filter(function(r) return r.age >= 30 end)
  local sorted = adults:sort_by("age", true)
  sorted:add_column("rank", function(_, i) return i end)
  sorted:rename("name", "who")
  sorted:drop_column("score")
  return sorted
end"#;
        let ResultValue::Table(t) = run(fragment, &sample()) else { panic!("expected a table") };
        assert_eq!(t.column_names(), vec!["who", "age", "rank"]);
        assert_eq!(t.column("age").unwrap().values, vec![Value::Int(41), Value::Int(30)]);
        assert_eq!(t.column("who").unwrap().values, vec![Value::Null, Value::Text("Alice".into())]);
        assert_eq!(t.column("rank").unwrap().values, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_sort_puts_nulls_last() {
        let ResultValue::Table(t) = run("return df:sort_by(\"score\")", &sample()) else { panic!("expected a table") };
        assert_eq!(
            t.column("score").unwrap().values,
            vec![Value::Float(-2.25), Value::Float(1.5), Value::Null]
        );
    }

    #[test]
    fn test_sort_mixed_column_numbers_first() {
        let mixed = Table::from_columns(vec![Column::new(
            "v",
            vec![
                Value::Text("b".into()),
                Value::Int(3),
                Value::Null,
                Value::Text("a".into()),
                Value::Int(1),
            ],
        )])
        .unwrap();
        let ResultValue::Table(asc) = run("return df:sort_by(\"v\")", &mixed) else { panic!("expected a table") };
        assert_eq!(
            asc.column("v").unwrap().values,
            vec![Value::Int(1), Value::Int(3), Value::Text("a".into()), Value::Text("b".into()), Value::Null]
        );
        let ResultValue::Table(desc) = run("return df:sort_by(\"v\", true)", &mixed) else { panic!("expected a table") };
        assert_eq!(
            desc.column("v").unwrap().values,
            vec![Value::Int(3), Value::Int(1), Value::Text("b".into()), Value::Text("a".into()), Value::Null]
        );
    }

    #[test]
    fn test_row_edits() {
        let fragment = r#"
df:append_row({name = "Eve", age = 22})
df:delete_row(1)
df:set(1, "score", 9)
return df"#;
        let ResultValue::Table(t) = run(fragment, &sample()) else { panic!("expected a table") };
        assert_eq!(t.nrows(), 3);
        assert_eq!(t.get(0, 0), Some(&Value::Text("Bob".into())));
        assert_eq!(t.get(0, 2), Some(&Value::Int(9)));
        assert_eq!(t.get(2, 0), Some(&Value::Text("Eve".into())));
        assert_eq!(t.get(2, 2), Some(&Value::Null));
    }

    #[test]
    fn test_runtime_error_reaches_stderr() {
        let unit = SandboxBuilder::build("function process_data(df) return df:col(\"nope\") end", &sample()).unwrap();
        let out = InProcessExecutor::default().execute(&unit);
        assert!(out.stderr.contains("no such column: nope"));
        assert!(matches!(decode(&out), Err(crate::PipelineError::ExecutionFailure { .. })));
    }

    #[test]
    fn test_plain_table_result_is_execution_failure() {
        let unit = SandboxBuilder::build("function process_data(df) return {1, 2} end", &sample()).unwrap();
        let out = InProcessExecutor::default().execute(&unit);
        assert!(matches!(decode(&out), Err(crate::PipelineError::ExecutionFailure { .. })));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_identity_round_trip(
            texts in proptest::collection::vec("[ -~]{0,12}", 0..6),
            ints in proptest::collection::vec(-1_000_000i64..1_000_000, 0..6),
        ) {
            let n = texts.len().min(ints.len());
            let table = Table::from_columns(vec![
                Column::new("t", texts[..n].iter().map(|s| Value::Text(s.clone())).collect()),
                Column::new("i", ints[..n].iter().map(|i| Value::Int(*i)).collect()),
            ]).unwrap();
            let unit = SandboxBuilder::build("function process_data(df)\n  return df\nend", &table).unwrap();
            let out = InProcessExecutor::default().execute(&unit);
            prop_assert_eq!(decode(&out).unwrap().value, ResultValue::Table(table));
        }
    }
}

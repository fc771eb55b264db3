//! Chart mode: drawing calls pulled out of a reply without running it.
//!
//! The reply is scanned for top-level `name(args)` calls, one statement at a
//! time. Arguments are read as literals, lists, `{key = value}` option tables
//! or column references (`df["col"]`, `df:col("col")`, `df.col`) resolved
//! against the sheet. Simple `local x = <expr>` bindings are followed.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use sheetchat_engine::table::{Table, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChartError {
    #[error("no such column: {0}")]
    UnknownColumn(String),

    #[error("unbalanced brackets in: {0}")]
    Unbalanced(String),
}

/// A resolved argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartArg {
    Value(Value),
    Column { name: String, values: Vec<Value> },
    List(Vec<ChartArg>),
    /// A name the scan could not resolve
    Ident(String),
}

impl fmt::Display for ChartArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartArg::Value(Value::Text(s)) => write!(f, "{:?}", s),
            ChartArg::Value(Value::Null) => write!(f, "nil"),
            ChartArg::Value(v) => write!(f, "{}", v),
            ChartArg::Column { name, values } => write!(f, "df[{:?}] ({} values)", name, values.len()),
            ChartArg::List(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
            ChartArg::Ident(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartCall {
    pub name: String,
    pub args: Vec<ChartArg>,
    pub kwargs: BTreeMap<String, ChartArg>,
}

impl fmt::Display for ChartCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        let mut first = true;
        for arg in &self.args {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}", arg)?;
        }
        for (key, value) in &self.kwargs {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}={}", key, value)?;
        }
        write!(f, ")")
    }
}

/// Receives the calls of one chart.
pub trait ChartSink {
    fn new_axes(&mut self);

    fn call(&mut self, call: &ChartCall);

    fn finish(&mut self);
}

/// Collects a readable transcript of each chart.
#[derive(Debug, Default)]
pub struct TranscriptSink {
    pub lines: Vec<String>,
    pub charts: usize,
}

impl ChartSink for TranscriptSink {
    fn new_axes(&mut self) {
        self.charts += 1;
        self.lines.push(format!("chart {}:", self.charts));
    }

    fn call(&mut self, call: &ChartCall) {
        self.lines.push(format!("  ax:{}", call));
    }

    fn finish(&mut self) {
        log::debug!("chart {} done ({} lines)", self.charts, self.lines.len());
    }
}

/// Hand every call to `sink` as one chart.
pub fn draw(calls: &[ChartCall], sink: &mut dyn ChartSink) {
    sink.new_axes();
    for call in calls {
        sink.call(call);
    }
    sink.finish();
}

const KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "for", "function", "if", "in", "local", "not", "or",
    "repeat", "return", "then", "until", "while",
];

/// Extract the drawing calls from chart-mode code.
pub fn extract_calls(code: &str, table: &Table) -> Result<Vec<ChartCall>, ChartError> {
    let mut scope: HashMap<String, ChartArg> = HashMap::new();
    let mut calls = Vec::new();

    for statement in code.lines().map(strip_comment).map(str::trim).filter(|s| !s.is_empty()) {
        if let Some((name, expr)) = binding(statement) {
            let value = resolve(expr, table, &scope)?;
            scope.insert(name.to_string(), value);
            continue;
        }
        let mut rest = statement;
        while let Some((name, args, tail)) = next_call(rest)? {
            if !KEYWORDS.contains(&name) && !is_column_call(rest, name) {
                calls.push(build_call(name, args, table, &scope)?);
            }
            rest = tail;
        }
    }

    log::debug!("chart: extracted {} calls", calls.len());
    Ok(calls)
}

fn strip_comment(line: &str) -> &str {
    let mut quote = None;
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'-' && bytes.get(i + 1) == Some(&b'-') => return &line[..i],
            None => {}
        }
    }
    line
}

/// `local name = expr` or `name = expr`, where expr is not a call statement.
fn binding(statement: &str) -> Option<(&str, &str)> {
    let s = statement.strip_prefix("local ").unwrap_or(statement).trim_start();
    let end = s.find(|c: char| !(c.is_alphanumeric() || c == '_'))?;
    let (name, rest) = s.split_at(end);
    let rest = rest.trim_start();
    if name.is_empty() || !rest.starts_with('=') || rest.starts_with("==") {
        return None;
    }
    Some((name, rest[1..].trim()))
}

/// `df:col(...)` is a column reference, not a drawing call.
fn is_column_call(text: &str, name: &str) -> bool {
    name == "col" && text.contains("df:col(")
}

/// Find the next `name(...)`, returning the name, the raw argument text and
/// what follows the closing parenthesis. The receiver (`ax:` / `ax.`) is dropped.
fn next_call(text: &str) -> Result<Option<(&str, &str, &str)>, ChartError> {
    let bytes = text.as_bytes();
    let mut i = 0;
    let mut quote = None;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 1;
            } else if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        if b == b'"' || b == b'\'' {
            quote = Some(b);
            i += 1;
            continue;
        }
        if b == b'(' {
            let name_start = text[..i]
                .trim_end()
                .rfind(|c: char| !(c.is_alphanumeric() || c == '_'))
                .map(|p| p + 1)
                .unwrap_or(0);
            let name = text[name_start..i].trim_end();
            let close = matching_close(text, i).ok_or_else(|| ChartError::Unbalanced(text.to_string()))?;
            if !name.is_empty() {
                return Ok(Some((name, &text[i + 1..close], &text[close + 1..])));
            }
            i = close;
        }
        i += 1;
    }
    Ok(None)
}

fn matching_close(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut quote = None;
    let mut escaped = false;
    for (i, b) in text.bytes().enumerate().skip(open) {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => quote = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                depth -= 1;
                if depth == 0 {
                    return (b == b')').then_some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on commas outside brackets and strings.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote = None;
    let mut start = 0;
    for (i, b) in text.bytes().enumerate() {
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => quote = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b',' | b';' if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(text[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

/// `key = value` at the top level of an argument.
fn keyword(arg: &str) -> Option<(&str, &str)> {
    let (key, value) = arg.split_once('=')?;
    let key = key.trim();
    if value.starts_with('=') || key.is_empty() || !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some((key, value.trim()))
}

fn build_call(
    name: &str,
    args: &str,
    table: &Table,
    scope: &HashMap<String, ChartArg>,
) -> Result<ChartCall, ChartError> {
    let mut call = ChartCall {
        name: name.to_string(),
        args: Vec::new(),
        kwargs: BTreeMap::new(),
    };
    for arg in split_top_level(args) {
        if let Some((key, value)) = keyword(arg) {
            call.kwargs.insert(key.to_string(), resolve(value, table, scope)?);
        } else if let Some(options) = option_table(arg) {
            // Lua style trailing options: ax:plot(x, y, {label = "a"})
            for (key, value) in options {
                call.kwargs.insert(key.to_string(), resolve(value, table, scope)?);
            }
        } else {
            call.args.push(resolve(arg, table, scope)?);
        }
    }
    Ok(call)
}

/// A `{k = v, ...}` table whose every entry is keyed.
fn option_table(arg: &str) -> Option<Vec<(&str, &str)>> {
    let inner = arg.strip_prefix('{')?.strip_suffix('}')?;
    let entries = split_top_level(inner);
    if entries.is_empty() {
        return None;
    }
    entries.into_iter().map(keyword).collect()
}

fn unquote(text: &str) -> Option<&str> {
    let text = text.trim();
    if text.len() >= 2 {
        let first = text.as_bytes()[0];
        if (first == b'"' || first == b'\'') && text.as_bytes()[text.len() - 1] == first {
            return Some(&text[1..text.len() - 1]);
        }
    }
    None
}

/// The column named by `df["x"]`, `df['x']`, `df:col("x")` or `df.x`.
fn column_reference(expr: &str) -> Option<&str> {
    if let Some(inner) = expr.strip_prefix("df[").and_then(|s| s.strip_suffix(']')) {
        return unquote(inner);
    }
    if let Some(inner) = expr.strip_prefix("df:col(").and_then(|s| s.strip_suffix(')')) {
        return unquote(inner);
    }
    expr.strip_prefix("df.")
        .filter(|name| !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_'))
}

fn resolve(expr: &str, table: &Table, scope: &HashMap<String, ChartArg>) -> Result<ChartArg, ChartError> {
    let expr = expr.trim();
    if let Some(text) = unquote(expr) {
        return Ok(ChartArg::Value(Value::Text(text.to_string())));
    }
    if let Some(name) = column_reference(expr) {
        let column = table
            .column(name)
            .ok_or_else(|| ChartError::UnknownColumn(name.to_string()))?;
        return Ok(ChartArg::Column {
            name: name.to_string(),
            values: column.values.clone(),
        });
    }
    if let Some(inner) = expr.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        return split_top_level(inner)
            .into_iter()
            .map(|item| resolve(item, table, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(ChartArg::List);
    }
    match expr {
        "true" => return Ok(ChartArg::Value(Value::Bool(true))),
        "false" => return Ok(ChartArg::Value(Value::Bool(false))),
        "nil" | "NULL" => return Ok(ChartArg::Value(Value::Null)),
        _ => {}
    }
    if let Ok(i) = expr.parse::<i64>() {
        return Ok(ChartArg::Value(Value::Int(i)));
    }
    if let Ok(x) = expr.parse::<f64>() {
        return Ok(ChartArg::Value(Value::Float(x)));
    }
    Ok(scope
        .get(expr)
        .cloned()
        .unwrap_or_else(|| ChartArg::Ident(expr.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetchat_engine::table::Column;

    fn table() -> Table {
        Table::from_columns(vec![
            Column::new("month", vec![Value::Text("jan".into()), Value::Text("feb".into())]),
            Column::new("sales", vec![Value::Int(10), Value::Int(14)]),
        ])
        .unwrap()
    }

    fn column(name: &str) -> ChartArg {
        let values = table().column(name).unwrap().values.clone();
        ChartArg::Column { name: name.into(), values }
    }

    #[test]
    fn test_bar_with_column_references() {
        let calls = extract_calls(r#"ax:bar(df["month"], df:col("sales"), {color = "red"})"#, &table()).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "bar");
        assert_eq!(calls[0].args, vec![column("month"), column("sales")]);
        assert_eq!(
            calls[0].kwargs.get("color"),
            Some(&ChartArg::Value(Value::Text("red".into())))
        );
    }

    #[test]
    fn test_several_statements_and_comments() {
        let code = "-- sales chart\nax:plot(df.month, df.sales, {label = 'Sales', lw = 2})\nax:set_title(\"Sales (2024)\")\nax:legend()";
        let calls = extract_calls(code, &table()).unwrap();
        let names: Vec<_> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["plot", "set_title", "legend"]);
        assert_eq!(calls[0].kwargs.get("lw"), Some(&ChartArg::Value(Value::Int(2))));
        assert_eq!(calls[1].args, vec![ChartArg::Value(Value::Text("Sales (2024)".into()))]);
        assert!(calls[2].args.is_empty());
    }

    #[test]
    fn test_bindings_are_followed() {
        let code = "local x = df[\"sales\"]\nlabels = {\"a\", \"b\"}\nax:pie(x, {labels = labels})";
        let calls = extract_calls(code, &table()).unwrap();
        assert_eq!(calls[0].args, vec![column("sales")]);
        assert_eq!(
            calls[0].kwargs.get("labels"),
            Some(&ChartArg::List(vec![
                ChartArg::Value(Value::Text("a".into())),
                ChartArg::Value(Value::Text("b".into())),
            ]))
        );
    }

    #[test]
    fn test_python_style_keywords() {
        let calls = extract_calls("ax.scatter(df['sales'], df['sales'], alpha=0.5)", &table()).unwrap();
        assert_eq!(calls[0].name, "scatter");
        assert_eq!(calls[0].kwargs.get("alpha"), Some(&ChartArg::Value(Value::Float(0.5))));
    }

    #[test]
    fn test_unknown_column() {
        let err = extract_calls("ax:bar(df[\"region\"], {1, 2})", &table()).unwrap_err();
        assert_eq!(err, ChartError::UnknownColumn("region".into()));
    }

    #[test]
    fn test_unbalanced() {
        assert!(matches!(
            extract_calls("ax:bar(df[\"sales\"]", &table()),
            Err(ChartError::Unbalanced(_))
        ));
    }

    #[test]
    fn test_transcript_sink() {
        let calls = extract_calls("ax:hist(df.sales, {bins = 5})", &table()).unwrap();
        let mut sink = TranscriptSink::default();
        draw(&calls, &mut sink);
        assert_eq!(sink.charts, 1);
        assert_eq!(sink.lines[0], "chart 1:");
        assert_eq!(sink.lines[1], "  ax:hist(df[\"sales\"] (2 values), bins=5)");
    }
}

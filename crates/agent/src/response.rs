//! Splitting a model reply into explanation and code.

use std::sync::OnceLock;

use regex::Regex;

pub const CODE_MARKER: &str = "[CODE]";
pub const CODE_END_MARKER: &str = "[/CODE]";

/// Name of the function generated code must define.
pub const ENTRY_FUNCTION: &str = "process_data";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    pub explanation: String,
    pub code: String,
    pub is_code: bool,
    /// Spreadsheet-formula summary of what the code does, if recognizable
    pub logic_hint: Option<String>,
}

fn signature_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:local\s+)?function\s+process_data\b").ok())
        .as_ref()
}

fn comparison_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"==|~=|<=|>=|[^<]<[^=]|[^=>]>[^=]").ok())
        .as_ref()
}

/// Parse a model reply. Never fails: text with neither marker nor entry
/// signature comes back whole as the explanation with empty code.
pub fn parse_response(text: &str) -> ParsedResponse {
    let (explanation, code) = if let Some(start) = text.find(CODE_MARKER) {
        let after = &text[start + CODE_MARKER.len()..];
        let end = [after.find(CODE_END_MARKER), after.find(CODE_MARKER)]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(after.len());
        (text[..start].trim().to_string(), after[..end].trim().to_string())
    } else if let Some(m) = signature_re().and_then(|re| re.find(text)) {
        (text[..m.start()].trim().to_string(), text[m.start()..].trim_end().to_string())
    } else {
        (text.to_string(), String::new())
    };

    let is_code = looks_like_code(text);
    let logic_hint = if code.is_empty() { None } else { logic_hint(&code) };

    ParsedResponse {
        explanation,
        code,
        is_code,
        logic_hint,
    }
}

/// Marker, entry signature, or a `df[...] = ` / `df:...=` shape.
pub fn looks_like_code(text: &str) -> bool {
    text.contains(CODE_MARKER)
        || signature_re().is_some_and(|re| re.is_match(text))
        || ((text.contains("df[") || text.contains("df:")) && text.contains('='))
}

/// First matching rule wins.
pub fn logic_hint(code: &str) -> Option<String> {
    let hint = if code.contains(":mean(") {
        "=AVERAGE(...)"
    } else if code.contains(":sum(") {
        "=SUM(...)"
    } else if code.contains(":sort_by(") {
        "custom sort"
    } else if comparison_re().is_some_and(|re| re.is_match(code)) {
        "=FILTER(...)"
    } else if code.contains("math.random") {
        "=RAND()"
    } else {
        return None;
    };
    Some(hint.to_string())
}

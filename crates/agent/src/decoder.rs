//! Classifying a unit's output into a result or a failure.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sheetchat_engine::table::{Table, Value};

use crate::error::PipelineError;
use crate::executor::ExecOutput;
use crate::runtime::TRACEBACK_MARKER;

/// Prefix of the single line a unit prints to report its result.
pub const RESULT_PREFIX: &str = "RESULT ";

/// What `process_data` returned, as carried on the RESULT line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResultPayload {
    Table { table: Table },
    Scalar { value: Value },
    Nothing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultValue {
    Table(Table),
    Scalar(Value),
    Nothing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub value: ResultValue,
    /// Lines the code printed before the result
    pub printed: Vec<String>,
}

/// A traceback on stderr wins over anything on stdout.
pub fn decode(output: &ExecOutput) -> Result<Decoded, PipelineError> {
    if output.stderr.contains(TRACEBACK_MARKER) {
        log::debug!("decode: execution failure");
        return Err(PipelineError::ExecutionFailure {
            stderr: output.stderr.clone(),
        });
    }

    let failure = |reason: String| {
        log::debug!("decode: {}", reason);
        PipelineError::DecodeFailure {
            reason,
            stderr: output.stderr.clone(),
        }
    };

    let lines: Vec<&str> = output.stdout.lines().collect();
    let result_idx = lines
        .iter()
        .rposition(|l| l.starts_with(RESULT_PREFIX))
        .ok_or_else(|| failure("no RESULT line in output".to_string()))?;

    let encoded = lines[result_idx][RESULT_PREFIX.len()..].trim();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| failure(format!("RESULT line is not base64: {}", e)))?;
    let payload: ResultPayload = serde_json::from_slice(&bytes)
        .map_err(|e| failure(format!("RESULT payload is not valid JSON: {}", e)))?;

    let value = match payload {
        ResultPayload::Table { table } => {
            table.validate().map_err(|e| failure(format!("result table is malformed: {}", e)))?;
            ResultValue::Table(table)
        }
        ResultPayload::Scalar { value } => ResultValue::Scalar(value),
        ResultPayload::Nothing => ResultValue::Nothing,
    };

    let printed = lines
        .iter()
        .enumerate()
        .filter(|(i, l)| *i != result_idx && !l.starts_with(RESULT_PREFIX))
        .map(|(_, l)| l.to_string())
        .collect();

    log::debug!(
        "decode: {}",
        match &value {
            ResultValue::Table(t) => format!("table {}x{}", t.nrows(), t.ncols()),
            ResultValue::Scalar(_) => "scalar".to_string(),
            ResultValue::Nothing => "nothing".to_string(),
        }
    );

    Ok(Decoded { value, printed })
}

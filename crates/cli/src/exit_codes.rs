//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract, and scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain     | Description                              |
//! |---------|------------|------------------------------------------|
//! | 0       | Universal  | Success                                  |
//! | 1       | Universal  | General error (unspecified)              |
//! | 2       | Universal  | CLI usage error (bad args, missing file) |
//! | 3-4     | Files      | Reading and writing sheets               |
//! | 10-19   | ai         | AI provider/keychain codes               |
//! | 20-29   | run        | Generated code execution                 |

use sheetchat_agent::error::PipelineError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Files (3-4)
// =============================================================================

/// A sheet could not be read or written.
pub const EXIT_IO: u8 = 3;

/// A sheet was read but its contents could not be understood.
pub const EXIT_PARSE: u8 = 4;

// =============================================================================
// AI (10-19)
// =============================================================================

/// AI disabled (provider=none).
pub const EXIT_AI_DISABLED: u8 = 10;

/// AI provider configured but API key missing.
pub const EXIT_AI_MISSING_KEY: u8 = 11;

/// The model request failed (network, HTTP status, malformed reply).
pub const EXIT_AI_MODEL: u8 = 12;

// =============================================================================
// Run (20-29)
// =============================================================================

/// Generated code raised an error or hit a limit.
pub const EXIT_EXECUTION: u8 = 20;

/// Generated code finished but its result could not be decoded.
pub const EXIT_DECODE: u8 = 21;

/// Map a pipeline failure to its exit code.
pub fn pipeline_exit_code(err: &PipelineError) -> u8 {
    match err {
        PipelineError::ExecutionFailure { .. } => EXIT_EXECUTION,
        PipelineError::DecodeFailure { .. } => EXIT_DECODE,
        PipelineError::CredentialMissing => EXIT_AI_MISSING_KEY,
        PipelineError::SandboxEmpty => EXIT_USAGE,
        PipelineError::ParseFailure => EXIT_ERROR,
    }
}

// sheetchat - ask questions about a spreadsheet, let the model edit it

mod exit_codes;
mod repl;
mod util;

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use sheetchat_agent::client::{AskError, ChatClient, ChatMessage, OpenAiClient};
use sheetchat_agent::document::Document;
use sheetchat_agent::executor::{self, Executor};
use sheetchat_agent::prompt::Mode;
use sheetchat_agent::runtime::{self, RuntimeLimits};
use sheetchat_agent::session::{Session, SessionEvent};
use sheetchat_agent::PipelineError;
use sheetchat_config::ai::{AIConfigStatus, AIDiagnostics, ResolvedAIConfig};
use sheetchat_config::settings::{Language, Settings};

use exit_codes::{
    pipeline_exit_code, EXIT_AI_DISABLED, EXIT_AI_MISSING_KEY, EXIT_AI_MODEL, EXIT_ERROR, EXIT_IO, EXIT_PARSE, EXIT_SUCCESS,
    EXIT_USAGE,
};

#[derive(Parser)]
#[command(name = "sheetchat")]
#[command(about = "Chat with a spreadsheet: questions in, Lua edits out")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a sheet and chat about it
    #[command(after_help = "\
Examples:
  sheetchat chat sales.xlsx
  sheetchat chat inventory.csv --lang fr --mode chart")]
    Chat {
        /// Sheet to open (.csv, .tsv, .xlsx)
        file: PathBuf,

        /// Prompt language (en, fr). Defaults to the settings file.
        #[arg(long)]
        lang: Option<String>,

        /// Start in this mode (chat, chart)
        #[arg(long)]
        mode: Option<String>,
    },

    /// Run a Lua fragment against a sheet without the model
    #[command(after_help = "\
Examples:
  sheetchat run data.csv --code 'return df:head(3)'
  echo 'return df:sort_by(\"qty\")' | sheetchat run data.csv -o sorted.csv")]
    Run {
        file: PathBuf,

        /// Fragment to run. Read from stdin when absent.
        #[arg(long)]
        code: Option<String>,

        /// Write the resulting sheet here
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Print the detected header and the first rows of a sheet
    Show {
        file: PathBuf,

        #[arg(long, default_value_t = 5)]
        rows: usize,

        #[arg(long)]
        json: bool,
    },

    /// AI configuration
    Ai {
        #[command(subcommand)]
        command: AiCommands,
    },

    /// Run one sandbox unit from stdin (used by the child-process backend)
    #[command(hide = true)]
    SandboxExec {
        #[arg(long)]
        timeout_ms: u64,

        #[arg(long)]
        instruction_limit: i64,
    },
}

#[derive(Subcommand)]
enum AiCommands {
    /// Show how the provider, model and key resolve
    Doctor {
        #[arg(long)]
        json: bool,

        /// Send a one-line request to check the endpoint and key
        #[arg(long)]
        test: bool,
    },
}

fn long_version() -> &'static str {
    if cfg!(debug_assertions) {
        concat!(
            env!("CARGO_PKG_VERSION"),
            " (", env!("GIT_COMMIT_HASH"), ")",
            "\nbuild:   debug",
            "\ntarget:  ", env!("TARGET"),
        )
    } else {
        concat!(
            env!("CARGO_PKG_VERSION"),
            " (", env!("GIT_COMMIT_HASH"), ")",
            "\nbuild:   release",
            "\ntarget:  ", env!("TARGET"),
        )
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("SHEETCHAT_LOG", "warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Chat { file, lang, mode } => cmd_chat(file, lang, mode),
        Commands::Run { file, code, output } => cmd_run(file, code, output),
        Commands::Show { file, rows, json } => cmd_show(file, rows, json),
        Commands::Ai { command } => match command {
            AiCommands::Doctor { json, test } => cmd_ai_doctor(json, test),
        },
        Commands::SandboxExec { timeout_ms, instruction_limit } => cmd_sandbox_exec(timeout_ms, instruction_limit),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_IO, message: msg.into(), hint: None }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self { code: EXIT_PARSE, message: msg.into(), hint: None }
    }

    pub fn pipeline(err: &PipelineError) -> Self {
        let hint = match err {
            PipelineError::CredentialMissing => Some("run `sheetchat ai doctor`".to_string()),
            _ => None,
        };
        Self { code: pipeline_exit_code(err), message: err.to_string(), hint }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

// ============================================================================
// Shared setup
// ============================================================================

fn open_document(path: &Path, settings: &Settings) -> Result<Document, CliError> {
    if !path.exists() {
        return Err(CliError::io(format!("{}: no such file", path.display())));
    }
    let grid = sheetchat_io::load(path).map_err(|e| {
        let err = CliError::parse(format!("{}: {}", path.display(), e));
        if e.starts_with("Unsupported") {
            err.with_hint("supported formats: .csv, .tsv, .xlsx")
        } else {
            err
        }
    })?;
    Ok(Document::with_undo_depth(grid, settings.undo_depth))
}

fn build_executor(settings: &Settings) -> Arc<dyn Executor> {
    Arc::from(executor::from_settings(&settings.execution, std::env::current_exe().ok()))
}

// ============================================================================
// chat
// ============================================================================

fn cmd_chat(file: PathBuf, lang: Option<String>, mode: Option<String>) -> Result<(), CliError> {
    let settings = Settings::load();
    let doc = open_document(&file, &settings)?;
    let config = ResolvedAIConfig::from_settings(&settings.ai);

    let mut session = Session::from_settings(repl::client_for(&config), build_executor(&settings), &settings);
    if let Some(lang) = lang {
        let language = Language::parse(&lang).ok_or_else(|| CliError::args(format!("unknown language: {}", lang)))?;
        session.set_language(language);
    }
    if let Some(mode) = mode {
        let mode = Mode::parse(&mode).ok_or_else(|| CliError::args(format!("unknown mode: {}", mode)))?;
        session.set_mode(mode);
    }

    match config.status {
        AIConfigStatus::Disabled => {
            println!("AI is disabled; local commands still work. See `sheetchat ai doctor`.");
        }
        AIConfigStatus::MissingKey => println!("No API key yet; you will be asked for one (or use :key)."),
        AIConfigStatus::Ready => {}
    }

    let mut repl = repl::Repl { doc, session, path: file, config };
    let stdin = io::stdin();
    let mut input = stdin.lock();
    repl.run(&mut input)
}

// ============================================================================
// run
// ============================================================================

fn cmd_run(file: PathBuf, code: Option<String>, output: Option<PathBuf>) -> Result<(), CliError> {
    let settings = Settings::load();
    let mut doc = open_document(&file, &settings)?;

    let code = match code {
        Some(code) => code,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| CliError::io(format!("cannot read stdin: {}", e)))?;
            buf
        }
    };

    let config = ResolvedAIConfig::from_settings(&settings.ai);
    let mut session = Session::from_settings(repl::client_for(&config), build_executor(&settings), &settings);
    session.run_fragment(&doc, &code).map_err(|e| match e {
        sheetchat_agent::session::SessionError::Pipeline(err) => CliError::pipeline(&err),
        other => CliError { code: EXIT_ERROR, message: other.to_string(), hint: None },
    })?;

    let mut failure = None;
    for event in session.wait(&mut doc) {
        match event {
            SessionEvent::Failed(err) => failure = Some(CliError::pipeline(&err)),
            SessionEvent::EditFailed(err) => {
                failure = Some(CliError { code: EXIT_ERROR, message: err.to_string(), hint: None })
            }
            SessionEvent::WorkerLost(name) => {
                failure = Some(CliError { code: EXIT_ERROR, message: format!("worker '{}' stopped", name), hint: None })
            }
            other => repl::print_event(&other),
        }
    }
    if let Some(err) = failure {
        return Err(err);
    }

    if let Some(output) = output {
        sheetchat_io::save(doc.grid(), &output).map_err(|e| CliError::io(format!("{}: {}", output.display(), e)))?;
        eprintln!("wrote {}", output.display());
    }
    Ok(())
}

// ============================================================================
// show
// ============================================================================

fn cmd_show(file: PathBuf, rows: usize, json: bool) -> Result<(), CliError> {
    let settings = Settings::load();
    let doc = open_document(&file, &settings)?;

    if json {
        let table = doc.table();
        let head = table.head(rows);
        let data: Vec<Vec<serde_json::Value>> = head
            .rows()
            .map(|row| row.into_iter().map(|v| serde_json::to_value(v).unwrap_or_default()).collect())
            .collect();
        let dtypes: serde_json::Map<String, serde_json::Value> = table
            .dtypes()
            .into_iter()
            .map(|(name, dtype)| (name, serde_json::Value::from(dtype)))
            .collect();
        let out = serde_json::json!({
            "header_row": doc.header().get(),
            "shape": [table.nrows(), table.ncols()],
            "columns": table.column_names(),
            "dtypes": dtypes,
            "rows": data,
        });
        let text = serde_json::to_string_pretty(&out).map_err(|e| CliError::io(e.to_string()))?;
        println!("{}", text);
        return Ok(());
    }

    println!("header: {}", doc.header());
    repl::print_table(&doc, rows);
    println!();
    for (name, dtype) in doc.table().dtypes() {
        println!("{:<20} {}", name, dtype);
    }
    Ok(())
}

// ============================================================================
// ai doctor
// ============================================================================

fn cmd_ai_doctor(json: bool, test: bool) -> Result<(), CliError> {
    let config = ResolvedAIConfig::load();
    let diag = AIDiagnostics::from_resolved(&config);

    // Only a ready config is worth a request
    let test_result = if test && config.status.is_ready() {
        Some(ping(&config))
    } else {
        None
    };
    let test_text = match &test_result {
        None if test => "skipped (not ready)".to_string(),
        None => "skipped (use --test)".to_string(),
        Some(Ok(tokens)) => format!("ok ({} tokens)", tokens),
        Some(Err(e)) => format!("failed: {}", e),
    };

    if json {
        let out = serde_json::json!({
            "schema_version": 1,
            "status": diag.status.as_str(),
            "blocking_reason": diag.blocking_reason,
            "provider": diag.provider,
            "model": diag.model,
            "endpoint": diag.endpoint,
            "privacy_mode": diag.privacy_mode,
            "key": if diag.key_present { "present" } else { "missing" },
            "key_source": diag.key_source.as_str(),
            "keychain": if diag.keychain_available { "ok" } else { "unavailable" },
            "settings": Settings::config_path_display(),
            "test": test_text,
        });
        let text = serde_json::to_string_pretty(&out).map_err(|e| CliError::io(e.to_string()))?;
        println!("{}", text);
    } else {
        print!("{}", diag);
        println!("Settings:          {}", Settings::config_path_display());
        println!("Test:              {}", test_text);
    }

    match config.status {
        AIConfigStatus::Disabled => Err(CliError { code: EXIT_AI_DISABLED, message: "AI is disabled".to_string(), hint: None }
            .with_hint(format!("set ai.provider in {}", Settings::config_path_display()))),
        AIConfigStatus::MissingKey => Err(CliError {
            code: EXIT_AI_MISSING_KEY,
            message: config.blocking_reason.unwrap_or_else(|| "missing API key".to_string()),
            hint: None,
        }),
        AIConfigStatus::Ready => match test_result {
            Some(Err(e)) => Err(CliError { code: EXIT_AI_MODEL, message: e.to_string(), hint: None }),
            _ => Ok(()),
        },
    }
}

fn ping(config: &ResolvedAIConfig) -> Result<u64, AskError> {
    let client = OpenAiClient::from_config(config)?;
    let completion = client.complete(&[ChatMessage::user("Reply with the single word: ok")])?;
    Ok(completion.tokens)
}

// ============================================================================
// sandbox-exec
// ============================================================================

fn cmd_sandbox_exec(timeout_ms: u64, instruction_limit: i64) -> Result<(), CliError> {
    let mut source = String::new();
    io::stdin()
        .read_to_string(&mut source)
        .map_err(|e| CliError::io(format!("cannot read unit: {}", e)))?;

    let limits = RuntimeLimits {
        instruction_limit,
        timeout: Duration::from_millis(timeout_ms),
        ..RuntimeLimits::default()
    };
    let out = runtime::run_unit(&source, limits);

    // Failures travel in stderr; the exit status stays 0 so the parent decodes both streams.
    let mut stdout = io::stdout().lock();
    let _ = stdout.write_all(out.stdout.as_bytes());
    let _ = stdout.flush();
    let mut stderr = io::stderr().lock();
    let _ = stderr.write_all(out.stderr.as_bytes());
    let _ = stderr.flush();
    Ok(())
}

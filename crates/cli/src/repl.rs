// Interactive chat over one sheet
//
// Plain lines go to the model. Lines starting with ':' are local commands.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sheetchat_agent::chart::{self, TranscriptSink};
use sheetchat_agent::client::{ChatClient, OpenAiClient};
use sheetchat_agent::document::Document;
use sheetchat_agent::error::PipelineError;
use sheetchat_agent::prompt::Mode;
use sheetchat_agent::session::{Session, SessionError, SessionEvent};
use sheetchat_config::ai::{self, AIConfigStatus, ResolvedAIConfig};
use sheetchat_engine::cell::Color;

use crate::util::{letter_to_col, parse_cell_ref, parse_color, parse_row_number, truncate_display};
use crate::CliError;

/// Printed lines wider than this are cut.
const PRINT_WIDTH: usize = 160;

const HELP: &str = "\
Type a question to ask about the sheet. Commands:
  :undo                      revert the last cell edit
  :save [path]               write the sheet (default: the file it came from)
  :reset                     clear the chat history and token count
  :new                       start an empty sheet (Column1..Column5)
  :show [n]                  print the first n rows (default 10)
  :set <A1> <text>           type into a cell (empty text clears it)
  :insert-row <n>            insert a row above row n
  :insert-col <L>            insert a column left of column L
  :delete-row <n>            delete row n
  :delete-col <L>            delete column L
  :font-color <A1> <color>   set the font color (name or #rrggbb)
  :bg-color <A1> <color>     set the background color
  :font <A1> <family> [size] set the font
  :mode chat|chart           run code, or describe a chart
  :key                       enter an API key
  :help                      this text
  :quit                      leave";

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ReplCommand {
    Ask(String),
    Undo,
    Save(Option<PathBuf>),
    Reset,
    New,
    Show(usize),
    Set { row: usize, col: usize, text: String },
    InsertRow(usize),
    InsertCol(usize),
    DeleteRow(usize),
    DeleteCol(usize),
    FontColor { row: usize, col: usize, color: Color },
    Background { row: usize, col: usize, color: Color },
    Font { row: usize, col: usize, family: String, size: Option<f32> },
    Mode(Mode),
    Key,
    Help,
    Quit,
    Nothing,
}

fn cell_arg(arg: Option<&str>) -> Result<(usize, usize), String> {
    let arg = arg.ok_or("expected a cell like B3")?;
    parse_cell_ref(arg).ok_or_else(|| format!("not a cell: {}", arg))
}

fn color_arg(arg: Option<&str>) -> Result<Color, String> {
    let arg = arg.ok_or("expected a color")?;
    parse_color(arg).ok_or_else(|| format!("not a color: {}", arg))
}

fn row_arg(arg: Option<&str>) -> Result<usize, String> {
    let arg = arg.ok_or("expected a row number")?;
    parse_row_number(arg).ok_or_else(|| format!("not a row number: {}", arg))
}

fn col_arg(arg: Option<&str>) -> Result<usize, String> {
    let arg = arg.ok_or("expected a column letter")?;
    letter_to_col(arg).ok_or_else(|| format!("not a column: {}", arg))
}

pub(crate) fn parse_command(line: &str) -> Result<ReplCommand, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ReplCommand::Nothing);
    }
    let Some(command) = line.strip_prefix(':') else {
        return Ok(ReplCommand::Ask(line.to_string()));
    };

    let (name, rest) = command.split_once(char::is_whitespace).unwrap_or((command, ""));
    let rest = rest.trim();
    let mut args = rest.split_whitespace();

    Ok(match name {
        "undo" => ReplCommand::Undo,
        "save" => ReplCommand::Save((!rest.is_empty()).then(|| PathBuf::from(rest))),
        "reset" => ReplCommand::Reset,
        "new" => ReplCommand::New,
        "show" => ReplCommand::Show(match args.next() {
            Some(n) => n.parse().map_err(|_| format!("not a row count: {}", n))?,
            None => 10,
        }),
        "set" => {
            let (row, col) = cell_arg(args.next())?;
            let text = rest.split_once(char::is_whitespace).map(|(_, t)| t.trim()).unwrap_or("");
            ReplCommand::Set { row, col, text: text.to_string() }
        }
        "insert-row" => ReplCommand::InsertRow(row_arg(args.next())?),
        "insert-col" => ReplCommand::InsertCol(col_arg(args.next())?),
        "delete-row" => ReplCommand::DeleteRow(row_arg(args.next())?),
        "delete-col" => ReplCommand::DeleteCol(col_arg(args.next())?),
        "font-color" => {
            let (row, col) = cell_arg(args.next())?;
            ReplCommand::FontColor { row, col, color: color_arg(args.next())? }
        }
        "bg-color" => {
            let (row, col) = cell_arg(args.next())?;
            ReplCommand::Background { row, col, color: color_arg(args.next())? }
        }
        "font" => {
            let (row, col) = cell_arg(args.next())?;
            let family = args.next().ok_or("expected a font family")?.to_string();
            let size = match args.next() {
                Some(s) => Some(s.parse().map_err(|_| format!("not a font size: {}", s))?),
                None => None,
            };
            ReplCommand::Font { row, col, family, size }
        }
        "mode" => {
            let arg = args.next().ok_or("expected chat or chart")?;
            ReplCommand::Mode(Mode::parse(arg).ok_or_else(|| format!("unknown mode: {}", arg))?)
        }
        "key" => ReplCommand::Key,
        "help" | "h" | "?" => ReplCommand::Help,
        "quit" | "q" | "exit" => ReplCommand::Quit,
        other => return Err(format!("unknown command :{} (try :help)", other)),
    })
}

/// Everything the loop owns.
pub(crate) struct Repl {
    pub doc: Document,
    pub session: Session,
    pub path: PathBuf,
    pub config: ResolvedAIConfig,
}

impl Repl {
    fn save(&self, path: &Path) -> Result<(), String> {
        sheetchat_io::save(self.doc.grid(), path)?;
        println!("saved {}", path.display());
        Ok(())
    }

    fn ask(&mut self, question: &str, input: &mut dyn BufRead) -> Result<(), String> {
        match self.session.submit(&self.doc, question) {
            Ok(()) => {}
            Err(SessionError::Pipeline(PipelineError::CredentialMissing)) => {
                if self.config.status == AIConfigStatus::Disabled {
                    return Err("AI is disabled (set \"ai.provider\" in settings.json)".to_string());
                }
                println!("No API key configured.");
                if !self.read_key(input)? {
                    return Ok(());
                }
                self.session.submit(&self.doc, question).map_err(|e| e.to_string())?;
            }
            Err(e) => return Err(e.to_string()),
        }
        for event in self.session.wait(&mut self.doc) {
            print_event(&event);
        }
        Ok(())
    }

    /// Prompt for a key, keep it for this run and try to store it.
    fn read_key(&mut self, input: &mut dyn BufRead) -> Result<bool, String> {
        if !self.config.provider.is_enabled() {
            return Err("AI is disabled (set \"ai.provider\" in settings.json)".to_string());
        }
        print!("API key for {}: ", self.config.provider_name());
        let _ = io::stdout().flush();
        let mut key = String::new();
        input.read_line(&mut key).map_err(|e| e.to_string())?;
        let key = key.trim().to_string();
        if key.is_empty() {
            return Ok(false);
        }

        if let Err(e) = ai::set_api_key(self.config.provider_name(), &key) {
            log::warn!("could not store key in keychain: {}", e);
            println!("(key kept for this session only)");
        }
        self.config = self.config.clone().with_session_key(key);
        let client = OpenAiClient::from_config(&self.config).map_err(|e| e.to_string())?;
        self.session.set_client(Arc::new(client));
        Ok(true)
    }

    /// Run one command. Ok(false) means leave.
    fn handle(&mut self, command: ReplCommand, input: &mut dyn BufRead) -> Result<bool, String> {
        let edit = |r: Result<(), sheetchat_agent::document::EditError>| r.map_err(|e| e.to_string());
        match command {
            ReplCommand::Nothing => {}
            ReplCommand::Quit => return Ok(false),
            ReplCommand::Help => println!("{}", HELP),
            ReplCommand::Ask(question) => self.ask(&question, input)?,
            ReplCommand::Undo => {
                if !self.doc.undo().map_err(|e| e.to_string())? {
                    println!("nothing to undo");
                }
            }
            ReplCommand::Save(path) => {
                let path = path.unwrap_or_else(|| self.path.clone());
                self.save(&path)?;
            }
            ReplCommand::Reset => {
                self.session.reset_chat();
                println!("chat cleared");
            }
            ReplCommand::New => edit(self.doc.new_sheet())?,
            ReplCommand::Show(n) => print_table(&self.doc, n),
            ReplCommand::Set { row, col, text } => edit(self.doc.set_cell(row, col, &text))?,
            ReplCommand::InsertRow(row) => edit(self.doc.insert_row(row))?,
            ReplCommand::InsertCol(col) => edit(self.doc.insert_column(col))?,
            ReplCommand::DeleteRow(row) => edit(self.doc.delete_row(row))?,
            ReplCommand::DeleteCol(col) => edit(self.doc.delete_column(col))?,
            ReplCommand::FontColor { row, col, color } => edit(self.doc.set_font_color(row, col, color))?,
            ReplCommand::Background { row, col, color } => edit(self.doc.set_background(row, col, color))?,
            ReplCommand::Font { row, col, family, size } => edit(self.doc.set_font(row, col, &family, size))?,
            ReplCommand::Mode(mode) => {
                self.session.set_mode(mode);
                println!("mode: {}", mode.name());
            }
            ReplCommand::Key => {
                self.read_key(input)?;
            }
        }
        Ok(true)
    }

    pub(crate) fn run(&mut self, input: &mut dyn BufRead) -> Result<(), CliError> {
        println!(
            "{}: header {}, {} rows x {} cols. :help for commands.",
            self.path.display(),
            self.doc.header(),
            self.doc.table().nrows(),
            self.doc.table().ncols()
        );
        loop {
            print!("{}> ", self.session.mode().name());
            let _ = io::stdout().flush();

            let mut line = String::new();
            let read = input
                .read_line(&mut line)
                .map_err(|e| CliError::io(format!("cannot read input: {}", e)))?;
            if read == 0 {
                println!();
                return Ok(());
            }

            let outcome = parse_command(&line).and_then(|command| self.handle(command, input));
            match outcome {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(message) => println!("error: {}", message),
            }
        }
    }
}

pub(crate) fn print_table(doc: &Document, rows: usize) {
    println!("{}", doc.table().head(rows));
    let (nrows, ncols) = doc.table().shape();
    if nrows > rows {
        println!("... {} more rows", nrows - rows);
    }
    println!("[{} rows x {} columns]", nrows, ncols);
}

pub(crate) fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Tokens { total, cost_usd } => {
            log::info!("tokens: {} (${:.4})", total, cost_usd);
        }
        SessionEvent::Reply { explanation, logic_hint, .. } => {
            if !explanation.is_empty() {
                println!("{}", explanation);
            }
            if let Some(hint) = logic_hint {
                println!("  logic: {}", hint);
            }
        }
        SessionEvent::EmptyReply => println!("(no answer)"),
        SessionEvent::NoCode => println!("(nothing to run)"),
        SessionEvent::Printed(lines) => {
            for line in lines {
                println!("  | {}", truncate_display(line, PRINT_WIDTH));
            }
        }
        SessionEvent::Applied { rows, cols } => println!("sheet updated: {} rows x {} columns", rows, cols),
        SessionEvent::Answer(value) => println!("Result: {}", value),
        SessionEvent::Unchanged => println!("(sheet unchanged)"),
        SessionEvent::Chart(calls) => {
            let mut sink = TranscriptSink::default();
            chart::draw(calls, &mut sink);
            for line in &sink.lines {
                println!("{}", line);
            }
        }
        SessionEvent::ChartFailed(e) => println!("chart error: {}", e),
        SessionEvent::Retrying { attempt, max, stderr } => {
            let first = stderr.lines().next().unwrap_or_default();
            println!("code failed ({}), asking for a fix [{}/{}]", first, attempt, max);
        }
        SessionEvent::GaveUp { attempts, error } => {
            println!("giving up after {} retries:\n{}", attempts, error);
        }
        SessionEvent::Failed(error) => println!("{}", error),
        SessionEvent::EditFailed(e) => println!("could not apply result: {}", e),
        SessionEvent::ModelError(e) => println!("model error: {}", e),
        SessionEvent::WorkerLost(name) => println!("worker '{}' stopped unexpectedly", name),
    }
}

/// The client for the configured provider, or one without a key when AI is off.
pub(crate) fn client_for(config: &ResolvedAIConfig) -> Arc<dyn ChatClient> {
    match OpenAiClient::from_config(config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            log::debug!("{}", e);
            Arc::new(OpenAiClient::new(String::new(), String::new(), None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_question() {
        assert_eq!(parse_command("  sort by qty "), Ok(ReplCommand::Ask("sort by qty".into())));
        assert_eq!(parse_command("   "), Ok(ReplCommand::Nothing));
    }

    #[test]
    fn set_keeps_spaces_in_text() {
        assert_eq!(
            parse_command(":set B3 hello world"),
            Ok(ReplCommand::Set { row: 2, col: 1, text: "hello world".into() })
        );
        assert_eq!(
            parse_command(":set A2"),
            Ok(ReplCommand::Set { row: 1, col: 0, text: String::new() })
        );
    }

    #[test]
    fn structural_commands() {
        assert_eq!(parse_command(":insert-row 4"), Ok(ReplCommand::InsertRow(3)));
        assert_eq!(parse_command(":delete-col C"), Ok(ReplCommand::DeleteCol(2)));
        assert_eq!(parse_command(":insert-col aa"), Ok(ReplCommand::InsertCol(26)));
        assert!(parse_command(":delete-row zero").is_err());
    }

    #[test]
    fn style_commands() {
        assert_eq!(
            parse_command(":bg-color A1 #ffff00"),
            Ok(ReplCommand::Background { row: 0, col: 0, color: Color::rgb(255, 255, 0) })
        );
        assert_eq!(
            parse_command(":font B2 Arial 12"),
            Ok(ReplCommand::Font { row: 1, col: 1, family: "Arial".into(), size: Some(12.0) })
        );
        assert!(parse_command(":font-color B2 sparkly").is_err());
    }

    #[test]
    fn misc_commands() {
        assert_eq!(parse_command(":save"), Ok(ReplCommand::Save(None)));
        assert_eq!(parse_command(":save out.xlsx"), Ok(ReplCommand::Save(Some("out.xlsx".into()))));
        assert_eq!(parse_command(":show 3"), Ok(ReplCommand::Show(3)));
        assert_eq!(parse_command(":show"), Ok(ReplCommand::Show(10)));
        assert_eq!(parse_command(":mode chart"), Ok(ReplCommand::Mode(Mode::Chart)));
        assert_eq!(parse_command(":q"), Ok(ReplCommand::Quit));
        assert!(parse_command(":frobnicate").is_err());
    }
}

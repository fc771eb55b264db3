//! The request loop: question → model → sandbox → sheet, with automatic
//! correction rounds when generated code fails.
//!
//! A `Session` lives on the event thread next to the [`Document`]. Model
//! calls and executions run on worker threads; [`Session::poll`] and
//! [`Session::wait`] pick up their results and turn them into
//! [`SessionEvent`]s. Only one request is in flight at a time.

use std::sync::Arc;

use sheetchat_config::settings::{Language, Settings};
use thiserror::Error;

use crate::chart::{self, ChartCall, ChartError};
use crate::client::{AskError, ChatClient, Completion, Conversation};
use crate::decoder;
use crate::document::{Document, EditError, Outcome};
use crate::error::PipelineError;
use crate::executor::{ExecOutput, Executor};
use crate::prompt::{self, Mode};
use crate::response::parse_response;
use crate::retry::{RetryController, RetryDecision};
use crate::sandbox::SandboxBuilder;
use crate::worker::{self, WorkerHandle, WorkerPoll};

/// Thread name of the model worker.
pub const CHAT_THREAD: &str = "chat-request";

/// USD per thousand tokens shown in the usage line.
pub const COST_PER_1K_TOKENS: f64 = 0.002;

pub fn cost_usd(tokens: u64) -> f64 {
    tokens as f64 / 1000.0 * COST_PER_1K_TOKENS
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("a request is already in progress")]
    Busy,

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Running token total after a model reply
    Tokens { total: u64, cost_usd: f64 },
    /// The model answered; `has_code` says whether anything will run
    Reply {
        explanation: String,
        logic_hint: Option<String>,
        has_code: bool,
    },
    /// The model sent back nothing
    EmptyReply,
    /// Code was present but nothing runnable survived normalization
    NoCode,
    /// Lines the code printed, other than the result
    Printed(Vec<String>),
    Applied { rows: usize, cols: usize },
    /// A single value to show the user
    Answer(String),
    Unchanged,
    Chart(Vec<ChartCall>),
    ChartFailed(ChartError),
    /// The failure went back to the model
    Retrying { attempt: u32, max: u32, stderr: String },
    GaveUp { attempts: u32, error: PipelineError },
    /// A failure that is reported but not retried
    Failed(PipelineError),
    EditFailed(EditError),
    ModelError(AskError),
    /// A worker thread died without answering
    WorkerLost(String),
}

enum Pending {
    Reply(WorkerHandle<Result<Completion, AskError>>),
    Run {
        handle: WorkerHandle<ExecOutput>,
        /// Failures of direct runs have no model to go back to
        retryable: bool,
    },
}

pub struct Session {
    client: Arc<dyn ChatClient>,
    executor: Arc<dyn Executor>,
    conversation: Conversation,
    retry: RetryController,
    mode: Mode,
    language: Language,
    tokens: u64,
    pending: Option<Pending>,
}

/// `Ok(None)` when the worker died, `Err(handle)` while it is still busy.
fn collect<T>(handle: WorkerHandle<T>, block: bool) -> Result<Option<T>, WorkerHandle<T>> {
    if block {
        return Ok(handle.wait());
    }
    match handle.poll() {
        WorkerPoll::Pending => Err(handle),
        WorkerPoll::Ready(value) => Ok(Some(value)),
        WorkerPoll::Lost => Ok(None),
    }
}

impl Session {
    pub fn new(client: Arc<dyn ChatClient>, executor: Arc<dyn Executor>) -> Self {
        Self {
            client,
            executor,
            conversation: Conversation::new(),
            retry: RetryController::default(),
            mode: Mode::Chat,
            language: Language::En,
            tokens: 0,
            pending: None,
        }
    }

    pub fn from_settings(client: Arc<dyn ChatClient>, executor: Arc<dyn Executor>, settings: &Settings) -> Self {
        let mut session = Self::new(client, executor);
        session.language = settings.language;
        session.retry = RetryController::new(settings.execution.max_retries, settings.language);
        session
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry = RetryController::new(max_retries, self.language);
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn set_language(&mut self, language: Language) {
        self.language = language;
        self.retry.set_language(language);
    }

    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn retry(&self) -> &RetryController {
        &self.retry
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Swap the model client, e.g. after the user supplies a key.
    pub fn set_client(&mut self, client: Arc<dyn ChatClient>) {
        self.client = client;
    }

    /// Forget the conversation and the token count.
    pub fn reset_chat(&mut self) {
        self.conversation.clear();
        self.tokens = 0;
        log::info!("chat history cleared");
    }

    /// Ask the model about the sheet.
    pub fn submit(&mut self, doc: &Document, question: &str) -> Result<(), SessionError> {
        if self.pending.is_some() {
            return Err(SessionError::Busy);
        }
        if !self.client.has_credential() {
            return Err(PipelineError::CredentialMissing.into());
        }
        self.conversation
            .set_system(prompt::system_prompt(self.mode, self.language, doc.table()));
        self.conversation.push_user(question);
        self.retry.begin_request();
        self.dispatch_model();
        Ok(())
    }

    /// Run a code fragment against the sheet without asking the model.
    pub fn run_fragment(&mut self, doc: &Document, fragment: &str) -> Result<(), SessionError> {
        if self.pending.is_some() {
            return Err(SessionError::Busy);
        }
        let unit = SandboxBuilder::build(fragment, doc.table()).ok_or(PipelineError::SandboxEmpty)?;
        self.pending = Some(Pending::Run {
            handle: worker::spawn_execution(self.executor.clone(), unit),
            retryable: false,
        });
        Ok(())
    }

    /// Pick up whatever finished since the last call. Never blocks.
    pub fn poll(&mut self, doc: &mut Document) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        self.step(doc, false, &mut events);
        events
    }

    /// Block until the current request, retries included, is done.
    pub fn wait(&mut self, doc: &mut Document) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while self.pending.is_some() {
            self.step(doc, true, &mut events);
        }
        events
    }

    fn dispatch_model(&mut self) {
        let client = self.client.clone();
        let messages = self.conversation.messages().to_vec();
        log::debug!("dispatching {} messages", messages.len());
        let handle = worker::spawn_worker(
            CHAT_THREAD,
            move || client.complete(&messages),
            |e| Err(AskError::NetworkError(format!("failed to start request worker: {}", e))),
        );
        self.pending = Some(Pending::Reply(handle));
    }

    fn step(&mut self, doc: &mut Document, block: bool, events: &mut Vec<SessionEvent>) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        match pending {
            Pending::Reply(handle) => match collect(handle, block) {
                Err(handle) => self.pending = Some(Pending::Reply(handle)),
                Ok(Some(Ok(completion))) => self.on_reply(doc, completion, events),
                Ok(Some(Err(e))) => {
                    log::warn!("model request failed: {}", e);
                    self.retry.on_no_code();
                    events.push(SessionEvent::ModelError(e));
                }
                Ok(None) => events.push(SessionEvent::WorkerLost(CHAT_THREAD.to_string())),
            },
            Pending::Run { handle, retryable } => match collect(handle, block) {
                Err(handle) => self.pending = Some(Pending::Run { handle, retryable }),
                Ok(Some(output)) => self.on_output(doc, output, retryable, events),
                Ok(None) => events.push(SessionEvent::WorkerLost(worker::EXEC_THREAD.to_string())),
            },
        }
    }

    fn on_reply(&mut self, doc: &mut Document, completion: Completion, events: &mut Vec<SessionEvent>) {
        self.tokens += completion.tokens;
        log::info!("tokens used: {} this reply, {} total", completion.tokens, self.tokens);
        events.push(SessionEvent::Tokens {
            total: self.tokens,
            cost_usd: cost_usd(self.tokens),
        });

        if completion.text.trim().is_empty() {
            self.retry.on_no_code();
            events.push(SessionEvent::EmptyReply);
            return;
        }
        self.conversation.push_assistant(completion.text.as_str());

        let parsed = parse_response(&completion.text);
        // No marker and no signature, but the reply still reads as code:
        // hand the whole text over and let the sandbox drop the prose.
        let code = if parsed.code.is_empty() && parsed.is_code {
            completion.text.as_str()
        } else {
            parsed.code.as_str()
        };
        events.push(SessionEvent::Reply {
            explanation: parsed.explanation.clone(),
            logic_hint: parsed.logic_hint.clone(),
            has_code: !code.is_empty(),
        });
        if code.is_empty() {
            self.retry.on_no_code();
            return;
        }

        match self.mode {
            Mode::Chart => {
                self.retry.on_success();
                match chart::extract_calls(code, doc.table()) {
                    Ok(calls) => events.push(SessionEvent::Chart(calls)),
                    Err(e) => events.push(SessionEvent::ChartFailed(e)),
                }
            }
            Mode::Chat => match SandboxBuilder::build(code, doc.table()) {
                Some(unit) => {
                    self.pending = Some(Pending::Run {
                        handle: worker::spawn_execution(self.executor.clone(), unit),
                        retryable: true,
                    });
                }
                None => {
                    log::debug!("{}", PipelineError::SandboxEmpty);
                    self.retry.on_no_code();
                    events.push(SessionEvent::NoCode);
                }
            },
        }
    }

    fn on_output(&mut self, doc: &mut Document, output: ExecOutput, retryable: bool, events: &mut Vec<SessionEvent>) {
        let error = match decoder::decode(&output) {
            Ok(decoded) => {
                if !decoded.printed.is_empty() {
                    events.push(SessionEvent::Printed(decoded.printed));
                }
                events.push(match doc.apply_result(decoded.value) {
                    Ok(Outcome::Replaced { rows, cols }) => SessionEvent::Applied { rows, cols },
                    Ok(Outcome::Answer(text)) => SessionEvent::Answer(text),
                    Ok(Outcome::Unchanged) => SessionEvent::Unchanged,
                    Err(e) => SessionEvent::EditFailed(e),
                });
                if retryable {
                    self.retry.on_success();
                }
                return;
            }
            Err(error) => error,
        };

        if !retryable {
            events.push(SessionEvent::Failed(error));
            return;
        }
        match self.retry.on_failure(&error) {
            RetryDecision::Retry { message, attempt } => {
                let stderr = match &error {
                    PipelineError::ExecutionFailure { stderr } => stderr.clone(),
                    other => other.to_string(),
                };
                events.push(SessionEvent::Retrying {
                    attempt,
                    max: self.retry.max_retries(),
                    stderr,
                });
                self.conversation.push_user(message);
                self.dispatch_model();
                self.retry.retry_dispatched();
            }
            RetryDecision::GiveUp { attempts } => events.push(SessionEvent::GaveUp { attempts, error }),
            RetryDecision::NotRetryable => events.push(SessionEvent::Failed(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatMessage;
    use crate::executor::InProcessExecutor;
    use crate::retry::RetryState;
    use sheetchat_engine::grid::Grid;
    use sheetchat_engine::table::Value;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<VecDeque<Result<Completion, AskError>>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
        credential: bool,
    }

    impl Scripted {
        fn new(replies: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|text| Ok(Completion { text: text.to_string(), tokens: 10 }))
                        .collect(),
                ),
                seen: Mutex::new(Vec::new()),
                credential: true,
            })
        }
    }

    impl ChatClient for Scripted {
        fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, AskError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Completion::default()))
        }

        fn has_credential(&self) -> bool {
            self.credential
        }
    }

    fn doc() -> Document {
        let mut grid = Grid::new("s");
        grid.set_input(0, 0, "item");
        grid.set_input(0, 1, "qty");
        for (r, (item, qty)) in [("bolt", "10"), ("nut", "30"), ("gear", "20")].iter().enumerate() {
            grid.set_input(r + 1, 0, item);
            grid.set_input(r + 1, 1, qty);
        }
        Document::new(grid)
    }

    fn session(client: Arc<Scripted>) -> Session {
        Session::new(client, Arc::new(InProcessExecutor::default()))
    }

    const FAILING: &str = "Let me try.\n[CODE]\nfunction process_data(df)\n  error(\"boom\")\nend\n[/CODE]";
    const SORTING: &str =
        "Sorting by quantity.\n[CODE]\nfunction process_data(df)\n  return df:sort_by(\"qty\", true)\nend\n[/CODE]";

    #[test]
    fn test_reply_applied_to_sheet() {
        let client = Scripted::new(vec![SORTING]);
        let mut s = session(client.clone());
        let mut d = doc();

        s.submit(&d, "sort by qty, largest first").unwrap();
        let events = s.wait(&mut d);

        assert!(matches!(events[0], SessionEvent::Tokens { total: 10, .. }));
        assert!(matches!(&events[1], SessionEvent::Reply { explanation, logic_hint: Some(_), has_code: true }
            if explanation == "Sorting by quantity."));
        assert_eq!(events[2], SessionEvent::Applied { rows: 3, cols: 2 });
        assert_eq!(d.cell_text(1, 0), "nut");
        assert_eq!(d.table().get(2, 1), Some(&Value::Int(10)));
        assert_eq!(s.retry().state(), RetryState::Success);

        let seen = client.seen.lock().unwrap();
        assert!(seen[0][0].content.contains("df.shape:"));
        assert_eq!(seen[0][1], ChatMessage::user("sort by qty, largest first"));
    }

    #[test]
    fn test_failure_goes_back_to_model() {
        let client = Scripted::new(vec![FAILING, SORTING]);
        let mut s = session(client.clone());
        let mut d = doc();

        s.submit(&d, "sort").unwrap();
        let events = s.wait(&mut d);

        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Retrying { attempt: 1, max: 2, stderr } if stderr.contains("boom"))));
        assert_eq!(events.last(), Some(&SessionEvent::Applied { rows: 3, cols: 2 }));
        assert_eq!(s.tokens(), 20);

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let follow_up = seen[1].last().unwrap();
        assert!(follow_up.content.contains("boom"));
        assert!(follow_up.content.contains("process_data(df)"));
    }

    #[test]
    fn test_gives_up_after_two_retries() {
        let client = Scripted::new(vec![FAILING, FAILING, FAILING]);
        let mut s = session(client.clone());
        let mut d = doc();
        let before = d.table().clone();

        s.submit(&d, "sort").unwrap();
        let events = s.wait(&mut d);

        let retries = events.iter().filter(|e| matches!(e, SessionEvent::Retrying { .. })).count();
        assert_eq!(retries, 2);
        assert!(matches!(
            events.last(),
            Some(SessionEvent::GaveUp { attempts: 2, error: PipelineError::ExecutionFailure { .. } })
        ));
        assert_eq!(client.seen.lock().unwrap().len(), 3);
        assert_eq!(d.table(), &before);
        assert_eq!(s.retry().state(), RetryState::GivenUp);
    }

    #[test]
    fn test_scalar_result_is_an_answer() {
        let client = Scripted::new(vec!["[CODE]\nfunction process_data(df)\n  return df:sum(\"qty\")\nend\n[/CODE]"]);
        let mut s = session(client);
        let mut d = doc();

        s.submit(&d, "total?").unwrap();
        let events = s.wait(&mut d);
        assert_eq!(events.last(), Some(&SessionEvent::Answer("60".into())));
    }

    #[test]
    fn test_text_only_reply() {
        let client = Scripted::new(vec!["I don't know."]);
        let mut s = session(client);
        let mut d = doc();

        s.submit(&d, "what is the weather?").unwrap();
        let events = s.wait(&mut d);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], SessionEvent::Reply { has_code: false, .. }));
        assert_eq!(s.retry().state(), RetryState::Idle);
    }

    #[test]
    fn test_markerless_assignment_still_runs() {
        let client = Scripted::new(vec!["Adding a total column.\ndf[\"total\"] = 5"]);
        let mut s = session(client);
        let mut d = doc();

        s.submit(&d, "add a total column").unwrap();
        let events = s.wait(&mut d);

        assert!(matches!(&events[1], SessionEvent::Reply { has_code: true, .. }));
        assert_eq!(events.last(), Some(&SessionEvent::Applied { rows: 3, cols: 3 }));
        assert_eq!(d.table().column_index("total"), Some(2));
        assert_eq!(d.table().get(0, 2), Some(&Value::Int(5)));
        assert_eq!(s.retry().state(), RetryState::Success);
    }

    #[test]
    fn test_empty_reply_is_noop() {
        let client = Scripted::new(vec![""]);
        let mut s = session(client);
        let mut d = doc();
        s.submit(&d, "hello").unwrap();
        assert_eq!(s.wait(&mut d).last(), Some(&SessionEvent::EmptyReply));
        assert_eq!(s.conversation().len(), 2);
    }

    #[test]
    fn test_busy_while_in_flight() {
        let client = Scripted::new(vec![SORTING]);
        let mut s = session(client);
        let mut d = doc();
        s.submit(&d, "sort").unwrap();
        assert_eq!(s.submit(&d, "again"), Err(SessionError::Busy));
        assert_eq!(s.run_fragment(&d, "return df"), Err(SessionError::Busy));
        s.wait(&mut d);
        assert!(!s.is_busy());
    }

    #[test]
    fn test_missing_credential() {
        let client = Arc::new(Scripted {
            replies: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
            credential: false,
        });
        let mut s = session(client);
        assert_eq!(
            s.submit(&doc(), "sort"),
            Err(SessionError::Pipeline(PipelineError::CredentialMissing))
        );
        assert!(!s.is_busy());
    }

    #[test]
    fn test_model_error_surfaces() {
        let client = Arc::new(Scripted {
            replies: Mutex::new(VecDeque::from(vec![Err(AskError::NetworkError("down".into()))])),
            seen: Mutex::new(Vec::new()),
            credential: true,
        });
        let mut s = session(client);
        let mut d = doc();
        s.submit(&d, "sort").unwrap();
        assert_eq!(
            s.wait(&mut d),
            vec![SessionEvent::ModelError(AskError::NetworkError("down".into()))]
        );
    }

    #[test]
    fn test_chart_mode_does_not_run_code() {
        let client = Scripted::new(vec!["A bar chart.\n[CODE]\nax:bar(df[\"item\"], df[\"qty\"])\nax:set_title(\"Stock\")\n[/CODE]"]);
        let mut s = session(client.clone());
        s.set_mode(Mode::Chart);
        let mut d = doc();
        let before = d.table().clone();

        s.submit(&d, "chart the stock").unwrap();
        let events = s.wait(&mut d);
        match events.last() {
            Some(SessionEvent::Chart(calls)) => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].name, "bar");
            }
            other => panic!("expected chart, got {:?}", other),
        }
        assert_eq!(d.table(), &before);
        assert!(client.seen.lock().unwrap()[0][0].content.contains("ax:"));
    }

    #[test]
    fn test_run_fragment_without_model() {
        let client = Scripted::new(vec![]);
        let mut s = session(client.clone());
        let mut d = doc();

        s.run_fragment(&d, "return df:head(1)").unwrap();
        assert_eq!(s.wait(&mut d), vec![SessionEvent::Applied { rows: 1, cols: 2 }]);
        assert_eq!(d.grid().used_rows(), 2);

        s.run_fragment(&d, "error('nope')").unwrap();
        assert!(matches!(
            s.wait(&mut d).as_slice(),
            [SessionEvent::Failed(PipelineError::ExecutionFailure { .. })]
        ));
        assert!(client.seen.lock().unwrap().is_empty());
        assert_eq!(s.run_fragment(&d, "  \n"), Err(SessionError::Pipeline(PipelineError::SandboxEmpty)));
    }

    #[test]
    fn test_printed_lines_are_reported() {
        let client = Scripted::new(vec![]);
        let mut s = session(client);
        let mut d = doc();
        s.run_fragment(&d, "print(df:nrows())\nreturn nil").unwrap();
        let events = s.wait(&mut d);
        assert_eq!(events, vec![SessionEvent::Printed(vec!["3".into()]), SessionEvent::Unchanged]);
    }

    #[test]
    fn test_reset_chat() {
        let client = Scripted::new(vec![SORTING]);
        let mut s = session(client);
        let mut d = doc();
        s.submit(&d, "sort").unwrap();
        s.wait(&mut d);
        assert!(s.tokens() > 0);
        s.reset_chat();
        assert_eq!(s.tokens(), 0);
        assert!(s.conversation().is_empty());
    }

    #[test]
    fn test_cost() {
        assert!((cost_usd(1500) - 0.003).abs() < 1e-12);
    }
}

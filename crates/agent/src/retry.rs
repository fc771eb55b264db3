//! Bounded automatic correction after failed runs.

use sheetchat_config::settings::Language;

use crate::error::PipelineError;

pub const DEFAULT_MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    AwaitingResponse,
    AwaitingRetry,
    Success,
    GivenUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Send this message back to the model
    Retry { message: String, attempt: u32 },
    /// The bound was reached on this failure
    GiveUp { attempts: u32 },
    /// Failure kinds the model is not asked to fix
    NotRetryable,
}

#[derive(Debug, Clone)]
pub struct RetryController {
    state: RetryState,
    retry_count: u32,
    max_retries: u32,
    language: Language,
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, Language::En)
    }
}

impl RetryController {
    pub fn new(max_retries: u32, language: Language) -> Self {
        Self {
            state: RetryState::Idle,
            retry_count: 0,
            max_retries,
            language,
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn set_language(&mut self, language: Language) {
        self.language = language;
    }

    /// A new top-level request from the user.
    pub fn begin_request(&mut self) {
        self.retry_count = 0;
        self.state = RetryState::AwaitingResponse;
    }

    /// The follow-up returned by `on_failure` has been sent.
    pub fn retry_dispatched(&mut self) {
        if self.state == RetryState::AwaitingRetry {
            self.state = RetryState::AwaitingResponse;
        }
    }

    pub fn on_success(&mut self) {
        self.retry_count = 0;
        self.state = RetryState::Success;
    }

    /// A reply that produced nothing to run, or an answer with no code.
    pub fn on_no_code(&mut self) {
        self.retry_count = 0;
        self.state = RetryState::Idle;
    }

    pub fn on_failure(&mut self, error: &PipelineError) -> RetryDecision {
        let PipelineError::ExecutionFailure { stderr } = error else {
            log::debug!("retry: {} is not retried", error);
            self.retry_count = 0;
            self.state = RetryState::Idle;
            return RetryDecision::NotRetryable;
        };

        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            self.state = RetryState::AwaitingRetry;
            log::info!("retry: attempt {} of {}", self.retry_count, self.max_retries);
            RetryDecision::Retry {
                message: follow_up_message(stderr, self.language),
                attempt: self.retry_count,
            }
        } else {
            let attempts = self.retry_count;
            log::warn!("retry: giving up after {} retries", attempts);
            self.retry_count = 0;
            self.state = RetryState::GivenUp;
            RetryDecision::GiveUp { attempts }
        }
    }
}

pub fn follow_up_message(stderr: &str, language: Language) -> String {
    let stderr = stderr.trim();
    match language {
        Language::En => format!(
            "The previous code raised an error:\n{}\nPlease fix the code and return only the corrected process_data(df) function.",
            stderr
        ),
        Language::Fr => format!(
            "Le code précédent a produit une erreur :\n{}\nCorrige le code et renvoie uniquement la fonction process_data(df) corrigée.",
            stderr
        ),
    }
}

//! The result of one orchestration run.

use serde::Serialize;
use stockchat_core::error::ProviderError;
use stockchat_core::message::{Conversation, Message};
use stockchat_core::provider::Usage;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TerminalState {
    /// The backend answered without requesting tools.
    Done,
    /// The backend could not be reached, refused the credentials, or sent
    /// nothing usable.
    Failed {
        reason: String,
        code: String,
        retryable: bool,
    },
    /// The turn budget ran out before a final answer. Not an error.
    BudgetExhausted,
}

impl TerminalState {
    pub(crate) fn failed(err: &ProviderError) -> Self {
        TerminalState::Failed {
            reason: err.to_string(),
            code: err.code().to_string(),
            retryable: err.is_retryable(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::Done => "done",
            TerminalState::Failed { .. } => "failed",
            TerminalState::BudgetExhausted => "budget_exhausted",
        }
    }
}

/// Everything the caller gets back from [`crate::Orchestrator::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Identifier used in this run's log lines
    pub run_id: String,

    /// The final answer, or the latest partial text when the run did not
    /// reach `Done`
    pub final_content: Option<String>,

    pub terminal_state: TerminalState,

    /// Backend round-trips made (never more than `max_turns`)
    pub turns_used: u32,

    pub max_turns: u32,

    /// Machine-readable cause for a non-`Done` ending
    pub reason_code: Option<String>,

    /// The caller's messages followed by every message this run appended
    pub conversation: Conversation,

    /// Token usage summed over all turns that reported it
    pub usage: Usage,

    #[serde(skip)]
    pub(crate) initial_len: usize,
}

impl RunOutcome {
    pub fn is_done(&self) -> bool {
        self.terminal_state == TerminalState::Done
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.terminal_state, TerminalState::Failed { .. })
    }

    /// Messages appended during this run, in order.
    pub fn appended(&self) -> &[Message] {
        self.conversation
            .messages()
            .get(self.initial_len..)
            .unwrap_or_default()
    }
}

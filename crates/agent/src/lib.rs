//! The conversation orchestrator for stockchat.
//!
//! A run follows a bounded **send → interpret → dispatch** cycle:
//!
//! 1. **Send** the caller's conversation plus the tool catalogue to the
//!    selected backend
//! 2. **Interpret** the normalized response
//! 3. **If tool calls**: dispatch each one in order, append the results,
//!    and loop back to step 1
//! 4. **If text**: that is the final answer
//!
//! The loop ends on a final answer, a backend failure, or when the turn
//! budget is used up. Each ending is reported as a [`TerminalState`].

pub mod orchestrator;
pub mod outcome;

pub use orchestrator::{DEFAULT_SYSTEM_PROMPT, Orchestrator};
pub use outcome::{RunOutcome, TerminalState};

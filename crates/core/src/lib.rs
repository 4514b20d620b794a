//! # stockchat core
//!
//! Domain types, traits, and error definitions for the stockchat
//! orchestrator. This crate has **no framework dependencies**: it defines the
//! model that the provider adapters, the tool catalogue, the SQLite store and
//! the orchestrator all implement against.
//!
//! ## Seams
//!
//! - [`Provider`]: one LLM backend behind a normalized request/response shape
//! - [`Tool`] / [`ToolRegistry`]: declared capabilities and their dispatch
//! - [`StockStore`]: the read-side boundary of the stock dataset

pub mod error;
pub mod message;
pub mod provider;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ProviderError, StoreError, ToolError};
pub use message::{Conversation, Message, Role, ToolCallRequest};
pub use provider::{NormalizedResponse, Provider, ProviderRequest, Usage};
pub use store::{
    DailyRecord, DatabaseStats, QueryOutput, SqlValue, Stock, StockFilter, StockStore,
};
pub use tool::{
    ParamType, ParameterSpec, Tool, ToolArgs, ToolDefinition, ToolRegistry, ToolResult,
};

//! LLM provider implementations for stockchat.
//!
//! All providers implement the `stockchat_core::Provider` trait and return
//! the same `NormalizedResponse`. The router selects the provider for a run.

pub mod anthropic;
pub(crate) mod http;
pub mod ollama;
pub mod openai_compat;
pub mod router;
pub mod tool_text;

pub use anthropic::AnthropicProvider;
pub use http::truncate_utf8;
pub use ollama::OllamaProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderKind, ProviderRouter, build_from_config};

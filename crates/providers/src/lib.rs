//! LLM Provider implementations for Stepwise.
//!
//! All providers implement the `stepwise_core::Provider` trait.
//! The router selects the correct provider based on configuration.

pub mod fallback;
pub mod ollama;
pub mod openai_compat;
pub mod retry;
pub mod router;
pub mod stream;

#[cfg(test)]
mod test_support;

pub use fallback::AutoProvider;
pub use ollama::OllamaProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use retry::RetryPolicy;
pub use router::{ProviderKind, SessionProvider, build_from_config};

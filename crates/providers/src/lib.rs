//! Model provider implementations for Maestro.

pub mod anthropic;
pub mod fallback;

pub use anthropic::AnthropicProvider;
pub use fallback::FallbackProvider;

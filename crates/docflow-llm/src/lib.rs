//! Reasoning-service client for AI pipeline steps.
//!
//! Provides the `ProviderAdapter` trait, `DynProvider` wrapper, request/response
//! types, the Gemini and offline adapters, middleware, and `ReasoningClient`,
//! which turns a compiled prompt into a validated `StructuredResult`.

mod client;
mod gemini;
mod offline;
mod provider;
mod types;

pub use client::*;
pub use gemini::GeminiAdapter;
pub use offline::OfflineReviewer;
pub use provider::*;
pub use types::*;

//! dify-bridge - OpenAI-compatible chat endpoint for a Dify-based portal
//!
//! This crate provides a small HTTP service that accepts OpenAI-style
//! chat-completion requests, forwards them to the portal's chat API with
//! pre-established credentials, and relays the answer back either as SSE
//! chunks or as a single completion object.

pub mod auth;
pub mod config;
pub mod error;
pub mod proxy;
pub mod testing;

pub use error::BridgeError;

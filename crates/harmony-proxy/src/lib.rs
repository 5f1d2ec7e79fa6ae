//! Harmony Proxy - reasoning-tag rewriting for MLX harmony models
//!
//! This crate provides a small HTTP proxy that sits between OpenAI-compatible
//! clients and an upstream server emitting harmony channel markup. Reasoning
//! is rewritten into `<think>` tags on the way out, in streaming and
//! non-streaming responses, and stripped from history on the way in.

pub mod config;
pub mod error;
pub mod proxy;
pub mod rewrite;
pub mod sanitize;

pub use error::HarmonyError;

//! MemCortex - long-term memory for chat assistants
//!
//! This crate keeps a per-user log of short text memories, retrieves the
//! relevant ones with vector search, and compacts old memories into
//! summaries so storage stays bounded.

pub mod chat;
pub mod config;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod ollama;
pub mod storage;
pub mod summarizer;
pub mod testing;

pub use error::{CortexError, Result};

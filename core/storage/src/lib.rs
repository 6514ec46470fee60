//! Durable storage for the vault record.
//!
//! This module provides a trait-based interface over where the single
//! vault file lives, with an atomic, permission-restricted filesystem
//! implementation and an in-memory one for tests.
//!
//! # Design Principles
//! - A write either fully replaces the stored record or leaves it untouched
//! - Async operations: all I/O goes through tokio
//! - Unified error semantics: every filesystem failure is `Error::Io`

pub mod local;
pub mod memory;
pub mod provider;

pub use local::FileStore;
pub use memory::MemoryStore;
pub use provider::VaultStore;

//! Common utilities and types shared across credvault modules.
//!
//! This module provides the error kinds every layer reports and a few
//! foundational types used throughout the codebase.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{base64_bytes, SensitiveBytes};

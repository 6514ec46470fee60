//! Credential vault engine for credvault.
//!
//! This module provides:
//! - The credential data model and domain matching
//! - The single in-memory session gating every read and write
//! - Sliding-expiry auto-lock and write-through persistence
//! - A brute-force throttle in front of unlock
//!
//! # Architecture
//! Callers go through [`GuardedUnlock`] to open the vault, then present the
//! returned token to [`SessionManager`] for every other operation. The
//! session manager re-encrypts and persists the whole vault through a
//! [`credvault_storage::VaultStore`] before any mutation returns.

pub mod clock;
pub mod config;
pub mod domain;
pub mod generator;
pub mod guard;
pub mod model;
pub mod session;
pub mod throttle;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CoreConfig;
pub use domain::{domain_matches, normalize_domain};
pub use generator::generate_password;
pub use guard::GuardedUnlock;
pub use model::{EntryPatch, NewEntry, VaultData, VaultEntry};
pub use session::{SessionManager, SessionStatus, SessionToken, UnlockOutcome};
pub use throttle::{AccessThrottle, ThrottleConfig, ThrottleDecision};

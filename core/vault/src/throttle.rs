//! Brute-force throttle for the unlock entry point.
//!
//! Each client key gets a fixed window opened by its first attempt. More
//! than `max_attempts` attempts inside the window trigger a lockout that
//! outlives the window. A successful unlock clears the key immediately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::clock::Clock;
use credvault_common::{Error, Result};

/// Throttle configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Length of the counting window, in seconds.
    pub window_secs: u64,
    /// Attempts allowed per window; the next one is denied.
    pub max_attempts: u32,
    /// Lockout length once the limit is exceeded, in seconds.
    pub lockout_secs: u64,
    /// How often stale keys are evicted, in seconds.
    pub sweep_interval_secs: u64,
}

impl ThrottleConfig {
    /// Reject configurations that would never allow or never expire.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidInput(
                "throttle max_attempts must be at least 1".to_string(),
            ));
        }
        if self.window_secs == 0 || self.lockout_secs == 0 || self.sweep_interval_secs == 0 {
            return Err(Error::InvalidInput(
                "throttle durations must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window_secs: 15 * 60,
            max_attempts: 5,
            lockout_secs: 15 * 60,
            sweep_interval_secs: 60,
        }
    }
}

/// Outcome of a throttle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allow,
    Deny { retry_after: Duration },
}

impl ThrottleDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ThrottleDecision::Allow)
    }

    /// Whole seconds to wait, rounded up. `None` when allowed.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ThrottleDecision::Allow => None,
            ThrottleDecision::Deny { retry_after } => {
                let secs = retry_after.as_secs();
                Some(if retry_after.subsec_nanos() > 0 { secs + 1 } else { secs })
            }
        }
    }
}

#[derive(Debug, Clone)]
struct WindowState {
    count: u32,
    window_deadline: DateTime<Utc>,
    lockout_deadline: Option<DateTime<Utc>>,
}

impl WindowState {
    fn opened_at(now: DateTime<Utc>, window: chrono::Duration) -> Self {
        Self {
            count: 1,
            window_deadline: now + window,
            lockout_deadline: None,
        }
    }

    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.window_deadline <= now && self.lockout_deadline.map_or(true, |until| until <= now)
    }
}

/// Per-client sliding window and lockout limiter.
#[derive(Debug)]
pub struct AccessThrottle {
    max_attempts: u32,
    window: chrono::Duration,
    lockout: chrono::Duration,
    sweep_interval: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, WindowState>>,
}

impl AccessThrottle {
    /// Create a throttle.
    ///
    /// # Errors
    /// - `InvalidInput` if the configuration fails validation
    pub fn new(config: &ThrottleConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            max_attempts: config.max_attempts,
            window: seconds(config.window_secs)?,
            lockout: seconds(config.lockout_secs)?,
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            clock,
            entries: Mutex::new(HashMap::new()),
        })
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, WindowState>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Record an attempt for `key` and decide whether it may proceed.
    pub fn check(&self, key: &str) -> ThrottleDecision {
        let now = self.clock.now();
        let mut entries = self.entries();

        let Some(state) = entries.get_mut(key) else {
            entries.insert(key.to_string(), WindowState::opened_at(now, self.window));
            return ThrottleDecision::Allow;
        };

        if let Some(until) = state.lockout_deadline {
            if until > now {
                return deny_until(now, until);
            }
            // Lockout served: start over.
            *state = WindowState::opened_at(now, self.window);
            return ThrottleDecision::Allow;
        }

        if state.window_deadline <= now {
            *state = WindowState::opened_at(now, self.window);
            return ThrottleDecision::Allow;
        }

        state.count += 1;
        if state.count > self.max_attempts {
            let until = now + self.lockout;
            state.lockout_deadline = Some(until);
            warn!(
                attempts = state.count,
                lockout_secs = self.lockout.num_seconds(),
                "Unlock attempts exceeded; client locked out"
            );
            return deny_until(now, until);
        }

        ThrottleDecision::Allow
    }

    /// Clear all state for `key` after a successful unlock.
    pub fn reset(&self, key: &str) {
        if self.entries().remove(key).is_some() {
            debug!("Throttle state cleared after successful unlock");
        }
    }

    /// Evict keys whose window and lockout have both expired.
    ///
    /// Returns the number of keys removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, state| !state.is_stale(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Throttle sweep");
        }
        removed
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.entries().len()
    }

    /// Run `sweep` periodically until the throttle is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = self.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(throttle) => {
                        throttle.sweep();
                    }
                    None => break,
                }
            }
        })
    }
}

fn deny_until(now: DateTime<Utc>, until: DateTime<Utc>) -> ThrottleDecision {
    let retry_after = (until - now).to_std().unwrap_or(Duration::ZERO);
    ThrottleDecision::Deny { retry_after }
}

fn seconds(secs: u64) -> Result<chrono::Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| Error::InvalidInput(format!("duration out of range: {}s", secs)))
}

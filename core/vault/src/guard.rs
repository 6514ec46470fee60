//! Throttled entry point for unlocking.

use std::sync::Arc;
use tracing::debug;

use crate::session::{SessionManager, UnlockOutcome};
use crate::throttle::{AccessThrottle, ThrottleDecision};
use credvault_common::{Error, Result};

/// Wraps [`SessionManager::unlock`] with the per-client throttle.
///
/// Every attempt counts, successful or not; a success clears the client's
/// history.
pub struct GuardedUnlock {
    throttle: Arc<AccessThrottle>,
    sessions: Arc<SessionManager>,
}

impl GuardedUnlock {
    pub fn new(throttle: Arc<AccessThrottle>, sessions: Arc<SessionManager>) -> Self {
        Self { throttle, sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn throttle(&self) -> &Arc<AccessThrottle> {
        &self.throttle
    }

    /// Unlock on behalf of `client`.
    ///
    /// # Errors
    /// - `Throttled` while the client is over its limit; nothing is derived
    /// - anything [`SessionManager::unlock`] returns
    pub async fn unlock(
        &self,
        client: &str,
        password: &[u8],
        create_if_missing: bool,
    ) -> Result<UnlockOutcome> {
        let decision = self.throttle.check(client);
        if let ThrottleDecision::Deny { .. } = decision {
            let retry_after_secs = decision.retry_after_secs().unwrap_or(1);
            debug!(client, retry_after_secs, "Unlock attempt throttled");
            return Err(Error::Throttled { retry_after_secs });
        }

        let outcome = self.sessions.unlock(password, create_if_missing).await?;
        self.throttle.reset(client);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::throttle::ThrottleConfig;
    use credvault_crypto::{KdfProfile, VaultCodec, DEFAULT_MAX_MEMORY_KIB};
    use credvault_storage::MemoryStore;

    const PASSWORD: &[u8] = b"hunter2pass";

    async fn guarded(max_attempts: u32) -> (GuardedUnlock, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let codec = VaultCodec::new(KdfProfile::minimal(), DEFAULT_MAX_MEMORY_KIB).unwrap();
        let sessions = Arc::new(
            SessionManager::new(Arc::new(MemoryStore::new()), codec, None, dyn_clock.clone())
                .unwrap(),
        );
        sessions.unlock(PASSWORD, true).await.unwrap();
        sessions.lock().await;

        let config = ThrottleConfig {
            max_attempts,
            window_secs: 60,
            lockout_secs: 120,
            ..Default::default()
        };
        let throttle = Arc::new(AccessThrottle::new(&config, dyn_clock).unwrap());
        (GuardedUnlock::new(throttle, sessions), clock)
    }

    #[tokio::test]
    async fn test_lockout_after_repeated_failures() {
        let (guard, _) = guarded(2).await;

        for _ in 0..2 {
            let result = guard.unlock("local", b"wrong", false).await;
            assert!(matches!(result, Err(Error::Authentication)));
        }

        // Even the right password is refused while locked out.
        let result = guard.unlock("local", PASSWORD, false).await;
        assert!(matches!(
            result,
            Err(Error::Throttled {
                retry_after_secs: 120
            })
        ));
        assert!(guard.sessions().status().await.locked);
    }

    #[tokio::test]
    async fn test_lockout_expires() {
        let (guard, clock) = guarded(1).await;

        let _ = guard.unlock("local", b"wrong", false).await;
        assert!(matches!(
            guard.unlock("local", PASSWORD, false).await,
            Err(Error::Throttled { .. })
        ));

        clock.advance(chrono::Duration::seconds(121));
        assert!(guard.unlock("local", PASSWORD, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_success_resets_history() {
        let (guard, _) = guarded(2).await;

        let _ = guard.unlock("local", b"wrong", false).await;
        guard.unlock("local", PASSWORD, false).await.unwrap();
        assert_eq!(guard.throttle().tracked_keys(), 0);

        for _ in 0..2 {
            let _ = guard.unlock("local", b"wrong", false).await;
        }
        assert!(matches!(
            guard.unlock("local", PASSWORD, false).await,
            Err(Error::Throttled { .. })
        ));
    }

    #[tokio::test]
    async fn test_clients_are_independent() {
        let (guard, _) = guarded(1).await;

        let _ = guard.unlock("a", b"wrong", false).await;
        assert!(matches!(
            guard.unlock("a", PASSWORD, false).await,
            Err(Error::Throttled { .. })
        ));
        assert!(guard.unlock("b", PASSWORD, false).await.is_ok());
    }
}

//! Vault session management.
//!
//! At most one session exists at a time. It holds the derived key and the
//! decrypted entries, is addressed by an opaque random token, and locks
//! itself after a configurable period without authenticated activity.
//! Keys are zeroized and entry secrets wiped when the session is discarded.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::model::{EntryPatch, NewEntry, VaultData, VaultEntry};
use credvault_common::{Error, Result, SensitiveBytes};
use credvault_crypto::kdf::verify_password;
use credvault_crypto::{integrity, KdfParams, MasterKey, VaultCodec};
use credvault_storage::VaultStore;

/// Random bytes behind each token.
const TOKEN_BYTES: usize = 32;

/// Opaque handle proving the caller unlocked the current session.
#[derive(Clone)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generate a new random token.
    fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap a token string received from a caller.
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison.
    fn matches(&self, presented: &SessionToken) -> bool {
        self.0.as_bytes().ct_eq(presented.0.as_bytes()).into()
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken([REDACTED])")
    }
}

/// Result of a successful unlock.
#[derive(Debug, Clone)]
pub struct UnlockOutcome {
    pub token: SessionToken,
    pub entry_count: usize,
    /// True if the vault did not exist and was created by this call.
    pub created: bool,
}

/// Snapshot of the session state, available without a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub locked: bool,
    pub entry_count: usize,
    pub last_activity: Option<DateTime<Utc>>,
}

/// The live session. Dropping it wipes the decrypted entries; the key
/// zeroizes itself.
struct Session {
    token: SessionToken,
    key: MasterKey,
    kdf: KdfParams,
    data: VaultData,
    last_activity: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.data.wipe();
    }
}

/// Session plus its pending auto-lock timer.
///
/// `generation` changes on every touch and every discard, so a timer that
/// fires late can tell it has been superseded.
#[derive(Default)]
struct SessionSlot {
    session: Option<Session>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

impl SessionSlot {
    /// Cancel the timer and drop the session. Returns whether one existed.
    fn discard(&mut self) -> bool {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
        self.session.take().is_some()
    }

    fn is_idle_expired(&self, now: DateTime<Utc>) -> bool {
        self.session
            .as_ref()
            .and_then(|s| s.expires_at)
            .is_some_and(|deadline| deadline <= now)
    }
}

/// Owner of the single vault session.
///
/// Create one per process and share it (e.g. in an `Arc`). Every
/// authenticated call presents the token returned by [`unlock`] and slides
/// the inactivity deadline forward. Mutations are written through to the
/// store before they return.
///
/// [`unlock`]: SessionManager::unlock
pub struct SessionManager {
    store: Arc<dyn VaultStore>,
    codec: VaultCodec,
    clock: Arc<dyn Clock>,
    idle_timeout: Option<(Duration, chrono::Duration)>,
    slot: Arc<Mutex<SessionSlot>>,
    /// Serializes unlock and password change so derivations never race.
    transitions: Mutex<()>,
}

impl SessionManager {
    /// Create a manager in the locked state.
    ///
    /// `idle_timeout` of `None` or zero disables auto-lock.
    pub fn new(
        store: Arc<dyn VaultStore>,
        codec: VaultCodec,
        idle_timeout: Option<Duration>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let idle_timeout = match idle_timeout.filter(|t| !t.is_zero()) {
            Some(timeout) => {
                let delta = chrono::Duration::from_std(timeout).map_err(|e| {
                    Error::InvalidInput(format!("idle timeout out of range: {}", e))
                })?;
                Some((timeout, delta))
            }
            None => None,
        };

        Ok(Self {
            store,
            codec,
            clock,
            idle_timeout,
            slot: Arc::new(Mutex::new(SessionSlot::default())),
            transitions: Mutex::new(()),
        })
    }

    /// Create a manager from the core configuration.
    pub fn from_config(
        config: &CoreConfig,
        store: Arc<dyn VaultStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::new(store, config.codec()?, config.idle_timeout(), clock)
    }

    /// Open the vault, creating it first if allowed and absent.
    ///
    /// A successful unlock replaces any existing session; the previous
    /// token stops working.
    ///
    /// # Errors
    /// - `VaultNotFound` if no vault exists and `create_if_missing` is false
    /// - `Authentication` for a wrong password
    /// - `Integrity` for a tampered file or a missing mandatory tag
    /// - `Derivation`, `Io`, `Serialization` as reported below
    pub async fn unlock(&self, password: &[u8], create_if_missing: bool) -> Result<UnlockOutcome> {
        let _transition = self.transitions.lock().await;
        let password = SensitiveBytes::copy_from(password);
        let codec = self.codec;

        let (data, key, kdf, created) = if self.store.exists().await? {
            let file = self.store.read().await?;
            let mut kdf = file.kdf.clone();
            let (mut data, key): (VaultData, MasterKey) =
                run_blocking(move || codec.decrypt(&file, password.as_bytes())).await?;
            if let Err(e) = data.ensure_unique_ids() {
                data.wipe();
                return Err(e);
            }
            if kdf.check.is_none() {
                kdf.check = Some(integrity::key_check(&key)?);
            }
            (data, key, kdf, false)
        } else if create_if_missing {
            let (file, key) =
                run_blocking(move || codec.encrypt_new(&VaultData::new(), password.as_bytes()))
                    .await?;
            self.store.write(&file).await?;
            info!(store = self.store.name(), "Created new vault");
            (VaultData::new(), key, file.kdf, true)
        } else {
            return Err(Error::VaultNotFound);
        };

        let token = SessionToken::generate();
        let entry_count = data.len();
        let now = self.clock.now();

        let mut slot = self.slot.lock().await;
        if slot.discard() {
            info!("Replacing active session with a new unlock");
        }
        slot.session = Some(Session {
            token: token.clone(),
            key,
            kdf,
            data,
            last_activity: now,
            expires_at: None,
        });
        self.touch(&mut slot, now);

        info!(entries = entry_count, created, "Vault unlocked");
        Ok(UnlockOutcome {
            token,
            entry_count,
            created,
        })
    }

    /// Discard the key and all decrypted data. Idempotent.
    pub async fn lock(&self) {
        let mut slot = self.slot.lock().await;
        if slot.discard() {
            info!("Vault locked");
        }
    }

    /// Explicit teardown; equivalent to [`lock`](SessionManager::lock).
    pub async fn shutdown(&self) {
        self.lock().await;
        debug!("Session manager shut down");
    }

    /// Current state. Needs no token and does not count as activity.
    pub async fn status(&self) -> SessionStatus {
        let mut slot = self.slot.lock().await;
        self.expire_if_idle(&mut slot, self.clock.now());

        match slot.session.as_ref() {
            Some(session) => SessionStatus {
                locked: false,
                entry_count: session.data.len(),
                last_activity: Some(session.last_activity),
            },
            None => SessionStatus {
                locked: true,
                entry_count: 0,
                last_activity: None,
            },
        }
    }

    /// Add a credential and persist the vault.
    pub async fn add_entry(&self, token: &SessionToken, entry: NewEntry) -> Result<VaultEntry> {
        let mut slot = self.slot.lock().await;
        let now = self.clock.now();
        let session = self.authorize(&mut slot, token)?;

        let stored = session.data.insert(entry, now)?;
        self.persist(&mut slot).await?;

        debug!(id = %stored.id, "Entry added");
        Ok(stored)
    }

    /// Apply a field-level patch and persist the vault.
    pub async fn update_entry(
        &self,
        token: &SessionToken,
        id: &str,
        patch: EntryPatch,
    ) -> Result<VaultEntry> {
        let mut slot = self.slot.lock().await;
        let now = self.clock.now();
        let session = self.authorize(&mut slot, token)?;

        let updated = session.data.update(id, patch, now)?;
        self.persist(&mut slot).await?;

        debug!(id = %updated.id, "Entry updated");
        Ok(updated)
    }

    /// Remove a credential and persist the vault.
    pub async fn delete_entry(&self, token: &SessionToken, id: &str) -> Result<()> {
        let mut slot = self.slot.lock().await;
        let session = self.authorize(&mut slot, token)?;

        session.data.remove(id)?;
        self.persist(&mut slot).await?;

        debug!(id, "Entry deleted");
        Ok(())
    }

    /// Fetch one credential.
    pub async fn get_entry(&self, token: &SessionToken, id: &str) -> Result<VaultEntry> {
        let mut slot = self.slot.lock().await;
        let session = self.authorize(&mut slot, token)?;

        session
            .data
            .get(id)
            .cloned()
            .ok_or_else(|| Error::EntryNotFound(id.to_string()))
    }

    /// All credentials, or those whose site, username or domain contain
    /// `query` (case-insensitive), sorted by site.
    pub async fn list_entries(
        &self,
        token: &SessionToken,
        query: Option<&str>,
    ) -> Result<Vec<VaultEntry>> {
        let mut slot = self.slot.lock().await;
        let session = self.authorize(&mut slot, token)?;
        Ok(session.data.search(query))
    }

    /// Credentials applicable to `domain` (same domain or a parent of it).
    pub async fn entries_for_domain(
        &self,
        token: &SessionToken,
        domain: &str,
    ) -> Result<Vec<VaultEntry>> {
        let mut slot = self.slot.lock().await;
        let session = self.authorize(&mut slot, token)?;
        Ok(session.data.for_domain(domain))
    }

    /// Re-key the vault under a new password.
    ///
    /// Fresh KDF parameters are generated; the token stays valid.
    ///
    /// # Errors
    /// - `Authentication` if `current` is wrong
    /// - `InvalidInput` if `new` is empty
    pub async fn change_password(
        &self,
        token: &SessionToken,
        current: &[u8],
        new: &[u8],
    ) -> Result<()> {
        if new.is_empty() {
            return Err(Error::InvalidInput("Password cannot be empty".to_string()));
        }
        let _transition = self.transitions.lock().await;

        let (key, kdf) = {
            let mut slot = self.slot.lock().await;
            let session = self.authorize(&mut slot, token)?;
            (session.key.clone(), session.kdf.clone())
        };

        let codec = self.codec;
        let current = SensitiveBytes::copy_from(current);
        let new = SensitiveBytes::copy_from(new);
        let (new_key, new_kdf) = run_blocking(move || {
            if !verify_password(current.as_bytes(), &kdf, codec.max_memory_kib(), &key)? {
                return Err(Error::Authentication);
            }
            let mut params = codec.generate_params();
            let new_key = codec.derive(new.as_bytes(), &params)?;
            params.check = Some(integrity::key_check(&new_key)?);
            Ok((new_key, params))
        })
        .await?;

        let mut slot = self.slot.lock().await;
        let session = self.authorize(&mut slot, token)?;
        session.key = new_key;
        session.kdf = new_kdf;
        self.persist(&mut slot).await?;

        info!("Master password changed");
        Ok(())
    }

    /// Validate the token, apply lazy expiry, and slide the deadline.
    fn authorize<'a>(
        &self,
        slot: &'a mut SessionSlot,
        token: &SessionToken,
    ) -> Result<&'a mut Session> {
        let now = self.clock.now();
        self.expire_if_idle(slot, now);

        match slot.session.as_ref() {
            None => return Err(Error::Locked),
            Some(session) if !session.token.matches(token) => return Err(Error::InvalidSession),
            Some(_) => {}
        }

        self.touch(slot, now);
        slot.session.as_mut().ok_or(Error::Locked)
    }

    fn expire_if_idle(&self, slot: &mut SessionSlot, now: DateTime<Utc>) {
        if slot.is_idle_expired(now) {
            slot.discard();
            info!("Session auto-locked after inactivity");
        }
    }

    /// Record activity and replace the pending auto-lock timer.
    fn touch(&self, slot: &mut SessionSlot, now: DateTime<Utc>) {
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.generation += 1;

        let Some(session) = slot.session.as_mut() else {
            return;
        };
        session.last_activity = now;
        session.expires_at = self.idle_timeout.map(|(_, delta)| now + delta);

        if let Some((timeout, _)) = self.idle_timeout {
            slot.timer = Some(spawn_auto_lock(
                Arc::downgrade(&self.slot),
                slot.generation,
                timeout,
            ));
        }
    }

    /// Re-encrypt and write the whole vault.
    ///
    /// On failure the in-memory state is ahead of disk, so the session is
    /// discarded before the error is returned.
    async fn persist(&self, slot: &mut SessionSlot) -> Result<()> {
        let Some(session) = slot.session.as_ref() else {
            return Err(Error::Locked);
        };

        let result = match self
            .codec
            .encrypt_with_key(&session.data, &session.key, &session.kdf)
        {
            Ok(file) => self.store.write(&file).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            warn!(error = %e, "Persisting vault failed; locking session");
            slot.discard();
        }
        result
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.try_lock() {
            slot.discard();
        }
    }
}

fn spawn_auto_lock(
    slot: Weak<Mutex<SessionSlot>>,
    generation: u64,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let Some(slot) = slot.upgrade() else {
            return;
        };
        let mut slot = slot.lock().await;
        if slot.generation == generation && slot.session.is_some() {
            // This task is the pending timer; release it rather than abort itself.
            slot.timer = None;
            slot.generation += 1;
            slot.session = None;
            info!("Session auto-locked after inactivity");
        }
    })
}

/// Run CPU-heavy work (key derivation) off the async workers.
async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Derivation(format!("Derivation task failed: {}", e)))?
}

//! Credential records held inside the vault.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::domain::{domain_matches, normalize_domain};
use credvault_common::{Error, Result};

/// A stored site credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultEntry {
    /// Assigned at creation, never changed.
    pub id: String,
    pub site: String,
    /// Normalized domain (see [`normalize_domain`]).
    pub domain: String,
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VaultEntry {
    /// Case-insensitive substring match against site, username and domain.
    ///
    /// `needle` must already be lowercase.
    fn matches_query(&self, needle: &str) -> bool {
        self.site.to_lowercase().contains(needle)
            || self.username.to_lowercase().contains(needle)
            || self.domain.to_lowercase().contains(needle)
    }

    fn wipe(&mut self) {
        self.password.zeroize();
        self.username.zeroize();
        if let Some(notes) = self.notes.as_mut() {
            notes.zeroize();
        }
    }
}

impl fmt::Debug for VaultEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultEntry")
            .field("id", &self.id)
            .field("site", &self.site)
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("notes", &self.notes.as_ref().map(|_| "[REDACTED]"))
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Fields for a new entry. The id and timestamps are assigned on insert.
#[derive(Clone, Default, Deserialize)]
pub struct NewEntry {
    pub site: String,
    pub domain: String,
    #[serde(default)]
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewEntry {
    /// Reject empty site, domain or password.
    pub fn validate(&self) -> Result<()> {
        require_text("site", &self.site)?;
        require_domain(&self.domain)?;
        if self.password.is_empty() {
            return Err(Error::InvalidInput("password cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for NewEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewEntry")
            .field("site", &self.site)
            .field("domain", &self.domain)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Field-level update. `None` leaves a field unchanged.
///
/// `notes: Some("")` clears the notes.
#[derive(Clone, Default, Deserialize)]
pub struct EntryPatch {
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl EntryPatch {
    /// Validate each present field independently.
    pub fn validate(&self) -> Result<()> {
        if let Some(site) = &self.site {
            require_text("site", site)?;
        }
        if let Some(domain) = &self.domain {
            require_domain(domain)?;
        }
        if let Some(password) = &self.password {
            if password.is_empty() {
                return Err(Error::InvalidInput("password cannot be empty".to_string()));
            }
        }
        Ok(())
    }

    /// True if no field is set.
    pub fn is_empty(&self) -> bool {
        self.site.is_none()
            && self.domain.is_none()
            && self.username.is_none()
            && self.password.is_none()
            && self.notes.is_none()
    }
}

impl fmt::Debug for EntryPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPatch")
            .field("site", &self.site)
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{} cannot be empty", field)));
    }
    Ok(())
}

fn require_domain(value: &str) -> Result<()> {
    if normalize_domain(value).is_empty() {
        return Err(Error::InvalidInput(format!("invalid domain: {:?}", value)));
    }
    Ok(())
}

/// All entries of one vault. Ids are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultData {
    #[serde(default)]
    pub entries: Vec<VaultEntry>,
}

impl VaultData {
    /// Create an empty vault.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reject data holding the same id twice.
    ///
    /// Inserts never produce duplicates; this guards data read from disk.
    pub fn ensure_unique_ids(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            if !seen.insert(entry.id.as_str()) {
                return Err(Error::Serialization(format!(
                    "duplicate entry id in vault: {}",
                    entry.id
                )));
            }
        }
        Ok(())
    }

    /// Look up an entry by id.
    pub fn get(&self, id: &str) -> Option<&VaultEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Append a new entry with a fresh id and normalized domain.
    pub fn insert(&mut self, new: NewEntry, now: DateTime<Utc>) -> Result<VaultEntry> {
        new.validate()?;

        let mut id = Uuid::new_v4().to_string();
        while self.get(&id).is_some() {
            id = Uuid::new_v4().to_string();
        }

        let entry = VaultEntry {
            id,
            site: new.site.trim().to_string(),
            domain: normalize_domain(&new.domain),
            username: new.username,
            password: new.password,
            notes: new.notes.filter(|n| !n.is_empty()),
            created_at: now,
            updated_at: now,
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// Apply `patch` to the entry with `id` and refresh its `updated_at`.
    pub fn update(&mut self, id: &str, patch: EntryPatch, now: DateTime<Utc>) -> Result<VaultEntry> {
        patch.validate()?;

        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::EntryNotFound(id.to_string()))?;

        if let Some(site) = patch.site {
            entry.site = site.trim().to_string();
        }
        if let Some(domain) = patch.domain {
            entry.domain = normalize_domain(&domain);
        }
        if let Some(username) = patch.username {
            entry.username.zeroize();
            entry.username = username;
        }
        if let Some(password) = patch.password {
            entry.password.zeroize();
            entry.password = password;
        }
        if let Some(notes) = patch.notes {
            if let Some(old) = entry.notes.as_mut() {
                old.zeroize();
            }
            entry.notes = if notes.is_empty() { None } else { Some(notes) };
        }
        entry.updated_at = now;

        Ok(entry.clone())
    }

    /// Remove the entry with `id`.
    pub fn remove(&mut self, id: &str) -> Result<VaultEntry> {
        let index = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| Error::EntryNotFound(id.to_string()))?;
        Ok(self.entries.remove(index))
    }

    /// Entries matching `query` (all of them if `None` or blank), in display order.
    pub fn search(&self, query: Option<&str>) -> Vec<VaultEntry> {
        let needle = query.map(|q| q.trim().to_lowercase()).unwrap_or_default();
        let mut found: Vec<VaultEntry> = self
            .entries
            .iter()
            .filter(|e| needle.is_empty() || e.matches_query(&needle))
            .cloned()
            .collect();
        sort_for_display(&mut found);
        found
    }

    /// Entries whose domain covers `domain`, in display order.
    pub fn for_domain(&self, domain: &str) -> Vec<VaultEntry> {
        let mut found: Vec<VaultEntry> = self
            .entries
            .iter()
            .filter(|e| domain_matches(&e.domain, domain))
            .cloned()
            .collect();
        sort_for_display(&mut found);
        found
    }

    /// Overwrite secrets in memory and drop all entries.
    pub fn wipe(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.wipe();
        }
        self.entries.clear();
    }
}

/// Ascending by site: case-folded first, then exact text, then id.
pub fn sort_for_display(entries: &mut [VaultEntry]) {
    entries.sort_by(|a, b| compare_sites(&a.site, &b.site).then_with(|| a.id.cmp(&b.id)));
}

fn compare_sites(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

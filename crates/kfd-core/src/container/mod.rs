//! In-memory key container: named keys and key groups.
//!
//! A container is the working set an operator builds up before loading keys
//! into a radio.  It is persisted as an encrypted `.ekc` file (see [`ekc`]).
//!
//! # Invariants (for beginners)
//!
//! - Key names are unique.
//! - `(keyset_id, key_id, algorithm_id)` is unique across keys.
//! - Group names are unique and every group member references an existing
//!   key; removing a key prunes it from every group.
//!
//! Every mutation checks these before changing anything, so a failed call
//! leaves the container untouched.

pub mod ekc;
pub mod validate;

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{CmdKeyItem, DomainError};
use validate::{KeyValidationError, KeyWarning};

/// SLNs at or above this value belong to crypto group 15 (key encryption keys).
const KEK_SLN_BASE: u16 = 0xF000;

/// Errors from container mutation, import and export.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("a key named '{0}' already exists")]
    DuplicateKeyName(String),

    #[error(
        "a key with keyset {keyset_id}, key id {key_id} and algorithm 0x{algorithm_id:02X} already exists"
    )]
    DuplicateKeyIdentity {
        keyset_id: u8,
        key_id: u16,
        algorithm_id: u8,
    },

    #[error("a group named '{0}' already exists")]
    DuplicateGroupName(String),

    #[error("no key with id {0}")]
    KeyNotFound(u32),

    #[error("no group with id {0}")]
    GroupNotFound(u32),

    #[error("key value is not valid hexadecimal")]
    InvalidKeyValue,

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Validation(#[from] KeyValidationError),

    /// The key is valid but suspicious; retry with `force` to accept it.
    #[error("key has {} warning(s): {}", .0.len(), join_warnings(.0))]
    ValidationWarnings(Vec<KeyWarning>),

    /// The file is truncated, fails to inflate or has an unreadable envelope.
    #[error("corrupt container file: {0}")]
    CorruptFile(String),

    /// Decryption produced nothing usable.
    #[error("invalid password")]
    InvalidPassword,

    #[error("unsupported container version '{0}'")]
    UnsupportedVersion(String),

    #[error("container serialization failed: {0}")]
    Serialization(String),
}

fn join_warnings(warnings: &[KeyWarning]) -> String {
    warnings
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ── Records ───────────────────────────────────────────────────────────────────

/// How a container key decides between KEK and TEK when loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
    /// KEK when the SLN lies in crypto group 15, TEK otherwise.
    #[default]
    Auto,
    Kek,
    Tek,
}

/// One key stored in a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerKey {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub use_active_keyset: bool,
    pub keyset_id: u8,
    pub sln_ckr: u16,
    #[serde(default)]
    pub key_type: KeyType,
    pub key_id: u16,
    pub algorithm_id: u8,
    /// Upper-case hex.
    pub key_value: String,
}

impl ContainerKey {
    /// Whether this key loads as a key encryption key.
    pub fn is_kek(&self) -> bool {
        match self.key_type {
            KeyType::Auto => self.sln_ckr >= KEK_SLN_BASE,
            KeyType::Kek => true,
            KeyType::Tek => false,
        }
    }

    /// Builds the load request for this key.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::InvalidKeyValue`] for undecodable hex and
    /// [`ContainerError::Domain`] for out-of-range fields.
    pub fn to_cmd_key_item(&self) -> Result<CmdKeyItem, ContainerError> {
        let key = hex::decode(&self.key_value).map_err(|_| ContainerError::InvalidKeyValue)?;
        Ok(CmdKeyItem::new(
            self.use_active_keyset,
            self.keyset_id.into(),
            self.sln_ckr.into(),
            self.is_kek(),
            self.key_id.into(),
            self.algorithm_id.into(),
            key,
        )?)
    }
}

/// Fields supplied when adding or updating a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub name: String,
    pub use_active_keyset: bool,
    pub keyset_id: u8,
    pub sln_ckr: u16,
    pub key_type: KeyType,
    pub key_id: u16,
    pub algorithm_id: u8,
    pub key: Vec<u8>,
}

impl KeyEntry {
    /// Runs the key validation rules over this entry.
    ///
    /// # Errors
    ///
    /// Returns [`KeyValidationError`] when the key cannot be loaded at all.
    pub fn validate(&self) -> Result<Vec<KeyWarning>, KeyValidationError> {
        validate::validate_key(
            self.keyset_id.into(),
            self.sln_ckr.into(),
            self.key_id.into(),
            self.algorithm_id.into(),
            &self.key,
        )
    }
}

/// A named set of keys loaded together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyGroup {
    pub id: u32,
    pub name: String,
    pub key_ids: Vec<u32>,
}

// ── Container ─────────────────────────────────────────────────────────────────

/// Keys, groups and id counters, plus bookkeeping timestamps (Unix seconds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyContainer {
    source: String,
    keys: Vec<ContainerKey>,
    groups: Vec<KeyGroup>,
    next_key_number: u32,
    next_group_number: u32,
    created: u64,
    modified: u64,
}

impl KeyContainer {
    /// An empty container.  `source` names where it came from (a file path,
    /// or a label for new containers).
    pub fn new(source: impl Into<String>) -> Self {
        let now = unix_now();
        Self {
            source: source.into(),
            keys: Vec::new(),
            groups: Vec::new(),
            next_key_number: 1,
            next_group_number: 1,
            created: now,
            modified: now,
        }
    }

    /// Rebuilds a container from stored records, checking every invariant.
    ///
    /// # Errors
    ///
    /// Returns the first invariant violation found.
    pub fn from_records(
        source: impl Into<String>,
        keys: Vec<ContainerKey>,
        groups: Vec<KeyGroup>,
        next_key_number: u32,
        next_group_number: u32,
    ) -> Result<Self, ContainerError> {
        let mut names = HashSet::new();
        let mut identities = HashSet::new();
        let mut ids = HashSet::new();
        for key in &keys {
            if !names.insert(key.name.as_str()) {
                return Err(ContainerError::DuplicateKeyName(key.name.clone()));
            }
            if !identities.insert((key.keyset_id, key.key_id, key.algorithm_id)) {
                return Err(ContainerError::DuplicateKeyIdentity {
                    keyset_id: key.keyset_id,
                    key_id: key.key_id,
                    algorithm_id: key.algorithm_id,
                });
            }
            ids.insert(key.id);
            hex::decode(&key.key_value).map_err(|_| ContainerError::InvalidKeyValue)?;
        }

        let mut group_names = HashSet::new();
        for group in &groups {
            if !group_names.insert(group.name.as_str()) {
                return Err(ContainerError::DuplicateGroupName(group.name.clone()));
            }
            if let Some(missing) = group.key_ids.iter().find(|id| !ids.contains(id)) {
                return Err(ContainerError::KeyNotFound(*missing));
            }
        }

        let highest_key = keys.iter().map(|k| k.id.saturating_add(1)).max();
        let highest_group = groups.iter().map(|g| g.id.saturating_add(1)).max();
        let next_key_number = next_key_number.max(highest_key.unwrap_or(1));
        let next_group_number = next_group_number.max(highest_group.unwrap_or(1));

        let now = unix_now();
        Ok(Self {
            source: source.into(),
            keys,
            groups,
            next_key_number,
            next_group_number,
            created: now,
            modified: now,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = source.into();
    }

    pub fn keys(&self) -> &[ContainerKey] {
        &self.keys
    }

    pub fn groups(&self) -> &[KeyGroup] {
        &self.groups
    }

    pub fn next_key_number(&self) -> u32 {
        self.next_key_number
    }

    pub fn next_group_number(&self) -> u32 {
        self.next_group_number
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn modified(&self) -> u64 {
        self.modified
    }

    pub fn key(&self, id: u32) -> Option<&ContainerKey> {
        self.keys.iter().find(|k| k.id == id)
    }

    pub fn group(&self, id: u32) -> Option<&KeyGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Drops every key and group and restarts the id counters.
    pub fn reset(&mut self) {
        self.keys.clear();
        self.groups.clear();
        self.next_key_number = 1;
        self.next_group_number = 1;
        self.touch();
    }

    // ── Keys ──────────────────────────────────────────────────────────────────

    /// Adds a key and returns its id.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate name or a duplicate `(keyset, key id, algorithm)`.
    pub fn add_key(&mut self, entry: KeyEntry) -> Result<u32, ContainerError> {
        self.check_key_unique(&entry, None)?;
        let id = self.next_key_number;
        self.next_key_number += 1;
        self.keys.push(record_from_entry(id, entry));
        self.touch();
        Ok(id)
    }

    /// Replaces the fields of an existing key, keeping its id.
    ///
    /// # Errors
    ///
    /// Fails when the key does not exist or the new fields collide with
    /// another key.
    pub fn update_key(&mut self, id: u32, entry: KeyEntry) -> Result<(), ContainerError> {
        let index = self
            .keys
            .iter()
            .position(|k| k.id == id)
            .ok_or(ContainerError::KeyNotFound(id))?;
        self.check_key_unique(&entry, Some(id))?;
        self.keys[index] = record_from_entry(id, entry);
        self.touch();
        Ok(())
    }

    /// Removes a key and prunes it from every group.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::KeyNotFound`] for an unknown id.
    pub fn remove_key(&mut self, id: u32) -> Result<ContainerKey, ContainerError> {
        let index = self
            .keys
            .iter()
            .position(|k| k.id == id)
            .ok_or(ContainerError::KeyNotFound(id))?;
        let removed = self.keys.remove(index);
        for group in &mut self.groups {
            group.key_ids.retain(|member| *member != id);
        }
        self.touch();
        Ok(removed)
    }

    fn check_key_unique(&self, entry: &KeyEntry, except: Option<u32>) -> Result<(), ContainerError> {
        for key in self.keys.iter().filter(|k| Some(k.id) != except) {
            if key.name == entry.name {
                return Err(ContainerError::DuplicateKeyName(entry.name.clone()));
            }
            if (key.keyset_id, key.key_id, key.algorithm_id)
                == (entry.keyset_id, entry.key_id, entry.algorithm_id)
            {
                return Err(ContainerError::DuplicateKeyIdentity {
                    keyset_id: entry.keyset_id,
                    key_id: entry.key_id,
                    algorithm_id: entry.algorithm_id,
                });
            }
        }
        Ok(())
    }

    // ── Groups ────────────────────────────────────────────────────────────────

    /// Adds a group and returns its id.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate group name or a member id with no key.
    pub fn add_group(&mut self, name: impl Into<String>, key_ids: Vec<u32>) -> Result<u32, ContainerError> {
        let name = name.into();
        self.check_group(&name, &key_ids, None)?;
        let id = self.next_group_number;
        self.next_group_number += 1;
        self.groups.push(KeyGroup {
            id,
            name,
            key_ids: dedup_preserving_order(key_ids),
        });
        self.touch();
        Ok(id)
    }

    /// Renames a group and replaces its members.
    ///
    /// # Errors
    ///
    /// Fails when the group does not exist, the name collides or a member id
    /// has no key.
    pub fn update_group(
        &mut self,
        id: u32,
        name: impl Into<String>,
        key_ids: Vec<u32>,
    ) -> Result<(), ContainerError> {
        let name = name.into();
        let index = self
            .groups
            .iter()
            .position(|g| g.id == id)
            .ok_or(ContainerError::GroupNotFound(id))?;
        self.check_group(&name, &key_ids, Some(id))?;
        self.groups[index] = KeyGroup {
            id,
            name,
            key_ids: dedup_preserving_order(key_ids),
        };
        self.touch();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ContainerError::GroupNotFound`] for an unknown id.
    pub fn remove_group(&mut self, id: u32) -> Result<KeyGroup, ContainerError> {
        let index = self
            .groups
            .iter()
            .position(|g| g.id == id)
            .ok_or(ContainerError::GroupNotFound(id))?;
        let removed = self.groups.remove(index);
        self.touch();
        Ok(removed)
    }

    fn check_group(&self, name: &str, key_ids: &[u32], except: Option<u32>) -> Result<(), ContainerError> {
        if self
            .groups
            .iter()
            .any(|g| Some(g.id) != except && g.name == name)
        {
            return Err(ContainerError::DuplicateGroupName(name.to_string()));
        }
        if let Some(missing) = key_ids.iter().find(|id| self.key(**id).is_none()) {
            return Err(ContainerError::KeyNotFound(*missing));
        }
        Ok(())
    }

    // ── Load requests ─────────────────────────────────────────────────────────

    /// Load requests for the given key ids, in the order given.
    ///
    /// # Errors
    ///
    /// Fails on an unknown id or an undecodable key value.
    pub fn cmd_key_items(&self, key_ids: &[u32]) -> Result<Vec<CmdKeyItem>, ContainerError> {
        key_ids
            .iter()
            .map(|id| {
                self.key(*id)
                    .ok_or(ContainerError::KeyNotFound(*id))?
                    .to_cmd_key_item()
            })
            .collect()
    }

    /// Load requests for every member of a group.
    ///
    /// # Errors
    ///
    /// Fails on an unknown group or an undecodable key value.
    pub fn group_cmd_key_items(&self, group_id: u32) -> Result<Vec<CmdKeyItem>, ContainerError> {
        let group = self
            .group(group_id)
            .ok_or(ContainerError::GroupNotFound(group_id))?;
        self.cmd_key_items(&group.key_ids)
    }

    fn touch(&mut self) {
        self.modified = unix_now();
    }
}

fn record_from_entry(id: u32, entry: KeyEntry) -> ContainerKey {
    ContainerKey {
        id,
        name: entry.name,
        use_active_keyset: entry.use_active_keyset,
        keyset_id: entry.keyset_id,
        sln_ckr: entry.sln_ckr,
        key_type: entry.key_type,
        key_id: entry.key_id,
        algorithm_id: entry.algorithm_id,
        key_value: hex::encode_upper(&entry.key),
    }
}

fn dedup_preserving_order(ids: Vec<u32>) -> Vec<u32> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, key_id: u16) -> KeyEntry {
        KeyEntry {
            name: name.to_string(),
            use_active_keyset: true,
            keyset_id: 1,
            sln_ckr: 100,
            key_type: KeyType::Auto,
            key_id,
            algorithm_id: 0x84,
            key: vec![0xAB; 32],
        }
    }

    #[test]
    fn test_add_key_assigns_sequential_ids() {
        let mut container = KeyContainer::new("test");

        let first = container.add_key(entry("a", 1)).unwrap();
        let second = container.add_key(entry("b", 2)).unwrap();

        assert_eq!((first, second), (1, 2));
        assert_eq!(container.next_key_number(), 3);
        assert_eq!(container.key(1).unwrap().key_value, "AB".repeat(32));
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut container = KeyContainer::new("test");
        container.add_key(entry("a", 1)).unwrap();

        let result = container.add_key(entry("a", 2));

        assert!(matches!(result, Err(ContainerError::DuplicateKeyName(n)) if n == "a"));
        assert_eq!(container.keys().len(), 1);
    }

    #[test]
    fn test_duplicate_identity_is_rejected() {
        let mut container = KeyContainer::new("test");
        container.add_key(entry("a", 1)).unwrap();

        let result = container.add_key(entry("b", 1));

        assert!(matches!(result, Err(ContainerError::DuplicateKeyIdentity { key_id: 1, .. })));
    }

    #[test]
    fn test_update_key_may_keep_its_own_name() {
        let mut container = KeyContainer::new("test");
        let id = container.add_key(entry("a", 1)).unwrap();

        let mut changed = entry("a", 1);
        changed.sln_ckr = 200;
        container.update_key(id, changed).unwrap();

        assert_eq!(container.key(id).unwrap().sln_ckr, 200);
    }

    #[test]
    fn test_remove_key_prunes_group_members() {
        let mut container = KeyContainer::new("test");
        let a = container.add_key(entry("a", 1)).unwrap();
        let b = container.add_key(entry("b", 2)).unwrap();
        let group = container.add_group("g", vec![a, b]).unwrap();

        container.remove_key(a).unwrap();

        assert_eq!(container.group(group).unwrap().key_ids, vec![b]);
    }

    #[test]
    fn test_group_with_dangling_member_is_rejected() {
        let mut container = KeyContainer::new("test");

        let result = container.add_group("g", vec![42]);

        assert!(matches!(result, Err(ContainerError::KeyNotFound(42))));
    }

    #[test]
    fn test_duplicate_group_name_is_rejected() {
        let mut container = KeyContainer::new("test");
        container.add_group("g", vec![]).unwrap();

        assert!(matches!(
            container.add_group("g", vec![]),
            Err(ContainerError::DuplicateGroupName(_))
        ));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut container = KeyContainer::new("test");
        container.add_key(entry("a", 1)).unwrap();
        container.add_group("g", vec![1]).unwrap();

        container.reset();

        assert!(container.keys().is_empty());
        assert!(container.groups().is_empty());
        assert_eq!(container.next_key_number(), 1);
    }

    #[test]
    fn test_auto_key_type_follows_sln_crypto_group() {
        let mut container = KeyContainer::new("test");
        let mut kek = entry("kek", 1);
        kek.sln_ckr = 0xF001;
        let kek_id = container.add_key(kek).unwrap();
        let tek_id = container.add_key(entry("tek", 2)).unwrap();

        let items = container.cmd_key_items(&[kek_id, tek_id]).unwrap();

        assert!(items[0].is_kek());
        assert!(!items[1].is_kek());
        assert_eq!(items[1].key(), &[0xAB; 32][..]);
    }

    #[test]
    fn test_group_cmd_key_items_follow_member_order() {
        let mut container = KeyContainer::new("test");
        let a = container.add_key(entry("a", 1)).unwrap();
        let b = container.add_key(entry("b", 2)).unwrap();
        let group = container.add_group("g", vec![b, a, b]).unwrap();

        let items = container.group_cmd_key_items(group).unwrap();

        assert_eq!(items.iter().map(|k| k.key_id()).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[test]
    fn test_from_records_rejects_dangling_group_member() {
        let group = KeyGroup {
            id: 1,
            name: "g".into(),
            key_ids: vec![9],
        };
        assert!(matches!(
            KeyContainer::from_records("x", vec![], vec![group], 1, 2),
            Err(ContainerError::KeyNotFound(9))
        ));
    }
}

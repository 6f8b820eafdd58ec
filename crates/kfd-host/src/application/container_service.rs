//! ContainerService: the operator's open key container and its file.
//!
//! Wraps a [`KeyContainer`] together with the `.ekc` path and password it
//! was opened with, so edits can be saved back without asking again.
//!
//! # Validation on add (for beginners)
//!
//! Every key passes the validation rules before it enters the container.
//! Hard errors (wrong length for the algorithm, bad DES parity, clear
//! algorithm) always reject the key.  Warnings (weak DES key, SLN zero,
//! guessable material) reject it only until the operator repeats the call
//! with `force = true`.

use std::path::{Path, PathBuf};

use kfd_core::{
    export_container, import_container, validate_key, CmdKeyItem, ContainerError, ContainerKey,
    KeyContainer, KeyEntry, KeyGroup, KeyWarning,
};
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Source tag written into containers created by this tool.
pub const CONTAINER_SOURCE: &str = "kfd-host";

#[derive(Debug, Error)]
pub enum ContainerServiceError {
    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("I/O error accessing container at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `save` was called on a container that was never given a file.
    #[error("container has no file; use save-as")]
    NoFile,

    #[error("container has no password; use save-as")]
    NoPassword,
}

/// An open key container.
pub struct ContainerService {
    container: KeyContainer,
    path: Option<PathBuf>,
    password: Option<Zeroizing<String>>,
    dirty: bool,
}

impl Default for ContainerService {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerService {
    /// An empty, unsaved container.
    pub fn new() -> Self {
        Self {
            container: KeyContainer::new(CONTAINER_SOURCE),
            path: None,
            password: None,
            dirty: false,
        }
    }

    /// Opens and decrypts the container at `path`.
    ///
    /// # Errors
    ///
    /// [`ContainerServiceError::Io`] when the file cannot be read;
    /// `ContainerError::InvalidPassword` for a wrong password.
    pub fn open(path: impl AsRef<Path>, password: &str) -> Result<Self, ContainerServiceError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ContainerServiceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let container = import_container(&bytes, password, CONTAINER_SOURCE)?;
        info!(
            path = %path.display(),
            keys = container.keys().len(),
            groups = container.groups().len(),
            "container opened"
        );
        Ok(Self {
            container,
            path: Some(path.to_path_buf()),
            password: Some(Zeroizing::new(password.to_string())),
            dirty: false,
        })
    }

    /// Creates an empty container and writes it to `path` straight away.
    pub fn create(path: impl AsRef<Path>, password: &str) -> Result<Self, ContainerServiceError> {
        let mut service = Self::new();
        service.save_as(path, password)?;
        Ok(service)
    }

    /// Writes the container back to the file it was opened from.
    pub fn save(&mut self) -> Result<(), ContainerServiceError> {
        let path = self.path.clone().ok_or(ContainerServiceError::NoFile)?;
        let password = self
            .password
            .as_ref()
            .ok_or(ContainerServiceError::NoPassword)?;
        write_container(&self.container, &path, password)?;
        self.dirty = false;
        Ok(())
    }

    /// Writes the container to `path` under `password`; both become the
    /// defaults for later [`Self::save`] calls.
    pub fn save_as(&mut self, path: impl AsRef<Path>, password: &str) -> Result<(), ContainerServiceError> {
        let path = path.as_ref().to_path_buf();
        let password = Zeroizing::new(password.to_string());
        write_container(&self.container, &path, &password)?;
        self.path = Some(path);
        self.password = Some(password);
        self.dirty = false;
        Ok(())
    }

    /// Empties the container.  The file is untouched until the next save.
    pub fn reset(&mut self) {
        self.container.reset();
        self.dirty = true;
    }

    pub fn container(&self) -> &KeyContainer {
        &self.container
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// `true` when there are edits not yet written to disk.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // ── Keys ──────────────────────────────────────────────────────────────────

    /// Validates and adds a key, returning its id.
    ///
    /// # Errors
    ///
    /// `ContainerError::Validation` for a key that cannot be loaded,
    /// `ContainerError::ValidationWarnings` when warnings exist and `force`
    /// is not set, and the container's own uniqueness errors.
    pub fn add_key(&mut self, entry: KeyEntry, force: bool) -> Result<u32, ContainerServiceError> {
        check_entry(&entry, force)?;
        let id = self.container.add_key(entry)?;
        self.dirty = true;
        debug!(id, "key added");
        Ok(id)
    }

    /// Validates `entry` like [`Self::add_key`] and replaces key `id` with it.
    pub fn update_key(&mut self, id: u32, entry: KeyEntry, force: bool) -> Result<(), ContainerServiceError> {
        check_entry(&entry, force)?;
        self.container.update_key(id, entry)?;
        self.dirty = true;
        Ok(())
    }

    /// Removes a key; groups referencing it drop the reference.
    pub fn remove_key(&mut self, id: u32) -> Result<ContainerKey, ContainerServiceError> {
        let removed = self.container.remove_key(id)?;
        self.dirty = true;
        Ok(removed)
    }

    // ── Groups ────────────────────────────────────────────────────────────────

    pub fn add_group(&mut self, name: &str, key_ids: Vec<u32>) -> Result<u32, ContainerServiceError> {
        let id = self.container.add_group(name, key_ids)?;
        self.dirty = true;
        Ok(id)
    }

    pub fn update_group(&mut self, id: u32, name: &str, key_ids: Vec<u32>) -> Result<(), ContainerServiceError> {
        self.container.update_group(id, name, key_ids)?;
        self.dirty = true;
        Ok(())
    }

    pub fn remove_group(&mut self, id: u32) -> Result<KeyGroup, ContainerServiceError> {
        let removed = self.container.remove_group(id)?;
        self.dirty = true;
        Ok(removed)
    }

    // ── Load requests ─────────────────────────────────────────────────────────

    /// Load requests for the given key ids, in the order given.
    pub fn key_items(&self, key_ids: &[u32]) -> Result<Vec<CmdKeyItem>, ContainerServiceError> {
        Ok(self.container.cmd_key_items(key_ids)?)
    }

    /// Load requests for every member of a group.
    pub fn group_items(&self, group_id: u32) -> Result<Vec<CmdKeyItem>, ContainerServiceError> {
        Ok(self.container.group_cmd_key_items(group_id)?)
    }
}

/// Runs the validation rules over a key about to be sent to a radio.
///
/// Applies the same gate as adding a key: hard errors always refuse the
/// load, warnings refuse it unless `force` is set.
///
/// # Errors
///
/// `ContainerError::Validation` or `ContainerError::ValidationWarnings`.
pub fn check_load_item(item: &CmdKeyItem, force: bool) -> Result<(), ContainerError> {
    let warnings = validate_key(
        item.keyset_id().into(),
        item.sln().into(),
        item.key_id().into(),
        item.algorithm_id().into(),
        item.key(),
    )?;
    accept_warnings(warnings, force)
}

fn check_entry(entry: &KeyEntry, force: bool) -> Result<(), ContainerError> {
    accept_warnings(entry.validate()?, force)
}

fn accept_warnings(warnings: Vec<KeyWarning>, force: bool) -> Result<(), ContainerError> {
    if !warnings.is_empty() && !force {
        return Err(ContainerError::ValidationWarnings(warnings));
    }
    if !warnings.is_empty() {
        debug!(count = warnings.len(), "key warnings overridden");
    }
    Ok(())
}

fn write_container(container: &KeyContainer, path: &Path, password: &str) -> Result<(), ContainerServiceError> {
    let bytes = export_container(container, password)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ContainerServiceError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, bytes).map_err(|source| ContainerServiceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), keys = container.keys().len(), "container saved");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

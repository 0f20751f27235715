//! Named machine storage.
//!
//! Each saved machine is a JSON [`MachineSnapshot`] in
//! `<name>.<checksum>.machine`. An `index.json` next to them records the size
//! and CRC32C checksum of every file so that loads can detect corruption.
//!
//! Every file is written to a temporary file and renamed into place. The
//! index rename is the commit point of a save: until it happens the index
//! still names the previous file, which is never overwritten. Files the index
//! does not name are removed when the store is opened.

use crate::error::StorageError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tickfsm_core::{Clock, Machine, MachineSnapshot, SystemClock};

const MAX_NAME_LEN: usize = 128;

/// Metadata recorded for every saved machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveMeta {
    pub name: String,
    pub saved_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub checksum: String,
}

/// Directory of named machine snapshots.
pub struct MachineStore {
    dir: PathBuf,
    index: RwLock<BTreeMap<String, SaveMeta>>,
}

impl MachineStore {
    /// Opens or creates a store at the given directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let store = Self {
            dir,
            index: RwLock::new(BTreeMap::new()),
        };
        store.load_index()?;
        store.remove_orphans()?;

        tracing::debug!(
            dir = %store.dir.display(),
            machines = store.len(),
            "opened machine store"
        );
        Ok(store)
    }

    fn load_index(&self) -> Result<(), StorageError> {
        let index_path = self.index_path();
        if !index_path.exists() {
            return Ok(());
        }

        let file = File::open(&index_path)?;
        let reader = BufReader::new(file);
        let index: BTreeMap<String, SaveMeta> = serde_json::from_reader(reader)?;
        *self.index.write() = index;

        Ok(())
    }

    /// Removes machine files the index does not name and temporary files
    /// left behind by interrupted writes.
    fn remove_orphans(&self) -> Result<(), StorageError> {
        let referenced: BTreeSet<PathBuf> = self
            .index
            .read()
            .values()
            .map(|meta| self.machine_path(meta))
            .collect();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let orphan = (file_name.ends_with(".machine") && !referenced.contains(&path))
                || file_name.starts_with(".tmp");
            if orphan && path.is_file() {
                tracing::warn!(path = %path.display(), "removing unreferenced file");
                fs::remove_file(&path)?;
            }
        }

        Ok(())
    }

    fn save_index(&self, index: &BTreeMap<String, SaveMeta>) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(index)?;
        self.write_atomic(&self.index_path(), &data)
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let mut file = NamedTempFile::new_in(&self.dir)?;
        file.write_all(data)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Saves a full snapshot of `machine` under `name`, replacing any
    /// machine previously saved under that name.
    ///
    /// If the save fails part way, the previous machine stays loadable.
    pub fn save(&self, machine: &Machine, name: &str) -> Result<SaveMeta, StorageError> {
        validate_name(name)?;

        let snapshot = machine.snapshot();
        let data = snapshot.to_json()?;
        let checksum = format!("{:08x}", crc32c::crc32c(&data));

        let meta = SaveMeta {
            name: name.to_string(),
            saved_at: snapshot.taken_at,
            size_bytes: data.len() as u64,
            checksum,
        };
        let path = self.machine_path(&meta);
        self.write_atomic(&path, &data)?;

        let previous = {
            let mut index = self.index.write();
            let previous = index.insert(name.to_string(), meta.clone());
            if let Err(e) = self.save_index(&index) {
                match &previous {
                    Some(old) => index.insert(name.to_string(), old.clone()),
                    None => index.remove(name),
                };
                return Err(e);
            }
            previous
        };

        if let Some(old) = previous {
            let old_path = self.machine_path(&old);
            if old_path != path {
                remove_if_exists(&old_path)?;
            }
        }

        tracing::info!(
            name,
            size_bytes = meta.size_bytes,
            active = machine.active_states().len(),
            "saved machine"
        );
        Ok(meta)
    }

    /// Reads and verifies the snapshot saved under `name`.
    pub fn load_snapshot(&self, name: &str) -> Result<MachineSnapshot, StorageError> {
        validate_name(name)?;

        let meta = self
            .meta(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;

        let mut file = match File::open(self.machine_path(&meta)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::Corruption(format!(
                    "machine {} is indexed but its file is missing",
                    name
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let actual = format!("{:08x}", crc32c::crc32c(&data));
        if actual != meta.checksum {
            return Err(StorageError::Corruption(format!(
                "machine {} checksum mismatch",
                name
            )));
        }

        Ok(serde_json::from_slice(&data)?)
    }

    /// Loads the machine saved under `name`, reading the system clock.
    ///
    /// Native actions come back unbound; see [`Machine::bind_actions`].
    pub fn load(&self, name: &str) -> Result<Machine, StorageError> {
        self.load_with_clock(name, Arc::new(SystemClock))
    }

    /// Loads the machine saved under `name`, reading the given clock.
    pub fn load_with_clock(
        &self,
        name: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Machine, StorageError> {
        let snapshot = self.load_snapshot(name)?;
        let machine = snapshot.to_machine_with_clock(clock)?;
        tracing::debug!(name, "loaded machine");
        Ok(machine)
    }

    /// Deletes the machine saved under `name`.
    pub fn delete(&self, name: &str) -> Result<(), StorageError> {
        validate_name(name)?;

        let removed = {
            let mut index = self.index.write();
            let removed = index
                .remove(name)
                .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
            if let Err(e) = self.save_index(&index) {
                index.insert(name.to_string(), removed);
                return Err(e);
            }
            removed
        };

        remove_if_exists(&self.machine_path(&removed))?;

        tracing::info!(name, "deleted machine");
        Ok(())
    }

    /// Metadata of the machine saved under `name`.
    pub fn meta(&self, name: &str) -> Option<SaveMeta> {
        self.index.read().get(name).cloned()
    }

    /// Metadata of every saved machine, ordered by name.
    pub fn list(&self) -> Vec<SaveMeta> {
        self.index.read().values().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    fn machine_path(&self, meta: &SaveMeta) -> PathBuf {
        self.dir.join(format!("{}.{}.machine", meta.name, meta.checksum))
    }
}

fn remove_if_exists(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Names become file names: ASCII letters, digits, `-`, `_` and `.` only,
/// not starting with `.`.
fn validate_name(name: &str) -> Result<(), StorageError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.len() > MAX_NAME_LEN {
        Some("name is too long")
    } else if name.starts_with('.') {
        Some("name must not start with '.'")
    } else if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        Some("only ASCII letters, digits, '-', '_' and '.' are allowed")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StorageError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

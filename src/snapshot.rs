//! Snapshot store interface
//!
//! The narrow interface through which the engine talks to the external
//! snapshot collaborator, plus an in-memory backend used in tests. The
//! engine only orchestrates mark-checked, unchecked accounting, and save;
//! `match_value` exists for matcher code.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::models::UpdateSnapshotMode;

/// Renders values into snapshot text for the keys it claims.
pub trait SnapshotSerializer: Send + Sync {
    fn handles(&self, value: &Value) -> bool;
    fn serialize(&self, value: &Value) -> String;
}

pub type SerializerRef = Arc<dyn SnapshotSerializer>;

/// Counts reported by one save of a snapshot file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnapshotSaveStatus {
    pub deleted: bool,
    pub added: u32,
    pub matched: u32,
    pub unmatched: u32,
    pub updated: u32,
}

/// One open snapshot file scoped to a single test-file run.
///
/// Keys are `<test full name> <counter>`, one counter per test.
pub trait SnapshotStore: Send {
    /// Mark every key of `test_name` as seen this run.
    fn mark_checked(&mut self, test_name: &str);

    fn unchecked_count(&self) -> usize;
    fn unchecked_keys(&self) -> Vec<String>;

    /// Drop keys no checked test owns.
    fn remove_unchecked(&mut self);

    /// Record `value` against the next key of `test_name`. Returns whether
    /// the snapshot matched or was written under the update mode.
    fn match_value(&mut self, test_name: &str, value: &Value) -> bool;

    /// Register a serializer with priority over all existing ones.
    fn add_serializer(&mut self, serializer: SerializerRef);
    fn serializers(&self) -> Vec<SerializerRef>;

    fn save(&mut self) -> SnapshotSaveStatus;
}

/// Shared handle to the store bound for the currently running file.
pub type SnapshotHandle = Arc<Mutex<Box<dyn SnapshotStore>>>;

/// Opens per-file stores and resolves their on-disk location.
pub trait SnapshotBackend: Send + Sync {
    fn resolve_path(&self, test_path: &Path) -> PathBuf;

    fn open(
        &self,
        snapshot_path: &Path,
        update: UpdateSnapshotMode,
        serializers: Vec<SerializerRef>,
    ) -> Box<dyn SnapshotStore>;
}

/// Render with the first claiming serializer, front of the list first.
fn render(serializers: &[SerializerRef], value: &Value) -> String {
    for serializer in serializers {
        if serializer.handles(value) {
            return serializer.serialize(value);
        }
    }
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn key_belongs_to(key: &str, test_name: &str) -> bool {
    match key.strip_prefix(test_name) {
        Some("") => true,
        Some(rest) => {
            let mut chars = rest.chars();
            chars.next() == Some(' ') && chars.as_str().chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// In-memory snapshot backend keyed by resolved snapshot path.
#[derive(Clone, Default)]
pub struct MemorySnapshotBackend {
    files: Arc<Mutex<HashMap<PathBuf, BTreeMap<String, String>>>>,
}

impl MemorySnapshotBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload a snapshot file's entries.
    pub fn seed(
        &self,
        path: impl Into<PathBuf>,
        entries: impl IntoIterator<Item = (String, String)>,
    ) {
        self.files
            .lock()
            .unwrap()
            .insert(path.into(), entries.into_iter().collect());
    }

    /// Current entries of a snapshot file, `None` once deleted.
    pub fn entries(&self, path: impl AsRef<Path>) -> Option<BTreeMap<String, String>> {
        self.files.lock().unwrap().get(path.as_ref()).cloned()
    }
}

impl SnapshotBackend for MemorySnapshotBackend {
    fn resolve_path(&self, test_path: &Path) -> PathBuf {
        let dir = test_path.parent().unwrap_or_else(|| Path::new(""));
        let name = test_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        dir.join("__snapshots__").join(format!("{name}.snap"))
    }

    fn open(
        &self,
        snapshot_path: &Path,
        update: UpdateSnapshotMode,
        serializers: Vec<SerializerRef>,
    ) -> Box<dyn SnapshotStore> {
        let entries = self
            .files
            .lock()
            .unwrap()
            .get(snapshot_path)
            .cloned()
            .unwrap_or_default();
        Box::new(MemorySnapshotStore {
            path: snapshot_path.to_path_buf(),
            had_entries: !entries.is_empty(),
            entries,
            checked_tests: HashSet::new(),
            counters: HashMap::new(),
            dirty: false,
            update,
            serializers,
            added: 0,
            matched: 0,
            unmatched: 0,
            updated: 0,
            files: self.files.clone(),
        })
    }
}

/// Store implementation backing `MemorySnapshotBackend`.
pub struct MemorySnapshotStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
    had_entries: bool,
    checked_tests: HashSet<String>,
    counters: HashMap<String, u32>,
    dirty: bool,
    update: UpdateSnapshotMode,
    serializers: Vec<SerializerRef>,
    added: u32,
    matched: u32,
    unmatched: u32,
    updated: u32,
    files: Arc<Mutex<HashMap<PathBuf, BTreeMap<String, String>>>>,
}

impl MemorySnapshotStore {
    fn is_checked(&self, key: &str) -> bool {
        self.checked_tests
            .iter()
            .any(|test| key_belongs_to(key, test))
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn mark_checked(&mut self, test_name: &str) {
        self.checked_tests.insert(test_name.to_string());
    }

    fn unchecked_count(&self) -> usize {
        self.entries
            .keys()
            .filter(|key| !self.is_checked(key))
            .count()
    }

    fn unchecked_keys(&self) -> Vec<String> {
        self.entries
            .keys()
            .filter(|key| !self.is_checked(key))
            .cloned()
            .collect()
    }

    fn remove_unchecked(&mut self) {
        let checked: Vec<String> = self.checked_tests.iter().cloned().collect();
        let before = self.entries.len();
        self.entries
            .retain(|key, _| checked.iter().any(|test| key_belongs_to(key, test)));
        if self.entries.len() != before {
            self.dirty = true;
        }
    }

    fn match_value(&mut self, test_name: &str, value: &Value) -> bool {
        let counter = self.counters.entry(test_name.to_string()).or_insert(0);
        *counter += 1;
        let key = format!("{test_name} {counter}");
        self.checked_tests.insert(test_name.to_string());

        let rendered = render(&self.serializers, value);
        match self.entries.get(&key) {
            Some(stored) if *stored == rendered => {
                self.matched += 1;
                true
            }
            Some(_) => {
                if self.update == UpdateSnapshotMode::All {
                    self.entries.insert(key, rendered);
                    self.updated += 1;
                    self.dirty = true;
                    true
                } else {
                    self.unmatched += 1;
                    false
                }
            }
            None => {
                if self.update == UpdateSnapshotMode::None {
                    self.unmatched += 1;
                    false
                } else {
                    self.entries.insert(key, rendered);
                    self.added += 1;
                    self.dirty = true;
                    true
                }
            }
        }
    }

    fn add_serializer(&mut self, serializer: SerializerRef) {
        self.serializers.insert(0, serializer);
    }

    fn serializers(&self) -> Vec<SerializerRef> {
        self.serializers.clone()
    }

    fn save(&mut self) -> SnapshotSaveStatus {
        let deleted = self.entries.is_empty() && self.had_entries;
        {
            let mut files = self.files.lock().unwrap();
            if deleted {
                files.remove(&self.path);
            } else if self.dirty {
                files.insert(self.path.clone(), self.entries.clone());
            }
        }
        self.dirty = false;
        SnapshotSaveStatus {
            deleted,
            added: self.added,
            matched: self.matched,
            unmatched: self.unmatched,
            updated: self.updated,
        }
    }
}

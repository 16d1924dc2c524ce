//! Incremental inventory reconciliation: keep a versioned local snapshot of
//! the bibliographic library (items, collections, tags) in step with the
//! remote's changed-since and deleted-since feeds, and rewrite only the
//! snapshot sections that actually changed.

use crate::error::{ArchiveError, Result};
use crate::ports::{BibCollection, BibItem, BibliographicStore, DeletedKeys};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const ITEMS_FILE: &str = "items.json";
pub const COLLECTIONS_FILE: &str = "collections.json";
pub const TAGS_FILE: &str = "tags.json";

/// One snapshot sub-collection plus the remote version it is known-correct
/// as of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSection<T> {
    pub version: u64,
    pub records: Vec<T>,
}

impl<T> Default for SnapshotSection<T> {
    fn default() -> Self {
        Self {
            version: 0,
            records: Vec::new(),
        }
    }
}

/// The whole cached inventory. `cache_keys` are the library keys the
/// snapshot itself occupies (marker item plus attachments) so the
/// reconciler never mistakes its own storage for data.
#[derive(Debug, Clone, Default)]
pub struct InventorySnapshot {
    pub items: SnapshotSection<BibItem>,
    pub collections: SnapshotSection<BibCollection>,
    pub tags: SnapshotSection<String>,
    pub cache_keys: HashSet<String>,
}

impl InventorySnapshot {
    /// The deleted-since feed is shared across sub-collections, so the
    /// baseline is the conservative lower bound of the two keyed sections.
    pub fn baseline_version(&self) -> u64 {
        self.items.version.min(self.collections.version)
    }
}

/// Everything the remote reported since the snapshot's versions.
#[derive(Debug, Clone, Default)]
pub struct RemoteDelta {
    pub deleted: DeletedKeys,
    pub changed_items: Vec<BibItem>,
    pub changed_collections: Vec<BibCollection>,
    pub new_tags: Vec<String>,
    pub remote_version: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionChanges {
    pub items: bool,
    pub collections: bool,
    pub tags: bool,
}

impl SectionChanges {
    pub fn any(self) -> bool {
        self.items || self.collections || self.tags
    }
}

/// Merges a remote delta into a snapshot: deletions first, then
/// replace-by-key for changed records, tags deduped by full equality.
/// Records come back in key order, so applying the same delta is
/// deterministic regardless of feed ordering. Sections that end up
/// identical keep their old version and are flagged unchanged.
pub fn apply_delta(
    snapshot: &InventorySnapshot,
    delta: &RemoteDelta,
) -> (InventorySnapshot, SectionChanges) {
    let pre_items: BTreeMap<String, BibItem> = keyed(&snapshot.items.records, |i| i.key.clone());
    let mut items = pre_items.clone();
    for key in &delta.deleted.items {
        items.remove(key);
    }
    for item in &delta.changed_items {
        items.insert(item.key.clone(), item.clone());
    }

    let pre_collections: BTreeMap<String, BibCollection> =
        keyed(&snapshot.collections.records, |c| c.key.clone());
    let mut collections = pre_collections.clone();
    for key in &delta.deleted.collections {
        collections.remove(key);
    }
    for collection in &delta.changed_collections {
        collections.insert(collection.key.clone(), collection.clone());
    }

    // Tags have no stable key; equality is identity.
    let pre_tags: BTreeSet<String> = snapshot.tags.records.iter().cloned().collect();
    let mut tags = pre_tags.clone();
    for tag in &delta.deleted.tags {
        tags.remove(tag);
    }
    for tag in &delta.new_tags {
        tags.insert(tag.clone());
    }

    let changes = SectionChanges {
        items: items != pre_items,
        collections: collections != pre_collections,
        tags: tags != pre_tags,
    };

    let next = InventorySnapshot {
        items: SnapshotSection {
            version: if changes.items {
                delta.remote_version
            } else {
                snapshot.items.version
            },
            records: items.into_values().collect(),
        },
        collections: SnapshotSection {
            version: if changes.collections {
                delta.remote_version
            } else {
                snapshot.collections.version
            },
            records: collections.into_values().collect(),
        },
        tags: SnapshotSection {
            version: if changes.tags {
                delta.remote_version
            } else {
                snapshot.tags.version
            },
            records: tags.into_iter().collect(),
        },
        cache_keys: snapshot.cache_keys.clone(),
    };

    (next, changes)
}

fn keyed<T: Clone, F: Fn(&T) -> String>(records: &[T], key: F) -> BTreeMap<String, T> {
    records.iter().map(|r| (key(r), r.clone())).collect()
}

/// Summary of one reconciliation cycle.
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub changes: SectionChanges,
    pub baseline_version: u64,
    pub remote_version: u64,
    pub item_count: usize,
    pub collection_count: usize,
    pub tag_count: usize,
}

/// Drives one cycle against the remote store. The snapshot lives in the
/// library itself: three JSON documents attached to one marker item.
pub struct Reconciler<'a> {
    store: &'a dyn BibliographicStore,
    marker_key: String,
    lock_dir: PathBuf,
    collection_id: String,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a dyn BibliographicStore,
        marker_key: impl Into<String>,
        lock_dir: impl Into<PathBuf>,
        collection_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            marker_key: marker_key.into(),
            lock_dir: lock_dir.into(),
            collection_id: collection_id.into(),
        }
    }

    pub async fn run(&self) -> Result<ReconcileOutcome> {
        let _lock = CycleLock::acquire(&self.lock_dir, &self.collection_id)?;

        let (snapshot, attachments) = self.load_snapshot().await?;
        let baseline = snapshot.baseline_version();
        info!(
            "Reconciling inventory from baseline version {} ({} items cached)",
            baseline,
            snapshot.items.records.len()
        );

        let deleted = self.store.deleted_since(baseline).await?;
        let changed_items: Vec<BibItem> = self
            .store
            .items_since(snapshot.items.version)
            .await?
            .into_iter()
            .filter(|item| !snapshot.cache_keys.contains(&item.key))
            .collect();
        let changed_collections = self.store.collections_since(snapshot.collections.version).await?;
        let new_tags = self.store.tags_since(snapshot.tags.version).await?;
        let remote_version = self.store.last_modified_version().await?;

        // A snapshot claiming to be newer than the remote means the library
        // was reset or swapped; the cached state cannot be trusted.
        let declared = snapshot.items.version.max(snapshot.collections.version);
        if declared > remote_version {
            return Err(ArchiveError::Validation(format!(
                "Snapshot version {declared} is newer than the remote library version {remote_version}"
            )));
        }

        let delta = RemoteDelta {
            deleted,
            changed_items,
            changed_collections,
            new_tags,
            remote_version,
        };

        let (next, changes) = apply_delta(&snapshot, &delta);

        if changes.items {
            self.save_section(&attachments, ITEMS_FILE, &next.items).await?;
        }
        if changes.collections {
            self.save_section(&attachments, COLLECTIONS_FILE, &next.collections)
                .await?;
        }
        if changes.tags {
            self.save_section(&attachments, TAGS_FILE, &next.tags).await?;
        }
        if !changes.any() {
            debug!("Inventory unchanged since version {baseline}; nothing written");
        }

        Ok(ReconcileOutcome {
            changes,
            baseline_version: baseline,
            remote_version,
            item_count: next.items.records.len(),
            collection_count: next.collections.records.len(),
            tag_count: next.tags.records.len(),
        })
    }

    async fn load_snapshot(&self) -> Result<(InventorySnapshot, HashMap<String, String>)> {
        let children = self.store.children(&self.marker_key).await?;
        let mut attachments: HashMap<String, String> = HashMap::new();
        for child in &children {
            if let Some(name) = child.filename() {
                attachments.insert(name.to_string(), child.key.clone());
            }
        }

        let items = self.load_section(&attachments, ITEMS_FILE).await?;
        let collections = self.load_section(&attachments, COLLECTIONS_FILE).await?;
        let tags = self.load_section(&attachments, TAGS_FILE).await?;

        let mut cache_keys: HashSet<String> = children.iter().map(|c| c.key.clone()).collect();
        cache_keys.insert(self.marker_key.clone());

        Ok((
            InventorySnapshot {
                items,
                collections,
                tags,
                cache_keys,
            },
            attachments,
        ))
    }

    async fn load_section<T: DeserializeOwned>(
        &self,
        attachments: &HashMap<String, String>,
        filename: &str,
    ) -> Result<SnapshotSection<T>> {
        match attachments.get(filename) {
            Some(key) => {
                let bytes = self.store.attachment_bytes(key).await?;
                Ok(serde_json::from_slice(&bytes)?)
            }
            // First sync: the snapshot starts empty at version 0.
            None => Ok(SnapshotSection::default()),
        }
    }

    async fn save_section<T: Serialize>(
        &self,
        attachments: &HashMap<String, String>,
        filename: &str,
        section: &SnapshotSection<T>,
    ) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(section)?;
        match attachments.get(filename) {
            Some(key) => self.store.replace_attachment(key, filename, &bytes).await,
            None => self
                .store
                .create_attachment(&self.marker_key, filename, &bytes)
                .await
                .map(|_| ()),
        }
    }
}

/// Filesystem mutex keyed on the collection identifier: at most one
/// reconciliation cycle per collection may run at a time, because the delta
/// computation does not commute with a concurrent remote write.
struct CycleLock {
    path: PathBuf,
}

impl CycleLock {
    fn acquire(dir: &Path, collection_id: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("reconcile-{collection_id}.lock"));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(ArchiveError::Validation(
                format!("A reconciliation cycle is already running for collection {collection_id}"),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for CycleLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(key: &str, version: u64) -> BibItem {
        BibItem {
            key: key.to_string(),
            version,
            data: json!({ "title": format!("item {key}") }),
        }
    }

    fn snapshot_with_items(version: u64, keys: &[&str]) -> InventorySnapshot {
        InventorySnapshot {
            items: SnapshotSection {
                version,
                records: keys.iter().map(|k| item(k, version)).collect(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn deletions_apply_before_changed_merges() {
        let snapshot = snapshot_with_items(10, &["A", "B"]);
        let delta = RemoteDelta {
            deleted: DeletedKeys {
                items: vec!["B".to_string()],
                ..Default::default()
            },
            changed_items: vec![item("C", 12)],
            remote_version: 12,
            ..Default::default()
        };

        let (next, changes) = apply_delta(&snapshot, &delta);
        let keys: Vec<&str> = next.items.records.iter().map(|i| i.key.as_str()).collect();

        assert_eq!(keys, vec!["A", "C"]);
        assert!(changes.items);
        assert!(!changes.collections);
        assert_eq!(next.items.version, 12);
    }

    #[test]
    fn empty_delta_is_a_no_op() {
        let snapshot = snapshot_with_items(10, &["A", "B"]);
        let delta = RemoteDelta {
            remote_version: 10,
            ..Default::default()
        };

        let (next, changes) = apply_delta(&snapshot, &delta);

        assert!(!changes.any());
        assert_eq!(next.items.version, 10);
        assert_eq!(next.items.records.len(), 2);
    }

    #[test]
    fn updated_item_replaces_the_stale_entry() {
        let snapshot = snapshot_with_items(10, &["A"]);
        let updated = BibItem {
            key: "A".to_string(),
            version: 11,
            data: json!({ "title": "item A, revised" }),
        };
        let delta = RemoteDelta {
            changed_items: vec![updated.clone()],
            remote_version: 11,
            ..Default::default()
        };

        let (next, changes) = apply_delta(&snapshot, &delta);

        assert!(changes.items);
        assert_eq!(next.items.records.len(), 1);
        assert_eq!(next.items.records[0], updated);
    }

    #[test]
    fn rewriting_an_identical_item_is_not_a_change() {
        let snapshot = snapshot_with_items(10, &["A"]);
        let delta = RemoteDelta {
            changed_items: snapshot.items.records.clone(),
            remote_version: 15,
            ..Default::default()
        };

        let (next, changes) = apply_delta(&snapshot, &delta);

        assert!(!changes.items);
        // Unchanged sections keep the version they were known-correct at.
        assert_eq!(next.items.version, 10);
    }

    #[test]
    fn tags_dedupe_by_full_equality() {
        let snapshot = InventorySnapshot {
            tags: SnapshotSection {
                version: 5,
                records: vec!["location:Chile".to_string(), "commodity:gold".to_string()],
            },
            ..Default::default()
        };
        let delta = RemoteDelta {
            new_tags: vec!["commodity:gold".to_string(), "commodity:copper".to_string()],
            remote_version: 8,
            ..Default::default()
        };

        let (next, changes) = apply_delta(&snapshot, &delta);

        assert!(changes.tags);
        assert_eq!(next.tags.records.len(), 3);
    }

    #[test]
    fn baseline_is_the_minimum_of_the_keyed_sections() {
        let snapshot = InventorySnapshot {
            items: SnapshotSection {
                version: 12,
                records: Vec::new(),
            },
            collections: SnapshotSection {
                version: 7,
                records: Vec::new(),
            },
            ..Default::default()
        };
        assert_eq!(snapshot.baseline_version(), 7);
    }

    #[test]
    fn cycle_lock_excludes_concurrent_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let first = CycleLock::acquire(dir.path(), "4530692").unwrap();
        let second = CycleLock::acquire(dir.path(), "4530692");
        assert!(matches!(second, Err(ArchiveError::Validation(_))));

        drop(first);
        CycleLock::acquire(dir.path(), "4530692").unwrap();
    }
}

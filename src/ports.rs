//! Collaborator contracts. The core calls these; nothing here calls back
//! into the core. Network implementations live in `sciencebase`, `zotero`,
//! and `geokb`; tests substitute in-memory fakes.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// File attached to a repository item, as the repository reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    pub url: String,
    /// Content checksum the repository computed on upload.
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryItem {
    pub id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub identifiers: Vec<ItemIdentifier>,
    pub files: Vec<RemoteFile>,
}

/// Durable identifier on a repository item; upserts are keyed on these,
/// never on position or filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemIdentifier {
    pub scheme: String,
    pub key: String,
}

/// Shell for an item that does not exist remotely yet.
#[derive(Debug, Clone)]
pub struct NewRepositoryItem {
    pub parent_id: String,
    pub title: String,
    pub identifiers: Vec<ItemIdentifier>,
}

/// Archive repository holding the filing items and their files
/// (ScienceBase-shaped).
#[async_trait]
pub trait ReportRepository: Send + Sync {
    async fn get_item(&self, id: &str) -> Result<RepositoryItem>;

    async fn download_file(&self, file: &RemoteFile, dest: &Path) -> Result<()>;

    /// Create-or-update keyed on the shell's identifiers, uploading the
    /// given local files. The returned item reports a checksum per file for
    /// verification.
    async fn upsert_item(
        &self,
        shell: &NewRepositoryItem,
        files: &[PathBuf],
    ) -> Result<RepositoryItem>;

    /// Replaces the like-named file on an existing item.
    async fn replace_file(&self, path: &Path, item_id: &str) -> Result<RepositoryItem>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocabularyCategory {
    AdministrativePlaces,
    Commodities,
}

/// Controlled-vocabulary source (knowledge-graph-shaped). Lookup failure is
/// expected and degrades the affected linkage, never the batch.
#[async_trait]
pub trait VocabularySource: Send + Sync {
    async fn lookup(&self, category: VocabularyCategory) -> Result<HashMap<String, String>>;
}

/// Bibliographic item as the sync store versions it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BibItem {
    pub key: String,
    pub version: u64,
    pub data: serde_json::Value,
}

impl BibItem {
    pub fn filename(&self) -> Option<&str> {
        self.data.get("filename").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BibCollection {
    pub key: String,
    pub version: u64,
    pub name: String,
}

/// Keys (and tag values) deleted since a given library version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletedKeys {
    pub items: Vec<String>,
    pub collections: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedBibItem {
    pub key: String,
    pub url: String,
}

/// Bibliographic store (Zotero-shaped): item creation for published records
/// plus the versioned feeds the Inventory Reconciler consumes.
#[async_trait]
pub trait BibliographicStore: Send + Sync {
    async fn create_item(&self, item: &serde_json::Value) -> Result<CreatedBibItem>;

    async fn items_since(&self, version: u64) -> Result<Vec<BibItem>>;
    async fn collections_since(&self, version: u64) -> Result<Vec<BibCollection>>;
    async fn tags_since(&self, version: u64) -> Result<Vec<String>>;
    async fn deleted_since(&self, version: u64) -> Result<DeletedKeys>;
    async fn last_modified_version(&self) -> Result<u64>;

    /// Child items of a parent (the snapshot's cache attachments).
    async fn children(&self, parent_key: &str) -> Result<Vec<BibItem>>;
    async fn attachment_bytes(&self, key: &str) -> Result<Vec<u8>>;
    async fn create_attachment(
        &self,
        parent_key: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<CreatedBibItem>;
    async fn replace_attachment(&self, key: &str, filename: &str, bytes: &[u8]) -> Result<()>;
}

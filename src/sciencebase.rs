//! Archive repository collaborator (ScienceBase catalog API). Thin network
//! glue behind the `ReportRepository` port.

use crate::config::RepositoryConfig;
use crate::error::{ArchiveError, Result};
use crate::ports::{
    ItemIdentifier, NewRepositoryItem, RemoteFile, ReportRepository, RepositoryItem,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct SbChecksum {
    #[serde(rename = "type")]
    kind: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct SbFile {
    name: String,
    url: String,
    checksum: Option<SbChecksum>,
}

#[derive(Debug, Deserialize)]
struct SbIdentifier {
    scheme: String,
    key: String,
}

#[derive(Debug, Deserialize)]
struct SbItem {
    id: String,
    title: String,
    #[serde(rename = "parentId")]
    parent_id: Option<String>,
    identifiers: Option<Vec<SbIdentifier>>,
    files: Option<Vec<SbFile>>,
}

#[derive(Debug, Deserialize)]
struct SbItemList {
    items: Vec<SbItem>,
}

fn to_repository_item(item: SbItem) -> RepositoryItem {
    RepositoryItem {
        id: item.id,
        parent_id: item.parent_id,
        title: item.title,
        identifiers: item
            .identifiers
            .unwrap_or_default()
            .into_iter()
            .map(|i| ItemIdentifier {
                scheme: i.scheme,
                key: i.key,
            })
            .collect(),
        files: item
            .files
            .unwrap_or_default()
            .into_iter()
            .map(|f| RemoteFile {
                name: f.name,
                url: f.url,
                sha256: f.checksum.filter(|c| c.kind == "sha256").map(|c| c.value),
            })
            .collect(),
    }
}

pub struct ScienceBaseClient {
    client: reqwest::Client,
    endpoint: String,
    access_token: String,
}

impl ScienceBaseClient {
    pub fn new(config: &RepositoryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("Authorization", format!("Bearer {}", self.access_token))
    }

    async fn fetch_item(&self, id: &str) -> Result<SbItem> {
        let url = format!("{}/catalog/item/{id}?format=json", self.endpoint);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Looks up an existing item by its durable identifier key.
    async fn find_by_identifier(&self, key: &str) -> Result<Option<SbItem>> {
        let url = format!(
            "{}/catalog/items?filter=itemIdentifier%3D{key}&format=json",
            self.endpoint
        );
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await?
            .error_for_status()?;
        let list: SbItemList = response.json().await?;
        Ok(list.items.into_iter().next())
    }

    async fn upload_file(&self, item_id: &str, path: &Path) -> Result<()> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArchiveError::MissingField(format!("file name of {}", path.display())))?
            .to_string();
        let bytes = fs::read(path)?;

        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.clone());
        let form = reqwest::multipart::Form::new().part("file", part);

        let url = format!("{}/catalog/item/{item_id}/files", self.endpoint);
        self.authorized(self.client.post(&url))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        debug!("Uploaded {filename} to item {item_id}");
        Ok(())
    }
}

#[async_trait]
impl ReportRepository for ScienceBaseClient {
    async fn get_item(&self, id: &str) -> Result<RepositoryItem> {
        Ok(to_repository_item(self.fetch_item(id).await?))
    }

    async fn download_file(&self, file: &RemoteFile, dest: &Path) -> Result<()> {
        let response = self
            .authorized(self.client.get(&file.url))
            .send()
            .await?
            .error_for_status()?;
        fs::write(dest, response.bytes().await?)?;
        info!("Downloaded '{}' to {}", file.name, dest.display());
        Ok(())
    }

    async fn upsert_item(
        &self,
        shell: &NewRepositoryItem,
        files: &[PathBuf],
    ) -> Result<RepositoryItem> {
        let marker = shell
            .identifiers
            .first()
            .ok_or_else(|| ArchiveError::MissingField("item identifier".to_string()))?;

        let body = json!({
            "parentId": shell.parent_id,
            "title": shell.title,
            "identifiers": shell
                .identifiers
                .iter()
                .map(|i| json!({ "scheme": i.scheme, "key": i.key }))
                .collect::<Vec<_>>(),
        });

        let item_id = match self.find_by_identifier(&marker.key).await? {
            Some(existing) => {
                let url = format!("{}/catalog/item/{}", self.endpoint, existing.id);
                self.authorized(self.client.put(&url))
                    .json(&body)
                    .send()
                    .await?
                    .error_for_status()?;
                existing.id
            }
            None => {
                let url = format!("{}/catalog/item", self.endpoint);
                let created: SbItem = self
                    .authorized(self.client.post(&url))
                    .json(&body)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                created.id
            }
        };

        for path in files {
            self.upload_file(&item_id, path).await?;
        }

        // Re-read so the caller sees the repository's own file inventory,
        // checksums included.
        self.get_item(&item_id).await
    }

    async fn replace_file(&self, path: &Path, item_id: &str) -> Result<RepositoryItem> {
        self.upload_file(item_id, path).await?;
        self.get_item(item_id).await
    }
}

//! Bibliographic sync collaborator (Zotero web API v3). Thin network glue:
//! the reconciler and pipeline only see the `BibliographicStore` port.

use crate::config::BibliographicConfig;
use crate::error::{ArchiveError, Result};
use crate::ports::{
    BibCollection, BibItem, BibliographicStore, CreatedBibItem, DeletedKeys,
};
use crate::types::{ReportRecord, REPOSITORY_ITEM_ID};
use async_trait::async_trait;
use chrono::Datelike;
use serde_json::{json, Value};

/// Maps a published report record onto a bibliographic "report" item.
/// Locations and commodities ride along as namespaced tags.
pub fn bib_item_from_record(record: &ReportRecord) -> Value {
    let mut tags: Vec<Value> = Vec::new();
    for location in &record.locations {
        tags.push(json!({ "tag": format!("location:{}", location.name) }));
    }
    for commodity in &record.commodities {
        tags.push(json!({ "tag": format!("commodity:{}", commodity.name) }));
    }

    let archive_location = record
        .identifiers
        .iter()
        .find(|i| i.name == REPOSITORY_ITEM_ID)
        .and_then(|i| i.url.clone())
        .unwrap_or_default();

    json!({
        "itemType": "report",
        "title": record.title,
        "reportType": record.filing_type,
        "date": record
            .date_published
            .map(|d| d.year().to_string())
            .unwrap_or_default(),
        "pages": record.number_of_pages,
        "language": "en",
        "archive": "ScienceBase",
        "archiveLocation": archive_location,
        "tags": tags,
    })
}

pub struct ZoteroClient {
    client: reqwest::Client,
    endpoint: String,
    library_id: String,
    api_key: String,
}

impl ZoteroClient {
    pub fn new(config: &BibliographicConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            library_id: config.library_id.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn library_url(&self, path: &str) -> String {
        format!("{}/groups/{}/{}", self.endpoint, self.library_id, path)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Zotero-API-Key", &self.api_key)
            .header("Zotero-API-Version", "3")
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let response = self
            .request(reqwest::Method::GET, self.library_url(path))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    fn created_key(response: &Value) -> Result<String> {
        response["successful"]["0"]["key"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ArchiveError::Api {
                message: "Item creation response carried no key".to_string(),
            })
    }
}

#[async_trait]
impl BibliographicStore for ZoteroClient {
    async fn create_item(&self, item: &Value) -> Result<CreatedBibItem> {
        let response: Value = self
            .request(reqwest::Method::POST, self.library_url("items"))
            .json(&json!([item]))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let key = Self::created_key(&response)?;
        let url = self.library_url(&format!("items/{key}"));
        Ok(CreatedBibItem { key, url })
    }

    async fn items_since(&self, version: u64) -> Result<Vec<BibItem>> {
        let body = self.get_json(&format!("items?since={version}&format=json")).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn collections_since(&self, version: u64) -> Result<Vec<BibCollection>> {
        let body = self
            .get_json(&format!("collections?since={version}&format=json"))
            .await?;
        let rows = body.as_array().cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(BibCollection {
                    key: row["key"].as_str()?.to_string(),
                    version: row["version"].as_u64()?,
                    name: row["data"]["name"].as_str().unwrap_or_default().to_string(),
                })
            })
            .collect())
    }

    async fn tags_since(&self, version: u64) -> Result<Vec<String>> {
        let body = self.get_json(&format!("tags?since={version}&format=json")).await?;
        let rows = body.as_array().cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .filter_map(|row| row["tag"].as_str().map(str::to_string))
            .collect())
    }

    async fn deleted_since(&self, version: u64) -> Result<DeletedKeys> {
        let body = self.get_json(&format!("deleted?since={version}")).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn last_modified_version(&self) -> Result<u64> {
        let response = self
            .request(reqwest::Method::GET, self.library_url("items?limit=1&format=json"))
            .send()
            .await?
            .error_for_status()?;

        response
            .headers()
            .get("Last-Modified-Version")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| ArchiveError::Api {
                message: "Library response carried no Last-Modified-Version".to_string(),
            })
    }

    async fn children(&self, parent_key: &str) -> Result<Vec<BibItem>> {
        let body = self
            .get_json(&format!("items/{parent_key}/children?itemType=attachment"))
            .await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn attachment_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .request(reqwest::Method::GET, self.library_url(&format!("items/{key}/file")))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn create_attachment(
        &self,
        parent_key: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<CreatedBibItem> {
        let attachment = json!({
            "itemType": "attachment",
            "linkMode": "imported_file",
            "parentItem": parent_key,
            "title": filename,
            "filename": filename,
            "contentType": "application/json",
        });
        let created = self.create_item(&attachment).await?;
        self.replace_attachment(&created.key, filename, bytes).await?;
        Ok(created)
    }

    async fn replace_attachment(&self, key: &str, filename: &str, bytes: &[u8]) -> Result<()> {
        self.request(reqwest::Method::POST, self.library_url(&format!("items/{key}/file")))
            .header("Content-Type", "application/json")
            .header("X-Zotero-Filename", filename)
            .body(bytes.to_vec())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

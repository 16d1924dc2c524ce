use crate::error::{ArchiveError, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Which PDF text engine the pipeline should drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdfEngineKind {
    Pdftotext,
    Lopdf,
}

impl std::str::FromStr for PdfEngineKind {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pdftotext" => Ok(Self::Pdftotext),
            "lopdf" => Ok(Self::Lopdf),
            other => Err(ArchiveError::Config(format!(
                "Unknown PDF engine '{other}' (expected 'pdftotext' or 'lopdf')"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    pub endpoint: String,
    /// Parent item that archived filings are created under.
    pub archive_item_id: String,
    /// Item whose attached files are the unprocessed raw uploads.
    pub dropbox_item_id: String,
    #[serde(default)]
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BibliographicConfig {
    pub endpoint: String,
    pub library_id: String,
    /// Library item the inventory snapshot documents are attached under.
    pub snapshot_marker_key: String,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VocabularyConfig {
    pub sparql_endpoint: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub repository: RepositoryConfig,
    pub bibliographic: BibliographicConfig,
    pub vocabulary: VocabularyConfig,
    pub cache_dir: PathBuf,
    pub pdf_engine: PdfEngineKind,
}

impl Config {
    /// Loads the TOML config file and merges credentials from the
    /// environment. Credentials never live in the config file; everything
    /// downstream takes the resulting value explicitly.
    pub fn load(config_path: &str) -> Result<Self> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            ArchiveError::Config(format!("Failed to read config file '{config_path}': {e}"))
        })?;

        let mut config: Config = toml::from_str(&config_content)?;

        config.repository.access_token = require_env("GEOARCHIVE_REPO_TOKEN")?;
        config.bibliographic.api_key = require_env("GEOARCHIVE_BIB_API_KEY")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.repository.endpoint.is_empty() {
            return Err(ArchiveError::Config("repository.endpoint is empty".into()));
        }
        if self.repository.dropbox_item_id.is_empty() {
            return Err(ArchiveError::Config(
                "repository.dropbox_item_id is empty".into(),
            ));
        }
        if self.bibliographic.library_id.is_empty() {
            return Err(ArchiveError::Config(
                "bibliographic.library_id is empty".into(),
            ));
        }
        if self.bibliographic.snapshot_marker_key.is_empty() {
            return Err(ArchiveError::Config(
                "bibliographic.snapshot_marker_key is empty".into(),
            ));
        }
        Ok(())
    }
}

fn require_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| ArchiveError::Config(format!("{name} is not set")))
}

//! The per-file processing pipeline: seed a record from the source file
//! name, extract page text, derive dates and term linkages, stage the
//! artifacts under their canonical names, publish, and clean up. Each step
//! takes the record and returns the next record state; one file's failure
//! never aborts its siblings.

use crate::checksum::sha256_file;
use crate::dates;
use crate::error::{ArchiveError, Result};
use crate::linkage;
use crate::pdf::{PageText, PdfTextEngine};
use crate::ports::{
    BibliographicStore, ItemIdentifier, NewRepositoryItem, RemoteFile, ReportRepository,
    VocabularyCategory, VocabularySource,
};
use crate::types::{
    LinkedEntity, MediaArtifact, MediaRole, ReportRecord, REPOSITORY_ITEM_ID,
};
use crate::zotero;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const FILING_ID_SCHEME: &str = "https://www.sciencebase.gov/vocab/identifier/term/sedar-filing-id";

/// Both controlled vocabularies, fetched once per batch. Commodity terms
/// are lowercase at the source; the corpus is lowercased to match.
pub struct VocabularyBundle {
    pub places: linkage::Vocabulary,
    pub commodities: linkage::Vocabulary,
}

impl VocabularyBundle {
    pub async fn load(source: &dyn VocabularySource) -> Result<Self> {
        Ok(Self {
            places: source.lookup(VocabularyCategory::AdministrativePlaces).await?,
            commodities: source.lookup(VocabularyCategory::Commodities).await?,
        })
    }
}

/// Per-item outcome surfaced to batch callers.
#[derive(Debug, Clone, Serialize)]
pub enum ItemStatus {
    Published { item_id: String },
    Degraded { item_id: String, warnings: Vec<String> },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome {
    pub source_name: String,
    pub status: ItemStatus,
}

#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchReport {
    pub fn published(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Published { .. }))
    }

    pub fn degraded(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Degraded { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&ItemStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

pub struct DocumentPipeline<'a> {
    repository: &'a dyn ReportRepository,
    bibliographic: &'a dyn BibliographicStore,
    engine: &'a dyn PdfTextEngine,
    vocabularies: Option<&'a VocabularyBundle>,
    cache_dir: &'a Path,
    archive_item_id: &'a str,
    library_id: &'a str,
}

impl<'a> DocumentPipeline<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: &'a dyn ReportRepository,
        bibliographic: &'a dyn BibliographicStore,
        engine: &'a dyn PdfTextEngine,
        vocabularies: Option<&'a VocabularyBundle>,
        cache_dir: &'a Path,
        archive_item_id: &'a str,
        library_id: &'a str,
    ) -> Self {
        Self {
            repository,
            bibliographic,
            engine,
            vocabularies,
            cache_dir,
            archive_item_id,
            library_id,
        }
    }

    /// Processes every file attached to the dropbox item, one at a time,
    /// and reports a per-item outcome.
    pub async fn run_batch(
        &self,
        dropbox_item_id: &str,
        limit: Option<usize>,
    ) -> Result<BatchReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let dropbox = self.repository.get_item(dropbox_item_id).await?;
        if dropbox.files.is_empty() {
            return Err(ArchiveError::Validation(
                "No files found in the dropbox item".to_string(),
            ));
        }

        let mut outcomes = Vec::new();
        for file in dropbox.files.iter().take(limit.unwrap_or(usize::MAX)) {
            let status = match self.process_file(file).await {
                Ok((record, warnings)) => {
                    let item_id = record
                        .identifier_value(REPOSITORY_ITEM_ID)
                        .unwrap_or_default()
                        .to_string();
                    if warnings.is_empty() {
                        ItemStatus::Published { item_id }
                    } else {
                        ItemStatus::Degraded { item_id, warnings }
                    }
                }
                Err(e) => {
                    error!("Processing failed for '{}': {}", file.name, e);
                    ItemStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            outcomes.push(ItemOutcome {
                source_name: file.name.clone(),
                status,
            });
        }

        Ok(BatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        })
    }

    /// Runs one file through all seven steps. Local working files are
    /// removed only after a verified publish; a failed item keeps them as
    /// the resume cache for the next run.
    #[instrument(skip(self, source), fields(source_name = %source.name))]
    pub async fn process_file(&self, source: &RemoteFile) -> Result<(ReportRecord, Vec<String>)> {
        let record = self.seed(source).await?;
        let (record, pages) = self.extract_text(record)?;
        let (record, warnings) = self.derive_fields(record, &pages);
        let record = finalize_title(record);
        let (record, staged) = self.stage_artifacts(record)?;
        let record = self.publish(record, &staged).await?;
        let record = self.register_bibliographic(record).await?;
        self.refresh_record_file(&record).await?;
        cleanup(&staged)?;
        info!("Archived '{}'", record.title);
        Ok((record, warnings))
    }

    /// Step 1: seed the record from the file name and materialize the raw
    /// PDF locally. An existing local copy is reused; this is the only
    /// caching idempotence point for the raw input.
    async fn seed(&self, source: &RemoteFile) -> Result<ReportRecord> {
        let mut record = ReportRecord::from_source_name(&source.name)?;

        let source_file_id = source
            .url
            .split("%2F")
            .last()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ArchiveError::MissingField(format!("No file id in source URL '{}'", source.url))
            })?
            .to_string();

        let local_path = self.cache_dir.join(format!("{source_file_id}.pdf"));
        if !local_path.exists() {
            self.repository.download_file(source, &local_path).await?;
        }

        record.media.push(MediaArtifact {
            role: MediaRole::MainContent,
            name: format!("PDF Content ({source_file_id})"),
            size_bytes: fs::metadata(&local_path)?.len(),
            encoding_format: "application/pdf".to_string(),
            sha256: sha256_file(&local_path)?,
            source_file_id,
            url: None,
        });
        Ok(record)
    }

    /// Step 2: per-page text, through the configured engine. A previous
    /// run's page artifact is loaded instead of re-parsing; the output
    /// filename is deterministic so re-runs are byte-identical.
    fn extract_text(&self, mut record: ReportRecord) -> Result<(ReportRecord, Vec<PageText>)> {
        let main = record
            .media_by_role(MediaRole::MainContent)
            .ok_or_else(|| ArchiveError::MissingField("main content artifact".to_string()))?;
        let file_id = main.source_file_id.clone();

        let pdf_path = self.cache_dir.join(format!("{file_id}.pdf"));
        let pages_path = self.cache_dir.join(format!("{file_id}.pages.json"));

        let pages: Vec<PageText> = if pages_path.exists() {
            serde_json::from_str(&fs::read_to_string(&pages_path)?)?
        } else {
            let pages = self.engine.extract_pages(&pdf_path)?;
            fs::write(&pages_path, serde_json::to_string_pretty(&pages)?)?;
            pages
        };

        if record.media_by_role(MediaRole::ExtractedText).is_none() {
            record.media.push(MediaArtifact {
                role: MediaRole::ExtractedText,
                name: format!("Page Text Content ({file_id})"),
                size_bytes: fs::metadata(&pages_path)?.len(),
                encoding_format: "application/json".to_string(),
                sha256: sha256_file(&pages_path)?,
                source_file_id: file_id,
                url: None,
            });
            record.number_of_pages = Some(pages.len() as u32);
        }
        Ok((record, pages))
    }

    /// Step 3: effective date and vocabulary linkage. A missing vocabulary
    /// degrades the linkage fields only.
    fn derive_fields(
        &self,
        mut record: ReportRecord,
        pages: &[PageText],
    ) -> (ReportRecord, Vec<String>) {
        let mut warnings = Vec::new();

        // The effective date conventionally sits on the first page with
        // any text.
        if let Some(first_text) = pages.iter().find_map(|p| p.text.as_deref()) {
            record.date_published = dates::most_recent_date(first_text);
        }
        if record.date_published.is_none() {
            warnings.push("No effective date found on the first text page".to_string());
        }

        match self.vocabularies {
            Some(vocab) => {
                let texts: Vec<&str> = pages.iter().filter_map(|p| p.text.as_deref()).collect();
                match linkage::extract_linked_terms(&texts, &vocab.places) {
                    Ok(places) => record.locations = sorted_entities(places),
                    Err(e) => warnings.push(format!("Place linkage failed: {e}")),
                }

                let lowered: Vec<String> = texts.iter().map(|t| t.to_lowercase()).collect();
                match linkage::extract_linked_terms(&lowered, &vocab.commodities) {
                    Ok(commodities) => record.commodities = sorted_entities(commodities),
                    Err(e) => warnings.push(format!("Commodity linkage failed: {e}")),
                }
            }
            None => {
                warn!("Vocabulary source unavailable; linkage skipped for '{}'", record.title);
                warnings.push(
                    "Vocabulary source unavailable; location and commodity linkage skipped"
                        .to_string(),
                );
            }
        }
        (record, warnings)
    }

    /// Step 5: move working files to their canonical filing-id names and
    /// write the record document alongside them.
    fn stage_artifacts(&self, record: ReportRecord) -> Result<(ReportRecord, Vec<PathBuf>)> {
        let filing_id = record.filing_id()?.to_string();
        let mut staged = Vec::new();

        for (role, ext) in [
            (MediaRole::MainContent, "pdf"),
            (MediaRole::ExtractedText, "pages.json"),
        ] {
            let media = record
                .media_by_role(role)
                .ok_or_else(|| ArchiveError::MissingField(format!("{role:?} artifact")))?;
            let from = self.cache_dir.join(format!("{}.{ext}", media.source_file_id));
            let to = self.cache_dir.join(format!("{filing_id}.{ext}"));
            if from != to {
                fs::rename(&from, &to)?;
            }
            staged.push(to);
        }

        let record_path = self.cache_dir.join(format!("{filing_id}.json"));
        fs::write(&record_path, serde_json::to_string_pretty(&record)?)?;
        staged.push(record_path);

        Ok((record, staged))
    }

    /// Step 6: create-or-update the repository item, keyed on the durable
    /// filing identifier, and verify every artifact's checksum against what
    /// the repository reports back.
    async fn publish(&self, mut record: ReportRecord, staged: &[PathBuf]) -> Result<ReportRecord> {
        let filing_id = record.filing_id()?.to_string();
        let shell = NewRepositoryItem {
            parent_id: self.archive_item_id.to_string(),
            title: format!("file archive for SEDAR+ filing ID: {filing_id}"),
            identifiers: vec![ItemIdentifier {
                scheme: FILING_ID_SCHEME.to_string(),
                key: filing_id,
            }],
        };

        let item = self.repository.upsert_item(&shell, staged).await?;
        record.set_identifier(
            REPOSITORY_ITEM_ID,
            item.id.clone(),
            Some(format!("https://w3id.org/usgs/sb/{}", item.id)),
        );

        for media in &mut record.media {
            let remote = item
                .files
                .iter()
                .find(|f| f.sha256.as_deref() == Some(media.sha256.as_str()));
            match remote {
                Some(f) => media.url = Some(f.url.clone()),
                None => {
                    return Err(ArchiveError::Validation(format!(
                        "No repository file matched the checksum for '{}'",
                        media.name
                    )))
                }
            }
        }
        Ok(record)
    }

    /// Create the bibliographic item for the published record and note its
    /// landing page on the record.
    async fn register_bibliographic(&self, mut record: ReportRecord) -> Result<ReportRecord> {
        let bib_item = zotero::bib_item_from_record(&record);
        let created = self.bibliographic.create_item(&bib_item).await?;
        record.landing_url = Some(format!(
            "https://w3id.org/usgs/z/{}/{}",
            self.library_id, created.key
        ));
        Ok(record)
    }

    /// The record gained identifiers and URLs after publish; rewrite its
    /// JSON document and replace the copy attached to the repository item.
    async fn refresh_record_file(&self, record: &ReportRecord) -> Result<()> {
        let filing_id = record.filing_id()?;
        let record_path = self.cache_dir.join(format!("{filing_id}.json"));
        fs::write(&record_path, serde_json::to_string_pretty(record)?)?;

        let item_id = record
            .identifier_value(REPOSITORY_ITEM_ID)
            .ok_or_else(|| ArchiveError::MissingField(REPOSITORY_ITEM_ID.to_string()))?;
        self.repository.replace_file(&record_path, item_id).await?;
        Ok(())
    }
}

/// Step 4: the final human-readable title.
fn finalize_title(mut record: ReportRecord) -> ReportRecord {
    let effective = record
        .date_published
        .map(|d| d.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    record.title = format!(
        "{} filed for {} (effective date {})",
        record.filing_type, record.organization.name, effective
    );
    record
}

/// Step 7: drop local working files after a successful publish.
fn cleanup(staged: &[PathBuf]) -> Result<()> {
    for path in staged {
        fs::remove_file(path)?;
    }
    Ok(())
}

fn sorted_entities(linked: std::collections::HashMap<String, String>) -> Vec<LinkedEntity> {
    let mut entities: Vec<LinkedEntity> = linked
        .into_iter()
        .map(|(name, external_id)| LinkedEntity { name, external_id })
        .collect();
    entities.sort_by(|a, b| a.name.cmp(&b.name));
    entities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReportRecord;

    #[test]
    fn title_includes_type_company_and_date() {
        let mut record = ReportRecord::from_source_name(
            "111 Acme Corp. / Acme Corp. / 222 Technical Report Filing",
        )
        .unwrap();
        record.date_published = chrono::NaiveDate::from_ymd_opt(2023, 3, 3);

        let record = finalize_title(record);
        assert_eq!(
            record.title,
            "NI 43-101 Filing (Filing) filed for Acme Corp. (effective date 2023-03-03)"
        );
    }

    #[test]
    fn missing_date_titles_as_unknown() {
        let record = ReportRecord::from_source_name(
            "111 Acme Corp. / Acme Corp. / 222 Technical Report Filing",
        )
        .unwrap();
        let record = finalize_title(record);
        assert!(record.title.ends_with("(effective date unknown)"));
    }
}

use crate::error::{ArchiveError, Result};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Identifier scheme names carried on report records.
pub const SEDAR_FILING_ID: &str = "SEDAR Filing ID";
pub const REPOSITORY_ITEM_ID: &str = "ScienceBase Item ID";

/// Named identifier attached to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    pub name: String,
    pub value: String,
    pub url: Option<String>,
}

/// The filing company as recovered from the source file name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    pub alternate_name: Option<String>,
    pub sedar_company_id: String,
}

/// A vocabulary term the document was linked to, with its external
/// knowledge-graph identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedEntity {
    pub name: String,
    pub external_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaRole {
    MainContent,
    ExtractedText,
}

/// A file belonging to the archived filing: the raw PDF or the page-text
/// artifact derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaArtifact {
    pub role: MediaRole,
    pub name: String,
    pub size_bytes: u64,
    pub encoding_format: String,
    pub sha256: String,
    /// Original dropbox file id, kept for provenance after renames.
    pub source_file_id: String,
    /// Remote URL, filled in after a verified publish.
    pub url: Option<String>,
}

/// The structured record built up for one filing as it moves through the
/// pipeline. Steps take a record and return the next record state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    pub title: String,
    pub filing_type: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub organization: Organization,
    pub date_published: Option<NaiveDate>,
    pub number_of_pages: Option<u32>,
    pub identifiers: Vec<Identifier>,
    pub media: Vec<MediaArtifact>,
    pub locations: Vec<LinkedEntity>,
    pub commodities: Vec<LinkedEntity>,
    /// Bibliographic landing page, written back after the sync item exists.
    pub landing_url: Option<String>,
}

static PARENTHETICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((.*?)\)").unwrap());

impl ReportRecord {
    /// Seeds a record purely from the dropbox file name. Names follow the
    /// SEDAR export convention:
    /// `<company-id> <legal name (formerly "Old Name")> / <display name (...)> / <filing-id> ... <filing-type>`
    pub fn from_source_name(source_name: &str) -> Result<Self> {
        let parts: Vec<&str> = source_name.split('/').map(str::trim).collect();
        if parts.len() < 3 {
            return Err(ArchiveError::MissingField(format!(
                "Source file name '{source_name}' does not follow the expected delimited convention"
            )));
        }

        let filing_id = first_token(parts[2]).ok_or_else(|| {
            ArchiveError::MissingField(format!("No filing identifier in '{}'", parts[2]))
        })?;
        let filing_kind = parts[2].split_whitespace().last().unwrap_or_default();

        let company_name = parts[1]
            .split('(')
            .next()
            .unwrap_or(parts[1])
            .trim()
            .to_string();
        let company_id = first_token(parts[0]).ok_or_else(|| {
            ArchiveError::MissingField(format!("No company identifier in '{}'", parts[0]))
        })?;

        // Former company names ride along in a parenthetical and help round
        // out the organization entity downstream.
        let qualified_name = parts[0].replacen(company_id.as_str(), "", 1);
        let alternate_name = PARENTHETICAL
            .captures(&qualified_name)
            .map(|c| c[1].to_string())
            .filter(|p| p.to_lowercase().starts_with("formerly"))
            .map(|p| {
                p["formerly".len()..]
                    .replace('"', "")
                    .trim()
                    .to_string()
            })
            .filter(|n| !n.is_empty());

        Ok(Self {
            title: source_name.to_string(),
            filing_type: format!("NI 43-101 Filing ({filing_kind})"),
            abstract_text:
                "an NI 43-101 Technical Report sourced from the GeoArchive collection".to_string(),
            organization: Organization {
                name: company_name,
                alternate_name,
                sedar_company_id: company_id,
            },
            date_published: None,
            number_of_pages: None,
            identifiers: vec![Identifier {
                name: SEDAR_FILING_ID.to_string(),
                value: filing_id,
                url: None,
            }],
            media: Vec::new(),
            locations: Vec::new(),
            commodities: Vec::new(),
            landing_url: None,
        })
    }

    pub fn identifier_value(&self, name: &str) -> Option<&str> {
        self.identifiers
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.value.as_str())
    }

    /// Replace-by-name so a re-published record never carries duplicates.
    pub fn set_identifier(&mut self, name: &str, value: String, url: Option<String>) {
        self.identifiers.retain(|i| i.name != name);
        self.identifiers.push(Identifier {
            name: name.to_string(),
            value,
            url,
        });
    }

    /// The durable marker publishing is keyed on.
    pub fn filing_id(&self) -> Result<&str> {
        self.identifier_value(SEDAR_FILING_ID)
            .ok_or_else(|| ArchiveError::MissingField(SEDAR_FILING_ID.to_string()))
    }

    pub fn media_by_role(&self, role: MediaRole) -> Option<&MediaArtifact> {
        self.media.iter().find(|m| m.role == role)
    }

    pub fn media_by_role_mut(&mut self, role: MediaRole) -> Option<&mut MediaArtifact> {
        self.media.iter_mut().find(|m| m.role == role)
    }
}

fn first_token(s: &str) -> Option<String> {
    s.split_whitespace().next().map(str::to_string)
}

use crate::config::PdfEngineKind;
use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// One page of extracted text. Pages with no extractable text are valid and
/// carry `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub page_num: u32,
    pub text: Option<String>,
}

/// Interchangeable PDF text extraction engines. Both produce the same
/// page-record shape; the pipeline picks one from configuration.
pub trait PdfTextEngine: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>>;
}

pub fn engine_for(kind: PdfEngineKind) -> Box<dyn PdfTextEngine> {
    match kind {
        PdfEngineKind::Pdftotext => Box::new(PdftotextEngine),
        PdfEngineKind::Lopdf => Box::new(LopdfEngine),
    }
}

fn normalize_page_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Splits pdftotext output into per-page records. pdftotext terminates each
/// page with a form feed, so the final split chunk is an empty trailer.
fn pages_from_form_feeds(output: &str) -> Vec<PageText> {
    let mut chunks: Vec<&str> = output.split('\u{0c}').collect();
    if chunks.last() == Some(&"") {
        chunks.pop();
    }

    chunks
        .iter()
        .enumerate()
        .map(|(idx, chunk)| PageText {
            page_num: idx as u32 + 1,
            text: normalize_page_text(chunk),
        })
        .collect()
}

/// Engine backed by the poppler `pdftotext` utility.
pub struct PdftotextEngine;

impl PdfTextEngine for PdftotextEngine {
    fn name(&self) -> &'static str {
        "pdftotext"
    }

    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>> {
        let output = Command::new("pdftotext")
            .arg("-layout")
            .arg(path)
            .arg("-")
            .output()?;

        if !output.status.success() {
            return Err(ArchiveError::Pdf(format!(
                "pdftotext failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let pages = pages_from_form_feeds(&text);
        debug!("pdftotext extracted {} pages from {}", pages.len(), path.display());
        Ok(pages)
    }
}

/// Pure-Rust engine backed by lopdf.
pub struct LopdfEngine;

impl PdfTextEngine for LopdfEngine {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>> {
        let document = lopdf::Document::load(path)
            .map_err(|e| ArchiveError::Pdf(format!("Failed to load {}: {e}", path.display())))?;

        let mut pages = Vec::new();
        for (page_num, _) in document.get_pages() {
            // A page that cannot be decoded is a page without text, not an
            // extraction failure.
            let text = document
                .extract_text(&[page_num])
                .ok()
                .and_then(|t| normalize_page_text(&t));
            pages.push(PageText { page_num, text });
        }
        debug!("lopdf extracted {} pages from {}", pages.len(), path.display());
        Ok(pages)
    }
}

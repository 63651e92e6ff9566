//! Document text extraction for PDF and JSON uploads.
//!
//! The extractor is chosen from the caller-supplied file name, never by sniffing content.
//! PDF pages keep their original 1-based page numbers even when blank pages are dropped.

use crate::processing::types::{Metadata, MetadataValue, PAGE_KEY, SOURCE_KEY, TextUnit};
use lopdf::Document;
use std::fmt;
use thiserror::Error;

/// Errors raised while turning document bytes into text units.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Bytes could not be parsed as the declared document kind.
    #[error("Invalid {kind} document: {details}")]
    MalformedInput {
        /// Declared document kind.
        kind: DocumentKind,
        /// Parser diagnostic.
        details: String,
    },
    /// File name does not map to a supported document kind.
    #[error("document_file must be .pdf or .json (got '{0}')")]
    UnsupportedDocumentType(String),
}

/// Supported document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Paged PDF document.
    Pdf,
    /// Any JSON value.
    Json,
}

impl DocumentKind {
    /// Resolve the kind from a file name extension (case-insensitive).
    pub fn from_file_name(file_name: &str) -> Result<Self, ExtractionError> {
        let lowered = file_name.trim().to_lowercase();
        if lowered.ends_with(".pdf") {
            Ok(Self::Pdf)
        } else if lowered.ends_with(".json") {
            Ok(Self::Json)
        } else {
            Err(ExtractionError::UnsupportedDocumentType(
                file_name.to_string(),
            ))
        }
    }

    /// Extractor implementation for this kind.
    pub fn extractor(self) -> Box<dyn Extractor + Send + Sync> {
        match self {
            Self::Pdf => Box::new(PdfExtractor),
            Self::Json => Box::new(JsonExtractor),
        }
    }

    /// Value stored under the `source` metadata key.
    pub const fn source_tag(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pdf => f.write_str("PDF"),
            Self::Json => f.write_str("JSON"),
        }
    }
}

/// Converts raw document bytes into text units.
pub trait Extractor {
    /// Extract text units from `bytes`.
    fn extract(&self, bytes: &[u8]) -> Result<Vec<TextUnit>, ExtractionError>;
}

/// Extracts one text unit per non-blank PDF page.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<TextUnit>, ExtractionError> {
        let document = Document::load_mem(bytes).map_err(|error| ExtractionError::MalformedInput {
            kind: DocumentKind::Pdf,
            details: error.to_string(),
        })?;

        let mut units = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = match document.extract_text(&[page_no]) {
                Ok(text) => text,
                Err(error) => {
                    tracing::warn!(
                        page = page_no,
                        error = %error,
                        "Dropping page with undecodable text"
                    );
                    continue;
                }
            };

            let trimmed = text.trim();
            if trimmed.is_empty() {
                tracing::debug!(page = page_no, "Dropping blank page");
                continue;
            }

            let mut metadata = Metadata::new();
            metadata.insert(
                SOURCE_KEY.into(),
                MetadataValue::from(DocumentKind::Pdf.source_tag()),
            );
            metadata.insert(PAGE_KEY.into(), MetadataValue::from(page_no));
            units.push(TextUnit::new(trimmed, metadata));
        }

        Ok(units)
    }
}

/// Re-serialises a JSON document as pretty-printed text in a single unit.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonExtractor;

impl Extractor for JsonExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<TextUnit>, ExtractionError> {
        let malformed = |error: serde_json::Error| ExtractionError::MalformedInput {
            kind: DocumentKind::Json,
            details: error.to_string(),
        };
        let value: serde_json::Value = serde_json::from_slice(bytes).map_err(malformed)?;
        let text = serde_json::to_string_pretty(&value).map_err(malformed)?;

        let mut metadata = Metadata::new();
        metadata.insert(
            SOURCE_KEY.into(),
            MetadataValue::from(DocumentKind::Json.source_tag()),
        );
        Ok(vec![TextUnit::new(text, metadata)])
    }
}

//! Error types for the docsift library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`SiftError`] — **Fatal**: the run cannot proceed at all (missing API
//!   credential, unreadable questions file, corrupt corpus, unwritable
//!   output path). Returned as `Err(SiftError)` from the top-level entry
//!   points before any batch work starts.
//!
//! * [`UnitError`] — **Non-fatal**: a single unit of work failed (one PDF,
//!   one page, one query) but every other unit is fine. Recorded in the
//!   run's [`crate::report::ReportLog`] and contained at the unit boundary:
//!   the file is skipped, the page left unenriched, or the query answered
//!   with a fallback prediction.
//!
//! The separation lets a batch of thousands of documents and queries survive
//! individual failures while still aborting immediately on configuration
//! mistakes that would waste an entire run.

use crate::corpus::Category;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docsift library.
///
/// Unit-level failures use [`UnitError`] and are recorded in the report log
/// rather than propagated here.
#[derive(Debug, Error)]
pub enum SiftError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The questions file could not be read or parsed.
    #[error("Failed to read questions file '{path}': {detail}")]
    QuestionsUnreadable { path: PathBuf, detail: String },

    /// A corpus partition file is missing, unreadable, or has the wrong shape.
    #[error("Failed to load {category} corpus from '{path}': {detail}")]
    CorpusLoad {
        category: Category,
        path: PathBuf,
        detail: String,
    },

    /// The input directory for a preprocessing run does not exist.
    #[error("Input directory not found: '{path}'")]
    InputDirNotFound { path: PathBuf },

    /// An auxiliary input file (predictions, ground truth) could not be
    /// read or parsed.
    #[error("Failed to read input file '{path}': {detail}")]
    InputUnreadable { path: PathBuf, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// No language model is configured (missing API key etc.).
    #[error("Language model is not configured.\n{hint}")]
    ProviderNotConfigured { hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_DYNAMIC_LIB_PATH=/path/to/libpdfium to use an existing copy."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single unit of work.
///
/// Each variant names the pipeline stage that failed and carries the key of
/// the failed unit so the report log can identify it without re-running the
/// batch. The batch continues past every one of these.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum UnitError {
    /// A source PDF could not be opened or rasterised. The file is skipped.
    #[error("Document {document_id}: extraction failed: {detail}")]
    Extraction { document_id: u32, detail: String },

    /// A page record was malformed. The page is excluded downstream.
    #[error("Document {document_id} page {page}: malformed record: {detail}")]
    Tagging {
        document_id: u32,
        page: u32,
        detail: String,
    },

    /// A document's page sequence violated the ordering/contiguity invariant.
    /// The document is excluded from the corpus.
    #[error("Document {document_id}: aggregation rejected: {detail}")]
    Aggregation { document_id: u32, detail: String },

    /// The vision call for a page failed after all retries.
    /// The page keeps its raw text but gains no generated description.
    #[error("Document {document_id} page {page}: enrichment call failed after {retries} retries: {detail}")]
    EnrichmentCall {
        document_id: u32,
        page: u32,
        retries: u32,
        detail: String,
    },

    /// The retrieval call for a query failed after all retries.
    /// The query is answered with a fallback prediction.
    #[error("Query {qid}: retrieval call failed after {retries} retries: {detail}")]
    RetrievalCall {
        qid: u32,
        retries: u32,
        detail: String,
    },
}

impl UnitError {
    /// The pipeline stage this error belongs to, for the report log.
    pub fn stage(&self) -> &'static str {
        match self {
            UnitError::Extraction { .. } => "extract",
            UnitError::Tagging { .. } => "tag",
            UnitError::Aggregation { .. } => "aggregate",
            UnitError::EnrichmentCall { .. } => "enrich",
            UnitError::RetrievalCall { .. } => "retrieve",
        }
    }

    /// The identifying key of the failed unit, for the report log.
    pub fn key(&self) -> String {
        match self {
            UnitError::Extraction { document_id, .. }
            | UnitError::Aggregation { document_id, .. } => format!("doc={document_id}"),
            UnitError::Tagging {
                document_id, page, ..
            }
            | UnitError::EnrichmentCall {
                document_id, page, ..
            } => format!("doc={document_id} page={page}"),
            UnitError::RetrievalCall { qid, .. } => format!("qid={qid}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_error_stage_and_key() {
        let e = UnitError::RetrievalCall {
            qid: 42,
            retries: 3,
            detail: "timeout".into(),
        };
        assert_eq!(e.stage(), "retrieve");
        assert_eq!(e.key(), "qid=42");
    }

    #[test]
    fn enrichment_error_display() {
        let e = UnitError::EnrichmentCall {
            document_id: 7,
            page: 3,
            retries: 2,
            detail: "HTTP 503".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("page 3"), "got: {msg}");
        assert!(msg.contains("2 retries"), "got: {msg}");
    }

    #[test]
    fn corpus_load_display_names_category() {
        let e = SiftError::CorpusLoad {
            category: Category::Finance,
            path: PathBuf::from("/corpus/finance.json"),
            detail: "expected object".into(),
        };
        assert!(e.to_string().contains("finance"));
    }

    #[test]
    fn aggregation_key_is_document() {
        let e = UnitError::Aggregation {
            document_id: 15,
            detail: "gap".into(),
        };
        assert_eq!(e.key(), "doc=15");
    }
}

//! # docsift
//!
//! LLM-assisted document retrieval over PDF corpora.
//!
//! ## Why this crate?
//!
//! Heterogeneous document collections (policy documents, financial reports,
//! FAQ banks) carry much of their content in scanned tables and figures
//! that text extraction alone cannot see. docsift preprocesses each PDF
//! into a single merged text blob — native text unioned with
//! vision-model descriptions of image-heavy pages — and then answers
//! natural-language questions by asking a language model to pick the most
//! relevant document from each question's declared candidate set.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDFs (per category)
//!  │
//!  ├─ 1. Extract    rasterise pages + pull text via pdfium (spawn_blocking)
//!  ├─ 2. Tag        table/image content flags (pure heuristics)
//!  ├─ 3. Enrich     vision captions for thin-text image pages (concurrent)
//!  ├─ 4. Aggregate  group pages per document, enforce ordering invariants
//!  ├─ 5. Merge      idempotent text union → corpus partition on disk
//!  │
//!  └─ Retrieve      per-query LLM document selection (concurrent, bounded)
//!        │
//!        └─ Score   precision vs ground truth
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docsift::{retrieve, PipelineConfig, ReportLog};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Model auto-detected from OPENAI_API_KEY
//!     let config = PipelineConfig::default();
//!     let report = ReportLog::in_memory();
//!     let stats = retrieve::retrieve_to_file(
//!         Path::new("questions.json"),
//!         Path::new("corpus/"),
//!         Path::new("predictions.json"),
//!         &config,
//!         &report,
//!     )
//!     .await?;
//!     eprintln!("{}/{} answered, {} errors",
//!         stats.answered, stats.total_queries, report.error_count());
//!     Ok(())
//! }
//! ```
//!
//! ## Failure model
//!
//! Per-unit failures (one PDF, one page, one query) never abort a batch:
//! they are recorded in the run's [`ReportLog`] and the unit is skipped or
//! degraded (a page without a caption, a query answered with its fallback
//! prediction). Only configuration-level problems — missing credential,
//! unreadable inputs, unwritable output — are fatal, and they surface
//! before any work starts.
//!
//! ## Testing without an API key
//!
//! Every external call goes through the [`llm::LanguageModel`] trait;
//! inject a deterministic stub via
//! [`PipelineConfig::builder()`](config::PipelineConfigBuilder::model) to
//! run the whole pipeline offline.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod corpus;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod report;
pub mod retrieve;
pub mod retry;
pub mod score;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use corpus::{
    Category, DocumentRecord, DocumentText, PageRecord, Prediction, Query, ReferenceCorpus,
};
pub use error::{SiftError, UnitError};
pub use llm::{LanguageModel, OpenAiClient};
pub use pipeline::{preprocess_category, PreprocessStats};
pub use progress::{BatchProgress, NoopProgress};
pub use report::ReportLog;
pub use retrieve::{run_retrieval, RetrievalOutput, RetrievalStats};
pub use score::{score, score_files, PrecisionReport};

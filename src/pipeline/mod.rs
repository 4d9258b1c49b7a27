//! Preprocessing pipeline: from a directory of PDFs to a corpus partition.
//!
//! Each submodule implements exactly one transformation step. Keeping
//! stages separate makes each independently testable and lets us swap an
//! implementation (e.g. a different table heuristic) without touching the
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! extract ──▶ tag ──▶ enrich ──▶ aggregate ──▶ merge
//! (pdfium)  (flags)  (vision)   (per-doc)     (text union)
//! ```
//!
//! 1. [`extract`]   — rasterise and text-extract every page of every PDF;
//!    runs in `spawn_blocking` because pdfium is not async-safe
//! 2. [`tag`]       — deterministic content-type flags (tables, images)
//! 3. [`enrich`]    — vision captions for image pages with insufficient
//!    text; the only preprocessing stage with network I/O
//! 4. [`aggregate`] — group pages per document, enforce ordering and
//!    contiguity invariants
//! 5. [`merge`]     — pure, idempotent union of raw text and captions into
//!    one text blob per document
//!
//! Per-unit failures at any stage are recorded in the run's
//! [`crate::report::ReportLog`] and contained: a corrupt file, a malformed
//! page, or a failed vision call never aborts the batch.

pub mod aggregate;
pub mod enrich;
pub mod extract;
pub mod merge;
pub mod tag;

use crate::config::PipelineConfig;
use crate::corpus::{self, Category};
use crate::error::SiftError;
use crate::llm;
use crate::report::ReportLog;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Counters and timings for one preprocessing run.
#[derive(Debug, Clone, Default)]
pub struct PreprocessStats {
    pub files_seen: usize,
    pub documents_extracted: usize,
    pub pages_extracted: usize,
    pub pages_enriched: usize,
    pub enrichment_failures: usize,
    pub documents_written: usize,
    pub documents_rejected: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_duration_ms: u64,
    pub enrich_duration_ms: u64,
}

/// Run the full preprocessing pipeline over one category directory and
/// write its corpus partition file.
///
/// # Errors
/// Fatal only: missing input directory, unconfigured model, unwritable
/// output. Per-file and per-page failures are recorded in `report` and the
/// run continues.
pub async fn preprocess_category(
    input_dir: &Path,
    corpus_dir: &Path,
    category: Category,
    config: &PipelineConfig,
    report: &ReportLog,
) -> Result<(PathBuf, PreprocessStats), SiftError> {
    let total_start = Instant::now();
    info!("Preprocessing {category} corpus from {}", input_dir.display());

    // Resolve the model before any work: a missing credential must abort
    // the run, not surface an hour into enrichment.
    let model = llm::resolve_model(config)?;

    let extracted = extract::extract_directory(input_dir, category, config, report).await?;
    let mut stats = PreprocessStats {
        files_seen: extracted.files_seen,
        documents_extracted: extracted.documents,
        pages_extracted: extracted.pages.len(),
        ..PreprocessStats::default()
    };

    let tagged = tag::tag_pages(extracted.pages, report);

    let enrich_start = Instant::now();
    let (enriched, enrich_stats) = enrich::enrich_pages(&model, tagged, config, report).await;
    stats.enrich_duration_ms = enrich_start.elapsed().as_millis() as u64;
    stats.pages_enriched = enrich_stats.enriched;
    stats.enrichment_failures = enrich_stats.failed;
    stats.prompt_tokens = enrich_stats.prompt_tokens;
    stats.completion_tokens = enrich_stats.completion_tokens;

    let aggregated = aggregate::aggregate_pages(enriched, config.max_page_gap, report);
    stats.documents_rejected = stats.documents_extracted.saturating_sub(aggregated.len());

    let merged = merge::merge_documents(aggregated);
    stats.documents_written = merged.len();

    let partition = merge::to_partition(&merged);
    let path = corpus::write_partition(corpus_dir, category, &partition)?;

    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    info!(
        "Wrote {} {category} documents ({} pages, {} enriched) in {}ms",
        stats.documents_written, stats.pages_extracted, stats.pages_enriched, stats.total_duration_ms
    );

    Ok((path, stats))
}

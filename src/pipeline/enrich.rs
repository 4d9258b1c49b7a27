//! Multimodal enrichment: vision captions for pages whose text layer is
//! too thin to represent them.
//!
//! Selection is the conjunction of the tagger's image flag and the
//! insufficient-text predicate: a page full of extracted text needs no
//! caption even if it carries a logo, and a text-empty page without image
//! content has nothing for a vision model to read either.
//!
//! ## Concurrency
//!
//! Pages are independent, so the whole selected set is dispatched through
//! `buffer_unordered(concurrency)` — the same bounded fan-out the retrieval
//! engine uses. Completion order is arbitrary; identity is preserved
//! because each worker owns its record and hands it back, enriched or not.
//!
//! ## Failure policy
//!
//! A call that errors after all retries leaves the page without a
//! description and records one [`UnitError::EnrichmentCall`]. Downstream
//! treats an absent description as "no enrichment"; the batch never aborts.

use crate::config::PipelineConfig;
use crate::corpus::PageRecord;
use crate::error::UnitError;
use crate::llm::{CompletionRequest, ImageData, LanguageModel};
use crate::prompts::{enrich_user_message, ENRICH_SYSTEM_PROMPT};
use crate::report::ReportLog;
use crate::retry::{with_retries, RetryOutcome};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Counters for one enrichment batch.
#[derive(Debug, Clone, Default)]
pub struct EnrichStats {
    /// Pages that met the selection predicate.
    pub attempted: usize,
    /// Pages that received a description.
    pub enriched: usize,
    /// Pages whose calls exhausted their retries.
    pub failed: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Result of one page's enrichment attempt (the worker's unit of output).
struct EnrichedPage {
    page: PageRecord,
    error: Option<UnitError>,
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Does this page qualify for a vision caption?
pub fn needs_enrichment(page: &PageRecord, min_text_chars: usize) -> bool {
    page.has_image && insufficient_text(&page.raw_text, min_text_chars)
}

/// The shared sufficiency predicate: fewer than `min_chars` non-whitespace
/// characters.
pub fn insufficient_text(text: &str, min_chars: usize) -> bool {
    text.chars().filter(|c| !c.is_whitespace()).count() < min_chars
}

/// Enrich every qualifying page. Every input record appears exactly once in
/// the output; only qualifying pages gain a `generated_description`.
pub async fn enrich_pages(
    model: &Arc<dyn LanguageModel>,
    pages: Vec<PageRecord>,
    config: &PipelineConfig,
    report: &ReportLog,
) -> (Vec<PageRecord>, EnrichStats) {
    let (selected, untouched): (Vec<_>, Vec<_>) = pages
        .into_iter()
        .partition(|p| needs_enrichment(p, config.min_text_chars));

    let mut stats = EnrichStats {
        attempted: selected.len(),
        ..EnrichStats::default()
    };
    info!(
        "Enriching {} of {} pages (concurrency {})",
        selected.len(),
        selected.len() + untouched.len(),
        config.concurrency
    );
    if let Some(ref progress) = config.progress {
        progress.on_batch_start("enrich", selected.len());
    }

    let results: Vec<EnrichedPage> = stream::iter(selected.into_iter().map(|page| {
        let model = Arc::clone(model);
        let config = config.clone();
        async move { enrich_page(&model, page, &config).await }
    }))
    .buffer_unordered(config.concurrency)
    .collect()
    .await;

    let mut output = untouched;
    for result in results {
        let key = format!(
            "doc={} page={}",
            result.page.document_id, result.page.page_number
        );
        match &result.error {
            None => {
                stats.enriched += 1;
                if let Some(ref progress) = config.progress {
                    progress.on_item_done(&key);
                }
            }
            Some(unit_error) => {
                stats.failed += 1;
                report.record(unit_error);
                if let Some(ref progress) = config.progress {
                    progress.on_item_error(&key, &unit_error.to_string());
                }
            }
        }
        stats.prompt_tokens += result.prompt_tokens;
        stats.completion_tokens += result.completion_tokens;
        output.push(result.page);
    }

    if let Some(ref progress) = config.progress {
        progress.on_batch_complete("enrich", stats.enriched, stats.failed);
    }
    (output, stats)
}

/// One worker: a single vision call under the retry budget. Never
/// propagates an error upward — the record always comes back.
async fn enrich_page(
    model: &Arc<dyn LanguageModel>,
    mut page: PageRecord,
    config: &PipelineConfig,
) -> EnrichedPage {
    let Some(ref image) = page.image else {
        // Selection requires an image flag, but the record may have lost its
        // bytes to an encoding failure; treat as nothing to enrich.
        return EnrichedPage {
            page,
            error: None,
            prompt_tokens: 0,
            completion_tokens: 0,
        };
    };

    let request = CompletionRequest {
        system: Some(
            config
                .enrich_prompt
                .clone()
                .unwrap_or_else(|| ENRICH_SYSTEM_PROMPT.to_string()),
        ),
        user: enrich_user_message(&page.raw_text),
        images: vec![ImageData::from_png_bytes(&image.png)],
        temperature: config.temperature,
        max_tokens: config.enrich_max_tokens,
        json_response: false,
    };

    let label = format!("enrich doc={} page={}", page.document_id, page.page_number);
    let outcome = with_retries(&label, config.max_retries, config.retry_backoff_ms, || {
        model.complete(&request)
    })
    .await;

    match outcome {
        RetryOutcome::Success { value, retries } => {
            debug!(
                "{label}: {} chars after {retries} retries",
                value.content.len()
            );
            page.generated_description = Some(value.content.trim().to_string());
            EnrichedPage {
                page,
                error: None,
                prompt_tokens: value.prompt_tokens,
                completion_tokens: value.completion_tokens,
            }
        }
        RetryOutcome::Exhausted { last_error } => {
            let error = UnitError::EnrichmentCall {
                document_id: page.document_id,
                page: page.page_number,
                retries: config.max_retries,
                detail: last_error.to_string(),
            };
            EnrichedPage {
                page,
                error: Some(error),
                prompt_tokens: 0,
                completion_tokens: 0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{Category, PageImage};
    use crate::llm::{Completion, LlmError};
    use async_trait::async_trait;

    fn page(id: u32, number: u32, text: &str, with_image: bool) -> PageRecord {
        let mut p = PageRecord::new(
            id,
            Category::Insurance,
            number,
            text.to_string(),
            with_image.then(|| PageImage {
                png: vec![1, 2, 3],
                width: 10,
                height: 10,
            }),
            u32::from(with_image),
        );
        p.has_image = with_image;
        p
    }

    struct FixedCaption;

    #[async_trait]
    impl LanguageModel for FixedCaption {
        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
            assert_eq!(request.images.len(), 1, "vision call must carry the page image");
            Ok(Completion {
                content: "  a chart of quarterly premiums  ".into(),
                prompt_tokens: 10,
                completion_tokens: 5,
            })
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl LanguageModel for AlwaysFails {
        async fn complete(&self, _: &CompletionRequest) -> Result<Completion, LlmError> {
            Err(LlmError::Api {
                status: 503,
                body: "overloaded".into(),
            })
        }
    }

    #[test]
    fn sufficiency_predicate_ignores_whitespace() {
        assert!(insufficient_text("   \n\t  ", 1));
        assert!(insufficient_text("short", 10));
        assert!(!insufficient_text(&"x".repeat(50), 50));
    }

    #[test]
    fn selection_requires_both_conditions() {
        let long_text = "w".repeat(200);
        assert!(needs_enrichment(&page(1, 1, "", true), 50));
        assert!(!needs_enrichment(&page(1, 1, &long_text, true), 50));
        assert!(!needs_enrichment(&page(1, 1, "", false), 50));
    }

    #[tokio::test]
    async fn enriched_page_gains_trimmed_description() {
        let model: Arc<dyn LanguageModel> = Arc::new(FixedCaption);
        let config = PipelineConfig::builder().max_retries(0).build().unwrap();
        let report = ReportLog::in_memory();

        let input = vec![page(1, 1, "", true), page(1, 2, &"t".repeat(100), true)];
        let (output, stats) = enrich_pages(&model, input, &config, &report).await;

        assert_eq!(output.len(), 2);
        assert_eq!(stats.attempted, 1);
        assert_eq!(stats.enriched, 1);
        assert_eq!(stats.prompt_tokens, 10);

        let enriched = output.iter().find(|p| p.page_number == 1).unwrap();
        assert_eq!(
            enriched.generated_description.as_deref(),
            Some("a chart of quarterly premiums")
        );
        let skipped = output.iter().find(|p| p.page_number == 2).unwrap();
        assert!(skipped.generated_description.is_none());
    }

    #[tokio::test]
    async fn exhausted_retries_leave_page_unenriched() {
        let model: Arc<dyn LanguageModel> = Arc::new(AlwaysFails);
        let config = PipelineConfig::builder()
            .max_retries(1)
            .retry_backoff_ms(1)
            .build()
            .unwrap();
        let report = ReportLog::in_memory();

        let (output, stats) = enrich_pages(&model, vec![page(7, 3, "", true)], &config, &report).await;

        assert_eq!(output.len(), 1, "identity preserved even on failure");
        assert!(output[0].generated_description.is_none());
        assert_eq!(stats.failed, 1);
        assert_eq!(report.error_count(), 1);
        assert!(report.lines()[0].contains("doc=7 page=3"));
    }
}

//! Retrieval engine: answer each query with exactly one prediction.
//!
//! Per query the engine resolves the candidate set (the intersection of the
//! query's declared `source` ids with the corpus partition for its
//! category), embeds every candidate's merged text into one prompt, and
//! asks the model to name the single most relevant document id as JSON.
//!
//! ## Guarantees
//!
//! * **Coverage** — every input query produces exactly one prediction, even
//!   when the model call fails every retry: the engine falls back to the
//!   first candidate so the output file is always complete.
//! * **Containment** — a successfully parsed answer is always a member of
//!   the resolved candidate set; an out-of-set id counts as a parse failure
//!   and is retried like any other.
//!
//! ## Concurrency
//!
//! Queries are independent: the only shared state is the read-only corpus
//! and the append-safe report log. The whole batch is dispatched through
//! `buffer_unordered(concurrency)`; completion order is arbitrary and the
//! final answer list is sorted by qid.

use crate::config::PipelineConfig;
use crate::corpus::{DocumentText, Prediction, Query, ReferenceCorpus};
use crate::error::UnitError;
use crate::llm::{CompletionRequest, LanguageModel};
use crate::prompts::retrieval_prompt;
use crate::report::ReportLog;
use crate::retry::{with_retries, RetryOutcome};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Counters and timings for one retrieval run.
#[derive(Debug, Clone, Default)]
pub struct RetrievalStats {
    pub total_queries: usize,
    /// Queries the model answered and the answer parsed.
    pub answered: usize,
    /// Queries that fell back to the default prediction.
    pub fallbacks: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub duration_ms: u64,
}

/// The full result of a retrieval run.
#[derive(Debug)]
pub struct RetrievalOutput {
    /// One prediction per input query, sorted by qid.
    pub answers: Vec<Prediction>,
    pub stats: RetrievalStats,
}

/// How one query reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Answered,
    FailedFallback,
}

struct QueryResult {
    prediction: Prediction,
    disposition: Disposition,
    error: Option<UnitError>,
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Answer every query. Infallible by construction: per-query failures
/// degrade to fallback predictions and are recorded in `report`.
pub async fn run_retrieval(
    queries: &[Query],
    corpus: &ReferenceCorpus,
    model: &Arc<dyn LanguageModel>,
    config: &PipelineConfig,
    report: &ReportLog,
) -> RetrievalOutput {
    let start = Instant::now();
    let mut stats = RetrievalStats {
        total_queries: queries.len(),
        ..RetrievalStats::default()
    };
    info!(
        "Retrieving over {} queries (concurrency {})",
        queries.len(),
        config.concurrency
    );
    if let Some(ref progress) = config.progress {
        progress.on_batch_start("retrieve", queries.len());
    }

    let results: Vec<QueryResult> = stream::iter(queries.iter().map(|query| {
        let model = Arc::clone(model);
        let config = config.clone();
        async move { answer_query(query, corpus, &model, &config).await }
    }))
    .buffer_unordered(config.concurrency)
    .collect()
    .await;

    let mut answers = Vec::with_capacity(results.len());
    for result in results {
        let key = format!("qid={}", result.prediction.qid);
        match result.disposition {
            Disposition::Answered => {
                stats.answered += 1;
                if let Some(ref progress) = config.progress {
                    progress.on_item_done(&key);
                }
            }
            Disposition::FailedFallback => {
                stats.fallbacks += 1;
                if let Some(ref progress) = config.progress {
                    let detail = result
                        .error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_default();
                    progress.on_item_error(&key, &detail);
                }
            }
        }
        if let Some(ref unit_error) = result.error {
            report.record(unit_error);
        }
        stats.prompt_tokens += result.prompt_tokens;
        stats.completion_tokens += result.completion_tokens;
        answers.push(result.prediction);
    }

    answers.sort_by_key(|p| p.qid);
    stats.duration_ms = start.elapsed().as_millis() as u64;

    if let Some(ref progress) = config.progress {
        progress.on_batch_complete("retrieve", stats.answered, stats.fallbacks);
    }
    info!(
        "Retrieval complete: {}/{} answered, {} fallbacks, {}ms",
        stats.answered, stats.total_queries, stats.fallbacks, stats.duration_ms
    );

    RetrievalOutput { answers, stats }
}

/// One worker: resolve candidates, prompt, parse, or fall back. Always
/// returns a prediction.
async fn answer_query(
    query: &Query,
    corpus: &ReferenceCorpus,
    model: &Arc<dyn LanguageModel>,
    config: &PipelineConfig,
) -> QueryResult {
    // ── Resolve candidates ───────────────────────────────────────────────
    let mut candidates: Vec<(u32, &DocumentText)> = Vec::with_capacity(query.source.len());
    for &id in &query.source {
        match corpus.get(query.category, id) {
            Some(doc) => candidates.push((id, doc)),
            None => warn!(
                "Query {}: candidate {} not found in {} corpus",
                query.qid, id, query.category
            ),
        }
    }

    if candidates.is_empty() {
        // Nothing to prompt with; coverage still demands an answer.
        return QueryResult {
            prediction: Prediction {
                qid: query.qid,
                retrieve: query.source[0],
            },
            disposition: Disposition::FailedFallback,
            error: Some(UnitError::RetrievalCall {
                qid: query.qid,
                retries: 0,
                detail: "no source ids present in corpus".into(),
            }),
            prompt_tokens: 0,
            completion_tokens: 0,
        };
    }

    let candidate_ids: Vec<u32> = candidates.iter().map(|(id, _)| *id).collect();

    // ── Prompt and parse under the retry budget ──────────────────────────
    let request = CompletionRequest {
        system: None,
        user: retrieval_prompt(&query.query, &candidates),
        images: vec![],
        temperature: config.temperature,
        max_tokens: config.retrieve_max_tokens,
        json_response: true,
    };

    let label = format!("retrieve qid={}", query.qid);
    let outcome = with_retries(&label, config.max_retries, config.retry_backoff_ms, || {
        let request = &request;
        let candidate_ids = &candidate_ids;
        async move {
            let completion = model
                .complete(request)
                .await
                .map_err(|e| e.to_string())?;
            let id = parse_retrieval(&completion.content, candidate_ids)?;
            Ok::<_, String>((id, completion.prompt_tokens, completion.completion_tokens))
        }
    })
    .await;

    match outcome {
        RetryOutcome::Success {
            value: (id, prompt_tokens, completion_tokens),
            retries,
        } => {
            debug!("{label}: picked {id} after {retries} retries");
            QueryResult {
                prediction: Prediction {
                    qid: query.qid,
                    retrieve: id,
                },
                disposition: Disposition::Answered,
                error: None,
                prompt_tokens,
                completion_tokens,
            }
        }
        RetryOutcome::Exhausted { last_error } => QueryResult {
            prediction: Prediction {
                qid: query.qid,
                retrieve: candidate_ids[0],
            },
            disposition: Disposition::FailedFallback,
            error: Some(UnitError::RetrievalCall {
                qid: query.qid,
                retries: config.max_retries,
                detail: last_error,
            }),
            prompt_tokens: 0,
            completion_tokens: 0,
        },
    }
}

/// File-to-file convenience wrapper: load questions and corpus, run
/// retrieval, write the predictions atomically.
pub async fn retrieve_to_file(
    questions_path: &std::path::Path,
    corpus_dir: &std::path::Path,
    output_path: &std::path::Path,
    config: &PipelineConfig,
    report: &ReportLog,
) -> Result<RetrievalStats, crate::error::SiftError> {
    let queries = crate::corpus::load_questions(questions_path)?;
    let corpus = ReferenceCorpus::load(corpus_dir)?;
    let model = crate::llm::resolve_model(config)?;

    let output = run_retrieval(&queries, &corpus, &model, config, report).await;
    crate::corpus::write_answers(output_path, &output.answers)?;
    Ok(output.stats)
}

#[derive(Deserialize)]
struct RawAnswer {
    retrieve: serde_json::Value,
}

/// Parse the model's JSON answer and enforce candidate containment.
///
/// Lenient on shape — models return the id as a number or a quoted string,
/// and some wrap the object in markdown fences despite the JSON response
/// mode — but strict on membership: an id outside `candidates` is a parse
/// failure, not an answer.
pub fn parse_retrieval(content: &str, candidates: &[u32]) -> Result<u32, String> {
    let body = strip_fences(content);

    let raw: RawAnswer =
        serde_json::from_str(body).map_err(|e| format!("unparsable answer: {e}"))?;

    let id = match &raw.retrieve {
        serde_json::Value::Number(n) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| format!("answer id {n} is not a valid document id"))?,
        serde_json::Value::String(s) => s
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("answer id '{s}' is not numeric"))?,
        other => return Err(format!("answer id has unexpected type: {other}")),
    };

    if !candidates.contains(&id) {
        return Err(format!("answer id {id} is not in the candidate set"));
    }
    Ok(id)
}

fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_numeric_id() {
        assert_eq!(parse_retrieval(r#"{"retrieve": 101}"#, &[101, 102]), Ok(101));
    }

    #[test]
    fn parse_accepts_string_id() {
        assert_eq!(
            parse_retrieval(r#"{"retrieve": "102"}"#, &[101, 102]),
            Ok(102)
        );
    }

    #[test]
    fn parse_strips_markdown_fences() {
        let content = "```json\n{\"retrieve\": 101}\n```";
        assert_eq!(parse_retrieval(content, &[101]), Ok(101));
    }

    #[test]
    fn out_of_set_id_is_a_parse_failure() {
        let err = parse_retrieval(r#"{"retrieve": 999}"#, &[101, 102]).unwrap_err();
        assert!(err.contains("not in the candidate set"));
    }

    #[test]
    fn garbage_is_a_parse_failure() {
        assert!(parse_retrieval("the best document is 101", &[101]).is_err());
        assert!(parse_retrieval(r#"{"answer": 101}"#, &[101]).is_err());
        assert!(parse_retrieval(r#"{"retrieve": -3}"#, &[101]).is_err());
        assert!(parse_retrieval(r#"{"retrieve": [101]}"#, &[101]).is_err());
    }
}

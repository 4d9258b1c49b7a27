//! Prompts for the enrichment and retrieval model calls.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing how candidates are delimited or
//!    what the caption should cover requires editing exactly one place.
//!
//! 2. **Testability** — unit tests can inspect the assembled prompts
//!    directly without spinning up a real model, so a regression in prompt
//!    assembly (a dropped candidate, a broken delimiter) is caught cheaply.
//!
//! The enrichment prompt can be overridden via
//! [`crate::config::PipelineConfig::enrich_prompt`]; the retrieval prompt is
//! structural (it embeds the candidate corpus) and is always built by
//! [`retrieval_prompt`].

use crate::corpus::DocumentText;

/// System prompt for the vision caption call.
///
/// The page's raw extracted text travels with the image so the model can
/// fill in exactly what the text layer missed (figures, stamps, scanned
/// tables) instead of re-transcribing what extraction already captured.
pub const ENRICH_SYSTEM_PROMPT: &str = "\
You are an assistant that extracts detailed information from document page images.

You will be given:
1. The text already extracted from this page (possibly empty or incomplete)
2. The rendered image of the page

Describe the complete information visible on the page, concentrating on \
content the extracted text does not capture: figures, diagrams, tables, \
stamps, and any text rendered as graphics. Combine it with the extracted \
text where that adds context.

Output requirements:
- Plain text only, no markup and no commentary about the task
- Comprehensive enough that a reader understands the page without seeing it
- Do not repeat long passages already present in the extracted text";

/// Instruction block of the retrieval prompt, ahead of the reference
/// material.
const RETRIEVAL_INSTRUCTIONS: &str = "\
You are a document retrieval assistant. Reference documents are listed \
below, each tagged with its document id. Find the single document most \
relevant to the user's question. The documents may contain similar \
information; weigh their differences and choose the best match.

Answer with a JSON object of exactly this shape, and nothing else:
{\"retrieve\": <document id as an integer>}";

/// Assemble the full retrieval prompt for one query.
///
/// Every candidate is embedded in full, delimited and tagged with its id so
/// the model can only ever name an id that appears in the prompt.
pub fn retrieval_prompt(query: &str, candidates: &[(u32, &DocumentText)]) -> String {
    let mut prompt = String::with_capacity(
        RETRIEVAL_INSTRUCTIONS.len()
            + query.len()
            + candidates.iter().map(|(_, d)| d.text.len() + 64).sum::<usize>(),
    );

    prompt.push_str(RETRIEVAL_INSTRUCTIONS);
    prompt.push_str("\n\nReference documents:\n");
    for (id, doc) in candidates {
        prompt.push_str(&format!("=== document {id} ===\n{}\n=== end document {id} ===\n", doc.text));
    }
    prompt.push_str("\nQuestion:\n");
    prompt.push_str(query);
    prompt
}

/// User message for the enrichment call: the page's extracted text, clearly
/// fenced so an empty text layer reads as empty rather than missing.
pub fn enrich_user_message(raw_text: &str) -> String {
    format!("Extracted text from this page:\n\"\"\"\n{raw_text}\n\"\"\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieval_prompt_embeds_every_candidate() {
        let doc_a = DocumentText {
            text: "claim procedure details".into(),
        };
        let doc_b = DocumentText {
            text: "annual report boilerplate".into(),
        };
        let prompt = retrieval_prompt("claim process", &[(101, &doc_a), (102, &doc_b)]);

        assert!(prompt.contains("=== document 101 ==="));
        assert!(prompt.contains("=== document 102 ==="));
        assert!(prompt.contains("claim procedure details"));
        assert!(prompt.contains("claim process"));
        assert!(prompt.contains("{\"retrieve\""));
    }

    #[test]
    fn enrich_user_message_fences_empty_text() {
        let msg = enrich_user_message("");
        assert!(msg.contains("\"\"\"\n\n\"\"\""));
    }
}

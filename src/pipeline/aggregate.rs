//! Page aggregation: per-document grouping with ordering and contiguity
//! invariants.
//!
//! The output of the concurrent enrichment stage arrives in arbitrary
//! order; this stage restores document structure. A document whose page
//! numbers repeat, whose pages disagree on category, or whose sequence has
//! a hole wider than the tolerated gap is evidence of upstream extraction
//! loss — such a document would produce a silently truncated merged text,
//! so it is excluded from the corpus and logged instead.

use crate::corpus::{DocumentRecord, PageRecord};
use crate::error::UnitError;
use crate::report::ReportLog;
use std::collections::BTreeMap;
use tracing::debug;

/// Group pages into per-document skeletons (`merged_text` not yet set).
///
/// Documents that violate an invariant are dropped and recorded as
/// [`UnitError::Aggregation`].
pub fn aggregate_pages(
    pages: Vec<PageRecord>,
    max_page_gap: u32,
    report: &ReportLog,
) -> Vec<DocumentRecord> {
    let mut groups: BTreeMap<u32, Vec<PageRecord>> = BTreeMap::new();
    for page in pages {
        groups.entry(page.document_id).or_default().push(page);
    }

    let mut documents = Vec::with_capacity(groups.len());
    for (document_id, group) in groups {
        match build_document(document_id, group, max_page_gap) {
            Ok(doc) => {
                debug!("Aggregated doc {} ({} pages)", document_id, doc.pages.len());
                documents.push(doc);
            }
            Err(unit_error) => report.record(&unit_error),
        }
    }
    documents
}

fn build_document(
    document_id: u32,
    mut pages: Vec<PageRecord>,
    max_page_gap: u32,
) -> Result<DocumentRecord, UnitError> {
    pages.sort_by_key(|p| p.page_number);

    let category = pages[0].category;
    if let Some(stray) = pages.iter().find(|p| p.category != category) {
        return Err(UnitError::Aggregation {
            document_id,
            detail: format!(
                "mixed categories: {} and {}",
                category, stray.category
            ),
        });
    }

    for pair in pages.windows(2) {
        let (prev, next) = (pair[0].page_number, pair[1].page_number);
        if next == prev {
            return Err(UnitError::Aggregation {
                document_id,
                detail: format!("duplicate page number {next}"),
            });
        }
        // A gap of `max_page_gap` missing pages is tolerated; more means
        // upstream extraction loss.
        if next - prev > max_page_gap + 1 {
            return Err(UnitError::Aggregation {
                document_id,
                detail: format!(
                    "page sequence jumps from {prev} to {next} (max tolerated gap {max_page_gap})"
                ),
            });
        }
    }

    Ok(DocumentRecord {
        document_id,
        category,
        pages,
        merged_text: String::new(),
    })
}

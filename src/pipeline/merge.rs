//! Text/image merge: the final, pure preprocessing step.
//!
//! For each page the raw extracted text is unioned with the vision caption
//! (when one exists); pages are concatenated in order into the document's
//! canonical `merged_text`. The whole transformation is deterministic and
//! idempotent — re-running it on the same inputs yields byte-identical
//! output, which is what makes corpus rebuilds and incremental re-runs
//! safe to diff.
//!
//! Whitespace normalisation happens here (trailing-space trim, blank-run
//! collapse) precisely so that idempotence holds: normalising already
//! normalised text is a fixed point.

use crate::corpus::{DocumentRecord, DocumentText, PageRecord};
use std::collections::HashMap;

/// Delimiter between pages in the merged blob.
const PAGE_SEPARATOR: &str = "\n\n";

/// Marker introducing a vision caption within a page's block.
const DESCRIPTION_HEADER: &str = "[page description]";

/// Merge every document skeleton: fills `merged_text` and drops the page
/// images (records are frozen once merged; the bytes are no longer needed).
pub fn merge_documents(documents: Vec<DocumentRecord>) -> Vec<DocumentRecord> {
    documents.into_iter().map(merge_document).collect()
}

/// Merge one document.
pub fn merge_document(mut document: DocumentRecord) -> DocumentRecord {
    document.merged_text = merge_text(&document.pages);
    for page in &mut document.pages {
        page.image = None;
    }
    document
}

/// The pure text union over an ordered page slice.
pub fn merge_text(pages: &[PageRecord]) -> String {
    let blocks: Vec<String> = pages.iter().map(page_block).collect();
    blocks
        .iter()
        .filter(|b| !b.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
}

/// One page's contribution: normalised raw text, then the caption under its
/// marker when present.
fn page_block(page: &PageRecord) -> String {
    let raw = normalise(&page.raw_text);
    match page.generated_description.as_deref() {
        Some(description) if !description.trim().is_empty() => {
            let described = format!("{DESCRIPTION_HEADER}\n{}", normalise(description));
            if raw.is_empty() {
                described
            } else {
                format!("{raw}\n\n{described}")
            }
        }
        _ => raw,
    }
}

/// Trailing-whitespace trim per line, blank runs collapsed to one empty
/// line, outer whitespace removed. A fixed point: `normalise(normalise(s))
/// == normalise(s)`.
fn normalise(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut blank_run = 0usize;
    for line in text.lines().map(str::trim_end) {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

/// Project merged documents into the partition map persisted on disk.
pub fn to_partition(documents: &[DocumentRecord]) -> HashMap<u32, DocumentText> {
    documents
        .iter()
        .map(|doc| {
            (
                doc.document_id,
                DocumentText {
                    text: doc.merged_text.clone(),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Category;

    fn page(number: u32, text: &str, description: Option<&str>) -> PageRecord {
        let mut p = PageRecord::new(3, Category::Insurance, number, text.to_string(), None, 0);
        p.generated_description = description.map(str::to_string);
        p
    }

    fn doc(pages: Vec<PageRecord>) -> DocumentRecord {
        DocumentRecord {
            document_id: 3,
            category: Category::Insurance,
            pages,
            merged_text: String::new(),
        }
    }

    #[test]
    fn caption_appended_under_marker() {
        let merged = merge_text(&[page(1, "raw text", Some("a flow chart"))]);
        assert_eq!(merged, "raw text\n\n[page description]\na flow chart");
    }

    #[test]
    fn caption_alone_when_raw_text_empty() {
        let merged = merge_text(&[page(1, "", Some("scanned table of fees"))]);
        assert_eq!(merged, "[page description]\nscanned table of fees");
    }

    #[test]
    fn pages_joined_in_order() {
        let merged = merge_text(&[
            page(1, "first page", None),
            page(2, "", None),
            page(3, "third page", None),
        ]);
        // the empty page contributes nothing, not an empty block
        assert_eq!(merged, "first page\n\nthird page");
    }

    #[test]
    fn merge_is_idempotent() {
        let pages = vec![
            page(1, "line one   \n\n\n\nline two  ", Some("  caption  ")),
            page(2, "  \nsecond page\r\ntail", None),
        ];
        let document = doc(pages);

        let once = merge_document(document.clone());
        let twice = merge_document(once.clone());
        assert_eq!(once.merged_text, twice.merged_text);

        // and byte-identical across fresh runs on the same input
        let again = merge_document(document);
        assert_eq!(once.merged_text, again.merged_text);
    }

    #[test]
    fn normalise_is_a_fixed_point() {
        let messy = "a  \n\n\n\nb\t \n  ";
        assert_eq!(normalise(messy), normalise(&normalise(messy)));
    }

    #[test]
    fn merge_drops_page_images() {
        use crate::corpus::PageImage;
        let mut p = page(1, "text", None);
        p.image = Some(PageImage {
            png: vec![0; 16],
            width: 4,
            height: 4,
        });
        let merged = merge_document(doc(vec![p]));
        assert!(merged.pages[0].image.is_none());
    }

    #[test]
    fn partition_keyed_by_document_id() {
        let mut d = doc(vec![page(1, "hello", None)]);
        d = merge_document(d);
        let partition = to_partition(&[d]);
        assert_eq!(partition.get(&3).unwrap().text, "hello");
    }

    #[test]
    fn blank_description_ignored() {
        let merged = merge_text(&[page(1, "raw", Some("   "))]);
        assert_eq!(merged, "raw");
    }
}

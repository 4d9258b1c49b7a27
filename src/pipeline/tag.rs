//! Content-type tagging: deterministic table/image flags per page.
//!
//! No external calls, no I/O — just heuristic inspection of what the
//! extractor already produced. `has_image` comes straight from pdfium's
//! image-object count; `has_table` from the shape of the raw text: real
//! tables survive text extraction as runs of lines that split into the same
//! multi-column pattern, or as explicitly ruled rows.
//!
//! The flags drive exactly one downstream decision: whether a page is a
//! candidate for vision enrichment. A false positive costs one unnecessary
//! model call; a false negative leaves a page with only its raw text. Both
//! are tolerable, which is why a cheap heuristic is enough here.

use crate::corpus::PageRecord;
use crate::error::UnitError;
use crate::report::ReportLog;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Cell delimiters: a tab, a run of two or more spaces, or a pipe.
static RE_CELL_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}|\t|\|").unwrap());

/// A ruled separator row, e.g. `+----+----+` or `|-----|-----|`.
static RE_RULED_ROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[+|][-+=|\s]{4,}$").unwrap());

/// Minimum columns for a line to count as tabular.
const MIN_COLUMNS: usize = 3;

/// Minimum consecutive tabular lines for a table verdict.
const MIN_TABLE_LINES: usize = 3;

/// Set `has_table`/`has_image` on every record; malformed records are
/// logged and excluded from downstream stages.
pub fn tag_pages(pages: Vec<PageRecord>, report: &ReportLog) -> Vec<PageRecord> {
    let mut tagged = Vec::with_capacity(pages.len());
    for page in pages {
        match tag_page(page) {
            Ok(page) => tagged.push(page),
            Err(unit_error) => report.record(&unit_error),
        }
    }
    tagged
}

/// Tag a single record.
///
/// # Errors
/// [`UnitError::Tagging`] when the record is malformed: a zero page number
/// or raw text containing interior NULs (both indicate an extraction bug,
/// and such a page would corrupt the merged output downstream).
pub fn tag_page(mut page: PageRecord) -> Result<PageRecord, UnitError> {
    if page.page_number == 0 {
        return Err(UnitError::Tagging {
            document_id: page.document_id,
            page: 0,
            detail: "page number must be 1-based".into(),
        });
    }
    if page.raw_text.contains('\0') {
        return Err(UnitError::Tagging {
            document_id: page.document_id,
            page: page.page_number,
            detail: "raw text contains NUL bytes".into(),
        });
    }

    page.has_image = page.image_count > 0;
    page.has_table = looks_like_table(&page.raw_text);
    debug!(
        "Tagged doc {} page {}: table={} image={}",
        page.document_id, page.page_number, page.has_table, page.has_image
    );
    Ok(page)
}

/// Table heuristic on extracted text.
///
/// True when the text contains a ruled separator row, or a run of at least
/// [`MIN_TABLE_LINES`] consecutive lines that each split into
/// [`MIN_COLUMNS`] or more cells.
pub fn looks_like_table(text: &str) -> bool {
    let mut consecutive = 0usize;
    for line in text.lines() {
        if RE_RULED_ROW.is_match(line) {
            return true;
        }
        if column_count(line) >= MIN_COLUMNS {
            consecutive += 1;
            if consecutive >= MIN_TABLE_LINES {
                return true;
            }
        } else {
            consecutive = 0;
        }
    }
    false
}

fn column_count(line: &str) -> usize {
    RE_CELL_SPLIT
        .split(line.trim())
        .filter(|cell| !cell.trim().is_empty())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Category;

    fn page(text: &str, image_count: u32) -> PageRecord {
        PageRecord::new(1, Category::Finance, 1, text.to_string(), None, image_count)
    }

    #[test]
    fn aligned_columns_detected_as_table() {
        let text = "\
Item          Quantity   Price
Widget        12         3.50
Gadget        7          9.99
Sprocket      1          0.25";
        assert!(looks_like_table(text));
    }

    #[test]
    fn prose_is_not_a_table() {
        let text = "This quarterly report covers the period ending June 30.\n\
                    Revenue grew modestly. No material events occurred.";
        assert!(!looks_like_table(text));
    }

    #[test]
    fn two_columnar_lines_are_not_enough() {
        let text = "Name      Value     Unit\nAlpha     1         kg\nplain prose resumes here";
        assert!(!looks_like_table(text));
    }

    #[test]
    fn ruled_row_detected_immediately() {
        assert!(looks_like_table("header\n+------+------+\ncells"));
        assert!(looks_like_table("|------|------|"));
    }

    #[test]
    fn pipe_delimited_rows_count() {
        let text = "a | b | c\nd | e | f\ng | h | i";
        assert!(looks_like_table(text));
    }

    #[test]
    fn empty_text_is_not_a_table() {
        assert!(!looks_like_table(""));
    }

    #[test]
    fn image_flag_follows_object_count() {
        let tagged = tag_page(page("text", 2)).unwrap();
        assert!(tagged.has_image);
        let tagged = tag_page(page("text", 0)).unwrap();
        assert!(!tagged.has_image);
    }

    #[test]
    fn zero_page_number_rejected() {
        let mut p = page("text", 0);
        p.page_number = 0;
        let err = tag_page(p).unwrap_err();
        assert_eq!(err.stage(), "tag");
    }

    #[test]
    fn nul_bytes_rejected_and_logged() {
        let report = ReportLog::in_memory();
        let bad = page("bro\0ken", 0);
        let good = page("fine", 1);
        let tagged = tag_pages(vec![bad, good], &report);
        assert_eq!(tagged.len(), 1);
        assert_eq!(report.error_count(), 1);
    }
}

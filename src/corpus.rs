//! Core records and on-disk formats.
//!
//! Everything the pipeline stages hand each other, and everything that
//! crosses a process boundary, is defined here as an explicit serde type.
//! The reference corpus in particular used to be the kind of data that
//! invites ad hoc JSON dictionaries; loading it through typed records means
//! a malformed partition file fails loudly at startup
//! ([`SiftError::CorpusLoad`]) instead of as a missing-key surprise halfway
//! through a batch.

use crate::error::SiftError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Corpus partition a document or query belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Finance,
    Insurance,
    Faq,
}

impl Category {
    /// All known categories, in corpus-file order.
    pub const ALL: [Category; 3] = [Category::Finance, Category::Insurance, Category::Faq];

    /// File stem of this category's corpus partition file.
    pub fn file_stem(&self) -> &'static str {
        match self {
            Category::Finance => "finance",
            Category::Insurance => "insurance",
            Category::Faq => "faq",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "finance" => Ok(Category::Finance),
            "insurance" => Ok(Category::Insurance),
            "faq" => Ok(Category::Faq),
            other => Err(format!(
                "unknown category '{other}' (expected finance, insurance, or faq)"
            )),
        }
    }
}

/// A rasterised page image, kept as encoded PNG bytes.
///
/// Opaque to every stage except the enricher, which base64-wraps it for the
/// vision API. Holding encoded bytes rather than a decoded bitmap keeps a
/// thousand-page corpus partition at PNG size in memory, not pixel size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// One page of one source document, as it moves through the pipeline.
///
/// Created by the extractor, flagged by the tagger, optionally captioned by
/// the enricher, and frozen once the merger has consumed it.
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub document_id: u32,
    pub category: Category,
    /// 1-based page number within the source document.
    pub page_number: u32,
    /// Text extracted natively from the PDF; empty when the page has none.
    pub raw_text: String,
    /// Rasterised page image, present until the merge stage drops it.
    pub image: Option<PageImage>,
    /// Number of image objects pdfium found on the page.
    pub image_count: u32,
    pub has_table: bool,
    pub has_image: bool,
    /// Vision-model caption attached by the enricher, when the page needed one.
    pub generated_description: Option<String>,
}

impl PageRecord {
    /// A fresh record as the extractor emits it: no flags, no description.
    pub fn new(
        document_id: u32,
        category: Category,
        page_number: u32,
        raw_text: String,
        image: Option<PageImage>,
        image_count: u32,
    ) -> Self {
        Self {
            document_id,
            category,
            page_number,
            raw_text,
            image,
            image_count,
            has_table: false,
            has_image: false,
            generated_description: None,
        }
    }
}

/// A fully aggregated and merged document: the retrieval candidate unit.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub document_id: u32,
    pub category: Category,
    /// Pages sorted strictly ascending by page number.
    pub pages: Vec<PageRecord>,
    /// Canonical text blob: raw text unioned with generated descriptions.
    pub merged_text: String,
}

/// Merged text of one corpus document as persisted on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentText {
    pub text: String,
}

/// One natural-language question with its restricted candidate set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub qid: u32,
    pub category: Category,
    pub query: String,
    /// Candidate document ids; retrieval is restricted to this set.
    pub source: Vec<u32>,
}

/// The answer for one query: the single most relevant document id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub qid: u32,
    pub retrieve: u32,
}

/// Wire shape of the questions input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionFile {
    pub questions: Vec<Query>,
}

/// Wire shape of the predictions output file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerFile {
    pub answers: Vec<Prediction>,
}

/// Wire shape of the ground-truth file consumed by the scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthFile {
    pub ground_truths: Vec<Prediction>,
}

/// Process-wide read-only mapping from `(category, document_id)` to merged
/// document text. Loaded once before retrieval begins, never mutated.
#[derive(Debug, Default)]
pub struct ReferenceCorpus {
    partitions: HashMap<Category, HashMap<u32, DocumentText>>,
}

impl ReferenceCorpus {
    /// Load every category partition file present under `dir`.
    ///
    /// Each partition is a JSON object mapping document id to
    /// `{"text": ...}`. A missing file simply leaves that partition empty
    /// (a run may only involve one category); a present-but-malformed file
    /// is fatal.
    pub fn load(dir: &Path) -> Result<Self, SiftError> {
        let mut partitions = HashMap::new();
        for category in Category::ALL {
            let path = dir.join(format!("{}.json", category.file_stem()));
            if !path.exists() {
                debug!("No {category} partition at {}", path.display());
                continue;
            }
            let docs = load_partition(category, &path)?;
            info!("Loaded {} {category} documents", docs.len());
            partitions.insert(category, docs);
        }
        Ok(Self { partitions })
    }

    /// Build a corpus directly from in-memory partitions.
    pub fn from_partitions(partitions: HashMap<Category, HashMap<u32, DocumentText>>) -> Self {
        Self { partitions }
    }

    /// Look up one document's merged text.
    pub fn get(&self, category: Category, document_id: u32) -> Option<&DocumentText> {
        self.partitions.get(&category)?.get(&document_id)
    }

    /// Number of documents in one category partition.
    pub fn partition_len(&self, category: Category) -> usize {
        self.partitions.get(&category).map_or(0, HashMap::len)
    }

    /// Total number of documents across all partitions.
    pub fn len(&self) -> usize {
        self.partitions.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn load_partition(
    category: Category,
    path: &Path,
) -> Result<HashMap<u32, DocumentText>, SiftError> {
    let raw = std::fs::read_to_string(path).map_err(|e| SiftError::CorpusLoad {
        category,
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    // Keys arrive as JSON strings ("101"); parse them into ids here so the
    // rest of the crate never touches stringly-typed document ids.
    let keyed: HashMap<String, DocumentText> =
        serde_json::from_str(&raw).map_err(|e| SiftError::CorpusLoad {
            category,
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

    let mut docs = HashMap::with_capacity(keyed.len());
    for (key, text) in keyed {
        let id: u32 = key.parse().map_err(|_| SiftError::CorpusLoad {
            category,
            path: path.to_path_buf(),
            detail: format!("document key '{key}' is not a numeric id"),
        })?;
        docs.insert(id, text);
    }
    Ok(docs)
}

/// Write one category partition file atomically (temp file + rename).
pub fn write_partition(
    dir: &Path,
    category: Category,
    docs: &HashMap<u32, DocumentText>,
) -> Result<PathBuf, SiftError> {
    std::fs::create_dir_all(dir).map_err(|e| SiftError::OutputWriteFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let path = dir.join(format!("{}.json", category.file_stem()));

    // String keys on disk, sorted for stable diffs.
    let mut keyed: std::collections::BTreeMap<String, &DocumentText> = std::collections::BTreeMap::new();
    for (id, text) in docs {
        keyed.insert(id.to_string(), text);
    }
    let json = serde_json::to_string_pretty(&keyed)
        .map_err(|e| SiftError::Internal(format!("partition serialise: {e}")))?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| SiftError::OutputWriteFailed {
        path: path.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, &path).map_err(|e| SiftError::OutputWriteFailed {
        path: path.clone(),
        source: e,
    })?;

    Ok(path)
}

/// Read and validate the questions file.
pub fn load_questions(path: &Path) -> Result<Vec<Query>, SiftError> {
    let raw = std::fs::read_to_string(path).map_err(|e| SiftError::QuestionsUnreadable {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let file: QuestionFile =
        serde_json::from_str(&raw).map_err(|e| SiftError::QuestionsUnreadable {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

    let mut seen = std::collections::HashSet::new();
    for q in &file.questions {
        if q.source.is_empty() {
            return Err(SiftError::QuestionsUnreadable {
                path: path.to_path_buf(),
                detail: format!("question {} has an empty source list", q.qid),
            });
        }
        if !seen.insert(q.qid) {
            return Err(SiftError::QuestionsUnreadable {
                path: path.to_path_buf(),
                detail: format!("duplicate qid {}", q.qid),
            });
        }
    }

    info!("Loaded {} questions from {}", file.questions.len(), path.display());
    Ok(file.questions)
}

/// Write the predictions file atomically (temp file + rename) so a crashed
/// run never leaves a truncated output behind.
pub fn write_answers(path: &Path, answers: &[Prediction]) -> Result<(), SiftError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| SiftError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
    }

    let file = AnswerFile {
        answers: answers.to_vec(),
    };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| SiftError::Internal(format!("answers serialise: {e}")))?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| SiftError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    std::fs::rename(&tmp, path).map_err(|e| SiftError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

/// Convert a raw FAQ mapping file (`pid -> arbitrary JSON`) into a corpus
/// partition, stringifying each entry's content.
///
/// FAQ source data ships as structured question/answer JSON rather than
/// PDFs, so it bypasses the preprocessing pipeline entirely and lands in the
/// same `{id: {"text": ...}}` shape the retrieval engine reads for every
/// category.
pub fn import_faq(mapping_path: &Path, corpus_dir: &Path) -> Result<PathBuf, SiftError> {
    let raw = std::fs::read_to_string(mapping_path).map_err(|e| SiftError::CorpusLoad {
        category: Category::Faq,
        path: mapping_path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let mapping: HashMap<String, serde_json::Value> =
        serde_json::from_str(&raw).map_err(|e| SiftError::CorpusLoad {
            category: Category::Faq,
            path: mapping_path.to_path_buf(),
            detail: e.to_string(),
        })?;

    let mut docs = HashMap::with_capacity(mapping.len());
    for (key, value) in mapping {
        let id: u32 = key.parse().map_err(|_| SiftError::CorpusLoad {
            category: Category::Faq,
            path: mapping_path.to_path_buf(),
            detail: format!("FAQ key '{key}' is not a numeric id"),
        })?;
        let text = match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        docs.insert(id, DocumentText { text });
    }

    info!("Imported {} FAQ entries", docs.len());
    write_partition(corpus_dir, Category::Faq, &docs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trip() {
        for cat in Category::ALL {
            assert_eq!(cat.to_string().parse::<Category>().unwrap(), cat);
        }
        assert!("equities".parse::<Category>().is_err());
    }

    #[test]
    fn questions_parse() {
        let json = r#"{"questions": [
            {"qid": 1, "category": "insurance", "query": "claim process", "source": [101, 102]}
        ]}"#;
        let file: QuestionFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.questions.len(), 1);
        assert_eq!(file.questions[0].category, Category::Insurance);
        assert_eq!(file.questions[0].source, vec![101, 102]);
    }

    #[test]
    fn empty_source_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("questions.json");
        std::fs::write(
            &path,
            r#"{"questions": [{"qid": 1, "category": "faq", "query": "x", "source": []}]}"#,
        )
        .unwrap();
        let err = load_questions(&path).unwrap_err();
        assert!(err.to_string().contains("empty source"));
    }

    #[test]
    fn partition_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut docs = HashMap::new();
        docs.insert(
            101,
            DocumentText {
                text: "claim procedure".into(),
            },
        );
        docs.insert(
            102,
            DocumentText {
                text: "boilerplate".into(),
            },
        );
        write_partition(dir.path(), Category::Insurance, &docs).unwrap();

        let corpus = ReferenceCorpus::load(dir.path()).unwrap();
        assert_eq!(corpus.partition_len(Category::Insurance), 2);
        assert_eq!(
            corpus.get(Category::Insurance, 101).unwrap().text,
            "claim procedure"
        );
        assert!(corpus.get(Category::Finance, 101).is_none());
    }

    #[test]
    fn non_numeric_partition_key_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("finance.json"),
            r#"{"abc": {"text": "x"}}"#,
        )
        .unwrap();
        let err = ReferenceCorpus::load(dir.path()).unwrap_err();
        assert!(matches!(err, SiftError::CorpusLoad { .. }));
    }

    #[test]
    fn answers_written_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("pred.json");
        let answers = vec![
            Prediction { qid: 2, retrieve: 7 },
            Prediction { qid: 1, retrieve: 3 },
        ];
        write_answers(&path, &answers).unwrap();

        let parsed: AnswerFile =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.answers, answers);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn faq_import_stringifies_values() {
        let dir = tempfile::tempdir().unwrap();
        let mapping = dir.path().join("pid_map_content.json");
        std::fs::write(
            &mapping,
            r#"{"5": [{"question": "hours?", "answers": ["9-5"]}], "6": "plain entry"}"#,
        )
        .unwrap();

        let corpus_dir = dir.path().join("corpus");
        import_faq(&mapping, &corpus_dir).unwrap();

        let corpus = ReferenceCorpus::load(&corpus_dir).unwrap();
        assert_eq!(corpus.partition_len(Category::Faq), 2);
        assert!(corpus.get(Category::Faq, 5).unwrap().text.contains("hours?"));
        assert_eq!(corpus.get(Category::Faq, 6).unwrap().text, "plain entry");
    }
}

//! Precision scoring of predictions against ground truth.
//!
//! A counting comparison, matched on qid rather than list position so a
//! reordered predictions file scores identically. Predictions without a
//! ground-truth entry are reported rather than silently skipped — they
//! usually mean the wrong ground-truth file was supplied.

use crate::corpus::{AnswerFile, GroundTruthFile, Prediction};
use crate::error::SiftError;
use std::collections::HashMap;
use std::path::Path;

/// One wrong prediction, for the mismatch report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub qid: u32,
    pub predicted: u32,
    pub expected: u32,
}

/// The scorer's full output.
#[derive(Debug, Clone, Default)]
pub struct PrecisionReport {
    /// Predictions that had a ground-truth entry.
    pub total: usize,
    pub correct: usize,
    pub mismatches: Vec<Mismatch>,
    /// Qids predicted but absent from the ground truth.
    pub unmatched_qids: Vec<u32>,
}

impl PrecisionReport {
    /// Fraction of scored predictions that were correct; 0.0 when nothing
    /// could be scored.
    pub fn precision(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// Score a prediction list against ground truth, matching on qid.
pub fn score(predictions: &[Prediction], ground_truths: &[Prediction]) -> PrecisionReport {
    let truth_by_qid: HashMap<u32, u32> = ground_truths
        .iter()
        .map(|t| (t.qid, t.retrieve))
        .collect();

    let mut report = PrecisionReport::default();
    for prediction in predictions {
        match truth_by_qid.get(&prediction.qid) {
            Some(&expected) if expected == prediction.retrieve => {
                report.total += 1;
                report.correct += 1;
            }
            Some(&expected) => {
                report.total += 1;
                report.mismatches.push(Mismatch {
                    qid: prediction.qid,
                    predicted: prediction.retrieve,
                    expected,
                });
            }
            None => report.unmatched_qids.push(prediction.qid),
        }
    }
    report
}

/// Load both files and score them.
pub fn score_files(
    predictions_path: &Path,
    ground_truth_path: &Path,
) -> Result<PrecisionReport, SiftError> {
    let predictions: AnswerFile = read_json(predictions_path)?;
    let ground_truths: GroundTruthFile = read_json(ground_truth_path)?;
    Ok(score(&predictions.answers, &ground_truths.ground_truths))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, SiftError> {
    let raw = std::fs::read_to_string(path).map_err(|e| SiftError::InputUnreadable {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| SiftError::InputUnreadable {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(qid: u32, retrieve: u32) -> Prediction {
        Prediction { qid, retrieve }
    }

    #[test]
    fn perfect_run_scores_one() {
        let truth = vec![p(1, 10), p(2, 20)];
        let report = score(&[p(1, 10), p(2, 20)], &truth);
        assert_eq!(report.correct, 2);
        assert!((report.precision() - 1.0).abs() < f64::EPSILON);
        assert!(report.mismatches.is_empty());
    }

    #[test]
    fn mismatches_are_reported_with_both_ids() {
        let report = score(&[p(1, 10), p(2, 99)], &[p(1, 10), p(2, 20)]);
        assert_eq!(report.correct, 1);
        assert_eq!(
            report.mismatches,
            vec![Mismatch {
                qid: 2,
                predicted: 99,
                expected: 20
            }]
        );
        assert!((report.precision() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn order_does_not_matter() {
        let truth = vec![p(1, 10), p(2, 20), p(3, 30)];
        let shuffled = vec![p(3, 30), p(1, 10), p(2, 20)];
        assert_eq!(score(&shuffled, &truth).correct, 3);
    }

    #[test]
    fn unknown_qids_reported_not_scored() {
        let report = score(&[p(7, 70)], &[p(1, 10)]);
        assert_eq!(report.total, 0);
        assert_eq!(report.unmatched_qids, vec![7]);
        assert_eq!(report.precision(), 0.0);
    }
}

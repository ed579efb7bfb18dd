use crate::data::FailureLabel;
use crate::ml::models::{ModelKind, ModelParams};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Per-class evaluation metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// Precision/recall/F1 per class, accuracy and macro averages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub accuracy: f64,

    /// Keyed by class display name ("Not Failed", "Failed")
    pub per_class: BTreeMap<String, ClassMetrics>,

    pub macro_avg: ClassMetrics,

    /// `[[tn, fp], [fn, tp]]`
    pub confusion_matrix: [[usize; 2]; 2],
}

impl ClassificationReport {
    pub fn compute(y_true: &[usize], y_pred: &[usize]) -> Self {
        let mut confusion = [[0usize; 2]; 2];
        for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
            confusion[t.min(1)][p.min(1)] += 1;
        }

        let n_samples = y_true.len();
        let correct = confusion[0][0] + confusion[1][1];
        let accuracy = if n_samples > 0 {
            correct as f64 / n_samples as f64
        } else {
            0.0
        };

        let mut per_class = BTreeMap::new();
        let mut macro_avg = ClassMetrics {
            precision: 0.0,
            recall: 0.0,
            f1_score: 0.0,
            support: n_samples,
        };

        for class_idx in 0..2 {
            let other = 1 - class_idx;
            let tp = confusion[class_idx][class_idx];
            let fp = confusion[other][class_idx];
            let fn_count = confusion[class_idx][other];

            let precision = ratio(tp, tp + fp);
            let recall = ratio(tp, tp + fn_count);
            let f1_score = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };

            macro_avg.precision += precision / 2.0;
            macro_avg.recall += recall / 2.0;
            macro_avg.f1_score += f1_score / 2.0;

            per_class.insert(
                FailureLabel::from_index(class_idx).to_string(),
                ClassMetrics {
                    precision,
                    recall,
                    f1_score,
                    support: tp + fn_count,
                },
            );
        }

        Self {
            accuracy,
            per_class,
            macro_avg,
            confusion_matrix: confusion,
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den > 0 {
        num as f64 / den as f64
    } else {
        0.0
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>12} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        for (name, m) in &self.per_class {
            writeln!(
                f,
                "{:>12} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                name, m.precision, m.recall, m.f1_score, m.support
            )?;
        }
        writeln!(
            f,
            "{:>12} {:>10} {:>10} {:>10.2} {:>10}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        write!(
            f,
            "{:>12} {:>10.2} {:>10.2} {:>10.2} {:>10}",
            "macro avg",
            self.macro_avg.precision,
            self.macro_avg.recall,
            self.macro_avg.f1_score,
            self.macro_avg.support
        )
    }
}

/// Held-out evaluation of one trained candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub candidate: String,
    pub kind: ModelKind,
    pub params: ModelParams,
    pub report: ClassificationReport,
    pub roc_auc: f64,
}

/// Area under the ROC curve via the Mann-Whitney rank statistic.
///
/// Tied scores share their average rank. Returns `None` when either class is
/// absent (the curve is undefined).
pub fn roc_auc(y_true: &[usize], scores: &[f64]) -> Option<f64> {
    debug_assert_eq!(y_true.len(), scores.len());

    let n_pos = y_true.iter().filter(|&&y| y == 1).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based; a tie group shares the mean of its positions
        let rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }

    let pos_rank_sum: f64 = y_true
        .iter()
        .zip(ranks.iter())
        .filter(|&(y, _)| *y == 1)
        .map(|(_, r)| *r)
        .sum();

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Some((pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

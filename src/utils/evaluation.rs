use serde::{Deserialize, Serialize};

use crate::models::base_model::Label;

/// Classification metrics of an outlier model against known labels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub processed_instances: usize,
    pub anomaly_rate: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub auroc: f64,
}

/// Compare predictions with ground truth.
///
/// # Arguments
/// * `truth` - `true` where the instance is a known outlier
/// * `predicted` - Model labels, same order
/// * `abnormality` - Higher means more abnormal, same order; used for AUROC
pub fn evaluate(truth: &[bool], predicted: &[Label], abnormality: &[f64]) -> DetectionReport {
    let n = truth.len().min(predicted.len()).min(abnormality.len());
    let truth = &truth[..n];
    let predicted = &predicted[..n];

    let (precision, recall, f1) = calculate_threshold_metrics(truth, predicted);
    let flagged = predicted.iter().filter(|l| l.is_anomaly()).count();

    DetectionReport {
        processed_instances: n,
        anomaly_rate: if n > 0 { flagged as f64 / n as f64 } else { 0.0 },
        precision,
        recall,
        f1,
        auroc: calculate_auroc(truth, &abnormality[..n]),
    }
}

// Helper function to calculate precision, recall, F1 score from predicted labels
fn calculate_threshold_metrics(truth: &[bool], predicted: &[Label]) -> (f64, f64, f64) {
    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut fn_count = 0.0;

    for (&label, prediction) in truth.iter().zip(predicted.iter()) {
        match (label, prediction.is_anomaly()) {
            (true, true) => tp += 1.0,
            (false, true) => fp += 1.0,
            (true, false) => fn_count += 1.0,
            (false, false) => {},
        }
    }

    let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
    let recall = if tp + fn_count > 0.0 { tp / (tp + fn_count) } else { 0.0 };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    (precision, recall, f1)
}

// Rank-sum AUROC with averaged ranks for ties; 0.5 when only one class is present.
fn calculate_auroc(truth: &[bool], abnormality: &[f64]) -> f64 {
    let positives = truth.iter().filter(|&&t| t).count();
    let negatives = truth.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..abnormality.len()).collect();
    order.sort_by(|&a, &b| abnormality[a].total_cmp(&abnormality[b]));

    let mut ranks = vec![0.0; order.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && abnormality[order[j + 1]] == abnormality[order[i]] {
            j += 1;
        }
        // ranks are 1-based
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }

    let positive_rank_sum: f64 = truth
        .iter()
        .zip(ranks.iter())
        .filter(|(&t, _)| t)
        .map(|(_, &r)| r)
        .sum();
    let p = positives as f64;
    (positive_rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64)
}

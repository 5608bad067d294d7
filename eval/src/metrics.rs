// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Evaluation metrics for binary sequence classification
//!
//! Implements:
//! - Confusion matrix over binary calls (sensitivity, specificity, MCC)
//! - ACC / MSE / SCC over signed predictions (libsvm-style)
//! - ROC sweep with trapezoidal AUC

use crate::datasets::Label;
use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

fn ratio(num: f64, denom: f64) -> f64 {
    if denom == 0.0 {
        0.0
    } else {
        num / denom
    }
}

fn check_lengths(predicted: usize, truth: usize) -> Result<()> {
    if predicted != truth {
        return Err(EvalError::consistency(format!(
            "{} predictions for {} ground truth labels",
            predicted, truth
        )));
    }
    Ok(())
}

/// Binary calls counted against known labels. Class-tagged and unlabeled
/// entries are left out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tp: usize,
    pub tn: usize,
    pub fp: usize,
    pub fn_: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(predicted: &[Label], truth: &[Label]) -> Result<Self> {
        check_lengths(predicted.len(), truth.len())?;
        let mut matrix = Self::default();
        for (p, t) in predicted.iter().zip(truth) {
            if let (Some(p), Some(t)) = (p.as_signed(), t.as_signed()) {
                matrix.record(p > 0.0, t > 0.0);
            }
        }
        Ok(matrix)
    }

    /// Count signed margin outputs. A truth of 0 marks an unlabeled
    /// sequence and is skipped.
    pub fn from_signed(predicted: &[f64], truth: &[f64]) -> Result<Self> {
        check_lengths(predicted.len(), truth.len())?;
        let mut matrix = Self::default();
        for (&p, &t) in predicted.iter().zip(truth) {
            if t != 0.0 {
                matrix.record(p > 0.0, t > 0.0);
            }
        }
        Ok(matrix)
    }

    fn record(&mut self, called: bool, actual: bool) {
        match (called, actual) {
            (true, true) => self.tp += 1,
            (false, false) => self.tn += 1,
            (true, false) => self.fp += 1,
            (false, true) => self.fn_ += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.positives() + self.negatives()
    }

    /// Sequences whose true label is positive
    pub fn positives(&self) -> usize {
        self.tp + self.fn_
    }

    pub fn negatives(&self) -> usize {
        self.tn + self.fp
    }

    pub fn accuracy(&self) -> f64 {
        ratio((self.tp + self.tn) as f64, self.total() as f64)
    }

    /// TP / (TP + FN)
    pub fn sensitivity(&self) -> f64 {
        ratio(self.tp as f64, self.positives() as f64)
    }

    /// TN / (TN + FP)
    pub fn specificity(&self) -> f64 {
        ratio(self.tn as f64, self.negatives() as f64)
    }

    /// TP / (TP + FP)
    pub fn precision(&self) -> f64 {
        ratio(self.tp as f64, (self.tp + self.fp) as f64)
    }

    pub fn f1(&self) -> f64 {
        ratio(2.0 * self.tp as f64, (2 * self.tp + self.fp + self.fn_) as f64)
    }

    /// Matthews correlation coefficient, 0 when any margin of the table is empty
    pub fn mcc(&self) -> f64 {
        let [tp, tn, fp, fn_] = [self.tp, self.tn, self.fp, self.fn_].map(|c| c as f64);
        let spread = (tp + fp) * (tp + fn_) * (tn + fp) * (tn + fn_);
        ratio(tp * tn - fp * fn_, spread.sqrt())
    }
}

/// Derived rates of one confusion matrix, as printed after a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub matrix: ConfusionMatrix,
    pub accuracy: f64,
    pub sensitivity: f64,
    pub specificity: f64,
    pub precision: f64,
    pub f1: f64,
    pub mcc: f64,
}

impl From<ConfusionMatrix> for ClassificationReport {
    fn from(matrix: ConfusionMatrix) -> Self {
        Self {
            accuracy: matrix.accuracy(),
            sensitivity: matrix.sensitivity(),
            specificity: matrix.specificity(),
            precision: matrix.precision(),
            f1: matrix.f1(),
            mcc: matrix.mcc(),
            matrix,
        }
    }
}

impl ClassificationReport {
    pub fn from_predictions(predicted: &[Label], truth: &[Label]) -> Result<Self> {
        ConfusionMatrix::from_predictions(predicted, truth).map(Self::from)
    }

    pub fn format(&self) -> String {
        let m = &self.matrix;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Binary calls on {} labeled sequences ({} positive, {} negative)",
            m.total(),
            m.positives(),
            m.negatives()
        );
        let _ = writeln!(out, "  TP {:>6}   FN {:>6}", m.tp, m.fn_);
        let _ = writeln!(out, "  FP {:>6}   TN {:>6}", m.fp, m.tn);
        for (name, value) in [
            ("accuracy", self.accuracy),
            ("sensitivity", self.sensitivity),
            ("specificity", self.specificity),
            ("precision", self.precision),
            ("f1", self.f1),
            ("mcc", self.mcc),
        ] {
            let _ = writeln!(out, "  {:<12} {:.4}", name, value);
        }
        out
    }
}

/// Accuracy, mean squared error and squared correlation coefficient of
/// signed predictions. Accuracy is a fraction in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Accuracy {
    pub acc: f64,
    pub mse: f64,
    pub scc: f64,
}

impl Accuracy {
    /// Compare `predicted` against `truth`, skipping entries whose truth is 0
    /// (unknown label).
    pub fn evaluate(truth: &[f64], predicted: &[f64]) -> Self {
        let pairs: Vec<(f64, f64)> = truth
            .iter()
            .zip(predicted)
            .filter(|(t, _)| **t != 0.0)
            .map(|(&t, &p)| (t, p))
            .collect();

        if pairs.is_empty() {
            return Self::default();
        }

        let n = pairs.len() as f64;
        let mut correct = 0usize;
        let (mut sum_v, mut sum_y, mut sum_vv, mut sum_yy, mut sum_vy) = (0.0, 0.0, 0.0, 0.0, 0.0);
        let mut total_error = 0.0;

        for &(y, v) in &pairs {
            if y == v {
                correct += 1;
            }
            total_error += (v - y) * (v - y);
            sum_v += v;
            sum_y += y;
            sum_vv += v * v;
            sum_yy += y * y;
            sum_vy += v * y;
        }

        let denom = (n * sum_vv - sum_v * sum_v) * (n * sum_yy - sum_y * sum_y);
        let scc = if denom == 0.0 {
            0.0
        } else {
            (n * sum_vy - sum_v * sum_y).powi(2) / denom
        };

        Self {
            acc: correct as f64 / n,
            mse: total_error / n,
            scc,
        }
    }
}

/// A swept ROC curve. Point i corresponds to `thresholds[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocCurve {
    pub tp_rate: Vec<f64>,
    pub fp_rate: Vec<f64>,
    pub thresholds: Vec<f64>,
    pub auc: f64,
}

impl RocCurve {
    /// Sweep the midpoints between consecutive descending scores.
    ///
    /// At each threshold a score `>= threshold` counts as a positive call.
    /// The area is integrated from (0,0) through the swept points to (1,1).
    /// Tied scores are kept, so equal neighbours produce a repeated point.
    pub fn sweep(scores: &[f64], positives: &[bool]) -> Result<Self> {
        if scores.len() != positives.len() {
            return Err(EvalError::consistency(format!(
                "{} scores for {} labels",
                scores.len(),
                positives.len()
            )));
        }
        if scores.len() < 2 {
            return Err(EvalError::consistency(format!(
                "ROC needs at least 2 scored identifiers, got {}",
                scores.len()
            )));
        }

        let n_pos = positives.iter().filter(|p| **p).count();
        let n_neg = positives.len() - n_pos;
        if n_pos == 0 || n_neg == 0 {
            return Err(EvalError::consistency(format!(
                "ROC needs both classes ({} positive, {} negative)",
                n_pos, n_neg
            )));
        }

        let mut sorted = scores.to_vec();
        sorted.sort_by(|a, b| b.total_cmp(a));

        let thresholds: Vec<f64> = sorted.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
        let mut tp_rate = Vec::with_capacity(thresholds.len());
        let mut fp_rate = Vec::with_capacity(thresholds.len());

        for &thr in &thresholds {
            let (mut tp, mut fp) = (0usize, 0usize);
            for (&score, &positive) in scores.iter().zip(positives) {
                if score >= thr {
                    if positive {
                        tp += 1;
                    } else {
                        fp += 1;
                    }
                }
            }
            tp_rate.push(tp as f64 / n_pos as f64);
            fp_rate.push(fp as f64 / n_neg as f64);
        }

        let auc = trapezoid_auc(&fp_rate, &tp_rate);

        Ok(Self {
            tp_rate,
            fp_rate,
            thresholds,
            auc,
        })
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }
}

/// Trapezoidal area under (x, y), anchored at (0,0) and (1,1)
fn trapezoid_auc(x: &[f64], y: &[f64]) -> f64 {
    let mut auc = 0.0;
    let (mut x_prev, mut y_prev) = (0.0, 0.0);
    for (&xi, &yi) in x.iter().zip(y).chain(std::iter::once((&1.0, &1.0))) {
        auc += (xi - x_prev) * (yi + y_prev) / 2.0;
        x_prev = xi;
        y_prev = yi;
    }
    auc
}

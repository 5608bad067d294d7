// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Per-sequence prediction results
//!
//! A predictor returns either state paths with likelihoods
//! ([`PathResult`]) or signed decision values ([`MarginResult`]). Both are
//! keyed by sequence identifier and keep the labels of what was predicted,
//! so fold results can be merged and compared afterwards.

use crate::datasets::{Label, SequenceCollection};
use crate::decode::Decoder;
use crate::error::{EvalError, Result};
use crate::metrics::{Accuracy, RocCurve};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Decoded state path of one sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathEntry {
    pub path: Vec<usize>,
    pub likelihood: f64,
    pub sequence: String,
    pub seqlen: usize,
    /// Decoded path in engine orientation, filled on first pattern search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded: Option<String>,
}

/// A sequence with its decoded path wrapped into fixed-width lines
#[derive(Debug, Clone, Serialize)]
pub struct DecodedRecord {
    pub id: String,
    pub header: String,
    pub raw_seq: String,
    pub raw_path: String,
    pub seq_lines: Vec<String>,
    pub path_lines: Vec<String>,
}

/// Results of a path-labeling model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathResult {
    name: String,
    identifiers: Vec<String>,
    entries: HashMap<String, PathEntry>,
    labels: HashMap<String, Label>,
    reversed: bool,
    decoder: Option<Decoder>,
}

impl PathResult {
    /// Pair engine output with the collection it was computed over.
    ///
    /// Paths and likelihoods must come in collection order, one per sequence.
    pub fn new(
        name: impl Into<String>,
        collection: &SequenceCollection,
        paths: Vec<Vec<usize>>,
        likelihoods: Vec<f64>,
        reversed: bool,
    ) -> Result<Self> {
        let name = name.into();
        if paths.len() != collection.len() || likelihoods.len() != collection.len() {
            return Err(EvalError::consistency(format!(
                "{}: engine returned {} paths and {} likelihoods for {} sequences",
                name,
                paths.len(),
                likelihoods.len(),
                collection.len()
            )));
        }

        let mut entries = HashMap::with_capacity(collection.len());
        for ((seq, path), likelihood) in collection.iter().zip(paths).zip(likelihoods) {
            entries.insert(
                seq.id().to_string(),
                PathEntry {
                    path,
                    likelihood,
                    sequence: seq.sequence().to_string(),
                    seqlen: seq.len(),
                    decoded: None,
                },
            );
        }

        Ok(Self {
            name,
            identifiers: collection.identifiers().to_vec(),
            entries,
            labels: collection.labels().clone(),
            reversed,
            decoder: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    pub fn labels(&self) -> &HashMap<String, Label> {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    /// Whether sequences were reversed before decoding
    pub fn reversed(&self) -> bool {
        self.reversed
    }

    /// Attach a decoder; strings cached under the previous one are dropped
    pub fn set_decoder(&mut self, decoder: Decoder) {
        self.decoder = Some(decoder);
        for entry in self.entries.values_mut() {
            entry.decoded = None;
        }
    }

    pub fn decoder(&self) -> Option<&Decoder> {
        self.decoder.as_ref()
    }

    pub fn entry(&self, id: &str) -> Result<&PathEntry> {
        self.entries
            .get(id)
            .ok_or_else(|| EvalError::lookup(format!("{}: no result for '{}'", self.name, id)))
    }

    pub fn likelihood(&self, id: &str) -> Result<f64> {
        Ok(self.entry(id)?.likelihood)
    }

    fn decode_forward(&self, id: &str) -> Result<String> {
        let entry = self.entry(id)?;
        if let Some(decoded) = &entry.decoded {
            return Ok(decoded.clone());
        }
        let decoder = self
            .decoder
            .as_ref()
            .ok_or_else(|| EvalError::lookup(format!("{}: no decoder attached", self.name)))?;
        decoder.decode(&entry.path)
    }

    /// Decoded path of `id`, reversed after decoding when `reverse` is set
    pub fn decode(&self, id: &str, reverse: bool) -> Result<String> {
        let decoded = self.decode_forward(id)?;
        Ok(if reverse { decoded.chars().rev().collect() } else { decoded })
    }

    /// First match of `pattern` in the decoded path as a 1-based start and
    /// inclusive end position.
    pub fn find_positions(&mut self, id: &str, pattern: &str, reverse: bool) -> Result<Option<(usize, usize)>> {
        let regex = Regex::new(pattern)?;
        let decoded = self.decode_forward(id)?;
        if let Some(entry) = self.entries.get_mut(id) {
            if entry.decoded.is_none() {
                entry.decoded = Some(decoded.clone());
            }
        }

        let haystack: String = if reverse { decoded.chars().rev().collect() } else { decoded };
        Ok(regex.find(&haystack).map(|m| {
            let start = haystack[..m.start()].chars().count();
            let end = haystack[..m.end()].chars().count();
            (start + 1, end)
        }))
    }

    /// Decode every sequence, wrapping sequence and path at `col` characters
    pub fn decode_all(&self, col: usize, reverse: bool) -> Result<Vec<DecodedRecord>> {
        let col = col.max(1);
        self.identifiers
            .iter()
            .map(|id| {
                let decoded = self.decode(id, reverse)?;
                let sequence = &self.entry(id)?.sequence;
                let seq_chars: Vec<char> = sequence.chars().collect();
                let path_chars: Vec<char> = decoded.chars().collect();

                let mut seq_lines = Vec::new();
                let mut path_lines = Vec::new();
                for start in (0..seq_chars.len()).step_by(col) {
                    let end = (start + col).min(seq_chars.len());
                    seq_lines.push(seq_chars[start..end].iter().collect());
                    let path_start = start.min(path_chars.len());
                    let path_end = end.min(path_chars.len());
                    path_lines.push(path_chars[path_start..path_end].iter().collect());
                }

                Ok(DecodedRecord {
                    id: id.clone(),
                    header: format!(">{}", id),
                    raw_seq: sequence.clone(),
                    raw_path: decoded,
                    seq_lines,
                    path_lines,
                })
            })
            .collect()
    }

    /// Absorb `other`. Identifiers must not overlap; nothing is changed
    /// when they do.
    pub fn merge(&mut self, other: PathResult) -> Result<()> {
        if let Some(dup) = other.identifiers.iter().find(|id| self.entries.contains_key(*id)) {
            return Err(EvalError::consistency(format!(
                "cannot merge {} into {}: '{}' is already present",
                other.name, self.name, dup
            )));
        }
        let PathResult {
            identifiers,
            mut entries,
            labels,
            decoder,
            ..
        } = other;
        for id in identifiers {
            if let Some(entry) = entries.remove(&id) {
                self.entries.insert(id.clone(), entry);
                self.identifiers.push(id);
            }
        }
        self.labels.extend(labels);
        if self.decoder.is_none() {
            self.decoder = decoder;
        }
        Ok(())
    }
}

/// Decision value of one sequence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarginEntry {
    /// Predicted label (+1 / -1)
    pub label: f64,
    pub value: f64,
    pub seqlen: usize,
}

/// Results of a margin classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginResult {
    name: String,
    identifiers: Vec<String>,
    entries: HashMap<String, MarginEntry>,
    labels: HashMap<String, Label>,
    accuracy: Accuracy,
}

impl MarginResult {
    pub fn new(
        name: impl Into<String>,
        collection: &SequenceCollection,
        predicted: Vec<f64>,
        values: Vec<f64>,
        accuracy: Accuracy,
    ) -> Result<Self> {
        let name = name.into();
        if predicted.len() != collection.len() || values.len() != collection.len() {
            return Err(EvalError::consistency(format!(
                "{}: engine returned {} labels and {} values for {} sequences",
                name,
                predicted.len(),
                values.len(),
                collection.len()
            )));
        }

        let entries = collection
            .iter()
            .zip(predicted.into_iter().zip(values))
            .map(|(seq, (label, value))| {
                (
                    seq.id().to_string(),
                    MarginEntry {
                        label,
                        value,
                        seqlen: seq.len(),
                    },
                )
            })
            .collect();

        Ok(Self {
            name,
            identifiers: collection.identifiers().to_vec(),
            entries,
            labels: collection.labels().clone(),
            accuracy,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    pub fn labels(&self) -> &HashMap<String, Label> {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    pub fn entry(&self, id: &str) -> Result<&MarginEntry> {
        self.entries
            .get(id)
            .ok_or_else(|| EvalError::lookup(format!("{}: no result for '{}'", self.name, id)))
    }

    pub fn score(&self, id: &str) -> Result<f64> {
        Ok(self.entry(id)?.value)
    }

    pub fn accuracy(&self) -> f64 {
        self.accuracy.acc
    }

    pub fn mse(&self) -> f64 {
        self.accuracy.mse
    }

    pub fn scc(&self) -> f64 {
        self.accuracy.scc
    }

    pub fn stats(&self) -> Accuracy {
        self.accuracy
    }

    fn truth(&self, id: &str) -> Option<f64> {
        self.labels.get(id).and_then(Label::as_signed)
    }

    fn recalc_stats(&mut self) {
        let (truth, predicted): (Vec<f64>, Vec<f64>) = self
            .identifiers
            .iter()
            .filter_map(|id| self.entries.get(id).map(|e| (self.truth(id).unwrap_or(0.0), e.label)))
            .unzip();
        self.accuracy = Accuracy::evaluate(&truth, &predicted);
    }

    /// Fraction of labeled sequences classified correctly when
    /// `value >= threshold` is called positive
    pub fn calc_acc(&self, threshold: f64) -> f64 {
        let mut correct = 0usize;
        let mut total = 0usize;
        for id in &self.identifiers {
            let (Some(truth), Some(entry)) = (self.truth(id), self.entries.get(id)) else {
                continue;
            };
            total += 1;
            if (truth > 0.0) == (entry.value >= threshold) {
                correct += 1;
            }
        }
        if total == 0 {
            return 0.0;
        }
        correct as f64 / total as f64
    }

    /// Best `(accuracy, threshold)` over midpoints of the sorted decision values
    pub fn calc_threshold(&self) -> (f64, f64) {
        let mut values: Vec<f64> = self.entries.values().map(|e| e.value).collect();
        values.sort_by(|a, b| b.total_cmp(a));

        let (mut best_acc, mut best_thr) = (0.0, 0.0);
        for w in values.windows(2) {
            let thr = (w[0] + w[1]) / 2.0;
            let acc = self.calc_acc(thr);
            if acc > best_acc {
                best_acc = acc;
                best_thr = thr;
            }
        }
        (best_acc, best_thr)
    }

    /// ROC over this classifier's own decision values (labeled sequences only)
    pub fn roc(&self) -> Result<RocCurve> {
        let mut scores = Vec::new();
        let mut positives = Vec::new();
        for id in &self.identifiers {
            if let (Some(truth), Some(entry)) = (self.truth(id), self.entries.get(id)) {
                scores.push(entry.value);
                positives.push(truth > 0.0);
            }
        }
        RocCurve::sweep(&scores, &positives)
    }

    /// Absorb `other`; overlapping identifiers take the incoming entry.
    /// Accuracy statistics are recomputed over the merged set.
    pub fn merge(&mut self, other: MarginResult) {
        let MarginResult {
            identifiers,
            mut entries,
            labels,
            ..
        } = other;
        for id in identifiers {
            if let Some(entry) = entries.remove(&id) {
                if self.entries.insert(id.clone(), entry).is_none() {
                    self.identifiers.push(id);
                }
            }
        }
        self.labels.extend(labels);
        self.recalc_stats();
    }
}

/// Output of [`Predictor::predict`](crate::predictor::Predictor::predict)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictionResult {
    Path(PathResult),
    Margin(MarginResult),
}

impl PredictionResult {
    pub fn name(&self) -> &str {
        match self {
            PredictionResult::Path(r) => r.name(),
            PredictionResult::Margin(r) => r.name(),
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        match self {
            PredictionResult::Path(r) => r.set_name(name),
            PredictionResult::Margin(r) => r.set_name(name),
        }
    }

    pub fn identifiers(&self) -> &[String] {
        match self {
            PredictionResult::Path(r) => r.identifiers(),
            PredictionResult::Margin(r) => r.identifiers(),
        }
    }

    pub fn labels(&self) -> &HashMap<String, Label> {
        match self {
            PredictionResult::Path(r) => r.labels(),
            PredictionResult::Margin(r) => r.labels(),
        }
    }

    pub fn len(&self) -> usize {
        self.identifiers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers().is_empty()
    }

    /// Likelihood for path results, decision value for margin results
    pub fn score(&self, id: &str) -> Result<f64> {
        match self {
            PredictionResult::Path(r) => r.likelihood(id),
            PredictionResult::Margin(r) => r.score(id),
        }
    }

    pub fn seqlen(&self, id: &str) -> Result<usize> {
        match self {
            PredictionResult::Path(r) => Ok(r.entry(id)?.seqlen),
            PredictionResult::Margin(r) => Ok(r.entry(id)?.seqlen),
        }
    }

    pub fn as_path(&self) -> Option<&PathResult> {
        match self {
            PredictionResult::Path(r) => Some(r),
            PredictionResult::Margin(_) => None,
        }
    }

    pub fn as_path_mut(&mut self) -> Option<&mut PathResult> {
        match self {
            PredictionResult::Path(r) => Some(r),
            PredictionResult::Margin(_) => None,
        }
    }

    pub fn as_margin(&self) -> Option<&MarginResult> {
        match self {
            PredictionResult::Margin(r) => Some(r),
            PredictionResult::Path(_) => None,
        }
    }

    fn require_path(&self) -> Result<&PathResult> {
        self.as_path()
            .ok_or_else(|| EvalError::lookup(format!("{}: result has no state paths", self.name())))
    }

    pub fn decode(&self, id: &str, reverse: bool) -> Result<String> {
        self.require_path()?.decode(id, reverse)
    }

    pub fn find_positions(&mut self, id: &str, pattern: &str, reverse: bool) -> Result<Option<(usize, usize)>> {
        let name = self.name().to_string();
        self.as_path_mut()
            .ok_or_else(|| EvalError::lookup(format!("{}: result has no state paths", name)))?
            .find_positions(id, pattern, reverse)
    }

    pub fn merge(&mut self, other: PredictionResult) -> Result<()> {
        match (self, other) {
            (PredictionResult::Path(a), PredictionResult::Path(b)) => a.merge(b),
            (PredictionResult::Margin(a), PredictionResult::Margin(b)) => {
                a.merge(b);
                Ok(())
            }
            (a, b) => Err(EvalError::consistency(format!(
                "cannot merge {} into {}: result kinds differ",
                b.name(),
                a.name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::Sequence;

    fn collection(name: &str, ids: &[(&str, &str)]) -> SequenceCollection {
        SequenceCollection::from_sequences(name, ids.iter().map(|(id, s)| Sequence::new(*id, *s)))
    }

    fn path_result(name: &str, ids: &[(&str, &str)], reversed: bool) -> PathResult {
        let col = collection(name, ids);
        let paths = col
            .iter()
            .map(|s| s.sequence().chars().map(|c| if c == 'A' { 0 } else { 1 }).collect())
            .collect();
        let likelihoods = (0..col.len()).map(|i| -(i as f64) - 1.0).collect();
        let mut result = PathResult::new(name, &col, paths, likelihoods, reversed).unwrap();
        result.set_decoder(Decoder::from_symbols("io"));
        result
    }

    #[test]
    fn test_path_result_count_mismatch() {
        let col = collection("d", &[("s1", "AC"), ("s2", "CA")]);
        let err = PathResult::new("d", &col, vec![vec![0, 1]], vec![-1.0], false);
        assert!(matches!(err, Err(EvalError::Consistency { .. })));
    }

    #[test]
    fn test_decode_and_reverse() {
        let result = path_result("d", &[("s1", "AACCC")], false);
        assert_eq!(result.decode("s1", false).unwrap(), "iiooo");
        assert_eq!(result.decode("s1", true).unwrap(), "oooii");
        assert!(matches!(result.decode("nope", false), Err(EvalError::Lookup { .. })));
    }

    #[test]
    fn test_decode_without_decoder() {
        let col = collection("d", &[("s1", "A")]);
        let result = PathResult::new("d", &col, vec![vec![0]], vec![-1.0], false).unwrap();
        assert!(matches!(result.decode("s1", false), Err(EvalError::Lookup { .. })));
    }

    #[test]
    fn test_find_positions() {
        let mut result = path_result("d", &[("s1", "AACCCA")], false);
        assert_eq!(result.find_positions("s1", "o+", false).unwrap(), Some((3, 5)));
        assert!(result.entry("s1").unwrap().decoded.is_some());
        assert_eq!(result.find_positions("s1", "x", false).unwrap(), None);
        // "iioooi" reversed is "ioooii"
        assert_eq!(result.find_positions("s1", "o+", true).unwrap(), Some((2, 4)));
        assert!(matches!(
            result.find_positions("s1", "(", false),
            Err(EvalError::Pattern(_))
        ));
    }

    #[test]
    fn test_new_decoder_replaces_cached_decode() {
        let mut result = path_result("d", &[("s1", "AACCCA")], false);
        assert_eq!(result.find_positions("s1", "o+", false).unwrap(), Some((3, 5)));
        assert!(result.entry("s1").unwrap().decoded.is_some());

        result.set_decoder(Decoder::from_symbols("MN"));
        assert!(result.entry("s1").unwrap().decoded.is_none());
        assert_eq!(result.decode("s1", false).unwrap(), "MMNNNM");
        assert_eq!(result.find_positions("s1", "o+", false).unwrap(), None);
        assert_eq!(result.find_positions("s1", "N+", false).unwrap(), Some((3, 5)));
    }

    #[test]
    fn test_decode_all_wraps() {
        let result = path_result("d", &[("s1", "AAAAACC")], false);
        let records = result.decode_all(3, false).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].header, ">s1");
        assert_eq!(records[0].seq_lines, vec!["AAA", "AAC", "C"]);
        assert_eq!(records[0].path_lines, vec!["iii", "iio", "o"]);
    }

    #[test]
    fn test_path_merge_collision_leaves_target_untouched() {
        let mut a = path_result("a", &[("s1", "A"), ("s2", "C")], false);
        let b = path_result("b", &[("s3", "A"), ("s2", "A")], false);
        let err = a.merge(b);
        assert!(matches!(err, Err(EvalError::Consistency { .. })));
        assert_eq!(a.len(), 2);
        assert!(a.entry("s3").is_err());

        let c = path_result("c", &[("s3", "A")], false);
        a.merge(c).unwrap();
        assert_eq!(a.identifiers(), &["s1", "s2", "s3"]);
    }

    fn margin_result(name: &str, rows: &[(&str, Label, f64)]) -> MarginResult {
        let col = SequenceCollection::from_sequences(
            name,
            rows.iter().map(|(id, label, _)| Sequence::new(*id, "ACDE").with_label(label.clone())),
        );
        let values: Vec<f64> = rows.iter().map(|r| r.2).collect();
        let predicted: Vec<f64> = values.iter().map(|v| if *v >= 0.0 { 1.0 } else { -1.0 }).collect();
        let truth: Vec<f64> = rows.iter().map(|r| r.1.as_signed().unwrap_or(0.0)).collect();
        let accuracy = Accuracy::evaluate(&truth, &predicted);
        MarginResult::new(name, &col, predicted, values, accuracy).unwrap()
    }

    #[test]
    fn test_margin_merge_overwrites_and_recalcs() {
        let mut a = margin_result("a", &[("s1", Label::Positive, -0.5), ("s2", Label::Negative, -1.0)]);
        assert!((a.accuracy() - 0.5).abs() < 1e-12);

        let b = margin_result("b", &[("s1", Label::Positive, 0.7)]);
        a.merge(b);

        assert_eq!(a.len(), 2);
        assert!((a.score("s1").unwrap() - 0.7).abs() < 1e-12);
        assert!((a.accuracy() - 1.0).abs() < 1e-12);
        assert!(a.mse().abs() < 1e-12);
    }

    #[test]
    fn test_calc_threshold_and_roc() {
        let r = margin_result(
            "m",
            &[
                ("s1", Label::Positive, 2.0),
                ("s2", Label::Positive, 0.5),
                ("s3", Label::Negative, 0.2),
                ("s4", Label::Negative, -1.0),
            ],
        );
        assert!((r.calc_acc(0.0) - 0.75).abs() < 1e-12);
        let (acc, thr) = r.calc_threshold();
        assert!((acc - 1.0).abs() < 1e-12);
        assert!((thr - 0.35).abs() < 1e-12);
        assert!((r.roc().unwrap().auc - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_mixed_merge_is_consistency_error() {
        let mut p = PredictionResult::Path(path_result("p", &[("s1", "A")], false));
        let m = PredictionResult::Margin(margin_result("m", &[("s2", Label::Positive, 1.0)]));
        assert!(matches!(p.merge(m), Err(EvalError::Consistency { .. })));
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn test_prediction_result_score_and_decode() {
        let p = PredictionResult::Path(path_result("p", &[("s1", "AC"), ("s2", "CC")], false));
        assert_eq!(p.score("s2").unwrap(), -2.0);
        assert_eq!(p.seqlen("s1").unwrap(), 2);
        assert_eq!(p.decode("s1", false).unwrap(), "io");

        let m = PredictionResult::Margin(margin_result("m", &[("s1", Label::Positive, 1.5)]));
        assert_eq!(m.score("s1").unwrap(), 1.5);
        assert!(matches!(m.decode("s1", false), Err(EvalError::Lookup { .. })));
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Multi-model result aggregation
//!
//! A [`ResultSet`] collects the scores several models gave the same
//! sequences, so that models can be compared per sequence (likelihood
//! ratio or per-residue difference) and across a pool of origins (ROC).

use crate::datasets::Label;
use crate::error::{EvalError, Result};
use crate::metrics::RocCurve;
use crate::result::PredictionResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Score one model gave one sequence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub score: f64,
    pub seqlen: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Record {
    origin: String,
    scores: HashMap<String, ScoreEntry>,
}

/// How scores are fed to [`ResultSet::roc`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RocMode {
    #[default]
    Raw,
    /// Score divided by sequence length
    PerResidue,
}

type PairCache = HashMap<(String, String), HashMap<String, f64>>;

/// Scores of several models over the same identifiers
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    records: HashMap<String, Record>,
    identifiers: Vec<String>,
    models: Vec<String>,
    labels: HashMap<String, Label>,
    ratios: Option<PairCache>,
    diffs: Option<PairCache>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every identifier of `result` under `model_name`.
    ///
    /// The first registration of an identifier fixes its origin. Empty
    /// `test_origin` or `model_name` fall back to the result's name. A second
    /// add under the same model overwrites the earlier score.
    pub fn add(&mut self, result: &PredictionResult, test_origin: &str, model_name: &str) -> Result<()> {
        let origin = if test_origin.is_empty() { result.name() } else { test_origin };
        let model = if model_name.is_empty() { result.name() } else { model_name };

        if !self.models.iter().any(|m| m == model) {
            self.models.push(model.to_string());
        }

        for id in result.identifiers() {
            let entry = ScoreEntry {
                score: result.score(id)?,
                seqlen: result.seqlen(id)?,
            };
            if !self.records.contains_key(id) {
                self.identifiers.push(id.clone());
            }
            self.records
                .entry(id.clone())
                .or_insert_with(|| Record {
                    origin: origin.to_string(),
                    scores: HashMap::new(),
                })
                .scores
                .insert(model.to_string(), entry);
        }

        self.labels
            .extend(result.labels().iter().map(|(k, v)| (k.clone(), v.clone())));
        self.ratios = None;
        self.diffs = None;
        Ok(())
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    pub fn labels(&self) -> &HashMap<String, Label> {
        &self.labels
    }

    fn record(&self, id: &str) -> Result<&Record> {
        self.records
            .get(id)
            .ok_or_else(|| EvalError::lookup(format!("'{}' is not in the result set", id)))
    }

    fn entry(&self, id: &str, model: &str) -> Result<&ScoreEntry> {
        self.record(id)?
            .scores
            .get(model)
            .ok_or_else(|| EvalError::lookup(format!("'{}' has no score from model '{}'", id, model)))
    }

    pub fn get_origin(&self, id: &str) -> Result<&str> {
        Ok(&self.record(id)?.origin)
    }

    pub fn get_likelihood(&self, id: &str, model: &str) -> Result<f64> {
        Ok(self.entry(id, model)?.score)
    }

    /// Scores of `id` under every model that has scored it
    pub fn get_likelihoods(&self, id: &str) -> Result<HashMap<String, f64>> {
        let record = self.record(id)?;
        Ok(record
            .scores
            .iter()
            .map(|(model, entry)| (model.clone(), entry.score))
            .collect())
    }

    /// Length of `id` as recorded by the first model that scored it
    pub fn get_seqlen(&self, id: &str) -> Result<usize> {
        let record = self.record(id)?;
        self.models
            .iter()
            .find_map(|m| record.scores.get(m))
            .map(|e| e.seqlen)
            .ok_or_else(|| EvalError::lookup(format!("'{}' has no scores", id)))
    }

    pub fn ids_by_origin(&self, origin: &str) -> Vec<&String> {
        self.identifiers
            .iter()
            .filter(|id| self.records.get(*id).is_some_and(|r| r.origin == origin))
            .collect()
    }

    /// Every ordered model pair (i < j) in registration order
    pub fn model_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (i, a) in self.models.iter().enumerate() {
            for b in &self.models[i + 1..] {
                pairs.push((a.clone(), b.clone()));
            }
        }
        pairs
    }

    fn compare<F>(&self, value: F) -> Result<PairCache>
    where
        F: Fn(&ScoreEntry, &ScoreEntry) -> f64,
    {
        let mut cache = PairCache::new();
        for (a, b) in self.model_pairs() {
            let mut per_id = HashMap::with_capacity(self.identifiers.len());
            for id in &self.identifiers {
                let ea = self.entry(id, &a)?;
                let eb = self.entry(id, &b)?;
                per_id.insert(id.clone(), value(ea, eb));
            }
            cache.insert((a, b), per_id);
        }
        Ok(cache)
    }

    /// Likelihood ratio `l_a / l_b` for every model pair and identifier
    pub fn compare_likelihood(&mut self) -> Result<()> {
        self.ratios = Some(self.compare(|a, b| a.score / b.score)?);
        Ok(())
    }

    /// Per-residue likelihood difference `(l_a - l_b) / seqlen`
    pub fn compare_likelihood2(&mut self) -> Result<()> {
        self.diffs = Some(self.compare(|a, b| (a.score - b.score) / a.seqlen as f64)?);
        Ok(())
    }

    fn lookup_pair<'c>(cache: &'c PairCache, id: &str, a: &str, b: &str) -> Result<(f64, bool)> {
        let not_found = || EvalError::lookup(format!("Not found ({}, {})", a, b));
        let find = |x: &str, y: &str| -> Option<&'c HashMap<String, f64>> {
            cache.get(&(x.to_string(), y.to_string()))
        };
        if let Some(per_id) = find(a, b) {
            return per_id.get(id).map(|v| (*v, false)).ok_or_else(not_found);
        }
        if let Some(per_id) = find(b, a) {
            return per_id.get(id).map(|v| (*v, true)).ok_or_else(not_found);
        }
        Err(not_found())
    }

    /// Likelihood ratio of `id` between models `a` and `b`; the reversed
    /// order of a computed pair gives the reciprocal.
    pub fn get_lratio(&mut self, id: &str, a: &str, b: &str) -> Result<f64> {
        if self.ratios.is_none() {
            self.compare_likelihood()?;
        }
        let cache = self.ratios.as_ref().ok_or_else(|| EvalError::lookup("no likelihood ratios"))?;
        let (value, swapped) = Self::lookup_pair(cache, id, a, b)?;
        Ok(if swapped { 1.0 / value } else { value })
    }

    /// Per-residue difference of `id` between models `a` and `b`; the
    /// reversed order gives the negation.
    pub fn get_ldiff(&mut self, id: &str, a: &str, b: &str) -> Result<f64> {
        if self.diffs.is_none() {
            self.compare_likelihood2()?;
        }
        let cache = self.diffs.as_ref().ok_or_else(|| EvalError::lookup("no likelihood differences"))?;
        let (value, swapped) = Self::lookup_pair(cache, id, a, b)?;
        Ok(if swapped { -value } else { value })
    }

    /// ROC over the identifiers whose origin is in `origins`.
    ///
    /// Each identifier is scored by the model named after its own origin.
    /// Identifiers labeled positive are the positive class; all others count
    /// as negatives.
    pub fn roc(&self, origins: &[String], mode: RocMode) -> Result<RocCurve> {
        let mut scores = Vec::new();
        let mut positives = Vec::new();

        for id in &self.identifiers {
            let origin = self.get_origin(id)?;
            if !origins.iter().any(|o| o == origin) {
                continue;
            }
            let entry = self.entry(id, origin)?;
            let score = match mode {
                RocMode::Raw => entry.score,
                RocMode::PerResidue => entry.score / entry.seqlen as f64,
            };
            scores.push(score);
            positives.push(self.labels.get(id).is_some_and(Label::is_positive));
        }

        RocCurve::sweep(&scores, &positives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::{Sequence, SequenceCollection};
    use crate::result::PathResult;

    /// Path result with the given per-identifier likelihoods
    fn scored(name: &str, rows: &[(&str, &str, f64, Label)]) -> PredictionResult {
        let col = SequenceCollection::from_sequences(
            name,
            rows.iter()
                .map(|(id, seq, _, label)| Sequence::new(*id, *seq).with_label(label.clone())),
        );
        let paths = rows.iter().map(|(_, seq, _, _)| vec![0; seq.len()]).collect();
        let likelihoods = rows.iter().map(|r| r.2).collect();
        PredictionResult::Path(PathResult::new(name, &col, paths, likelihoods, false).unwrap())
    }

    fn two_model_set() -> ResultSet {
        let mut set = ResultSet::new();
        let rows_a = [("s1", "AAAAA", -10.0, Label::Positive), ("s2", "AAAA", -8.0, Label::Negative)];
        let rows_b = [("s1", "AAAAA", -12.0, Label::Positive), ("s2", "AAAA", -4.0, Label::Negative)];
        set.add(&scored("ta", &rows_a), "ta", "A").unwrap();
        set.add(&scored("ta", &rows_b), "ta", "B").unwrap();
        set
    }

    #[test]
    fn test_add_registers_models_and_origins() {
        let set = two_model_set();
        assert_eq!(set.models(), &["A", "B"]);
        assert_eq!(set.identifiers(), &["s1", "s2"]);
        assert_eq!(set.get_origin("s1").unwrap(), "ta");
        assert_eq!(set.get_seqlen("s2").unwrap(), 4);
        assert_eq!(set.get_likelihood("s1", "B").unwrap(), -12.0);
        assert_eq!(set.get_likelihoods("s1").unwrap().len(), 2);
        assert_eq!(set.ids_by_origin("ta").len(), 2);
    }

    #[test]
    fn test_add_falls_back_to_result_name() {
        let mut set = ResultSet::new();
        set.add(&scored("tb", &[("x", "AA", -1.0, Label::Negative)]), "", "")
            .unwrap();
        assert_eq!(set.models(), &["tb"]);
        assert_eq!(set.get_origin("x").unwrap(), "tb");
    }

    #[test]
    fn test_add_twice_overwrites() {
        let mut set = two_model_set();
        assert!((set.get_lratio("s1", "A", "B").unwrap() - 10.0 / 12.0).abs() < 1e-12);

        let again = [("s1", "AAAAA", -6.0, Label::Positive), ("s2", "AAAA", -8.0, Label::Negative)];
        set.add(&scored("ta", &again), "other", "A").unwrap();

        assert_eq!(set.models(), &["A", "B"]);
        assert_eq!(set.get_likelihood("s1", "A").unwrap(), -6.0);
        // origin stays with the first registration
        assert_eq!(set.get_origin("s1").unwrap(), "ta");
        // cache was invalidated
        assert!((set.get_lratio("s1", "A", "B").unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_lratio_reciprocal_and_ldiff_negation() {
        let mut set = two_model_set();
        let ab = set.get_lratio("s1", "A", "B").unwrap();
        let ba = set.get_lratio("s1", "B", "A").unwrap();
        assert!((ab - 1.0 / ba).abs() < 1e-12);

        let diff = set.get_ldiff("s1", "A", "B").unwrap();
        assert!((diff - 0.4).abs() < 1e-12);
        assert!((set.get_ldiff("s1", "B", "A").unwrap() + diff).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_pair_is_lookup_error() {
        let mut set = two_model_set();
        let err = set.get_lratio("s1", "A", "C").unwrap_err();
        assert!(matches!(err, EvalError::Lookup { .. }));
        assert!(err.to_string().contains("Not found (A, C)"));
        assert!(set.get_ldiff("zz", "A", "B").is_err());
    }

    #[test]
    fn test_compare_requires_every_model() {
        let mut set = two_model_set();
        set.add(&scored("tc", &[("s3", "AA", -1.0, Label::Negative)]), "tc", "C")
            .unwrap();
        assert!(matches!(set.compare_likelihood(), Err(EvalError::Lookup { .. })));
    }

    #[test]
    fn test_roc_by_origin() {
        let mut set = ResultSet::new();
        let pos = [
            ("s1", "AAAA", -1.0, Label::Positive),
            ("s2", "AAAA", -2.0, Label::Positive),
        ];
        let neg = [
            ("s3", "AAAA", -3.0, Label::Negative),
            ("s4", "AAAA", -4.0, Label::Negative),
        ];
        set.add(&scored("pos", &pos), "pos", "pos").unwrap();
        set.add(&scored("neg", &neg), "neg", "neg").unwrap();

        let origins = vec!["pos".to_string(), "neg".to_string()];
        let roc = set.roc(&origins, RocMode::Raw).unwrap();
        assert_eq!(roc.len(), 3);
        assert_eq!(roc.tp_rate, vec![0.5, 1.0, 1.0]);
        assert_eq!(roc.fp_rate, vec![0.0, 0.0, 0.5]);
        assert!((roc.auc - 1.0).abs() < 1e-12);

        let per_res = set.roc(&origins, RocMode::PerResidue).unwrap();
        assert_eq!(per_res.thresholds, vec![-0.375, -0.625, -0.875]);

        let only_pos = vec!["pos".to_string()];
        assert!(matches!(set.roc(&only_pos, RocMode::Raw), Err(EvalError::Consistency { .. })));
    }
}

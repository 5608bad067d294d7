// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Labeled sequence collections and cross-validation partitioning

use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Ground-truth label attached to a sequence
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    /// Member of the class of interest (+1)
    Positive,
    /// Outside the class of interest (-1)
    Negative,
    /// Free-form class tag for multi-class data
    Class(String),
}

impl Label {
    /// Parse a label as written in dataset configs and headers
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "+1" | "1" => Label::Positive,
            "-1" => Label::Negative,
            other => match other.to_lowercase().as_str() {
                "positive" | "pos" => Label::Positive,
                "negative" | "neg" => Label::Negative,
                _ => Label::Class(other.to_string()),
            },
        }
    }

    /// Convert to the signed value used by margin classifiers
    pub fn as_signed(&self) -> Option<f64> {
        match self {
            Label::Positive => Some(1.0),
            Label::Negative => Some(-1.0),
            Label::Class(_) => None,
        }
    }

    /// Create from a signed classifier output (> 0 = positive)
    pub fn from_signed(value: f64) -> Self {
        if value > 0.0 {
            Label::Positive
        } else {
            Label::Negative
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Label::Positive)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Positive => write!(f, "+1"),
            Label::Negative => write!(f, "-1"),
            Label::Class(tag) => write!(f, "{}", tag),
        }
    }
}

/// A single sequence with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    id: String,
    sequence: String,
    label: Option<Label>,
    origin: Option<String>,
}

impl Sequence {
    pub fn new(id: impl Into<String>, sequence: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sequence: sequence.into(),
            label: None,
            origin: None,
        }
    }

    pub fn with_label(mut self, label: Label) -> Self {
        self.label = Some(label);
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Raw character content
    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    pub fn label(&self) -> Option<&Label> {
        self.label.as_ref()
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn len(&self) -> usize {
        self.sequence.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// One train/test split produced by [`SequenceCollection::partition`]
#[derive(Debug, Clone)]
pub struct Fold {
    pub index: usize,
    pub train: SequenceCollection,
    pub test: SequenceCollection,
}

/// Ordered, identifier-keyed container of sequences
///
/// Lookup goes through a map; `identifiers` keeps creation order so that
/// iteration and fold assignment are stable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SequenceCollection {
    name: String,
    identifiers: Vec<String>,
    sequences: HashMap<String, Sequence>,
    labels: HashMap<String, Label>,
}

impl SequenceCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn from_sequences(name: impl Into<String>, sequences: impl IntoIterator<Item = Sequence>) -> Self {
        let mut collection = Self::new(name);
        for seq in sequences {
            collection.push(seq);
        }
        collection
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Insert a sequence; an existing identifier is replaced in place
    pub fn push(&mut self, seq: Sequence) {
        let id = seq.id.clone();
        match &seq.label {
            Some(label) => {
                self.labels.insert(id.clone(), label.clone());
            }
            None => {
                self.labels.remove(&id);
            }
        }
        if self.sequences.insert(id.clone(), seq).is_none() {
            self.identifiers.push(id);
        }
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    pub fn get(&self, id: &str) -> Option<&Sequence> {
        self.sequences.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sequences.contains_key(id)
    }

    pub fn get_label(&self, id: &str) -> Option<&Label> {
        self.labels.get(id)
    }

    pub fn labels(&self) -> &HashMap<String, Label> {
        &self.labels
    }

    /// Labels ordered consistently with `identifiers`
    pub fn get_labels(&self) -> Vec<Option<Label>> {
        self.identifiers
            .iter()
            .map(|id| self.labels.get(id).cloned())
            .collect()
    }

    /// Iterate sequences in creation order
    pub fn iter(&self) -> impl Iterator<Item = &Sequence> {
        self.identifiers.iter().filter_map(|id| self.sequences.get(id))
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    /// Apply one label to every sequence (one input file = one class)
    pub fn set_label_all(&mut self, label: Label) {
        for id in &self.identifiers {
            if let Some(seq) = self.sequences.get_mut(id) {
                seq.label = Some(label.clone());
            }
            self.labels.insert(id.clone(), label.clone());
        }
    }

    /// Tag every sequence with the dataset it was read from
    pub fn set_origin_all(&mut self, origin: &str) {
        for seq in self.sequences.values_mut() {
            seq.origin = Some(origin.to_string());
        }
    }

    /// Union with `other`; on collision the incoming sequence and label win
    pub fn merge(&mut self, other: &SequenceCollection) {
        for seq in other.iter() {
            let mut incoming = seq.clone();
            incoming.label = other.labels.get(seq.id()).cloned();
            self.push(incoming);
        }
    }

    /// New collection holding only `ids`, in the order given
    pub fn subset<'a>(&self, name: impl Into<String>, ids: impl IntoIterator<Item = &'a String>) -> Self {
        let mut collection = Self::new(name);
        for id in ids {
            if let Some(seq) = self.sequences.get(id) {
                let mut seq = seq.clone();
                seq.label = self.labels.get(id).cloned();
                collection.push(seq);
            }
        }
        collection
    }

    /// Split into `k` folds for cross-validation.
    ///
    /// Assignment is stride-based over creation order. With `stratify_by_label`
    /// the identifiers are first grouped by label (groups in order of first
    /// appearance) and dealt round-robin by a single running counter, so each
    /// class is spread evenly and no test fold is empty.
    pub fn partition(&self, k: usize, stratify_by_label: bool) -> Result<Vec<Fold>> {
        let n = self.len();
        if k < 2 {
            return Err(EvalError::config(format!("fold count must be at least 2, got {}", k)));
        }
        if k > n {
            return Err(EvalError::config(format!(
                "fold count {} exceeds number of sequences {} in '{}'",
                k, n, self.name
            )));
        }

        let mut assignment = vec![0usize; n];
        if stratify_by_label {
            let mut groups: Vec<(Option<&Label>, Vec<usize>)> = Vec::new();
            for (i, id) in self.identifiers.iter().enumerate() {
                let label = self.labels.get(id);
                match groups.iter_mut().find(|(l, _)| *l == label) {
                    Some((_, members)) => members.push(i),
                    None => groups.push((label, vec![i])),
                }
            }
            let mut counter = 0usize;
            for (_, members) in &groups {
                for &i in members {
                    assignment[i] = counter % k;
                    counter += 1;
                }
            }
        } else {
            for (i, slot) in assignment.iter_mut().enumerate() {
                *slot = i % k;
            }
        }

        let folds = (0..k)
            .map(|f| {
                let (test_ids, train_ids): (Vec<(&String, &usize)>, Vec<(&String, &usize)>) = self
                    .identifiers
                    .iter()
                    .zip(assignment.iter())
                    .partition(|(_, slot)| **slot == f);
                Fold {
                    index: f,
                    train: self.subset(
                        format!("{}_train_{}", self.name, f),
                        train_ids.into_iter().map(|(id, _)| id),
                    ),
                    test: self.subset(
                        format!("{}_test_{}", self.name, f),
                        test_ids.into_iter().map(|(id, _)| id),
                    ),
                }
            })
            .collect();

        Ok(folds)
    }

    /// Label distribution over the collection (unlabeled sequences excluded)
    pub fn label_distribution(&self) -> HashMap<Label, usize> {
        let mut dist = HashMap::new();
        for label in self.labels.values() {
            *dist.entry(label.clone()).or_insert(0) += 1;
        }
        dist
    }
}

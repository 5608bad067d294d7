// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Sequence sources
//!
//! Implements:
//! - FASTA files (identifier = first word of the header)
//! - Synthetic protein-like sequences with seeded randomness

use crate::datasets::{Label, Sequence, SequenceCollection};
use crate::error::{EvalError, Result};
use bio::io::fasta;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Anything that can produce a named sequence collection
pub trait SequenceSource {
    fn load(&self) -> Result<SequenceCollection>;
}

/// Plain FASTA reader. Every sequence gets the source name as origin and,
/// when configured, one label for the whole file.
#[derive(Debug, Clone)]
pub struct FastaSource {
    path: PathBuf,
    name: String,
    label: Option<Label>,
}

impl FastaSource {
    pub fn new(name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            name: name.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: Label) -> Self {
        self.label = Some(label);
        self
    }

    /// Turn one parsed record into a sequence, or `None` when it is skipped
    fn record_sequence(&self, index: usize, record: &fasta::Record) -> Option<Sequence> {
        let id = record.id();
        if id.is_empty() {
            tracing::warn!("Skipping record {} with empty header in {}", index + 1, self.path.display());
            return None;
        }
        let residues: String = String::from_utf8_lossy(record.seq())
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if residues.is_empty() {
            tracing::warn!("Skipping empty record '{}' in {}", id, self.path.display());
            return None;
        }
        let mut seq = Sequence::new(id, residues);
        if let Some(label) = &self.label {
            seq = seq.with_label(label.clone());
        }
        Some(seq)
    }
}

impl SequenceSource for FastaSource {
    fn load(&self) -> Result<SequenceCollection> {
        let file = File::open(&self.path).map_err(|e| {
            EvalError::config(format!("Failed to open FASTA file {}: {}", self.path.display(), e))
        })?;

        let mut collection = SequenceCollection::new(&self.name);
        for (index, record) in fasta::Reader::new(file).records().enumerate() {
            let record = record?;
            let Some(seq) = self.record_sequence(index, &record) else {
                continue;
            };
            if collection.contains(seq.id()) {
                tracing::warn!(
                    "Duplicate identifier '{}' in {}; keeping the later record",
                    seq.id(),
                    self.path.display()
                );
            }
            collection.push(seq);
        }
        collection.set_origin_all(&self.name);

        tracing::info!("Loaded {} sequences from {}", collection.len(), self.path.display());
        Ok(collection)
    }
}

const HYDROPHOBIC: &[u8] = b"AILMFVWC";
const POLAR: &[u8] = b"DEKRNQSTHGY";

/// Generated sequences for pipeline testing.
///
/// Positive sequences are drawn mostly from hydrophobic residues and
/// negative ones from polar residues, so the classes are learnable.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    name: String,
    size: usize,
    seed: u64,
    label: Option<Label>,
    min_len: usize,
    max_len: usize,
}

impl SyntheticSource {
    pub fn new(name: impl Into<String>, size: usize, seed: u64) -> Self {
        Self {
            name: name.into(),
            size,
            seed,
            label: None,
            min_len: 20,
            max_len: 60,
        }
    }

    /// Generate every sequence with this label instead of a random mix
    pub fn with_label(mut self, label: Label) -> Self {
        self.label = Some(label);
        self
    }

    pub fn with_length(mut self, min_len: usize, max_len: usize) -> Self {
        self.min_len = min_len.max(1);
        self.max_len = max_len.max(self.min_len);
        self
    }
}

impl SequenceSource for SyntheticSource {
    fn load(&self) -> Result<SequenceCollection> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        let sequences: Vec<Sequence> = (0..self.size)
            .map(|i| {
                let label = match &self.label {
                    Some(label) => label.clone(),
                    None if rng.gen_bool(0.5) => Label::Positive,
                    None => Label::Negative,
                };
                let (major, minor) = if label.is_positive() {
                    (HYDROPHOBIC, POLAR)
                } else {
                    (POLAR, HYDROPHOBIC)
                };
                let len = rng.gen_range(self.min_len..=self.max_len);
                let residues: String = (0..len)
                    .map(|_| {
                        let pool = if rng.gen_bool(0.8) { major } else { minor };
                        pool[rng.gen_range(0..pool.len())] as char
                    })
                    .collect();

                Sequence::new(format!("{}_{}", self.name, i), residues).with_label(label)
            })
            .collect();

        let mut collection = SequenceCollection::from_sequences(&self.name, sequences);
        collection.set_origin_all(&self.name);
        Ok(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_fasta_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, ">sp|P1 first protein").unwrap();
        writeln!(file, "MKLV").unwrap();
        writeln!(file, "AAGG").unwrap();
        writeln!(file).unwrap();
        writeln!(file, ">P2").unwrap();
        writeln!(file, "MK LV").unwrap();
        writeln!(file, ">").unwrap();
        writeln!(file, "XXXX").unwrap();
        writeln!(file, ">P3").unwrap();
        file.flush().unwrap();

        let col = FastaSource::new("ta", file.path())
            .with_label(Label::Positive)
            .load()
            .unwrap();

        assert_eq!(col.name(), "ta");
        assert_eq!(col.identifiers(), &["sp|P1", "P2"]);
        assert_eq!(col.get("sp|P1").unwrap().sequence(), "MKLVAAGG");
        assert_eq!(col.get("P2").unwrap().sequence(), "MKLV");
        assert_eq!(col.get("P2").unwrap().origin(), Some("ta"));
        assert_eq!(col.get_label("P2"), Some(&Label::Positive));
    }

    #[test]
    fn test_fasta_duplicate_keeps_later_record() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, ">a\nMKLV\n>b\nGG\n>a second copy\nWWW").unwrap();
        file.flush().unwrap();

        let col = FastaSource::new("dup", file.path()).load().unwrap();
        assert_eq!(col.identifiers(), &["a", "b"]);
        assert_eq!(col.get("a").unwrap().sequence(), "WWW");
        assert_eq!(col.get_label("a"), None);
    }

    #[test]
    fn test_fasta_missing_file() {
        let err = FastaSource::new("x", "/nonexistent/file.fa").load();
        assert!(matches!(err, Err(EvalError::Config { .. })));
    }

    #[test]
    fn test_synthetic_is_reproducible() {
        let a = SyntheticSource::new("syn", 20, 42).load().unwrap();
        let b = SyntheticSource::new("syn", 20, 42).load().unwrap();
        let c = SyntheticSource::new("syn", 20, 7).load().unwrap();

        assert_eq!(a.len(), 20);
        assert_eq!(a.identifiers(), b.identifiers());
        for id in a.identifiers() {
            assert_eq!(a.get(id), b.get(id));
        }
        assert!(a.identifiers().iter().any(|id| a.get(id) != c.get(id)));
    }

    #[test]
    fn test_synthetic_fixed_label_and_length() {
        let col = SyntheticSource::new("neg", 10, 1)
            .with_label(Label::Negative)
            .with_length(5, 8)
            .load()
            .unwrap();
        assert!(col.iter().all(|s| s.label() == Some(&Label::Negative)));
        assert!(col.iter().all(|s| (5..=8).contains(&s.len())));
        assert_eq!(col.label_distribution().get(&Label::Negative), Some(&10));
        assert!(col.iter().all(|s| s.origin() == Some("neg")));
    }
}

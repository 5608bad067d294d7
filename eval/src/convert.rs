// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Conversion of raw sequences into numeric feature vectors
//!
//! Implements:
//! - Per-character lookup tables (Kyte-Doolittle hydropathy built in)
//! - k-mer spectrum counting over an explicit alphabet
//! - Linear rescaling of converted values

use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Kyte-Doolittle hydropathy index
pub const KYTE_DOOLITTLE: [(char, f64); 20] = [
    ('I', 4.5),
    ('V', 4.2),
    ('L', 3.8),
    ('F', 2.8),
    ('C', 2.5),
    ('M', 1.9),
    ('A', 1.8),
    ('G', -0.4),
    ('T', -0.7),
    ('W', -0.9),
    ('S', -1.3),
    ('Y', -1.6),
    ('P', -3.2),
    ('H', -3.5),
    ('E', -3.5),
    ('Q', -3.5),
    ('D', -3.5),
    ('N', -3.5),
    ('K', -3.9),
    ('R', -4.5),
];

/// Default alphabet for spectrum features (20 amino acids plus X)
pub const PROTEIN_SPECTRUM_ALPHABET: &str = "ACDEFGHIKLMNPQRSTVWXY";

/// Character range of a sequence to convert (`end = None` means to the end)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub start: usize,
    pub end: Option<usize>,
}

impl Region {
    pub fn new(start: usize, end: Option<usize>) -> Self {
        Self { start, end }
    }

    /// Characters of `raw` that fall inside the region
    pub fn slice(&self, raw: &str) -> Vec<char> {
        let chars = raw.chars().skip(self.start);
        match self.end {
            Some(end) => chars.take(end.saturating_sub(self.start)).collect(),
            None => chars.collect(),
        }
    }
}

/// Maps a raw sequence to a numeric feature vector
pub trait Converter: Send + Sync {
    fn convert(&self, raw: &str, region: Region) -> Result<Vec<f64>>;

    fn name(&self) -> &str;
}

/// Linear rescaling of a vector onto `[minval, maxval]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    pub minval: f64,
    pub maxval: f64,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            minval: -1.0,
            maxval: 1.0,
        }
    }
}

impl Normalizer {
    /// Rescale so the smallest value maps to `minval` and the largest to
    /// `maxval`. A constant vector maps to the midpoint of the range.
    pub fn apply(&self, values: &[f64]) -> Vec<f64> {
        if values.is_empty() {
            return Vec::new();
        }
        let smallest = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let largest = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let ptp = largest - smallest;
        if ptp == 0.0 {
            let mid = (self.minval + self.maxval) / 2.0;
            return vec![mid; values.len()];
        }
        values
            .iter()
            .map(|x| self.minval + (self.maxval - self.minval) * (x - smallest) / ptp)
            .collect()
    }
}

/// What to do with characters missing from a lookup table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingPolicy {
    #[default]
    Error,
    Skip,
}

/// Per-character substitution through a lookup table
#[derive(Debug, Clone)]
pub struct LookupConverter {
    table: HashMap<char, f64>,
    missing: MissingPolicy,
    normalizer: Option<Normalizer>,
}

impl LookupConverter {
    pub fn new(table: HashMap<char, f64>) -> Self {
        Self {
            table,
            missing: MissingPolicy::Error,
            normalizer: Some(Normalizer::default()),
        }
    }

    /// Hydropathy converter rescaled to [-1, 1]
    pub fn kyte_doolittle() -> Self {
        Self::new(KYTE_DOOLITTLE.iter().cloned().collect())
    }

    /// Load a headerless `<char>,<value>` table. Files ending in `.tsv` or
    /// `.tab` are tab-separated; `#` starts a comment line.
    pub fn from_file(path: &Path) -> Result<Self> {
        let delimiter = match path.extension().and_then(|e| e.to_str()) {
            Some("tsv") | Some("tab") => b'\t',
            _ => b',',
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut table = HashMap::new();
        for record in reader.records() {
            let record = record?;
            let line = record.position().map_or(0, |p| p.line());
            let (Some(key), Some(value)) = (record.get(0), record.get(1)) else {
                return Err(EvalError::config(format!(
                    "{}:{}: expected '<char>,<value>'",
                    path.display(),
                    line
                )));
            };

            let mut chars = key.chars();
            let symbol = match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => {
                    return Err(EvalError::config(format!(
                        "{}:{}: key '{}' is not a single character",
                        path.display(),
                        line,
                        key
                    )))
                }
            };
            let value: f64 = value.parse().map_err(|_| {
                EvalError::config(format!("{}:{}: '{}' is not a number", path.display(), line, value))
            })?;
            table.insert(symbol, value);
        }

        Ok(Self::new(table))
    }

    pub fn with_missing(mut self, missing: MissingPolicy) -> Self {
        self.missing = missing;
        self
    }

    pub fn with_normalizer(mut self, normalizer: Option<Normalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }
}

impl Converter for LookupConverter {
    fn convert(&self, raw: &str, region: Region) -> Result<Vec<f64>> {
        let mut converted = Vec::new();
        for c in region.slice(raw) {
            match self.table.get(&c) {
                Some(&value) => converted.push(value),
                None => match self.missing {
                    MissingPolicy::Skip => continue,
                    MissingPolicy::Error => {
                        return Err(EvalError::lookup(format!("'{}' not found in lookup table", c)))
                    }
                },
            }
        }
        Ok(match &self.normalizer {
            Some(normalizer) => normalizer.apply(&converted),
            None => converted,
        })
    }

    fn name(&self) -> &str {
        "lookup"
    }
}

/// k-mer spectrum: counts of every k-mer over the alphabet
#[derive(Debug, Clone)]
pub struct SpectrumConverter {
    k: usize,
    keys: Vec<String>,
    index: HashMap<String, usize>,
}

impl SpectrumConverter {
    pub fn new(k: usize, alphabet: &str) -> Result<Self> {
        if k == 0 {
            return Err(EvalError::config("spectrum k must be at least 1"));
        }
        if alphabet.is_empty() {
            return Err(EvalError::config("spectrum alphabet is empty"));
        }

        let mut keys: Vec<String> = alphabet.chars().map(String::from).collect();
        for _ in 1..k {
            keys = keys
                .iter()
                .flat_map(|prefix| alphabet.chars().map(move |c| format!("{}{}", prefix, c)))
                .collect();
        }
        let index = keys.iter().enumerate().map(|(i, key)| (key.clone(), i)).collect();

        Ok(Self { k, keys, index })
    }

    /// Feature names in output order
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl Converter for SpectrumConverter {
    fn convert(&self, raw: &str, region: Region) -> Result<Vec<f64>> {
        let chars = region.slice(raw);
        let mut spectrum = vec![0.0; self.keys.len()];
        for window in chars.windows(self.k) {
            let kmer: String = window.iter().collect();
            if let Some(&i) = self.index.get(&kmer) {
                spectrum[i] += 1.0;
            }
        }
        Ok(spectrum)
    }

    fn name(&self) -> &str {
        "spectrum"
    }
}

/// Serializable converter selection used by pipeline configs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConverterConfig {
    Hydropathy {
        #[serde(default)]
        normalize: Option<Normalizer>,
        #[serde(default)]
        missing: MissingPolicy,
    },
    Table {
        path: String,
        #[serde(default)]
        normalize: Option<Normalizer>,
        #[serde(default)]
        missing: MissingPolicy,
    },
    Spectrum {
        k: usize,
        #[serde(default = "default_spectrum_alphabet")]
        alphabet: String,
    },
}

fn default_spectrum_alphabet() -> String {
    PROTEIN_SPECTRUM_ALPHABET.to_string()
}

impl ConverterConfig {
    pub fn build(&self) -> Result<Box<dyn Converter>> {
        Ok(match self {
            ConverterConfig::Hydropathy { normalize, missing } => Box::new(
                LookupConverter::kyte_doolittle()
                    .with_normalizer(*normalize)
                    .with_missing(*missing),
            ),
            ConverterConfig::Table { path, normalize, missing } => Box::new(
                LookupConverter::from_file(Path::new(path))?
                    .with_normalizer(*normalize)
                    .with_missing(*missing),
            ),
            ConverterConfig::Spectrum { k, alphabet } => Box::new(SpectrumConverter::new(*k, alphabet)?),
        })
    }
}

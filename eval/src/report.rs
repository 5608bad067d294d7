// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Report writers
//!
//! Implements:
//! - Tab-separated per-sequence score table with pairwise model comparisons
//! - Decoded-path listing (sequence and path blocks per record)

use crate::error::Result;
use crate::result::PathResult;
use crate::resultset::ResultSet;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Pairwise value written after the per-model scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// `l_a / l_b`
    Ratio,
    /// `(l_a - l_b) / seqlen`
    Difference,
}

impl Comparison {
    /// Numeric selector used on the command line (1 = ratio, 2 = difference)
    pub fn from_which(which: u8) -> Option<Self> {
        match which {
            1 => Some(Comparison::Ratio),
            2 => Some(Comparison::Difference),
            _ => None,
        }
    }
}

/// Write one row per identifier:
/// `id origin seqlen <score per model> <comparison per model pair>`.
///
/// An empty `models` slice means every registered model. With `per_res`
/// the per-model scores are divided by the sequence length.
pub fn output_tsv(
    set: &mut ResultSet,
    path: &Path,
    models: &[String],
    which: Comparison,
    per_res: bool,
) -> Result<()> {
    let models: Vec<String> = if models.is_empty() {
        set.models().to_vec()
    } else {
        models.to_vec()
    };

    let mut pairs = Vec::new();
    for (i, a) in models.iter().enumerate() {
        for b in &models[i + 1..] {
            pairs.push((a.as_str(), b.as_str()));
        }
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)?;

    let mut header = vec!["id".to_string(), "origin".to_string(), "seqlen".to_string()];
    header.extend(models.iter().cloned());
    header.extend(pairs.iter().map(|(a, b)| format!("{}_{}", a, b)));
    writer.write_record(&header)?;

    let identifiers = set.identifiers().to_vec();
    for id in &identifiers {
        let seqlen = set.get_seqlen(id)?;
        let mut row = vec![id.clone(), set.get_origin(id)?.to_string(), seqlen.to_string()];
        for m in &models {
            let score = set.get_likelihood(id, m)?;
            let score = if per_res { score / seqlen as f64 } else { score };
            row.push(format!("{:?}", score));
        }
        for (a, b) in &pairs {
            let value = match which {
                Comparison::Ratio => set.get_lratio(id, a, b)?,
                Comparison::Difference => set.get_ldiff(id, a, b)?,
            };
            row.push(format!("{:?}", value));
        }
        writer.write_record(&row)?;
    }

    writer.flush()?;
    tracing::info!("Wrote {} rows to {}", identifiers.len(), path.display());
    Ok(())
}

/// Write every decoded path as `>id likelihood=L` followed by wrapped
/// `Seq :` / `Path:` line pairs.
pub fn write_decoded(result: &PathResult, path: &Path, col: usize, reverse: bool) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for record in result.decode_all(col, reverse)? {
        writeln!(out, "{} likelihood={:?}", record.header, result.likelihood(&record.id)?)?;
        for (seq, decoded) in record.seq_lines.iter().zip(&record.path_lines) {
            writeln!(out, "Seq : {}", seq)?;
            writeln!(out, "Path: {}", decoded)?;
            writeln!(out)?;
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::{Label, Sequence, SequenceCollection};
    use crate::decode::Decoder;
    use crate::result::PredictionResult;

    fn path_result(name: &str, rows: &[(&str, &str, f64)]) -> PathResult {
        let col = SequenceCollection::from_sequences(
            name,
            rows.iter()
                .map(|(id, seq, _)| Sequence::new(*id, *seq).with_label(Label::Positive)),
        );
        let paths = rows
            .iter()
            .map(|(_, seq, _)| seq.chars().map(|c| usize::from(c != 'A')).collect())
            .collect();
        let likelihoods = rows.iter().map(|r| r.2).collect();
        PathResult::new(name, &col, paths, likelihoods, false).unwrap()
    }

    fn two_model_set() -> ResultSet {
        let mut set = ResultSet::new();
        let a = PredictionResult::Path(path_result("ta", &[("s1", "AACCA", -10.0), ("s2", "AC", -3.0)]));
        let b = PredictionResult::Path(path_result("ta", &[("s1", "AACCA", -12.0), ("s2", "AC", -6.0)]));
        set.add(&a, "ta", "A").unwrap();
        set.add(&b, "ta", "B").unwrap();
        set
    }

    #[test]
    fn test_output_tsv_ratio() {
        let mut set = two_model_set();
        let file = tempfile::NamedTempFile::new().unwrap();
        output_tsv(&mut set, file.path(), &[], Comparison::Ratio, false).unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "id\torigin\tseqlen\tA\tB\tA_B");
        assert_eq!(lines[1], "s1\tta\t5\t-10.0\t-12.0\t0.8333333333333334");
        assert_eq!(lines[2], "s2\tta\t2\t-3.0\t-6.0\t0.5");
    }

    #[test]
    fn test_output_tsv_difference_per_residue() {
        let mut set = two_model_set();
        let file = tempfile::NamedTempFile::new().unwrap();
        let models = vec!["B".to_string(), "A".to_string()];
        output_tsv(&mut set, file.path(), &models, Comparison::Difference, true).unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "id\torigin\tseqlen\tB\tA\tB_A");
        // (-6 - -3) / 2
        assert_eq!(lines[2], "s2\tta\t2\t-3.0\t-1.5\t-1.5");
    }

    #[test]
    fn test_comparison_from_which() {
        assert_eq!(Comparison::from_which(1), Some(Comparison::Ratio));
        assert_eq!(Comparison::from_which(2), Some(Comparison::Difference));
        assert_eq!(Comparison::from_which(3), None);
    }

    #[test]
    fn test_write_decoded() {
        let mut result = path_result("ta", &[("s1", "AACCA", -10.0)]);
        result.set_decoder(Decoder::from_symbols("io"));
        let file = tempfile::NamedTempFile::new().unwrap();
        write_decoded(&result, file.path(), 3, false).unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(
            text,
            ">s1 likelihood=-10.0\nSeq : AAC\nPath: iio\n\nSeq : CA\nPath: oi\n\n"
        );
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

use seqclass_eval::pipeline::{EvaluationConfig, EvaluationPipeline, RunMode};
use seqclass_eval::{FastaSource, Label, SequenceSource};
use std::path::Path;

fn write_fasta(path: &Path, prefix: &str, residues: &str) {
    let mut text = String::new();
    for i in 0..6 {
        // rotate so the records differ
        let shift = i % residues.len();
        let body = format!("{}{}", &residues[shift..], &residues[..shift]).repeat(3);
        text.push_str(&format!(">{}{} sample {}\n{}\n{}\n", prefix, i, i, &body[..20], &body[20..]));
    }
    std::fs::write(path, text).unwrap();
}

#[test]
fn test_fasta_config_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let pos = dir.path().join("pos.fa");
    let neg = dir.path().join("neg.fa");
    write_fasta(&pos, "p", "AILMFVWCAILV");
    write_fasta(&neg, "n", "DEKRNQSTHGYD");

    let out = dir.path().join("out");
    let config = format!(
        r#"{{
  "seed": 3,
  "folds": 3,
  "output_dir": {out:?},
  "datasets": [
    {{"name": "pos", "path": {pos:?}, "label": "+1"}},
    {{"name": "neg", "path": {neg:?}, "label": "-1"}}
  ],
  "models": [
    {{"name": "pos", "kind": {{"type": "path", "states": 2, "alphabet": "ACDEFGHIKLMNPQRSTVWY", "decoder": "io", "max_iter": 10}}}},
    {{"name": "neg", "kind": {{"type": "path", "states": 2, "alphabet": "ACDEFGHIKLMNPQRSTVWY", "decoder": "io", "max_iter": 10}}}}
  ],
  "roc_origins": ["pos", "neg"]
}}"#,
        out = out.to_string_lossy(),
        pos = pos.to_string_lossy(),
        neg = neg.to_string_lossy(),
    );
    let config_path = dir.path().join("eval.json");
    std::fs::write(&config_path, config).unwrap();

    let config = EvaluationConfig::from_file(&config_path).unwrap();
    let mut pipeline = EvaluationPipeline::new(config);
    let results = pipeline.run().unwrap();

    assert_eq!(results.datasets.len(), 2);
    assert!(results.datasets.iter().all(|d| d.sequences == 6));
    assert_eq!(results.runs.len(), 4);
    assert_eq!(
        results
            .runs
            .iter()
            .filter(|r| r.mode == RunMode::CrossValidation)
            .count(),
        2
    );

    let roc = results.roc.as_ref().unwrap();
    assert!((0.0..=1.0).contains(&roc.auc));
    assert_eq!(roc.len(), 11);

    let lratio = std::fs::read_to_string(out.join("lratio.tsv")).unwrap();
    let mut lines = lratio.lines();
    assert_eq!(lines.next(), Some("id\torigin\tseqlen\tpos\tneg\tpos_neg"));
    let first: Vec<&str> = lines.next().unwrap().split('\t').collect();
    assert_eq!(&first[..3], &["p0", "pos", "36"]);
    assert_eq!(lratio.lines().count(), 13);

    let decoded = std::fs::read_to_string(out.join("decoded_pos_pos.txt")).unwrap();
    assert!(decoded.starts_with(">p0 "));
    assert!(decoded.contains("\nPath: "));
}

#[test]
fn test_fasta_source_labels_whole_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("neg.fa");
    write_fasta(&path, "n", "DEKRNQSTHGYD");

    let data = FastaSource::new("neg", &path)
        .with_label(Label::Negative)
        .load()
        .unwrap();
    assert_eq!(data.len(), 6);
    assert_eq!(data.identifiers()[0], "n0");
    assert_eq!(data.get("n0").unwrap().len(), 36);
    assert_eq!(data.get_label("n5"), Some(&Label::Negative));
}

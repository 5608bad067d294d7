// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Reproducible evaluation pipeline for sequence classifiers
//!
//! Orchestrates:
//! - Dataset loading (FASTA, synthetic, merged)
//! - Cross-validation of each model on its own dataset, prediction elsewhere
//! - Likelihood comparison tables and decoded-path reports
//! - ROC over the configured origins
//! - Results serialization

use crate::datasets::{Label, SequenceCollection};
use crate::metrics::{Accuracy, RocCurve};
use crate::predictor::{CvOptions, ModelConfig, ModelKind, Predictor};
use crate::report::{output_tsv, write_decoded, Comparison};
use crate::result::PredictionResult;
use crate::resultset::{ResultSet, RocMode};
use crate::source::{FastaSource, SequenceSource, SyntheticSource};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn default_synthetic_size() -> usize {
    30
}

/// One dataset entry of the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub name: String,
    /// FASTA file; synthetic data is generated when absent
    #[serde(default)]
    pub path: Option<String>,
    /// Label applied to every sequence ("+1", "-1" or a class tag)
    #[serde(default)]
    pub label: Option<String>,
    /// Build this dataset as the union of earlier datasets
    #[serde(default)]
    pub merge: Vec<String>,
    /// Number of synthetic sequences
    #[serde(default = "default_synthetic_size")]
    pub size: usize,
}

impl DatasetSpec {
    pub fn synthetic(name: &str, label: &str) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            label: Some(label.to_string()),
            merge: vec![],
            size: default_synthetic_size(),
        }
    }
}

/// Configuration for the evaluation pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    pub folds: usize,
    pub stratify: bool,
    /// Retrain each model on its full dataset after cross-validation
    pub refit: bool,
    /// Output directory for results
    pub output_dir: String,
    /// Divide per-model scores by sequence length in both score tables
    pub per_residue: bool,
    pub datasets: Vec<DatasetSpec>,
    pub models: Vec<ModelConfig>,
    /// Origins pooled for the ROC curve (needs at least two)
    pub roc_origins: Vec<String>,
    pub roc_mode: RocMode,
    /// Line width of decoded-path reports
    pub decode_width: usize,
}

const PROTEIN_ALPHABET: &str = "ACDEFGHIKLMNPQRSTVWY";

impl Default for EvaluationConfig {
    fn default() -> Self {
        let path_model = |name: &str| ModelConfig {
            name: name.to_string(),
            kind: ModelKind::Path {
                model_file: None,
                states: Some(2),
                alphabet: Some(PROTEIN_ALPHABET.to_string()),
                decoder: Some("io".to_string()),
                reverse: false,
                max_iter: 20,
            },
        };
        Self {
            seed: 42,
            folds: 5,
            stratify: true,
            refit: true,
            output_dir: "eval/results".to_string(),
            per_residue: true,
            datasets: vec![
                DatasetSpec::synthetic("pos", "+1"),
                DatasetSpec::synthetic("neg", "-1"),
            ],
            models: vec![path_model("pos"), path_model("neg")],
            roc_origins: vec!["pos".to_string(), "neg".to_string()],
            roc_mode: RocMode::PerResidue,
            decode_width: 60,
        }
    }
}

impl EvaluationConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    fn cv_options(&self) -> CvOptions {
        CvOptions {
            folds: self.folds,
            stratify: self.stratify,
            refit: self.refit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub name: String,
    pub sequences: usize,
    pub label_distribution: HashMap<String, usize>,
}

/// How a model was applied to a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    CrossValidation,
    Prediction,
}

/// One model applied to one dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub model: String,
    pub dataset: String,
    pub mode: RunMode,
    pub sequences: usize,
    /// Mean score per residue (log-likelihood or decision value)
    pub mean_score_per_residue: f64,
    /// Margin models only
    pub accuracy: Option<Accuracy>,
    /// Margin models only: best (accuracy, threshold)
    pub best_threshold: Option<(f64, f64)>,
    /// Margin models only, when both classes are present
    pub auc_roc: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub description: String,
}

/// Complete evaluation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResults {
    pub config: EvaluationConfig,
    pub datasets: Vec<DatasetInfo>,
    pub models: Vec<ModelInfo>,
    pub runs: Vec<RunSummary>,
    pub roc: Option<RocCurve>,
    pub outputs: Vec<PathBuf>,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

/// Main evaluation pipeline
pub struct EvaluationPipeline {
    config: EvaluationConfig,
    datasets: Vec<SequenceCollection>,
}

impl EvaluationPipeline {
    pub fn new(config: EvaluationConfig) -> Self {
        Self {
            config,
            datasets: Vec::new(),
        }
    }

    pub fn datasets(&self) -> &[SequenceCollection] {
        &self.datasets
    }

    /// Load every configured dataset, in order
    pub fn load_datasets(&mut self) -> Result<()> {
        let mut loaded: Vec<SequenceCollection> = Vec::new();

        for (i, entry) in self.config.datasets.iter().enumerate() {
            if loaded.iter().any(|d| d.name() == entry.name) {
                bail!("Dataset '{}' is configured twice", entry.name);
            }

            let label = entry.label.as_deref().map(Label::parse);
            let mut collection = if !entry.merge.is_empty() {
                let mut merged = SequenceCollection::new(&entry.name);
                for part in &entry.merge {
                    let source = loaded
                        .iter()
                        .find(|d| d.name() == part.as_str())
                        .with_context(|| format!("Dataset '{}' merges unknown dataset '{}'", entry.name, part))?;
                    merged.merge(source);
                }
                tracing::info!("Merged {} datasets into '{}'", entry.merge.len(), entry.name);
                merged
            } else if let Some(path) = &entry.path {
                tracing::info!("Loading FASTA dataset '{}' from {}", entry.name, path);
                FastaSource::new(&entry.name, path).load()?
            } else {
                let seed = self.config.seed.wrapping_add(i as u64);
                tracing::info!("Generating synthetic dataset '{}' with seed {}", entry.name, seed);
                let mut source = SyntheticSource::new(&entry.name, entry.size, seed);
                if let Some(label) = &label {
                    source = source.with_label(label.clone());
                }
                source.load()?
            };

            if let Some(label) = label {
                collection.set_label_all(label);
            }

            tracing::info!("Dataset '{}' loaded: {} sequences", entry.name, collection.len());
            loaded.push(collection);
        }

        self.datasets = loaded;
        Ok(())
    }

    /// Score one result for the run summary
    fn summarize(model: &str, dataset: &str, mode: RunMode, result: &PredictionResult) -> RunSummary {
        let per_residue: Vec<f64> = result
            .identifiers()
            .iter()
            .filter_map(|id| {
                let score = result.score(id).ok()?;
                let len = result.seqlen(id).ok()?;
                (len > 0).then(|| score / len as f64)
            })
            .collect();
        let mean_score_per_residue = if per_residue.is_empty() {
            0.0
        } else {
            per_residue.iter().sum::<f64>() / per_residue.len() as f64
        };

        let margin = result.as_margin();
        RunSummary {
            model: model.to_string(),
            dataset: dataset.to_string(),
            mode,
            sequences: result.len(),
            mean_score_per_residue,
            accuracy: margin.map(|m| m.stats()),
            best_threshold: margin.map(|m| m.calc_threshold()),
            auc_roc: margin.and_then(|m| m.roc().ok()).map(|roc| roc.auc),
        }
    }

    /// Run the full evaluation pipeline
    pub fn run(&mut self) -> Result<EvaluationResults> {
        if self.datasets.is_empty() {
            self.load_datasets()?;
        }

        let output_dir = PathBuf::from(&self.config.output_dir);
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

        let options = self.config.cv_options();
        let mut outputs = Vec::new();
        let mut runs = Vec::new();
        let mut model_infos = Vec::new();
        // (model, dataset) -> result
        let mut results: HashMap<(String, String), PredictionResult> = HashMap::new();

        for model_config in &self.config.models {
            let mut model: Box<dyn Predictor> = model_config
                .build(self.config.seed)
                .with_context(|| format!("Failed to build model '{}'", model_config.name))?;
            let name = model.name().to_string();
            tracing::info!("Evaluating model: {}", name);

            // own dataset first, so the refit model predicts the others
            let mut order: Vec<&SequenceCollection> = self.datasets.iter().collect();
            order.sort_by_key(|d| d.name() != name);

            for dataset in order {
                let (mode, result) = if dataset.name() == name {
                    let result = model
                        .cross_validate(dataset, &options)
                        .with_context(|| format!("Cross-validation of '{}' failed", name))?;
                    (RunMode::CrossValidation, result)
                } else {
                    let result = model
                        .predict(dataset)
                        .with_context(|| format!("Prediction of '{}' with '{}' failed", dataset.name(), name))?;
                    (RunMode::Prediction, result)
                };

                let summary = Self::summarize(&name, dataset.name(), mode, &result);
                tracing::info!(
                    "  {} on {} ({:?}): {} sequences, mean score/residue {:.4}",
                    name,
                    dataset.name(),
                    mode,
                    summary.sequences,
                    summary.mean_score_per_residue
                );
                runs.push(summary);

                if let Some(path_result) = result.as_path() {
                    if path_result.decoder().is_some() {
                        let decoded_path = output_dir.join(format!("decoded_{}_{}.txt", name, dataset.name()));
                        write_decoded(
                            path_result,
                            &decoded_path,
                            self.config.decode_width,
                            path_result.reversed(),
                        )?;
                        outputs.push(decoded_path);
                    }
                }

                results.insert((name.clone(), dataset.name().to_string()), result);
            }

            model_infos.push(ModelInfo {
                name,
                description: model.description().to_string(),
            });
        }

        // dataset-major order so that origins follow the dataset listing
        let mut set = ResultSet::new();
        for dataset in &self.datasets {
            for model in &model_infos {
                if let Some(result) = results.get(&(model.name.clone(), dataset.name().to_string())) {
                    set.add(result, dataset.name(), &model.name)?;
                }
            }
        }

        if !set.is_empty() && !model_infos.is_empty() {
            let lratio = output_dir.join("lratio.tsv");
            output_tsv(&mut set, &lratio, &[], Comparison::Ratio, self.config.per_residue)
                .context("Failed to write likelihood ratio table")?;
            outputs.push(lratio);

            let ldiff = output_dir.join("ldiff.tsv");
            output_tsv(&mut set, &ldiff, &[], Comparison::Difference, self.config.per_residue)
                .context("Failed to write likelihood difference table")?;
            outputs.push(ldiff);
        }

        let roc = if self.config.roc_origins.len() >= 2 {
            let roc = set
                .roc(&self.config.roc_origins, self.config.roc_mode)
                .with_context(|| format!("ROC over origins {:?} failed", self.config.roc_origins))?;
            tracing::info!("ROC over {:?}: AUC = {:.4}", self.config.roc_origins, roc.auc);
            Some(roc)
        } else {
            None
        };

        let datasets = self
            .datasets
            .iter()
            .map(|d| DatasetInfo {
                name: d.name().to_string(),
                sequences: d.len(),
                label_distribution: d
                    .label_distribution()
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect(),
            })
            .collect();

        Ok(EvaluationResults {
            config: self.config.clone(),
            datasets,
            models: model_infos,
            runs,
            roc,
            outputs,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Save results to JSON file
    pub fn save_results(results: &EvaluationResults, output_path: &Path) -> Result<()> {
        std::fs::create_dir_all(output_path.parent().unwrap_or(Path::new(".")))?;
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(output_path, json)?;
        tracing::info!("Results saved to {}", output_path.display());
        Ok(())
    }

    /// Generate a markdown report
    pub fn generate_report(results: &EvaluationResults) -> String {
        let mut report = String::new();

        report.push_str("# Sequence Classification Evaluation Report\n\n");
        report.push_str(&format!("**Generated:** {}\n\n", results.timestamp.format("%Y-%m-%d %H:%M:%S UTC")));
        report.push_str(&format!("**Version:** {}\n\n", results.version));

        report.push_str("## Datasets\n\n");
        report.push_str("| Dataset | Sequences | Labels |\n");
        report.push_str("|---------|-----------|--------|\n");
        for dataset in &results.datasets {
            let mut labels: Vec<String> = dataset
                .label_distribution
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .collect();
            labels.sort();
            report.push_str(&format!("| {} | {} | {} |\n", dataset.name, dataset.sequences, labels.join(", ")));
        }

        report.push_str("\n## Models\n\n");
        for model in &results.models {
            report.push_str(&format!("- **{}**: {}\n", model.name, model.description));
        }

        report.push_str("\n## Runs\n\n");
        report.push_str("| Model | Dataset | Mode | Sequences | Score/residue | Accuracy | Threshold | AUC-ROC |\n");
        report.push_str("|-------|---------|------|-----------|---------------|----------|-----------|---------|\n");
        for run in &results.runs {
            let acc = run.accuracy.map_or("-".to_string(), |a| format!("{:.4}", a.acc));
            let thr = run
                .best_threshold
                .map_or("-".to_string(), |(a, t)| format!("{:.4} @ {:.4}", a, t));
            let auc = run.auc_roc.map_or("-".to_string(), |v| format!("{:.4}", v));
            let mode = match run.mode {
                RunMode::CrossValidation => "cross-validation",
                RunMode::Prediction => "prediction",
            };
            report.push_str(&format!(
                "| {} | {} | {} | {} | {:.4} | {} | {} | {} |\n",
                run.model, run.dataset, mode, run.sequences, run.mean_score_per_residue, acc, thr, auc
            ));
        }

        if let Some(roc) = &results.roc {
            report.push_str("\n## ROC\n\n");
            report.push_str(&format!("- **Origins:** {}\n", results.config.roc_origins.join(", ")));
            report.push_str(&format!("- **Thresholds:** {}\n", roc.len()));
            report.push_str(&format!("- **AUC:** {:.4}\n", roc.auc));
        }

        if !results.outputs.is_empty() {
            report.push_str("\n## Outputs\n\n");
            for path in &results.outputs {
                report.push_str(&format!("- `{}`\n", path.display()));
            }
        }

        report.push_str("\n## Configuration\n\n");
        report.push_str(&format!(
            "```json\n{}\n```\n",
            serde_json::to_string_pretty(&results.config).unwrap_or_default()
        ));

        report
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Evaluation pipeline CLI for sequence classifiers
//!
//! Usage:
//!   seqclass-eval --seed 42
//!   seqclass-eval --config eval.json --output ./results --folds 10

use anyhow::Result;
use clap::Parser;
use seqclass_eval::pipeline::{EvaluationConfig, EvaluationPipeline, RunMode};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "seqclass-eval")]
#[command(about = "Cross-validate and compare sequence classification models")]
#[command(version)]
struct Args {
    /// JSON configuration (datasets, models, ROC origins); defaults to a synthetic run
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Random seed for reproducibility
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of cross-validation folds
    #[arg(short, long)]
    folds: Option<usize>,

    /// Do not stratify folds by label
    #[arg(long)]
    no_stratify: bool,

    /// Output directory for results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format (json, markdown, both)
    #[arg(long, default_value = "both")]
    format: String,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EvaluationConfig::from_file(path)?,
        None => EvaluationConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(folds) = args.folds {
        config.folds = folds;
    }
    if args.no_stratify {
        config.stratify = false;
    }
    if let Some(output) = &args.output {
        config.output_dir = output.to_string_lossy().to_string();
    }

    tracing::info!("Sequence Classification Evaluation Pipeline");
    tracing::info!("===========================================");
    tracing::info!("Seed: {}", config.seed);
    tracing::info!("Folds: {} (stratified: {})", config.folds, config.stratify);
    tracing::info!("Datasets: {}", config.datasets.len());
    tracing::info!("Models: {}", config.models.len());

    let output_dir = PathBuf::from(&config.output_dir);
    let mut pipeline = EvaluationPipeline::new(config);
    let results = pipeline.run()?;

    // Print summary to console
    println!("\n{}", "=".repeat(78));
    println!("EVALUATION SUMMARY");
    println!("{}", "=".repeat(78));
    println!(
        "{:<12} {:<12} {:<6} {:>6} {:>14} {:>10} {:>10}",
        "Model", "Dataset", "Mode", "N", "Score/res", "Accuracy", "AUC-ROC"
    );
    println!("{:-<78}", "");

    for run in &results.runs {
        let mode = match run.mode {
            RunMode::CrossValidation => "cv",
            RunMode::Prediction => "pred",
        };
        let acc = run.accuracy.map_or("-".to_string(), |a| format!("{:.4}", a.acc));
        let auc = run.auc_roc.map_or("-".to_string(), |v| format!("{:.4}", v));
        println!(
            "{:<12} {:<12} {:<6} {:>6} {:>14.4} {:>10} {:>10}",
            run.model, run.dataset, mode, run.sequences, run.mean_score_per_residue, acc, auc
        );
    }
    println!("{:-<78}", "");

    if let Some(roc) = &results.roc {
        println!(
            "\nROC over {}: {} thresholds, AUC = {:.4}",
            results.config.roc_origins.join(", "),
            roc.len(),
            roc.auc
        );
    }

    // Save outputs
    std::fs::create_dir_all(&output_dir)?;

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");

    if args.format == "json" || args.format == "both" {
        let json_path = output_dir.join(format!("eval_{}.json", timestamp));
        EvaluationPipeline::save_results(&results, &json_path)?;
        println!("\nJSON results saved to: {}", json_path.display());
    }

    if args.format == "markdown" || args.format == "both" {
        let report = EvaluationPipeline::generate_report(&results);
        let md_path = output_dir.join(format!("eval_{}.md", timestamp));
        std::fs::write(&md_path, report)?;
        println!("Markdown report saved to: {}", md_path.display());
    }

    for path in &results.outputs {
        println!("Wrote {}", path.display());
    }

    println!("\nEvaluation complete!");

    Ok(())
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Standalone cross-validation runner
//!
//! Cross-validates a single model on one dataset, then prints per-fold
//! statistics and optionally writes decoded state paths.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use seqclass_eval::convert::{ConverterConfig, MissingPolicy, Normalizer, Region};
use seqclass_eval::datasets::{Label, SequenceCollection};
use seqclass_eval::decode::Decoder;
use seqclass_eval::engine::{DiscreteHmm, LinearSvm, PathEngine};
use seqclass_eval::metrics::ClassificationReport;
use seqclass_eval::predictor::{CvOptions, MarginModel, PathModel, Predictor};
use seqclass_eval::report::write_decoded;
use seqclass_eval::source::{FastaSource, SequenceSource, SyntheticSource};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    /// Hidden Markov model over residues
    Path,
    /// Linear SVM over converted features
    Margin,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Features {
    Hydropathy,
    Spectrum,
}

#[derive(Parser, Debug)]
#[command(name = "run-cv")]
#[command(about = "Cross-validate a single sequence model")]
#[command(version)]
struct Args {
    #[arg(short, long, value_enum, default_value = "path")]
    kind: Kind,

    /// FASTA file to evaluate (synthetic data when omitted)
    #[arg(short, long)]
    fasta: Option<PathBuf>,

    /// Dataset name
    #[arg(short, long, default_value = "data")]
    name: String,

    /// Label for every sequence in the FASTA file (+1, -1, or a class tag)
    #[arg(short, long)]
    label: Option<String>,

    /// Number of synthetic sequences
    #[arg(long, default_value_t = 40)]
    num_sequences: usize,

    /// Random seed
    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    /// Number of folds
    #[arg(long, default_value_t = 5)]
    folds: usize,

    /// HMM definition (JSON); a random model is used when omitted
    #[arg(short, long)]
    model_file: Option<PathBuf>,

    /// Number of states for a random HMM
    #[arg(long, default_value_t = 2)]
    states: usize,

    /// Emission alphabet for a random HMM
    #[arg(long, default_value = "ACDEFGHIKLMNPQRSTVWY")]
    alphabet: String,

    /// Reverse sequences before training and decoding
    #[arg(long)]
    reverse: bool,

    /// One symbol per HMM state, used to decode paths
    #[arg(short, long)]
    decoder: Option<String>,

    /// Write decoded paths here
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Line width of the decoded output
    #[arg(long, default_value_t = 60)]
    width: usize,

    /// Report the first match of this regex in each decoded path
    #[arg(long)]
    pattern: Option<String>,

    /// Save the refit HMM here
    #[arg(long)]
    save_model: Option<PathBuf>,

    /// Feature conversion for margin models
    #[arg(long, value_enum, default_value = "spectrum")]
    features: Features,

    /// k-mer length for spectrum features
    #[arg(long, default_value_t = 2)]
    k: usize,

    /// Region start for feature conversion
    #[arg(long, default_value_t = 0)]
    start: usize,

    /// Region end for feature conversion
    #[arg(long)]
    end: Option<usize>,

    /// Soft-margin parameter
    #[arg(short, long, default_value_t = 1.0)]
    c: f64,
}

fn load_data(args: &Args) -> Result<SequenceCollection> {
    let mut data = match &args.fasta {
        Some(path) => FastaSource::new(&args.name, path).load()?,
        None => {
            tracing::info!(
                "Generating synthetic dataset ({} sequences, seed={})",
                args.num_sequences,
                args.seed
            );
            SyntheticSource::new(&args.name, args.num_sequences, args.seed).load()?
        }
    };
    if let Some(label) = &args.label {
        data.set_label_all(Label::parse(label));
    }
    Ok(data)
}

fn run_path(args: &Args, data: &SequenceCollection, options: &CvOptions) -> Result<()> {
    let engine = match &args.model_file {
        Some(path) => DiscreteHmm::load(path)
            .with_context(|| format!("Failed to load HMM: {}", path.display()))?,
        None => DiscreteHmm::random(args.states, &args.alphabet, args.seed)?,
    };
    let mut model = PathModel::new(&args.name, engine).with_reverse(args.reverse);
    if let Some(symbols) = &args.decoder {
        model = model.with_decoder(Decoder::from_symbols(symbols));
    }

    let mut result = model.cross_validate(data, options)?;
    let ids = result.identifiers().to_vec();

    let mut total = 0.0;
    for id in &ids {
        total += result.score(id)? / result.seqlen(id)?.max(1) as f64;
    }
    println!("Mean log-likelihood per residue: {:.4}", total / ids.len().max(1) as f64);

    if let Some(pattern) = &args.pattern {
        println!("\nFirst '{}' match per sequence:", pattern);
        for id in &ids {
            match result.find_positions(id, pattern, args.reverse)? {
                Some((start, end)) => println!("  {}\t{}\t{}", id, start, end),
                None => println!("  {}\t-\t-", id),
            }
        }
    }

    if let Some(out) = &args.out {
        let Some(path_result) = result.as_path() else {
            bail!("Result has no state paths");
        };
        write_decoded(path_result, out, args.width, args.reverse)?;
        println!("Decoded paths written to {}", out.display());
    }

    if let Some(path) = &args.save_model {
        model.save(path)?;
        println!("Model saved to {}", path.display());
    }
    Ok(())
}

fn run_margin(args: &Args, data: &SequenceCollection, options: &CvOptions) -> Result<()> {
    let converter = match args.features {
        Features::Hydropathy => ConverterConfig::Hydropathy {
            normalize: Some(Normalizer::default()),
            missing: MissingPolicy::Skip,
        },
        Features::Spectrum => ConverterConfig::Spectrum {
            k: args.k,
            alphabet: args.alphabet.clone(),
        },
    };
    let mut model = MarginModel::builder(&args.name, LinearSvm::new().with_c(args.c))
        .converter(converter.build()?)
        .region(Region::new(args.start, args.end))
        .build()?;

    let result = model.cross_validate(data, options)?;
    let Some(margin) = result.as_margin() else {
        bail!("Result has no decision values");
    };

    let mut predicted = Vec::new();
    let mut truth = Vec::new();
    for id in margin.identifiers() {
        if let Some(label) = margin.labels().get(id) {
            predicted.push(Label::from_signed(margin.entry(id)?.label));
            truth.push(label.clone());
        }
    }
    println!("{}", ClassificationReport::from_predictions(&predicted, &truth)?.format());
    println!("ACC={:.4} MSE={:.4} SCC={:.4}", margin.accuracy(), margin.mse(), margin.scc());

    let (acc, threshold) = margin.calc_threshold();
    println!("Best threshold: {:.4} (accuracy {:.4})", threshold, acc);
    match margin.roc() {
        Ok(roc) => println!("AUC-ROC: {:.4}", roc.auc),
        Err(e) => tracing::warn!("ROC unavailable: {}", e),
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let data = load_data(&args)?;

    println!("\nDataset: {} ({} sequences)", data.name(), data.len());
    for (label, count) in &data.label_distribution() {
        println!(
            "  {}: {} ({:.1}%)",
            label,
            count,
            *count as f64 / data.len() as f64 * 100.0
        );
    }

    let options = CvOptions {
        folds: args.folds,
        ..CvOptions::default()
    };

    println!("\n{}", "=".repeat(70));
    println!("CROSS-VALIDATION ({} folds)", options.folds);
    println!("{}", "=".repeat(70));

    match args.kind {
        Kind::Path => run_path(&args, &data, &options)?,
        Kind::Margin => run_margin(&args, &data, &options)?,
    }

    println!("\n{}", "=".repeat(70));
    println!("Evaluation complete!");

    Ok(())
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Evaluation framework for sequence classifiers
//!
//! This crate provides:
//! - Labeled sequence collections with deterministic k-fold partitioning
//! - Path-labeling (hidden Markov model) and margin (linear SVM) predictors
//!   behind one `Predictor` trait
//! - Per-sequence results with state-path decoding and pattern search
//! - Multi-model likelihood comparison and ROC/AUC analysis
//! - TSV and decoded-path reports
//! - Reproducible evaluation pipeline with seeded randomness

pub mod convert;
pub mod datasets;
pub mod decode;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod predictor;
pub mod report;
pub mod result;
pub mod resultset;
pub mod source;

pub use convert::{Converter, ConverterConfig, LookupConverter, Region, SpectrumConverter};
pub use datasets::{Fold, Label, Sequence, SequenceCollection};
pub use decode::Decoder;
pub use engine::{DiscreteHmm, LinearSvm, MarginEngine, PathEngine};
pub use error::{EvalError, Result};
pub use metrics::{Accuracy, ClassificationReport, ConfusionMatrix, RocCurve};
pub use pipeline::{EvaluationConfig, EvaluationPipeline, EvaluationResults};
pub use predictor::{CvOptions, MarginModel, ModelConfig, PathModel, Predictor};
pub use report::{output_tsv, write_decoded, Comparison};
pub use result::{MarginResult, PathResult, PredictionResult};
pub use resultset::{ResultSet, RocMode};
pub use source::{FastaSource, SequenceSource, SyntheticSource};

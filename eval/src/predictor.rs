// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Predictors for sequence classification
//!
//! Implements:
//! - Path model (state path labeling through a [`PathEngine`])
//! - Margin model (decision values through a [`MarginEngine`] over converted features)
//!
//! Both share the fold driver in [`Predictor::cross_validate`]: every fold gets
//! a fresh untrained handle, so no fold sees parameters fitted on another.

use crate::convert::{Converter, ConverterConfig, Region};
use crate::datasets::{Label, SequenceCollection};
use crate::decode::Decoder;
use crate::engine::{DiscreteHmm, LinearSvm, MarginEngine, PathEngine};
use crate::error::{EvalError, Result};
use crate::result::{MarginResult, PathResult, PredictionResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Cross-validation settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CvOptions {
    pub folds: usize,
    pub stratify: bool,
    /// Retrain on the full dataset once all folds are scored
    pub refit: bool,
}

impl Default for CvOptions {
    fn default() -> Self {
        Self {
            folds: 5,
            stratify: true,
            refit: true,
        }
    }
}

/// Trait for all sequence predictors
pub trait Predictor: Send + Sync {
    /// Train from scratch on the given collection
    fn train(&mut self, data: &SequenceCollection) -> Result<()>;

    /// Predict every sequence of the collection
    fn predict(&self, data: &SequenceCollection) -> Result<PredictionResult>;

    /// Untrained predictor with the same configuration
    fn fresh(&self) -> Box<dyn Predictor>;

    /// Get model name
    fn name(&self) -> &str;

    /// Get model description
    fn description(&self) -> &str;

    /// k-fold cross-validation. Each sequence is predicted exactly once, by a
    /// handle trained without it.
    fn cross_validate(&mut self, data: &SequenceCollection, options: &CvOptions) -> Result<PredictionResult> {
        let folds = data.partition(options.folds, options.stratify)?;
        let mut merged: Option<PredictionResult> = None;

        for fold in &folds {
            let mut handle = self.fresh();
            handle.train(&fold.train)?;
            let result = handle.predict(&fold.test)?;
            debug!(
                model = self.name(),
                fold = fold.index,
                train = fold.train.len(),
                test = fold.test.len(),
                "fold scored"
            );
            match merged.as_mut() {
                Some(acc) => acc.merge(result)?,
                None => merged = Some(result),
            }
        }

        let mut merged = merged.ok_or_else(|| EvalError::config(format!("'{}' produced no folds", data.name())))?;
        merged.set_name(data.name());

        if options.refit {
            self.train(data)?;
        }

        info!(
            model = self.name(),
            dataset = data.name(),
            folds = options.folds,
            sequences = merged.len(),
            "cross-validation complete"
        );
        Ok(merged)
    }
}

/// Path-labeling model over a [`PathEngine`]
#[derive(Debug, Clone)]
pub struct PathModel<E: PathEngine> {
    name: String,
    description: String,
    initial: E,
    trained: Option<E>,
    reverse: bool,
    decoder: Option<Decoder>,
}

impl<E: PathEngine> PathModel<E> {
    pub fn new(name: impl Into<String>, engine: E) -> Self {
        Self {
            name: name.into(),
            description: "State path labeling with a discrete hidden Markov model".to_string(),
            initial: engine,
            trained: None,
            reverse: false,
            decoder: None,
        }
    }

    /// Load the engine definition from disk
    pub fn load(name: impl Into<String>, path: &Path) -> Result<Self> {
        Ok(Self::new(name, E::load(path)?))
    }

    /// Save the current engine (trained if available)
    pub fn save(&self, path: &Path) -> Result<()> {
        self.engine().save(path)
    }

    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn with_decoder(mut self, decoder: Decoder) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_trained(&self) -> bool {
        self.trained.is_some()
    }

    /// Engine used for prediction: the trained one, else the loaded definition
    pub fn engine(&self) -> &E {
        self.trained.as_ref().unwrap_or(&self.initial)
    }

    /// Sequences as fed to the engine: foreign symbols removed, optionally reversed
    fn prepare(&self, data: &SequenceCollection) -> Vec<String> {
        let alphabet = self.initial.alphabet();
        data.iter()
            .map(|seq| {
                let kept = seq.sequence().chars().filter(|c| alphabet.contains(*c));
                if self.reverse {
                    kept.rev().collect()
                } else {
                    kept.collect()
                }
            })
            .collect()
    }
}

impl<E: PathEngine + 'static> Predictor for PathModel<E> {
    fn train(&mut self, data: &SequenceCollection) -> Result<()> {
        let mut engine = self.initial.clone();
        engine.reestimate(&self.prepare(data))?;
        self.trained = Some(engine);
        Ok(())
    }

    fn predict(&self, data: &SequenceCollection) -> Result<PredictionResult> {
        let (paths, likelihoods) = self.engine().decode_path(&self.prepare(data))?;
        let mut result = PathResult::new(data.name(), data, paths, likelihoods, self.reverse)?;
        if let Some(decoder) = &self.decoder {
            result.set_decoder(decoder.clone());
        }
        Ok(PredictionResult::Path(result))
    }

    fn fresh(&self) -> Box<dyn Predictor> {
        Box::new(Self {
            trained: None,
            ..self.clone()
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Margin classifier over converted feature vectors
pub struct MarginModel<E: MarginEngine> {
    name: String,
    description: String,
    prototype: E,
    trained: Option<E>,
    converter: Arc<dyn Converter>,
    region: Region,
}

impl<E: MarginEngine> std::fmt::Debug for MarginModel<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarginModel")
            .field("name", &self.name)
            .field("converter", &self.converter.name())
            .field("region", &self.region)
            .field("trained", &self.trained.is_some())
            .finish()
    }
}

/// Builder for [`MarginModel`]; a converter is mandatory
pub struct MarginModelBuilder<E: MarginEngine> {
    name: String,
    engine: E,
    converter: Option<Box<dyn Converter>>,
    region: Region,
}

impl<E: MarginEngine> MarginModelBuilder<E> {
    pub fn converter(mut self, converter: Box<dyn Converter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    pub fn build(self) -> Result<MarginModel<E>> {
        let converter = self.converter.ok_or_else(|| {
            EvalError::config(format!("margin model '{}' needs a sequence converter", self.name))
        })?;
        let description = format!("Linear margin classifier over {} features", converter.name());
        Ok(MarginModel {
            name: self.name,
            description,
            prototype: self.engine,
            trained: None,
            converter: Arc::from(converter),
            region: self.region,
        })
    }
}

impl<E: MarginEngine> MarginModel<E> {
    pub fn builder(name: impl Into<String>, engine: E) -> MarginModelBuilder<E> {
        MarginModelBuilder {
            name: name.into(),
            engine,
            converter: None,
            region: Region::default(),
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained.is_some()
    }

    fn features(&self, data: &SequenceCollection) -> Result<Vec<Vec<f64>>> {
        data.iter()
            .map(|seq| self.converter.convert(seq.sequence(), self.region))
            .collect()
    }
}

impl<E: MarginEngine + 'static> Predictor for MarginModel<E> {
    fn train(&mut self, data: &SequenceCollection) -> Result<()> {
        let labels = data
            .identifiers()
            .iter()
            .map(|id| match data.get_label(id) {
                None => Err(EvalError::lookup(format!(
                    "'{}' in '{}' has no label; margin training needs +1/-1 labels",
                    id,
                    data.name()
                ))),
                Some(label) => label.as_signed().ok_or_else(|| {
                    EvalError::config(format!(
                        "'{}' in '{}' has class label '{}'; margin training needs +1/-1 labels",
                        id,
                        data.name(),
                        label
                    ))
                }),
            })
            .collect::<Result<Vec<f64>>>()?;

        let features = self.features(data)?;
        let mut engine = self.prototype.fresh();
        engine.fit(&labels, &features)?;
        self.trained = Some(engine);
        Ok(())
    }

    fn predict(&self, data: &SequenceCollection) -> Result<PredictionResult> {
        let engine = self
            .trained
            .as_ref()
            .ok_or_else(|| EvalError::config(format!("margin model '{}' has not been trained", self.name)))?;

        // unknown truth is passed as 0 and left out of the statistics
        let labels: Vec<f64> = data
            .identifiers()
            .iter()
            .map(|id| data.get_label(id).and_then(Label::as_signed).unwrap_or(0.0))
            .collect();
        let features = self.features(data)?;
        let scores = engine.score(&labels, &features)?;
        let result = MarginResult::new(data.name(), data, scores.labels, scores.values, scores.accuracy)?;
        Ok(PredictionResult::Margin(result))
    }

    fn fresh(&self) -> Box<dyn Predictor> {
        Box::new(Self {
            name: self.name.clone(),
            description: self.description.clone(),
            prototype: self.prototype.fresh(),
            trained: None,
            converter: Arc::clone(&self.converter),
            region: self.region,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }
}

fn default_c() -> f64 {
    1.0
}

fn default_svm_iter() -> usize {
    1000
}

fn default_hmm_iter() -> usize {
    100
}

/// Serializable model selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelKind {
    Path {
        /// JSON model definition; a random model is built when absent
        #[serde(default)]
        model_file: Option<PathBuf>,
        #[serde(default)]
        states: Option<usize>,
        #[serde(default)]
        alphabet: Option<String>,
        /// One symbol per state, e.g. "iiMMMo"
        #[serde(default)]
        decoder: Option<String>,
        #[serde(default)]
        reverse: bool,
        #[serde(default = "default_hmm_iter")]
        max_iter: usize,
    },
    Margin {
        #[serde(default)]
        converter: Option<ConverterConfig>,
        #[serde(default)]
        region: Region,
        #[serde(default = "default_c")]
        c: f64,
        #[serde(default = "default_svm_iter")]
        max_iter: usize,
    },
}

/// A named model entry of an evaluation config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub kind: ModelKind,
}

impl ModelConfig {
    /// Instantiate the predictor this entry describes
    pub fn build(&self, seed: u64) -> Result<Box<dyn Predictor>> {
        match &self.kind {
            ModelKind::Path {
                model_file,
                states,
                alphabet,
                decoder,
                reverse,
                max_iter,
            } => {
                let engine = match (model_file, states, alphabet) {
                    (Some(path), _, _) => DiscreteHmm::load(path)?,
                    (None, Some(states), Some(alphabet)) => DiscreteHmm::random(*states, alphabet, seed)?,
                    _ => {
                        return Err(EvalError::config(format!(
                            "path model '{}' needs model_file or states and alphabet",
                            self.name
                        )))
                    }
                };
                let mut model = PathModel::new(&self.name, engine.with_max_iter(*max_iter)).with_reverse(*reverse);
                if let Some(symbols) = decoder {
                    model = model.with_decoder(Decoder::from_symbols(symbols));
                }
                Ok(Box::new(model))
            }
            ModelKind::Margin {
                converter,
                region,
                c,
                max_iter,
            } => {
                let engine = LinearSvm::new().with_c(*c).with_max_iter(*max_iter);
                let mut builder = MarginModel::builder(&self.name, engine).region(*region);
                if let Some(converter) = converter {
                    builder = builder.converter(converter.build()?);
                }
                Ok(Box::new(builder.build()?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{LookupConverter, SpectrumConverter};
    use crate::datasets::Sequence;

    fn block_hmm() -> DiscreteHmm {
        DiscreteHmm::new(
            2,
            "AC",
            vec![0.5, 0.5],
            vec![0.8, 0.2, 0.2, 0.8],
            vec![0.99, 0.01, 0.01, 0.99],
        )
        .unwrap()
    }

    fn path_data() -> SequenceCollection {
        let seqs = ["AACCA", "CCCAA", "ACACX", "AAAAC", "CCAAC", "CACCA", "AACAA"];
        let mut col = SequenceCollection::from_sequences(
            "tm",
            seqs.iter().enumerate().map(|(i, s)| Sequence::new(format!("s{}", i), *s)),
        );
        col.set_label_all(Label::Positive);
        col
    }

    fn margin_data() -> SequenceCollection {
        let mut seqs = Vec::new();
        for i in 0..5 {
            seqs.push(Sequence::new(format!("p{}", i), "AAAAAL".repeat(i + 1)).with_label(Label::Positive));
            seqs.push(Sequence::new(format!("n{}", i), "LLLLLA".repeat(i + 1)).with_label(Label::Negative));
        }
        SequenceCollection::from_sequences("mix", seqs)
    }

    fn margin_model() -> MarginModel<LinearSvm> {
        MarginModel::builder("svm", LinearSvm::new())
            .converter(Box::new(SpectrumConverter::new(1, "AL").unwrap()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_path_predict_strips_foreign_symbols() {
        let model = PathModel::new("hmm", block_hmm()).with_decoder(Decoder::from_symbols("io"));
        let result = model.predict(&path_data()).unwrap();
        let path = result.as_path().unwrap();

        assert_eq!(path.entry("s2").unwrap().path.len(), 4);
        assert_eq!(path.entry("s2").unwrap().seqlen, 5);
        assert_eq!(result.decode("s0", false).unwrap(), "iiooi");
    }

    #[test]
    fn test_reverse_decode_matches_forward() {
        let data = path_data();
        let forward = PathModel::new("f", block_hmm()).with_decoder(Decoder::from_symbols("io"));
        let backward = forward.clone().with_reverse(true);

        let f = forward.predict(&data).unwrap();
        let b = backward.predict(&data).unwrap();
        for id in data.identifiers() {
            assert_eq!(b.decode(id, true).unwrap(), f.decode(id, false).unwrap());
        }
    }

    #[test]
    fn test_path_train_starts_from_initial() {
        let data = path_data();
        let mut model = PathModel::new("hmm", block_hmm().with_max_iter(5));
        model.train(&data).unwrap();
        let once = model.engine().clone();
        model.train(&data).unwrap();
        assert_eq!(model.engine(), &once);
    }

    #[test]
    fn test_path_cross_validation_covers_each_sequence_once() {
        let data = path_data();
        let mut model = PathModel::new("hmm", block_hmm().with_max_iter(5));
        let options = CvOptions {
            folds: 3,
            stratify: true,
            refit: false,
        };
        let result = model.cross_validate(&data, &options).unwrap();

        assert_eq!(result.len(), data.len());
        assert_eq!(result.name(), "tm");
        let mut ids = result.identifiers().to_vec();
        ids.sort();
        let mut expected = data.identifiers().to_vec();
        expected.sort();
        assert_eq!(ids, expected);
        assert!(!model.is_trained());

        model
            .cross_validate(&data, &CvOptions { folds: 2, ..options })
            .unwrap();
        assert!(!model.is_trained());
        model.cross_validate(&data, &CvOptions::default()).unwrap();
        assert!(model.is_trained());
    }

    #[test]
    fn test_cross_validation_rejects_bad_folds() {
        let mut model = PathModel::new("hmm", block_hmm());
        let options = CvOptions {
            folds: 1,
            ..CvOptions::default()
        };
        assert!(matches!(
            model.cross_validate(&path_data(), &options),
            Err(EvalError::Config { .. })
        ));
    }

    #[test]
    fn test_margin_builder_requires_converter() {
        let err = MarginModel::builder("svm", LinearSvm::new()).build();
        assert!(matches!(err, Err(EvalError::Config { .. })));
    }

    #[test]
    fn test_margin_train_label_errors() {
        let mut model = margin_model();

        let unlabeled = SequenceCollection::from_sequences("u", vec![Sequence::new("x", "AAL")]);
        assert!(matches!(model.train(&unlabeled), Err(EvalError::Lookup { .. })));

        let tagged = SequenceCollection::from_sequences(
            "t",
            vec![Sequence::new("x", "AAL").with_label(Label::Class("tm".into()))],
        );
        assert!(matches!(model.train(&tagged), Err(EvalError::Config { .. })));

        assert!(matches!(model.predict(&tagged), Err(EvalError::Config { .. })));
    }

    #[test]
    fn test_margin_predict_accepts_unlabeled() {
        let mut model = margin_model();
        model.train(&margin_data()).unwrap();

        let query = SequenceCollection::from_sequences(
            "q",
            vec![
                Sequence::new("q1", "AAAAA"),
                Sequence::new("q2", "LLLLL").with_label(Label::Negative),
            ],
        );
        let result = model.predict(&query).unwrap();
        let margin = result.as_margin().unwrap();
        assert!(margin.score("q1").unwrap() > 0.0);
        assert!(margin.score("q2").unwrap() < 0.0);
        // only q2 has known truth
        assert!((margin.accuracy() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_margin_cross_validation() {
        let data = margin_data();
        let mut model = margin_model();
        let result = model
            .cross_validate(
                &data,
                &CvOptions {
                    folds: 5,
                    stratify: true,
                    refit: true,
                },
            )
            .unwrap();

        assert_eq!(result.len(), 10);
        assert!(result.as_margin().unwrap().accuracy() >= 0.9);
        assert!(model.is_trained());
    }

    #[test]
    fn test_margin_hydropathy_with_unequal_lengths() {
        let rows = [
            ("h0", "IIVVL", Label::Positive),
            ("h1", "IIVVLL", Label::Positive),
            ("h2", "VLIVIFA", Label::Positive),
            ("h3", "LIVM", Label::Positive),
            ("d0", "DDEKR", Label::Negative),
            ("d1", "DDEKRR", Label::Negative),
            ("d2", "KRDENQS", Label::Negative),
            ("d3", "EDKR", Label::Negative),
        ];
        let data = SequenceCollection::from_sequences(
            "hyd",
            rows.iter()
                .map(|(id, seq, label)| Sequence::new(*id, *seq).with_label(label.clone())),
        );

        // per-sequence rescaling on by default; training must still accept ragged vectors
        let mut scaled = MarginModel::builder("kd", LinearSvm::new())
            .converter(Box::new(LookupConverter::kyte_doolittle()))
            .build()
            .unwrap();
        scaled.train(&data).unwrap();
        assert_eq!(scaled.predict(&data).unwrap().len(), 8);

        let mut raw = MarginModel::builder("kd_raw", LinearSvm::new())
            .converter(Box::new(LookupConverter::kyte_doolittle().with_normalizer(None)))
            .build()
            .unwrap();
        let result = raw
            .cross_validate(
                &data,
                &CvOptions {
                    folds: 4,
                    stratify: true,
                    refit: false,
                },
            )
            .unwrap();

        let mut ids = result.identifiers().to_vec();
        ids.sort();
        let mut expected = data.identifiers().to_vec();
        expected.sort();
        assert_eq!(ids, expected);
        assert!(result.as_margin().unwrap().accuracy() >= 0.75);
    }

    #[test]
    fn test_model_config_build() {
        let json = r#"{
            "name": "hyd",
            "kind": {"type": "margin", "converter": {"type": "spectrum", "k": 2}}
        }"#;
        let config: ModelConfig = serde_json::from_str(json).unwrap();
        let model = config.build(42).unwrap();
        assert_eq!(model.name(), "hyd");

        let missing: ModelConfig =
            serde_json::from_str(r#"{"name": "bare", "kind": {"type": "margin"}}"#).unwrap();
        assert!(matches!(missing.build(42), Err(EvalError::Config { .. })));

        let random: ModelConfig = serde_json::from_str(
            r#"{"name": "r", "kind": {"type": "path", "states": 3, "alphabet": "ACGT", "decoder": "abc"}}"#,
        )
        .unwrap();
        assert_eq!(random.build(7).unwrap().name(), "r");

        let incomplete: ModelConfig =
            serde_json::from_str(r#"{"name": "p", "kind": {"type": "path"}}"#).unwrap();
        assert!(matches!(incomplete.build(7), Err(EvalError::Config { .. })));
    }
}

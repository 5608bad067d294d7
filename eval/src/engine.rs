// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Model engines behind the predictors
//!
//! The evaluation core only talks to engines through [`PathEngine`] and
//! [`MarginEngine`]. Two reference engines are provided:
//! - [`DiscreteHmm`]: discrete hidden Markov model (Baum-Welch, Viterbi)
//! - [`LinearSvm`]: linear soft-margin classifier (subgradient descent)

use crate::error::{EvalError, Result};
use crate::metrics::Accuracy;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Generative engine producing a state path and log-likelihood per sequence
pub trait PathEngine: Clone + Send + Sync {
    /// Symbols the engine can emit; other characters must be removed first
    fn alphabet(&self) -> &str;

    /// Re-estimate parameters from unlabeled training sequences
    fn reestimate(&mut self, sequences: &[String]) -> Result<()>;

    /// Most likely state path and its log-likelihood for each sequence
    fn decode_path(&self, sequences: &[String]) -> Result<(Vec<Vec<usize>>, Vec<f64>)>;

    fn load(path: &Path) -> Result<Self>
    where
        Self: Sized;

    fn save(&self, path: &Path) -> Result<()>;
}

/// Output of [`MarginEngine::score`]
#[derive(Debug, Clone)]
pub struct MarginScores {
    pub labels: Vec<f64>,
    pub accuracy: Accuracy,
    pub values: Vec<f64>,
}

/// Discriminative engine over fixed-length feature vectors
pub trait MarginEngine: Send + Sync {
    /// Fit on signed labels (+1/-1)
    fn fit(&mut self, labels: &[f64], features: &[Vec<f64>]) -> Result<()>;

    /// Predict labels and decision values. `labels` may hold 0.0 for unknown
    /// ground truth; those entries are left out of the accuracy statistics.
    fn score(&self, labels: &[f64], features: &[Vec<f64>]) -> Result<MarginScores>;

    /// Untrained engine with the same hyperparameters
    fn fresh(&self) -> Self
    where
        Self: Sized;
}

// ---------------------------------------------------------------------------
// Log-space helpers
// ---------------------------------------------------------------------------

const EPSILON: f64 = 1e-10;

fn log_sum_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let max = a.max(b);
    max + ((a - max).exp() + (b - max).exp()).ln()
}

fn log_sum_exp_slice(xs: &[f64]) -> f64 {
    xs.iter().fold(f64::NEG_INFINITY, |acc, &x| log_sum_exp(acc, x))
}

fn default_max_iter() -> usize {
    100
}

fn default_tolerance() -> f64 {
    1e-4
}

/// A discrete hidden Markov model over a character alphabet.
///
/// Parameters are stored in probability space, row-major; all algorithms
/// run in log-space. The model definition round-trips through JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscreteHmm {
    n_states: usize,
    alphabet: String,
    initial: Vec<f64>,
    transition: Vec<f64>,
    emission: Vec<f64>,
    #[serde(default = "default_max_iter")]
    max_iter: usize,
    #[serde(default = "default_tolerance")]
    tolerance: f64,
    #[serde(skip)]
    symbol_index: HashMap<char, usize>,
}

impl DiscreteHmm {
    pub fn new(
        n_states: usize,
        alphabet: &str,
        initial: Vec<f64>,
        transition: Vec<f64>,
        emission: Vec<f64>,
    ) -> Result<Self> {
        let mut model = Self {
            n_states,
            alphabet: alphabet.to_string(),
            initial,
            transition,
            emission,
            max_iter: default_max_iter(),
            tolerance: default_tolerance(),
            symbol_index: HashMap::new(),
        };
        model.validate()?;
        Ok(model)
    }

    /// Randomly initialised model, reproducible for a given seed
    pub fn random(n_states: usize, alphabet: &str, seed: u64) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let n_symbols = alphabet.chars().count();
        let mut random_rows = |rows: usize, cols: usize| -> Vec<f64> {
            let mut values = Vec::with_capacity(rows * cols);
            for _ in 0..rows {
                let row: Vec<f64> = (0..cols).map(|_| rng.gen::<f64>() + 0.1).collect();
                let sum: f64 = row.iter().sum();
                values.extend(row.iter().map(|v| v / sum));
            }
            values
        };
        let initial = random_rows(1, n_states);
        let transition = random_rows(n_states, n_states);
        let emission = random_rows(n_states, n_symbols);
        Self::new(n_states, alphabet, initial, transition, emission)
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn n_states(&self) -> usize {
        self.n_states
    }

    pub fn n_symbols(&self) -> usize {
        self.symbol_index.len()
    }

    fn validate(&mut self) -> Result<()> {
        let n = self.n_states;
        self.symbol_index = self.alphabet.chars().enumerate().map(|(i, c)| (c, i)).collect();
        let m = self.symbol_index.len();

        if n == 0 {
            return Err(EvalError::engine("n_states must be > 0"));
        }
        if m == 0 || m != self.alphabet.chars().count() {
            return Err(EvalError::engine(format!(
                "alphabet '{}' must be non-empty without repeated symbols",
                self.alphabet
            )));
        }
        if self.initial.len() != n {
            return Err(EvalError::engine(format!(
                "initial length {} != n_states {}",
                self.initial.len(),
                n
            )));
        }
        if self.transition.len() != n * n {
            return Err(EvalError::engine(format!(
                "transition length {} != n_states*n_states {}",
                self.transition.len(),
                n * n
            )));
        }
        if self.emission.len() != n * m {
            return Err(EvalError::engine(format!(
                "emission length {} != n_states*n_symbols {}",
                self.emission.len(),
                n * m
            )));
        }

        let tol = 1e-6;
        let pi_sum: f64 = self.initial.iter().sum();
        if (pi_sum - 1.0).abs() > tol {
            return Err(EvalError::engine(format!(
                "initial probabilities sum to {pi_sum}, expected ~1.0"
            )));
        }
        for i in 0..n {
            let row_sum: f64 = self.transition[i * n..(i + 1) * n].iter().sum();
            if (row_sum - 1.0).abs() > tol {
                return Err(EvalError::engine(format!(
                    "transition row {i} sums to {row_sum}, expected ~1.0"
                )));
            }
            let row_sum: f64 = self.emission[i * m..(i + 1) * m].iter().sum();
            if (row_sum - 1.0).abs() > tol {
                return Err(EvalError::engine(format!(
                    "emission row {i} sums to {row_sum}, expected ~1.0"
                )));
            }
        }
        Ok(())
    }

    fn encode(&self, sequence: &str) -> Result<Vec<usize>> {
        sequence
            .chars()
            .map(|c| {
                self.symbol_index.get(&c).copied().ok_or_else(|| {
                    EvalError::engine(format!("symbol '{}' is not in alphabet '{}'", c, self.alphabet))
                })
            })
            .collect()
    }

    fn log_initial(&self, i: usize) -> f64 {
        (self.initial[i] + EPSILON).ln()
    }

    fn log_transition(&self, i: usize, j: usize) -> f64 {
        (self.transition[i * self.n_states + j] + EPSILON).ln()
    }

    fn log_emission(&self, i: usize, symbol: usize) -> f64 {
        (self.emission[i * self.n_symbols() + symbol] + EPSILON).ln()
    }

    fn forward(&self, obs: &[usize]) -> (Vec<Vec<f64>>, f64) {
        let n = self.n_states;
        let mut alpha = vec![vec![f64::NEG_INFINITY; n]; obs.len()];
        for i in 0..n {
            alpha[0][i] = self.log_initial(i) + self.log_emission(i, obs[0]);
        }
        for t in 1..obs.len() {
            for j in 0..n {
                let mut acc = f64::NEG_INFINITY;
                for i in 0..n {
                    acc = log_sum_exp(acc, alpha[t - 1][i] + self.log_transition(i, j));
                }
                alpha[t][j] = acc + self.log_emission(j, obs[t]);
            }
        }
        let ll = log_sum_exp_slice(&alpha[obs.len() - 1]);
        (alpha, ll)
    }

    fn backward(&self, obs: &[usize]) -> Vec<Vec<f64>> {
        let n = self.n_states;
        let t_len = obs.len();
        let mut beta = vec![vec![f64::NEG_INFINITY; n]; t_len];
        beta[t_len - 1] = vec![0.0; n];
        for t in (0..t_len - 1).rev() {
            for i in 0..n {
                let mut acc = f64::NEG_INFINITY;
                for j in 0..n {
                    acc = log_sum_exp(
                        acc,
                        self.log_transition(i, j) + self.log_emission(j, obs[t + 1]) + beta[t + 1][j],
                    );
                }
                beta[t][i] = acc;
            }
        }
        beta
    }

    fn viterbi(&self, obs: &[usize]) -> (Vec<usize>, f64) {
        if obs.is_empty() {
            return (Vec::new(), 0.0);
        }
        let n = self.n_states;
        let t_len = obs.len();
        let mut delta = vec![vec![f64::NEG_INFINITY; n]; t_len];
        let mut psi = vec![vec![0usize; n]; t_len];

        for i in 0..n {
            delta[0][i] = self.log_initial(i) + self.log_emission(i, obs[0]);
        }
        for t in 1..t_len {
            for j in 0..n {
                let mut best_val = f64::NEG_INFINITY;
                let mut best_state = 0;
                for i in 0..n {
                    let v = delta[t - 1][i] + self.log_transition(i, j);
                    if v > best_val {
                        best_val = v;
                        best_state = i;
                    }
                }
                delta[t][j] = best_val + self.log_emission(j, obs[t]);
                psi[t][j] = best_state;
            }
        }

        let mut best_final = 0usize;
        let mut best_score = f64::NEG_INFINITY;
        for (i, &score) in delta[t_len - 1].iter().enumerate() {
            if score > best_score {
                best_score = score;
                best_final = i;
            }
        }

        let mut path = vec![0usize; t_len];
        path[t_len - 1] = best_final;
        for t in (0..t_len - 1).rev() {
            path[t] = psi[t + 1][path[t + 1]];
        }
        (path, best_score)
    }

    /// Forward log-likelihood of one sequence
    pub fn log_likelihood(&self, sequence: &str) -> Result<f64> {
        let obs = self.encode(sequence)?;
        if obs.is_empty() {
            return Ok(0.0);
        }
        Ok(self.forward(&obs).1)
    }
}

impl PathEngine for DiscreteHmm {
    fn alphabet(&self) -> &str {
        &self.alphabet
    }

    /// Multi-sequence Baum-Welch: expected counts are pooled over all
    /// sequences before each M-step.
    fn reestimate(&mut self, sequences: &[String]) -> Result<()> {
        let encoded: Vec<Vec<usize>> = sequences
            .iter()
            .map(|s| self.encode(s))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|obs| !obs.is_empty())
            .collect();
        if encoded.is_empty() {
            return Err(EvalError::engine("no non-empty training sequences"));
        }

        let n = self.n_states;
        let m = self.n_symbols();
        let mut prev_ll = f64::NEG_INFINITY;

        for iteration in 0..self.max_iter {
            let mut init_acc = vec![0.0; n];
            let mut trans_num = vec![0.0; n * n];
            let mut trans_den = vec![0.0; n];
            let mut emit_num = vec![0.0; n * m];
            let mut emit_den = vec![0.0; n];
            let mut total_ll = 0.0;

            for obs in &encoded {
                let (alpha, ll) = self.forward(obs);
                let beta = self.backward(obs);
                total_ll += ll;
                let t_len = obs.len();

                for t in 0..t_len {
                    for i in 0..n {
                        let gamma = (alpha[t][i] + beta[t][i] - ll).exp();
                        if t == 0 {
                            init_acc[i] += gamma;
                        }
                        emit_num[i * m + obs[t]] += gamma;
                        emit_den[i] += gamma;
                        if t + 1 < t_len {
                            trans_den[i] += gamma;
                        }
                    }
                }
                for t in 0..t_len.saturating_sub(1) {
                    for i in 0..n {
                        for j in 0..n {
                            let log_xi = alpha[t][i]
                                + self.log_transition(i, j)
                                + self.log_emission(j, obs[t + 1])
                                + beta[t + 1][j]
                                - ll;
                            trans_num[i * n + j] += log_xi.exp();
                        }
                    }
                }
            }

            if !total_ll.is_finite() {
                return Err(EvalError::engine(format!(
                    "log-likelihood became non-finite at iteration {}",
                    iteration
                )));
            }
            tracing::trace!(iteration, total_ll, "baum-welch step");

            let pi_sum: f64 = init_acc.iter().map(|v| v + EPSILON).sum();
            for i in 0..n {
                self.initial[i] = (init_acc[i] + EPSILON) / pi_sum;
            }
            for i in 0..n {
                let row: Vec<f64> = (0..n)
                    .map(|j| (trans_num[i * n + j] + EPSILON) / (trans_den[i] + EPSILON))
                    .collect();
                let row_sum: f64 = row.iter().sum();
                for j in 0..n {
                    self.transition[i * n + j] = row[j] / row_sum;
                }
                let row: Vec<f64> = (0..m)
                    .map(|k| (emit_num[i * m + k] + EPSILON) / (emit_den[i] + EPSILON))
                    .collect();
                let row_sum: f64 = row.iter().sum();
                for k in 0..m {
                    self.emission[i * m + k] = row[k] / row_sum;
                }
            }

            if prev_ll != f64::NEG_INFINITY && (total_ll - prev_ll).abs() < self.tolerance {
                break;
            }
            prev_ll = total_ll;
        }

        Ok(())
    }

    fn decode_path(&self, sequences: &[String]) -> Result<(Vec<Vec<usize>>, Vec<f64>)> {
        let mut paths = Vec::with_capacity(sequences.len());
        let mut likelihoods = Vec::with_capacity(sequences.len());
        for seq in sequences {
            let obs = self.encode(seq)?;
            let (path, score) = self.viterbi(&obs);
            paths.push(path);
            likelihoods.push(score);
        }
        Ok((paths, likelihoods))
    }

    fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mut model: DiscreteHmm = serde_json::from_reader(std::io::BufReader::new(file))?;
        model.validate()?;
        Ok(model)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Linear soft-margin classifier.
///
/// Minimizes `λ||w||² + (1/n) Σ max(0, 1 - y(w·x + b))` with λ = 1/(2nC)
/// by per-sample subgradient descent with a decaying learning rate.
///
/// Feature vectors are read sparsely: a vector shorter than the model has
/// zeros in its missing trailing positions, and positions beyond the trained
/// dimension carry no weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearSvm {
    weights: Option<Vec<f64>>,
    bias: f64,
    c: f64,
    learning_rate: f64,
    max_iter: usize,
    tol: f64,
}

impl LinearSvm {
    pub fn new() -> Self {
        Self {
            weights: None,
            bias: 0.0,
            c: 1.0,
            learning_rate: 0.01,
            max_iter: 1000,
            tol: 1e-4,
        }
    }

    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn is_fitted(&self) -> bool {
        self.weights.is_some()
    }

    /// w·x + b for each feature vector
    pub fn decision_function(&self, features: &[Vec<f64>]) -> Result<Vec<f64>> {
        let weights = self
            .weights
            .as_ref()
            .ok_or_else(|| EvalError::engine("margin classifier is not trained"))?;
        features
            .iter()
            .map(|x| Ok(self.bias + dot(weights, x)))
            .collect()
    }
}

/// w·x over the shared prefix; absent positions count as zero
fn dot(weights: &[f64], x: &[f64]) -> f64 {
    weights.iter().zip(x).map(|(w, v)| w * v).sum()
}

impl Default for LinearSvm {
    fn default() -> Self {
        Self::new()
    }
}

impl MarginEngine for LinearSvm {
    fn fit(&mut self, labels: &[f64], features: &[Vec<f64>]) -> Result<()> {
        if labels.len() != features.len() {
            return Err(EvalError::engine("labels and features must have the same number of samples"));
        }
        if features.is_empty() {
            return Err(EvalError::engine("cannot fit with 0 samples"));
        }
        let n_features = features.iter().map(Vec::len).max().unwrap_or(0);

        let n_samples = features.len();
        let mut w = vec![0.0; n_features];
        let mut b = 0.0;
        let lambda = 1.0 / (2.0 * n_samples as f64 * self.c);

        for epoch in 0..self.max_iter {
            let eta = self.learning_rate / (1.0 + epoch as f64 * 0.01);
            let prev_w = w.clone();
            let prev_b = b;

            for (x, &y) in features.iter().zip(labels) {
                let decision = b + dot(&w, x);
                if y * decision < 1.0 {
                    for (j, wj) in w.iter_mut().enumerate() {
                        let xj = x.get(j).copied().unwrap_or(0.0);
                        *wj -= eta * (2.0 * lambda * *wj - y * xj);
                    }
                    b += eta * y;
                } else {
                    for wj in w.iter_mut() {
                        *wj -= eta * 2.0 * lambda * *wj;
                    }
                }
            }

            let change: f64 = w
                .iter()
                .zip(&prev_w)
                .map(|(a, p)| (a - p).powi(2))
                .sum::<f64>()
                + (b - prev_b).powi(2);
            if change.sqrt() < self.tol {
                break;
            }
        }

        self.weights = Some(w);
        self.bias = b;
        Ok(())
    }

    fn score(&self, labels: &[f64], features: &[Vec<f64>]) -> Result<MarginScores> {
        if labels.len() != features.len() {
            return Err(EvalError::engine("labels and features must have the same number of samples"));
        }
        let values = self.decision_function(features)?;
        let predicted: Vec<f64> = values.iter().map(|&v| if v >= 0.0 { 1.0 } else { -1.0 }).collect();
        let accuracy = Accuracy::evaluate(labels, &predicted);
        Ok(MarginScores {
            labels: predicted,
            accuracy,
            values,
        })
    }

    fn fresh(&self) -> Self {
        Self {
            weights: None,
            bias: 0.0,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two states that each emit one symbol almost surely
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

    #[test]
    fn test_hmm_rejects_bad_rows() {
        let err = DiscreteHmm::new(2, "AC", vec![0.5, 0.5], vec![0.5, 0.4, 0.5, 0.5], vec![0.5; 4]);
        assert!(matches!(err, Err(EvalError::Engine { .. })));
        assert!(DiscreteHmm::new(1, "AA", vec![1.0], vec![1.0], vec![0.5, 0.5]).is_err());
    }

    #[test]
    fn test_viterbi_follows_symbols() {
        let model = block_hmm();
        let (paths, likelihoods) = model
            .decode_path(&["AACCA".to_string(), String::new()])
            .unwrap();
        assert_eq!(paths[0], vec![0, 0, 1, 1, 0]);
        assert!(likelihoods[0] < 0.0);
        assert!(paths[1].is_empty());
        assert_eq!(likelihoods[1], 0.0);
    }

    #[test]
    fn test_unknown_symbol_is_engine_error() {
        let model = block_hmm();
        assert!(matches!(
            model.decode_path(&["AXC".to_string()]),
            Err(EvalError::Engine { .. })
        ));
    }

    #[test]
    fn test_baum_welch_improves_likelihood() {
        let mut model = DiscreteHmm::random(2, "AC", 7).unwrap().with_max_iter(50);
        let training: Vec<String> = vec!["AAAACCCC".into(), "AAACCC".into(), "AAAAACCCCC".into()];
        let before: f64 = training.iter().map(|s| model.log_likelihood(s).unwrap()).sum();
        model.reestimate(&training).unwrap();
        let after: f64 = training.iter().map(|s| model.log_likelihood(s).unwrap()).sum();
        assert!(after > before, "likelihood should improve: {} -> {}", before, after);

        // rows still normalised
        let row: f64 = model.transition[0..2].iter().sum();
        assert!((row - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_hmm_save_load_roundtrip() {
        let model = block_hmm();
        let file = tempfile::NamedTempFile::new().unwrap();
        model.save(file.path()).unwrap();
        let loaded = DiscreteHmm::load(file.path()).unwrap();
        assert_eq!(loaded.alphabet(), "AC");
        assert_eq!(loaded.n_symbols(), 2);
        assert_eq!(
            loaded.decode_path(&["CA".to_string()]).unwrap().0,
            model.decode_path(&["CA".to_string()]).unwrap().0
        );
    }

    #[test]
    fn test_linear_svm_separates() {
        let features = vec![vec![2.0, 2.0], vec![1.5, 2.5], vec![-2.0, -1.0], vec![-1.0, -2.5]];
        let labels = vec![1.0, 1.0, -1.0, -1.0];
        let mut svm = LinearSvm::new();
        svm.fit(&labels, &features).unwrap();

        let scores = svm.score(&labels, &features).unwrap();
        assert_eq!(scores.labels, labels);
        assert!((scores.accuracy.acc - 1.0).abs() < 1e-12);
        assert!(scores.values[0] > 0.0 && scores.values[3] < 0.0);
    }

    #[test]
    fn test_linear_svm_fresh_is_untrained() {
        let mut svm = LinearSvm::new().with_c(2.0);
        svm.fit(&[1.0, -1.0], &[vec![1.0], vec![-1.0]]).unwrap();
        let fresh = svm.fresh();
        assert!(!fresh.is_fitted());
        assert_eq!(fresh.c, 2.0);
        assert!(fresh.decision_function(&[vec![1.0]]).is_err());
    }

    #[test]
    fn test_linear_svm_pads_short_vectors_with_zeros() {
        let labels = vec![1.0, 1.0, -1.0, -1.0];
        let ragged = vec![vec![2.0], vec![2.0, 1.0], vec![-2.0, -1.0, 0.5], vec![-2.0]];
        let padded = vec![
            vec![2.0, 0.0, 0.0],
            vec![2.0, 1.0, 0.0],
            vec![-2.0, -1.0, 0.5],
            vec![-2.0, 0.0, 0.0],
        ];

        let mut sparse = LinearSvm::new();
        sparse.fit(&labels, &ragged).unwrap();
        let mut dense = LinearSvm::new();
        dense.fit(&labels, &padded).unwrap();

        let a = sparse.decision_function(&ragged).unwrap();
        let b = dense.decision_function(&padded).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-12);
        }
        assert_eq!(sparse.score(&labels, &ragged).unwrap().labels, labels);

        // positions past the trained dimension carry no weight
        let longer = sparse.decision_function(&[vec![2.0, 0.0, 0.0, 9.0]]).unwrap();
        assert!((longer[0] - a[0]).abs() < 1e-12);
    }
}

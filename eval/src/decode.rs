// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Projection of integer state paths onto readable symbols

use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};

/// Maps hidden-state indices to single-character symbols.
///
/// Several states usually share one symbol (all transmembrane states print
/// as `T`), so decoding is lossy and cannot be inverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoder {
    symbols: Vec<Option<char>>,
}

impl Decoder {
    /// Build a decoder where the i-th character is the symbol of state i
    pub fn from_symbols(symbols: &str) -> Self {
        Self {
            symbols: symbols.chars().map(Some).collect(),
        }
    }

    /// Decoder with `len` unmapped states, to be filled with `register`
    pub fn with_len(len: usize) -> Self {
        Self {
            symbols: vec![None; len],
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbol(&self, index: usize) -> Result<char> {
        self.symbols
            .get(index)
            .copied()
            .flatten()
            .ok_or_else(|| {
                EvalError::lookup(format!(
                    "state {} has no symbol (decoder covers {} states)",
                    index,
                    self.symbols.len()
                ))
            })
    }

    /// Assign `symbol` to every index in `indices`, growing the table as needed
    pub fn register(&mut self, indices: &[usize], symbol: char) {
        for &index in indices {
            if index >= self.symbols.len() {
                self.symbols.resize(index + 1, None);
            }
            self.symbols[index] = Some(symbol);
        }
    }

    /// Assign `symbol` to `start..end` stepping by `step`
    pub fn register_range(&mut self, start: usize, end: usize, step: usize, symbol: char) {
        let indices: Vec<usize> = (start..end).step_by(step.max(1)).collect();
        self.register(&indices, symbol);
    }

    pub fn decode(&self, path: &[usize]) -> Result<String> {
        path.iter().map(|&state| self.symbol(state)).collect()
    }
}

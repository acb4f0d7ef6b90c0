use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use crate::error::{Error, Result};

/// A discrete outcome that can be sampled, tracked and written to the log.
///
/// The `Display` form is what ends up in the log, so it must be non-empty and free of
/// line breaks.
pub trait Label: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static {}

impl<T> Label for T where T: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static {}

/// An ordered list of `(label, weight)` pairs to sample from.
///
/// Sampling walks the cumulative weights in construction order, so two tables with
/// the same pairs in a different order are only statistically equivalent: with a fixed
/// seed they produce different sequences. Keep the order fixed when reproducibility
/// matters.
#[derive(Debug, Clone)]
pub struct WeightTable<L> {
    labels: Box<[L]>,
    weights: Box<[f64]>,
    cumulative: Box<[f64]>,
    index: HashMap<L, usize>,
    last_positive: usize,
}

impl<L: Label> WeightTable<L> {
    /// Build a table from `(label, weight)` pairs, keeping their order.
    ///
    /// Fails with [`Error::InvalidWeights`] if the table is empty, a label repeats,
    /// renders as an empty string or contains a line break, a weight is negative or not
    /// finite, or all weights are zero.
    pub fn new(pairs: impl IntoIterator<Item = (L, f64)>) -> Result<Self> {
        let mut labels = Vec::new();
        let mut weights = Vec::new();
        let mut cumulative = Vec::new();
        let mut index = HashMap::new();
        let mut total = 0.0;
        let mut last_positive = None;

        for (label, weight) in pairs {
            if !weight.is_finite() || weight < 0.0 {
                return Err(invalid("weights must be finite and non-negative"));
            }
            let rendered = label.to_string();
            if rendered.is_empty() {
                return Err(invalid("label renders empty"));
            }
            if rendered.contains(['\n', '\r']) {
                return Err(invalid("label renders with a line break"));
            }
            if index.insert(label.clone(), labels.len()).is_some() {
                return Err(invalid("duplicate label"));
            }
            if weight > 0.0 {
                last_positive = Some(labels.len());
            }
            total += weight;
            labels.push(label);
            weights.push(weight);
            cumulative.push(total);
        }

        if labels.is_empty() {
            return Err(invalid("table is empty"));
        }
        let Some(last_positive) = last_positive else {
            return Err(invalid("total weight must be positive"));
        };

        Ok(Self {
            labels: labels.into_boxed_slice(),
            weights: weights.into_boxed_slice(),
            cumulative: cumulative.into_boxed_slice(),
            index,
            last_positive,
        })
    }

    /// Draw one label.
    pub fn sample(&self, rng: &mut fastrand::Rng) -> &L {
        &self.labels[self.sample_index(rng)]
    }

    /// Draw one label and return its position in the table.
    ///
    /// The draw `r` is uniform in `[0, total)`; the result is the first entry whose
    /// cumulative weight exceeds `r`, so zero-weight entries are never returned.
    pub fn sample_index(&self, rng: &mut fastrand::Rng) -> usize {
        let r = rng.f64() * self.total();
        self.cumulative
            .partition_point(|&c| c <= r)
            .min(self.last_positive)
    }

    /// Draw `draws` labels and count how often each one came up, in table order.
    pub fn tally(&self, draws: u64, rng: &mut fastrand::Rng) -> Vec<(&L, u64)> {
        let mut counts = vec![0u64; self.labels.len()];
        for _ in 0..draws {
            counts[self.sample_index(rng)] += 1;
        }
        self.labels.iter().zip(counts).collect()
    }

    pub fn total(&self) -> f64 {
        self.cumulative[self.cumulative.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[L] {
        &self.labels
    }

    /// Iterate `(label, weight)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&L, f64)> + '_ {
        self.labels.iter().zip(self.weights.iter().copied())
    }

    pub fn index_of(&self, label: &L) -> Option<usize> {
        self.index.get(label).copied()
    }

    /// The expected share of draws for `label`.
    pub fn probability(&self, label: &L) -> Option<f64> {
        self.index_of(label).map(|i| self.weights[i] / self.total())
    }
}

fn invalid(reason: &'static str) -> Error {
    Error::InvalidWeights { reason }
}

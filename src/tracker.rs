use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::weights::{Label, WeightTable};
use crate::window::RollingWindow;

/// Denominator used by [`WindowTracker::frequencies`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrequencyBasis {
    /// Divide by the number of labels currently in the window. Fractions sum to 1
    /// as soon as the window holds anything.
    #[default]
    Fill,
    /// Divide by the window capacity. Fractions sum to `len / capacity` until the
    /// window has filled up.
    Capacity,
}

/// Per-label share of the rolling window, in weight-table order.
#[derive(Debug, Clone, PartialEq)]
pub struct Frequencies<L> {
    pub basis: FrequencyBasis,
    pub window_len: usize,
    pub capacity: usize,
    pub entries: Vec<(L, f64)>,
}

impl<L: Label> Frequencies<L> {
    pub fn get(&self, label: &L) -> Option<f64> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|&(_, f)| f)
    }
}

/// Raw window counts taken under the tracker lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSnapshot<L> {
    pub len: usize,
    pub capacity: usize,
    pub counts: Vec<(L, u64)>,
}

/// A rolling window of recent selections with live per-label counts.
///
/// The window and its counts sit behind one mutex, so every call observes a state in
/// which the counts sum to the window length.
pub struct WindowTracker<L> {
    table: Arc<WeightTable<L>>,
    basis: FrequencyBasis,
    window: Mutex<RollingWindow>,
}

impl<L: Label> WindowTracker<L> {
    /// Create an empty tracker over the labels of `table`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(table: Arc<WeightTable<L>>, capacity: usize, basis: FrequencyBasis) -> Self {
        assert!(capacity > 0, "window capacity must be > 0");
        let window = RollingWindow::new(capacity, table.len());
        Self {
            table,
            basis,
            window: Mutex::new(window),
        }
    }

    /// Record `label` as the newest selection, returning the label it evicted.
    pub fn observe(&self, label: &L) -> Result<Option<L>> {
        let index = self.table.index_of(label).ok_or_else(|| Error::UnknownLabel {
            label: label.to_string(),
        })?;
        let evicted = self.lock().push(index);
        Ok(evicted.map(|old| self.table.labels()[old].clone()))
    }

    /// Every known label's share of the window under the configured basis.
    ///
    /// An empty window reports zero for every label.
    pub fn frequencies(&self) -> Frequencies<L> {
        let window = self.lock();
        let denominator = match self.basis {
            FrequencyBasis::Fill => window.len(),
            FrequencyBasis::Capacity => window.capacity(),
        };
        let entries = self
            .table
            .labels()
            .iter()
            .zip(window.counts())
            .map(|(label, &count)| {
                let share = if denominator == 0 {
                    0.0
                } else {
                    count as f64 / denominator as f64
                };
                (label.clone(), share)
            })
            .collect();
        Frequencies {
            basis: self.basis,
            window_len: window.len(),
            capacity: window.capacity(),
            entries,
        }
    }

    pub fn snapshot(&self) -> WindowSnapshot<L> {
        let window = self.lock();
        WindowSnapshot {
            len: window.len(),
            capacity: window.capacity(),
            counts: self
                .table
                .labels()
                .iter()
                .cloned()
                .zip(window.counts().iter().copied())
                .collect(),
        }
    }

    pub fn basis(&self) -> FrequencyBasis {
        self.basis
    }

    // Every critical section leaves the window consistent, so a poisoned lock is
    // still safe to reuse.
    fn lock(&self) -> MutexGuard<'_, RollingWindow> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::{Config, Simulation};
use crate::error::{Error, Result};
use crate::tracker::FrequencyBasis;
use crate::weights::{Label, WeightTable};

/// Builder for [`Simulation`](crate::Simulation).
///
/// Created via [`Simulation::builder()`](crate::Simulation::builder).
pub struct SimulationBuilder<L> {
    table: WeightTable<L>,
    config: Config,
}

impl<L: Label> Simulation<L> {
    pub fn builder(table: WeightTable<L>) -> SimulationBuilder<L> {
        SimulationBuilder {
            table,
            config: Config {
                producers: 1,
                window_capacity: 100,
                run_duration: Duration::from_secs(5),
                basis: FrequencyBasis::Fill,
                seed: None,
                samples_per_producer: None,
                sample_interval: None,
                flush_every: 1,
                drain_window: Duration::from_secs(1),
                join_grace: Duration::from_secs(1),
            },
        }
    }
}

impl<L: Label> SimulationBuilder<L> {
    /// Number of producer threads. Defaults to 1.
    pub fn producers(mut self, producers: usize) -> Self {
        self.config.producers = producers;
        self
    }

    /// Rolling window capacity. Defaults to 100.
    pub fn window_capacity(mut self, capacity: usize) -> Self {
        self.config.window_capacity = capacity;
        self
    }

    /// How long producers keep sampling. Defaults to 5s.
    pub fn run_duration(mut self, duration: Duration) -> Self {
        self.config.run_duration = duration;
        self
    }

    /// Denominator for live frequencies. Defaults to [`FrequencyBasis::Fill`].
    pub fn frequency_basis(mut self, basis: FrequencyBasis) -> Self {
        self.config.basis = basis;
        self
    }

    /// Seed producer `i` with `seed + i`. Unseeded producers draw from fresh entropy.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Stop each producer after this many selections, even before the run ends.
    pub fn samples_per_producer(mut self, samples: u64) -> Self {
        self.config.samples_per_producer = Some(samples);
        self
    }

    /// Pause each producer for `interval` after every selection. Unpaced by default.
    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.config.sample_interval = Some(interval);
        self
    }

    /// Flush the log after this many records. Defaults to 1.
    pub fn flush_every(mut self, records: usize) -> Self {
        self.config.flush_every = records;
        self
    }

    /// Extra time the writer keeps accepting records after the run ends. Defaults to 1s.
    pub fn drain_window(mut self, window: Duration) -> Self {
        self.config.drain_window = window;
        self
    }

    /// How long to wait past each deadline for a thread to finish before reporting it
    /// as unresponsive. Defaults to 1s.
    pub fn join_grace(mut self, grace: Duration) -> Self {
        self.config.join_grace = grace;
        self
    }

    /// Validate the configuration and create the [`Simulation`](crate::Simulation).
    pub fn build(self) -> Result<Simulation<L>> {
        let config = self.config;
        if config.producers == 0 {
            return Err(Error::Config("at least one producer is required"));
        }
        if config.window_capacity == 0 {
            return Err(Error::Config("window capacity must be > 0"));
        }
        if config.flush_every == 0 {
            return Err(Error::Config("flush interval must be > 0"));
        }
        Ok(Simulation {
            table: Arc::new(self.table),
            config,
        })
    }
}

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::channel::DeliveryChannel;
use crate::clock::StopSignal;
use crate::error::{Error, Result};
use crate::tracker::WindowTracker;
use crate::weights::{Label, WeightTable};
use crate::writer::Selection;

/// Counters from a finished producer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub id: usize,
    /// Selections admitted to the delivery channel.
    pub produced: u64,
    /// Selections refused because the channel had already closed.
    pub dropped: u64,
}

/// One worker of the pool: samples, records the label in the window and hands it to
/// the writer, until told to stop.
pub struct Producer<L> {
    id: usize,
    table: Arc<WeightTable<L>>,
    tracker: Arc<WindowTracker<L>>,
    channel: Arc<DeliveryChannel<Selection<L>>>,
    stop: StopSignal,
    rng: fastrand::Rng,
    limit: Option<u64>,
    interval: Option<Duration>,
}

impl<L: Label> Producer<L> {
    pub fn new(
        id: usize,
        table: Arc<WeightTable<L>>,
        tracker: Arc<WindowTracker<L>>,
        channel: Arc<DeliveryChannel<Selection<L>>>,
        stop: StopSignal,
    ) -> Self {
        Self {
            id,
            table,
            tracker,
            channel,
            stop,
            rng: fastrand::Rng::new(),
            limit: None,
            interval: None,
        }
    }

    /// Use a fixed random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    /// Stop after `samples` selections even if the stop signal has not fired.
    pub fn limit(mut self, samples: u64) -> Self {
        self.limit = Some(samples);
        self
    }

    /// Sleep this long after each admitted selection.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Loop until the stop signal fires, the sample limit is reached or the channel
    /// closes. The stop signal is only checked between iterations.
    pub fn run(mut self) -> Result<ProducerReport> {
        let mut report = ProducerReport {
            id: self.id,
            ..ProducerReport::default()
        };

        while !self.stop.should_stop() {
            if self.limit.is_some_and(|limit| report.produced >= limit) {
                break;
            }

            let label = self.table.sample(&mut self.rng).clone();
            self.tracker.observe(&label)?;

            let selection = Selection {
                producer: self.id,
                label,
            };
            match self.channel.send(selection) {
                Ok(()) => {
                    report.produced += 1;
                    if let Some(interval) = self.interval {
                        thread::sleep(interval);
                    }
                }
                Err(Error::ChannelClosed) => {
                    report.dropped += 1;
                    tracing::warn!(producer = self.id, "channel closed, dropping selection");
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        tracing::debug!(
            producer = self.id,
            produced = report.produced,
            dropped = report.dropped,
            "producer finished"
        );
        Ok(report)
    }
}

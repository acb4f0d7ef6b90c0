use std::any::Any;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::channel::DeliveryChannel;
use crate::clock::{Clock, StopSignal, SystemClock};
use crate::error::{Error, Result};
use crate::producer::{Producer, ProducerReport};
use crate::tracker::{FrequencyBasis, Frequencies, WindowTracker};
use crate::weights::{Label, WeightTable};
use crate::writer::{LogWriter, Selection, WriterReport};

const JOIN_POLL: Duration = Duration::from_millis(5);

/// Settings fixed when a [`Simulation`] is built.
#[derive(Debug, Clone)]
pub struct Config {
    pub producers: usize,
    pub window_capacity: usize,
    pub run_duration: Duration,
    pub basis: FrequencyBasis,
    pub seed: Option<u64>,
    pub samples_per_producer: Option<u64>,
    pub sample_interval: Option<Duration>,
    pub flush_every: usize,
    pub drain_window: Duration,
    pub join_grace: Duration,
}

/// A configured run: a producer pool sampling from one weight table into a rolling
/// window and a single log writer.
///
/// Construct via [`Simulation::builder()`](crate::SimulationBuilder).
pub struct Simulation<L> {
    pub(crate) table: Arc<WeightTable<L>>,
    pub(crate) config: Config,
}

impl<L: Label> Simulation<L> {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn table(&self) -> &WeightTable<L> {
        &self.table
    }

    /// Run to completion, writing the log to `sink`.
    pub fn run<W: Write + Send + 'static>(&self, sink: W) -> Result<RunReport<L>> {
        self.start(sink)?.wait().into_result()
    }

    /// Run to completion, appending the log to the file at `path`. The file is created
    /// if missing and closed when the writer finishes.
    pub fn run_to_path(&self, path: impl AsRef<Path>) -> Result<RunReport<L>> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.run(BufWriter::new(file))
    }

    /// Start the writer and then the producers, returning a handle to the live run.
    pub fn start<W: Write + Send + 'static>(&self, sink: W) -> Result<RunHandle<L>> {
        self.start_with_clock(sink, SystemClock)
    }

    /// Like [`start`](Self::start), with the writer stamping records from `clock`.
    pub fn start_with_clock<W, C>(&self, sink: W, clock: C) -> Result<RunHandle<L>>
    where
        W: Write + Send + 'static,
        C: Clock + 'static,
    {
        let config = &self.config;
        let started = Instant::now();
        let stop = StopSignal::with_deadline(started.checked_add(config.run_duration));
        let writer_deadline = stop
            .deadline()
            .and_then(|deadline| deadline.checked_add(config.drain_window));
        let tracker = Arc::new(WindowTracker::new(
            self.table.clone(),
            config.window_capacity,
            config.basis,
        ));
        let channel = Arc::new(DeliveryChannel::new());

        tracing::info!(
            producers = config.producers,
            window_capacity = config.window_capacity,
            run_duration_ms = config.run_duration.as_millis() as u64,
            "starting run"
        );

        let writer = {
            let channel = channel.clone();
            let writer = LogWriter::new(sink)
                .clock(clock)
                .flush_every(config.flush_every);
            thread::Builder::new()
                .name("selection-writer".into())
                .spawn(move || {
                    let _span = tracing::info_span!("writer").entered();
                    writer.run(&channel, writer_deadline)
                })?
        };

        let mut producers = Vec::with_capacity(config.producers);
        for id in 0..config.producers {
            let mut producer = Producer::new(
                id,
                self.table.clone(),
                tracker.clone(),
                channel.clone(),
                stop.clone(),
            );
            if let Some(seed) = config.seed {
                producer = producer.seed(seed.wrapping_add(id as u64));
            }
            if let Some(limit) = config.samples_per_producer {
                producer = producer.limit(limit);
            }
            if let Some(interval) = config.sample_interval {
                producer = producer.interval(interval);
            }

            let spawned = thread::Builder::new()
                .name(format!("selection-producer-{id}"))
                .spawn(move || {
                    let _span = tracing::info_span!("producer", id).entered();
                    producer.run()
                });
            match spawned {
                Ok(handle) => producers.push(handle),
                Err(err) => {
                    stop.stop();
                    channel.close();
                    return Err(err.into());
                }
            }
        }

        Ok(RunHandle {
            tracker,
            channel,
            stop,
            writer,
            writer_deadline,
            producers,
            join_grace: config.join_grace,
            started,
        })
    }
}

/// A run in progress.
pub struct RunHandle<L> {
    tracker: Arc<WindowTracker<L>>,
    channel: Arc<DeliveryChannel<Selection<L>>>,
    stop: StopSignal,
    writer: JoinHandle<Result<WriterReport>>,
    writer_deadline: Option<Instant>,
    producers: Vec<JoinHandle<Result<ProducerReport>>>,
    join_grace: Duration,
    started: Instant,
}

impl<L: Label> RunHandle<L> {
    /// Live share of each label in the rolling window.
    pub fn frequencies(&self) -> Frequencies<L> {
        self.tracker.frequencies()
    }

    pub fn tracker(&self) -> &Arc<WindowTracker<L>> {
        &self.tracker
    }

    /// Selections admitted but not yet written.
    pub fn pending(&self) -> usize {
        self.channel.len()
    }

    /// Ask the producers to stop at their next iteration. The writer finishes once
    /// they have and the queue is drained.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.writer.is_finished() && self.producers.iter().all(JoinHandle::is_finished)
    }

    /// Wait for every thread, then close the channel and let the writer drain it.
    ///
    /// Each wait is bounded by the relevant deadline plus the join grace; threads
    /// still running after that are reported as unresponsive and left detached.
    pub fn wait(self) -> RunReport<L> {
        let mut failures = Vec::new();
        let mut producers = Vec::with_capacity(self.producers.len());

        let producer_limit = self
            .stop
            .deadline()
            .and_then(|deadline| deadline.checked_add(self.join_grace));
        for (id, handle) in self.producers.into_iter().enumerate() {
            let component = Component::Producer(id);
            match join_by(handle, producer_limit) {
                Some(Ok(Ok(report))) => producers.push(report),
                Some(Ok(Err(err))) => {
                    failures.push(ComponentFailure::new(component, FailureReason::Error(err), 0))
                }
                Some(Err(payload)) => failures.push(ComponentFailure::new(
                    component,
                    FailureReason::Panicked(panic_message(&*payload)),
                    0,
                )),
                None => failures.push(ComponentFailure::new(
                    component,
                    FailureReason::Unresponsive,
                    0,
                )),
            }
        }

        self.channel.close();

        let writer_limit = self
            .writer_deadline
            .and_then(|deadline| deadline.checked_add(self.join_grace));
        let writer = match join_by(self.writer, writer_limit) {
            Some(Ok(Ok(report))) => Some(report),
            Some(Ok(Err(err))) => {
                let lost = match &err {
                    Error::WriterIo { lost, .. } => *lost,
                    _ => self.channel.close_and_discard() as u64,
                };
                failures.push(ComponentFailure::new(
                    Component::Writer,
                    FailureReason::Error(err),
                    lost,
                ));
                None
            }
            Some(Err(payload)) => {
                let lost = self.channel.close_and_discard() as u64;
                failures.push(ComponentFailure::new(
                    Component::Writer,
                    FailureReason::Panicked(panic_message(&*payload)),
                    lost,
                ));
                None
            }
            None => {
                let lost = self.channel.close_and_discard() as u64;
                failures.push(ComponentFailure::new(
                    Component::Writer,
                    FailureReason::Unresponsive,
                    lost,
                ));
                None
            }
        };

        let report = RunReport {
            producers,
            writer,
            failures,
            frequencies: self.tracker.frequencies(),
            admitted: self.channel.admitted(),
            rejected: self.channel.rejected(),
            elapsed: self.started.elapsed(),
        };

        for failure in &report.failures {
            match failure.reason {
                FailureReason::Unresponsive => tracing::warn!(
                    component = %failure.component,
                    lost_records = failure.lost_records,
                    "run component timed out, detaching"
                ),
                _ => tracing::error!(
                    component = %failure.component,
                    reason = %failure.reason,
                    lost_records = failure.lost_records,
                    "run component failed"
                ),
            }
        }
        tracing::info!(
            produced = report.produced(),
            written = report.written(),
            rejected = report.rejected,
            failures = report.failures.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "run finished"
        );
        report
    }
}

fn join_by<T>(handle: JoinHandle<T>, limit: Option<Instant>) -> Option<thread::Result<T>> {
    if let Some(limit) = limit {
        while !handle.is_finished() {
            if Instant::now() >= limit {
                return None;
            }
            thread::sleep(JOIN_POLL);
        }
    }
    Some(handle.join())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// A thread of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Producer(usize),
    Writer,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Producer(id) => write!(f, "producer {id}"),
            Component::Writer => f.write_str("writer"),
        }
    }
}

#[derive(Debug)]
pub enum FailureReason {
    Error(Error),
    Panicked(String),
    /// Still running after its deadline and the join grace.
    Unresponsive,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Error(err) => write!(f, "{err}"),
            FailureReason::Panicked(message) => write!(f, "panicked: {message}"),
            FailureReason::Unresponsive => f.write_str("did not finish in time"),
        }
    }
}

#[derive(Debug)]
pub struct ComponentFailure {
    pub component: Component,
    pub reason: FailureReason,
    /// Admitted records that will never reach the log because of this failure.
    pub lost_records: u64,
}

impl ComponentFailure {
    fn new(component: Component, reason: FailureReason, lost_records: u64) -> Self {
        Self {
            component,
            reason,
            lost_records,
        }
    }
}

impl fmt::Display for ComponentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.component, self.reason)?;
        if self.lost_records > 0 {
            write!(f, " ({} records lost)", self.lost_records)?;
        }
        Ok(())
    }
}

/// Outcome of a finished run.
#[derive(Debug)]
pub struct RunReport<L> {
    /// Reports from producers that finished cleanly, in id order.
    pub producers: Vec<ProducerReport>,
    /// `None` if the writer failed.
    pub writer: Option<WriterReport>,
    pub failures: Vec<ComponentFailure>,
    /// Window frequencies at the end of the run.
    pub frequencies: Frequencies<L>,
    /// Selections the channel accepted.
    pub admitted: u64,
    /// Selections refused after the channel closed.
    pub rejected: u64,
    pub elapsed: Duration,
}

impl<L> RunReport<L> {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn produced(&self) -> u64 {
        self.producers.iter().map(|p| p.produced).sum()
    }

    pub fn written(&self) -> u64 {
        self.writer.as_ref().map_or(0, |w| w.written)
    }

    /// `Ok` for a clean run, otherwise [`Error::Run`] listing every failure.
    pub fn into_result(self) -> Result<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(Error::Run {
                failures: self.failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;

    use chrono::{DateTime, Utc};

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct PanickingClock;

    impl Clock for PanickingClock {
        fn now(&mut self) -> DateTime<Utc> {
            panic!("clock exploded")
        }
    }

    /// Clones panic on producer 0 and come back as a label outside the table on
    /// producer 1.
    #[derive(Debug, PartialEq, Eq, Hash)]
    struct Faulty(u8);

    impl Clone for Faulty {
        fn clone(&self) -> Self {
            match thread::current().name() {
                Some("selection-producer-0") => panic!("label clone failed"),
                Some("selection-producer-1") => Faulty(self.0 + 100),
                _ => Faulty(self.0),
            }
        }
    }

    impl fmt::Display for Faulty {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    fn table() -> WeightTable<u8> {
        WeightTable::new([(1, 50.0), (2, 25.0), (3, 15.0), (4, 5.0), (5, 5.0)]).unwrap()
    }

    #[test]
    fn limited_run_writes_every_selection() {
        let buf = SharedBuf::default();
        let report = Simulation::builder(table())
            .producers(3)
            .samples_per_producer(200)
            .run_duration(Duration::from_secs(30))
            .seed(1)
            .build()
            .unwrap()
            .run(buf.clone())
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.produced(), 600);
        assert_eq!(report.written(), 600);
        assert_eq!(report.admitted, 600);
        let writer = report.writer.unwrap();
        assert_eq!(writer.per_producer, vec![200, 200, 200]);
        assert_eq!(buf.0.lock().unwrap().iter().filter(|&&b| b == b'\n').count(), 600);
    }

    #[test]
    fn stop_ends_run_early() {
        let sim = Simulation::builder(table())
            .producers(2)
            .run_duration(Duration::from_secs(60))
            .build()
            .unwrap();
        let handle = sim.start(io::sink()).unwrap();
        thread::sleep(Duration::from_millis(50));
        handle.stop();
        let report = handle.wait();
        assert!(report.is_clean());
        assert!(report.elapsed < Duration::from_secs(30));
        assert_eq!(report.produced(), report.written());
    }

    #[test]
    fn writer_io_failure_is_reported() {
        let err = Simulation::builder(table())
            .producers(2)
            .run_duration(Duration::from_millis(200))
            .build()
            .unwrap()
            .run(BrokenSink)
            .unwrap_err();
        let failures = match err {
            Error::Run { failures } => failures,
            other => panic!("expected a run failure, got {other:?}"),
        };
        let writer = failures
            .iter()
            .find(|f| f.component == Component::Writer)
            .expect("writer failure");
        assert!(matches!(
            writer.reason,
            FailureReason::Error(Error::WriterIo { written: 0, .. })
        ));
        assert!(writer.lost_records >= 1);
    }

    #[test]
    fn writer_panic_is_reported() {
        let sim = Simulation::builder(table())
            .run_duration(Duration::from_millis(100))
            .sample_interval(Duration::from_micros(100))
            .build()
            .unwrap();
        let report = sim.start_with_clock(io::sink(), PanickingClock).unwrap().wait();
        assert!(report.writer.is_none());
        assert!(report.failures.iter().any(|f| {
            f.component == Component::Writer
                && matches!(&f.reason, FailureReason::Panicked(m) if m == "clock exploded")
        }));
    }

    #[test]
    fn frequencies_are_queryable_while_running() {
        let sim = Simulation::builder(table())
            .producers(2)
            .window_capacity(50)
            .run_duration(Duration::from_secs(60))
            .build()
            .unwrap();
        let handle = sim.start(io::sink()).unwrap();
        thread::sleep(Duration::from_millis(50));
        let live = handle.frequencies();
        assert_eq!(live.entries.len(), 5);
        assert!(live.window_len <= 50);
        handle.stop();
        assert!(handle.wait().is_clean());
    }

    #[test]
    fn producer_failures_are_reported_per_producer() {
        let table = WeightTable::new([(Faulty(1), 1.0), (Faulty(2), 1.0)]).unwrap();
        let report = Simulation::builder(table)
            .producers(3)
            .run_duration(Duration::from_millis(200))
            .sample_interval(Duration::from_millis(1))
            .build()
            .unwrap()
            .start(io::sink())
            .unwrap()
            .wait();

        let finished: Vec<usize> = report.producers.iter().map(|p| p.id).collect();
        assert_eq!(finished, vec![2]);
        assert!(report.writer.is_some());
        assert_eq!(report.written(), report.produced());

        let failures = match report.into_result() {
            Err(Error::Run { failures }) => failures,
            other => panic!("expected a run failure, got {other:?}"),
        };
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].component, Component::Producer(0));
        assert!(matches!(
            &failures[0].reason,
            FailureReason::Panicked(m) if m == "label clone failed"
        ));
        assert_eq!(failures[1].component, Component::Producer(1));
        assert!(matches!(
            failures[1].reason,
            FailureReason::Error(Error::UnknownLabel { .. })
        ));
    }

    #[test]
    fn stuck_producer_is_unresponsive() {
        let report = Simulation::builder(table())
            .run_duration(Duration::from_millis(50))
            .join_grace(Duration::from_millis(50))
            .drain_window(Duration::from_millis(50))
            .sample_interval(Duration::from_secs(5))
            .build()
            .unwrap()
            .start(io::sink())
            .unwrap()
            .wait();

        assert!(report.elapsed < Duration::from_secs(2));
        assert!(report.producers.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].component, Component::Producer(0));
        assert!(matches!(
            report.failures[0].reason,
            FailureReason::Unresponsive
        ));
        assert_eq!(report.written(), 1);
        assert_eq!(report.admitted, 1);
    }
}

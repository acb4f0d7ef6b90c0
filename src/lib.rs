//! Concurrent weighted-random selection with a rolling frequency window and an
//! order-preserving log.
//!
//! A pool of producer threads repeatedly samples a [`WeightTable`], records each
//! label in a shared [`WindowTracker`] and hands it to a single [`LogWriter`]
//! through an unbounded [`DeliveryChannel`]. The writer stamps every record at the
//! moment it dequeues it, so timestamps in the log never decrease no matter how the
//! producers interleave. [`audit`] reads a log back and checks exactly that.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use selection_log::{Simulation, WeightTable};
//!
//! let table = WeightTable::new([(1, 50.0), (2, 25.0), (3, 15.0), (4, 5.0), (5, 5.0)])?;
//! let report = Simulation::builder(table)
//!     .producers(5)
//!     .window_capacity(100)
//!     .run_duration(Duration::from_secs(5))
//!     .build()?
//!     .run_to_path("selections.log")?;
//!
//! println!("wrote {} records", report.written());
//! assert!(selection_log::audit_path("selections.log")?.is_monotonic());
//! # Ok::<_, selection_log::Error>(())
//! ```

mod audit;
mod builder;
mod channel;
mod clock;
mod coordinator;
mod error;
mod format;
mod producer;
mod tracker;
mod weights;
mod window;
mod writer;

pub use audit::{AuditReport, Gap, ParseIssue, audit, audit_path};
pub use builder::SimulationBuilder;
pub use channel::{DeliveryChannel, Recv};
pub use clock::{Clock, StopSignal, SystemClock};
pub use coordinator::{
    Component, ComponentFailure, Config, FailureReason, RunHandle, RunReport, Simulation,
};
pub use error::{Error, Result};
pub use format::{FormatRecord, LogRecord, TextFormat};
pub use producer::{Producer, ProducerReport};
pub use tracker::{FrequencyBasis, Frequencies, WindowSnapshot, WindowTracker};
pub use weights::{Label, WeightTable};
pub use writer::{LogWriter, Selection, WriterReport};

#[cfg(test)]
mod tests {
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::{FrequencyBasis, Simulation, WeightTable, audit, audit_path};

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

    impl SharedBuf {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    fn dice() -> WeightTable<u32> {
        WeightTable::new([(1, 50.0), (2, 25.0), (3, 15.0), (4, 5.0), (5, 5.0)]).unwrap()
    }

    #[test]
    fn five_producers_scenario() {
        let buf = SharedBuf::default();
        let report = Simulation::builder(dice())
            .producers(5)
            .window_capacity(100)
            .run_duration(Duration::from_secs(1))
            .sample_interval(Duration::from_micros(200))
            .build()
            .unwrap()
            .run(buf.clone())
            .unwrap();

        assert!(report.written() > 0);
        assert_eq!(report.written(), report.produced());

        let freqs = &report.frequencies;
        assert_eq!(freqs.window_len, 100);
        let total: f64 = freqs.entries.iter().map(|&(_, f)| f).sum();
        assert!((total - 1.0).abs() < 1e-9, "fill-basis shares sum to {total}");
        // A 100-slot window is a small sample; 0.2 is four standard deviations for
        // the dominant label.
        let ones = freqs.get(&1).unwrap();
        assert!((ones - 0.5).abs() < 0.2, "label 1 share was {ones}");

        let log = audit(&buf.contents()[..]).unwrap();
        assert!(log.is_monotonic(), "gaps: {:?}", log.gaps);
        assert!(log.parse_issues.is_empty());
        assert_eq!(log.records, report.written());
    }

    #[test]
    fn log_is_ordered_for_any_producer_count() {
        for producers in [1, 2, 8] {
            let buf = SharedBuf::default();
            let report = Simulation::builder(dice())
                .producers(producers)
                .samples_per_producer(2_000)
                .run_duration(Duration::from_secs(30))
                .build()
                .unwrap()
                .run(buf.clone())
                .unwrap();
            let log = audit(&buf.contents()[..]).unwrap();
            assert!(log.is_monotonic(), "{producers} producers: {:?}", log.gaps);
            assert_eq!(log.records, 2_000 * producers as u64);
            assert_eq!(report.written(), log.records);
        }
    }

    #[test]
    fn every_admitted_record_is_written_once() {
        let buf = SharedBuf::default();
        let report = Simulation::builder(dice())
            .producers(4)
            .samples_per_producer(5_000)
            .run_duration(Duration::from_secs(30))
            .flush_every(64)
            .seed(17)
            .build()
            .unwrap()
            .run(buf.clone())
            .unwrap();

        let log = audit(&buf.contents()[..]).unwrap();
        assert_eq!(report.admitted, 20_000);
        assert_eq!(report.rejected, 0);
        assert_eq!(log.records, report.admitted);

        let writer = report.writer.as_ref().unwrap();
        for producer in &report.producers {
            assert_eq!(writer.per_producer[producer.id], producer.produced);
        }
        let logged: u64 = log.label_counts.values().sum();
        assert_eq!(logged, 20_000);
    }

    #[test]
    fn capacity_basis_is_reported() {
        let report = Simulation::builder(dice())
            .window_capacity(1_000)
            .samples_per_producer(10)
            .frequency_basis(FrequencyBasis::Capacity)
            .build()
            .unwrap()
            .run(io::sink())
            .unwrap();
        let freqs = report.frequencies;
        assert_eq!(freqs.basis, FrequencyBasis::Capacity);
        assert_eq!(freqs.window_len, 10);
        let total: f64 = freqs.entries.iter().map(|&(_, f)| f).sum();
        assert!((total - 0.01).abs() < 1e-9);
    }

    #[test]
    fn run_to_path_appends_and_audits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selections.log");
        let sim = Simulation::builder(dice())
            .producers(3)
            .samples_per_producer(300)
            .build()
            .unwrap();

        let first = sim.run_to_path(&path).unwrap();
        let second = sim.run_to_path(&path).unwrap();

        let log = audit_path(&path).unwrap();
        assert_eq!(log.records, first.written() + second.written());
        assert!(log.is_monotonic());
        assert!(log.into_result().is_ok());
    }
}

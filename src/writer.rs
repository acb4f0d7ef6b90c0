use std::io::{self, Write};
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::channel::{DeliveryChannel, Recv};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::format::{FormatRecord, LogRecord, TextFormat};

/// A sampled label on its way from a producer to the writer. It carries no
/// timestamp; the writer assigns one when it dequeues the selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<L> {
    pub producer: usize,
    pub label: L,
}

/// Counters from a finished writer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterReport {
    /// Records handed to the sink.
    pub written: u64,
    /// Records written per producer id.
    pub per_producer: Vec<u64>,
    /// Records whose clock reading went backwards and was raised to the previous
    /// timestamp.
    pub clamped: u64,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

/// The single consumer of a [`DeliveryChannel`]: stamps each selection as it comes
/// off the queue and appends it to the sink.
///
/// Timestamps are taken from the clock at dequeue time and never fall below the
/// previous record's, so the log is non-decreasing even if the clock steps back.
pub struct LogWriter<W, C = SystemClock, F = TextFormat> {
    sink: W,
    clock: C,
    format: F,
    flush_every: usize,
    unflushed: usize,
    buf: Vec<u8>,
    report: WriterReport,
}

impl<W: Write> LogWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            clock: SystemClock,
            format: TextFormat,
            flush_every: 1,
            unflushed: 0,
            buf: Vec::new(),
            report: WriterReport::default(),
        }
    }
}

impl<W, C, F> LogWriter<W, C, F> {
    /// Set the timestamp source. Defaults to [`SystemClock`].
    pub fn clock<C2: Clock>(self, clock: C2) -> LogWriter<W, C2, F> {
        LogWriter {
            sink: self.sink,
            clock,
            format: self.format,
            flush_every: self.flush_every,
            unflushed: self.unflushed,
            buf: self.buf,
            report: self.report,
        }
    }

    /// Set the record formatter. Defaults to [`TextFormat`].
    pub fn format<F2>(self, format: F2) -> LogWriter<W, C, F2> {
        LogWriter {
            sink: self.sink,
            clock: self.clock,
            format,
            flush_every: self.flush_every,
            unflushed: self.unflushed,
            buf: self.buf,
            report: self.report,
        }
    }

    /// Flush the sink after this many records. Defaults to 1.
    ///
    /// The sink is also flushed whenever the queue runs empty and on exit.
    pub fn flush_every(mut self, records: usize) -> Self {
        self.flush_every = records.max(1);
        self
    }

    pub fn report(&self) -> &WriterReport {
        &self.report
    }
}

impl<W: Write, C: Clock, F> LogWriter<W, C, F> {
    /// Stamp `selection` and append it to the sink.
    pub fn append<L>(&mut self, selection: Selection<L>) -> io::Result<()>
    where
        F: FormatRecord<L>,
    {
        let now = self.clock.now();
        let timestamp = match self.report.last {
            Some(last) if now < last => {
                self.report.clamped += 1;
                last
            }
            _ => now,
        };

        let record = LogRecord {
            timestamp,
            label: selection.label,
        };
        self.buf.clear();
        self.format.format_record(&record, &mut self.buf)?;
        self.sink.write_all(&self.buf)?;

        let report = &mut self.report;
        report.written += 1;
        if report.per_producer.len() <= selection.producer {
            report.per_producer.resize(selection.producer + 1, 0);
        }
        report.per_producer[selection.producer] += 1;
        report.first.get_or_insert(timestamp);
        report.last = Some(timestamp);

        self.unflushed += 1;
        if self.unflushed >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        if self.unflushed > 0 {
            self.sink.flush()?;
            self.unflushed = 0;
        }
        Ok(())
    }

    /// Drain `channel` until it is closed and empty.
    ///
    /// When `deadline` passes first the writer closes the channel itself and keeps
    /// going until everything admitted before the close is written. On an I/O error
    /// the channel is closed, whatever is still queued is discarded and counted as
    /// lost, and the sink is dropped.
    pub fn run<L>(
        mut self,
        channel: &DeliveryChannel<Selection<L>>,
        deadline: Option<Instant>,
    ) -> Result<WriterReport>
    where
        F: FormatRecord<L>,
    {
        loop {
            let received = match channel.try_recv() {
                Recv::TimedOut => {
                    if let Err(source) = self.flush() {
                        return Err(self.fail(channel, source, true));
                    }
                    channel.recv_until(deadline)
                }
                received => received,
            };

            match received {
                Recv::Item(selection) => {
                    if let Err(source) = self.append(selection) {
                        // unflushed only reaches the threshold when the flush failed
                        let flushing = self.unflushed >= self.flush_every;
                        return Err(self.fail(channel, source, flushing));
                    }
                }
                Recv::Closed => break,
                Recv::TimedOut => {
                    if channel.close() {
                        tracing::debug!(
                            pending = channel.len(),
                            "writer deadline reached, closing channel"
                        );
                    }
                }
            }
        }

        if let Err(source) = self.flush() {
            return Err(self.fail(channel, source, true));
        }
        tracing::debug!(
            written = self.report.written,
            clamped = self.report.clamped,
            "writer drained"
        );
        Ok(self.report)
    }

    fn fail<L>(
        &mut self,
        channel: &DeliveryChannel<Selection<L>>,
        source: io::Error,
        flushing: bool,
    ) -> Error {
        let discarded = channel.close_and_discard() as u64;
        // A failed flush may have lost everything since the last good one; a failed
        // append lost the record being written.
        let in_flight = if flushing { self.unflushed as u64 } else { 1 };
        let written = self.report.written.saturating_sub(if flushing { in_flight } else { 0 });
        let lost = discarded + in_flight;
        tracing::error!(written, lost, error = %source, "log writer failed");
        Error::WriterIo {
            written,
            lost,
            source,
        }
    }
}

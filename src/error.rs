use std::io;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::coordinator::ComponentFailure;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The weight table cannot be sampled from.
    #[error("invalid weight table: {reason}")]
    InvalidWeights { reason: &'static str },

    /// A label outside the weight table was observed.
    #[error("label {label} is not part of the weight table")]
    UnknownLabel { label: String },

    /// The delivery channel no longer admits records.
    #[error("delivery channel is closed")]
    ChannelClosed,

    /// Appending to the log sink failed. `lost` counts admitted records that were
    /// discarded without being written.
    #[error("log writer failed after {written} records, {lost} records lost: {source}")]
    WriterIo {
        written: u64,
        lost: u64,
        #[source]
        source: io::Error,
    },

    /// Two adjacent log records with a decreasing timestamp.
    #[error("timestamp decreased at line {line}: {previous} > {current}")]
    AuditGap {
        line: usize,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("invalid configuration: {0}")]
    Config(&'static str),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// One or more run components failed.
    #[error("{} component(s) failed: {}", .failures.len(), summarize(.failures))]
    Run { failures: Vec<ComponentFailure> },
}

fn summarize(failures: &[ComponentFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

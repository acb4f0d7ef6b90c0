use std::io::{self, Write as _};

use chrono::{DateTime, SecondsFormat, Utc};

/// A selection stamped by the writer at the moment it was dequeued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord<L> {
    pub timestamp: DateTime<Utc>,
    pub label: L,
}

/// Serialises a [`LogRecord`] into a byte buffer.
///
/// Implement this trait to customise how records are laid out in the log. The
/// auditor only understands [`TextFormat`].
pub trait FormatRecord<L>: Send {
    /// Append a formatted representation of `record` to `buf`.
    fn format_record(&self, record: &LogRecord<L>, buf: &mut Vec<u8>) -> io::Result<()>;
}

/// Plain-text formatter that writes `<RFC 3339 timestamp> <label>\n`.
///
/// Timestamps are UTC with nanosecond precision, e.g. `2024-05-01T12:00:00.000000001Z`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFormat;

impl<L: std::fmt::Display> FormatRecord<L> for TextFormat {
    fn format_record(&self, record: &LogRecord<L>, buf: &mut Vec<u8>) -> io::Result<()> {
        writeln!(
            buf,
            "{} {}",
            record.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            record.label
        )
    }
}

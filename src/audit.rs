//! Offline verification of a persisted selection log.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Two adjacent records whose timestamps go backwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    /// 1-based line number of the later record.
    pub line: usize,
    pub previous: DateTime<Utc>,
    pub current: DateTime<Utc>,
}

impl From<Gap> for Error {
    fn from(gap: Gap) -> Self {
        Error::AuditGap {
            line: gap.line,
            previous: gap.previous,
            current: gap.current,
        }
    }
}

/// A line that could not be parsed as `<timestamp> <label>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIssue {
    pub line: usize,
    pub content: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// Lines that parsed as records.
    pub records: u64,
    pub gaps: Vec<Gap>,
    pub parse_issues: Vec<ParseIssue>,
    pub label_counts: BTreeMap<String, u64>,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

impl AuditReport {
    /// True when no timestamp decreased. Parse issues do not count against this.
    pub fn is_monotonic(&self) -> bool {
        self.gaps.is_empty()
    }

    /// `Err(AuditGap)` for the first decrease, if any.
    pub fn into_result(self) -> Result<Self> {
        match self.gaps.first() {
            Some(gap) => Err(gap.clone().into()),
            None => Ok(self),
        }
    }
}

/// Read every line of `reader` and check that timestamps never decrease.
///
/// Malformed lines are recorded in [`AuditReport::parse_issues`] and skipped; the
/// comparison continues from the last record that parsed.
pub fn audit<R: BufRead>(mut reader: R) -> io::Result<AuditReport> {
    let mut report = AuditReport::default();
    let mut previous: Option<DateTime<Utc>> = None;
    let mut buf = Vec::new();
    let mut number = 0;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        number += 1;
        let raw = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

        let parsed = match std::str::from_utf8(raw) {
            Ok(line) => parse_line(line),
            Err(_) => Err("invalid UTF-8"),
        };
        let (timestamp, label) = match parsed {
            Ok(parsed) => parsed,
            Err(reason) => {
                tracing::debug!(line = number, reason, "skipping malformed log line");
                report.parse_issues.push(ParseIssue {
                    line: number,
                    content: String::from_utf8_lossy(raw).into_owned(),
                    reason: reason.to_owned(),
                });
                continue;
            }
        };

        if let Some(prev) = previous.filter(|&prev| timestamp < prev) {
            tracing::warn!(line = number, %prev, %timestamp, "log timestamp decreased");
            report.gaps.push(Gap {
                line: number,
                previous: prev,
                current: timestamp,
            });
        }
        previous = Some(timestamp);

        report.records += 1;
        report.first.get_or_insert(timestamp);
        report.last = Some(timestamp);
        *report.label_counts.entry(label.to_owned()).or_default() += 1;
    }

    Ok(report)
}

/// [`audit`] the file at `path`.
pub fn audit_path(path: impl AsRef<Path>) -> Result<AuditReport> {
    let file = File::open(path)?;
    Ok(audit(BufReader::new(file))?)
}

fn parse_line(line: &str) -> Result<(DateTime<Utc>, &str), &'static str> {
    let (timestamp, label) = line.split_once(' ').ok_or("missing separator")?;
    if label.is_empty() {
        return Err("missing label");
    }
    let timestamp = DateTime::parse_from_rfc3339(timestamp).map_err(|_| "invalid timestamp")?;
    Ok((timestamp.to_utc(), label))
}

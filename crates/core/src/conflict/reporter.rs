//! Emitting evaluation results as one timestamped line each.
//!
//! Line format: `<RFC 3339 timestamp>|<JSON array>`. Each line is written
//! with a single `write_all` and flushed so consumers never see a partial
//! record.

use std::io::{self, Write};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::debug;

use super::evaluator::ConflictRecord;
use crate::config::ReportFormat;

/// Conflicts on one file with one peer, for the grouped format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupedConflict {
    pub peer: String,
    pub file: String,
    pub lines: Vec<u32>,
}

/// Fold sorted records into one entry per (peer, file).
pub fn group(records: &[ConflictRecord]) -> Vec<GroupedConflict> {
    let mut grouped: Vec<GroupedConflict> = Vec::new();
    for record in records {
        match grouped.last_mut() {
            Some(last) if last.peer == record.peer && last.file == record.file => {
                last.lines.push(record.line);
            }
            _ => grouped.push(GroupedConflict {
                peer: record.peer.clone(),
                file: record.file.clone(),
                lines: vec![record.line],
            }),
        }
    }
    grouped
}

/// Render one output line (including the trailing newline).
pub fn format_line(
    at: DateTime<Utc>,
    records: &[ConflictRecord],
    format: ReportFormat,
) -> Result<String, serde_json::Error> {
    let body = match format {
        ReportFormat::Lines => serde_json::to_string(records)?,
        ReportFormat::Grouped => serde_json::to_string(&group(records))?,
    };
    Ok(format!(
        "{}|{}\n",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        body
    ))
}

/// Writes evaluation results, suppressing repeated "no conflicts" lines.
///
/// The first evaluation is always written, as is every non-empty result.
/// An empty result is written only when the previous one was non-empty.
pub struct ConflictReporter<W: Write> {
    out: W,
    format: ReportFormat,
    last: Option<Vec<ConflictRecord>>,
}

impl ConflictReporter<io::Stdout> {
    pub fn stdout(format: ReportFormat) -> Self {
        Self::new(io::stdout(), format)
    }
}

impl<W: Write> ConflictReporter<W> {
    pub fn new(out: W, format: ReportFormat) -> Self {
        Self {
            out,
            format,
            last: None,
        }
    }

    fn should_emit(&self, records: &[ConflictRecord]) -> bool {
        match &self.last {
            None => true,
            Some(previous) => !records.is_empty() || !previous.is_empty(),
        }
    }

    /// Report an evaluation made now. Returns whether a line was written.
    pub fn report(&mut self, records: &[ConflictRecord]) -> io::Result<bool> {
        self.report_at(Utc::now(), records)
    }

    pub fn report_at(&mut self, at: DateTime<Utc>, records: &[ConflictRecord]) -> io::Result<bool> {
        if !self.should_emit(records) {
            debug!("still no conflicts, suppressing report");
            return Ok(false);
        }
        let line = format_line(at, records, self.format)?;
        self.out.write_all(line.as_bytes())?;
        self.out.flush()?;
        self.last = Some(records.to_vec());
        Ok(true)
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap()
    }

    fn bob(line: u32) -> ConflictRecord {
        ConflictRecord::new("bob", "a.txt", line)
    }

    fn output(reporter: ConflictReporter<Vec<u8>>) -> Vec<String> {
        String::from_utf8(reporter.into_inner())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_line_format() {
        let line = format_line(at(), &[bob(7)], ReportFormat::Lines).unwrap();
        assert_eq!(
            line,
            "2026-03-01T12:30:00.000Z|[{\"peer\":\"bob\",\"file\":\"a.txt\",\"line\":7}]\n"
        );
    }

    #[test]
    fn test_grouped_format() {
        let records = vec![
            bob(3),
            bob(7),
            ConflictRecord::new("bob", "b.txt", 1),
            ConflictRecord::new("carol", "a.txt", 3),
        ];
        let line = format_line(at(), &records, ReportFormat::Grouped).unwrap();
        let (_, json) = line.trim_end().split_once('|').unwrap();
        let parsed: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!([
                {"peer": "bob", "file": "a.txt", "lines": [3, 7]},
                {"peer": "bob", "file": "b.txt", "lines": [1]},
                {"peer": "carol", "file": "a.txt", "lines": [3]},
            ])
        );
    }

    #[test]
    fn test_first_empty_evaluation_is_emitted() {
        let mut reporter = ConflictReporter::new(Vec::new(), ReportFormat::Lines);
        assert!(reporter.report_at(at(), &[]).unwrap());
        assert_eq!(output(reporter), vec!["2026-03-01T12:30:00.000Z|[]"]);
    }

    #[test]
    fn test_transition_to_no_conflicts_then_suppress() {
        let mut reporter = ConflictReporter::new(Vec::new(), ReportFormat::Lines);
        assert!(reporter.report_at(at(), &[bob(7)]).unwrap());
        assert!(reporter.report_at(at(), &[]).unwrap());
        assert!(!reporter.report_at(at(), &[]).unwrap());
        assert!(!reporter.report_at(at(), &[]).unwrap());
        assert!(reporter.report_at(at(), &[bob(9)]).unwrap());

        let lines = output(reporter);
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with("|[]"));
    }

    #[test]
    fn test_repeated_conflicts_are_always_emitted() {
        let mut reporter = ConflictReporter::new(Vec::new(), ReportFormat::Lines);
        assert!(reporter.report_at(at(), &[bob(7)]).unwrap());
        assert!(reporter.report_at(at(), &[bob(7)]).unwrap());
        assert_eq!(output(reporter).len(), 2);
    }
}

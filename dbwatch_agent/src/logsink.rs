//! Append-only text log: `<ISO-8601 timestamp> - <message>` per line.

use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};

use time::macros::format_description;
use time::OffsetDateTime;
use tracing::warn;

/// UTC, millisecond precision, `Z` suffix (e.g. `2024-01-01T00:00:00.000Z`).
pub fn iso_timestamp(at: OffsetDateTime) -> String {
    let utc = at.to_offset(time::UtcOffset::UTC);
    utc.format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    ))
    .unwrap_or_else(|_| utc.unix_timestamp().to_string())
}

pub fn format_line(at: OffsetDateTime, message: &str) -> String {
    format!("{} - {}", iso_timestamp(at), message)
}

pub struct LogSink {
    path: Option<PathBuf>,
    out: Option<LineWriter<File>>,
}

impl LogSink {
    /// Open (or create) `path` in append mode.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path: Some(path),
            out: Some(LineWriter::new(file)),
        })
    }

    /// A sink that drops everything; lines still reach tracing and subscribers.
    pub fn disabled() -> Self {
        Self {
            path: None,
            out: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append an already formatted line. Write errors are reported, not returned.
    pub fn append(&mut self, line: &str) {
        let Some(out) = self.out.as_mut() else {
            return;
        };
        if let Err(e) = writeln!(out, "{line}") {
            warn!("failed to append to status log {:?}: {e}", self.path);
        }
    }

    /// Flush and close. Later appends are ignored.
    pub fn close(&mut self) -> io::Result<()> {
        match self.out.take() {
            Some(mut out) => {
                out.flush()?;
                out.get_ref().sync_data()
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn iso_timestamp_has_millis_and_z() {
        let at = datetime!(2024-03-05 07:08:09.123456 UTC);
        assert_eq!(iso_timestamp(at), "2024-03-05T07:08:09.123Z");
    }

    #[test]
    fn offsets_are_normalised_to_utc() {
        let at = datetime!(2024-03-05 09:00:00 +02:00);
        assert_eq!(iso_timestamp(at), "2024-03-05T07:00:00.000Z");
    }

    #[test]
    fn appends_lines_and_preserves_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db_status.log");
        std::fs::write(&path, "earlier\n").unwrap();

        let mut sink = LogSink::open(&path).unwrap();
        sink.append(&format_line(datetime!(2024-01-01 00:00:00 UTC), "one"));
        sink.append("two");
        sink.close().unwrap();
        sink.append("ignored after close");

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "earlier\n2024-01-01T00:00:00.000Z - one\ntwo\n");
    }

    #[test]
    fn disabled_sink_is_inert() {
        let mut sink = LogSink::disabled();
        sink.append("x");
        assert!(sink.path().is_none());
        assert!(sink.close().is_ok());
    }
}

//! Printing result rows.
//!
//! Each row becomes one line, `<database>: ["v1", "\N", ""]`. A line is
//! written under a lock so rows from concurrent targets never interleave
//! within a line.

use crate::services::database::ResultRow;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

/// Receives every row a dispatch produces.
pub trait RowSink: Send + Sync {
    fn emit(&self, database: &str, row: &ResultRow);
}

pub fn format_row(database: &str, row: &ResultRow) -> String {
    format!("{}: {}", database, row)
}

/// Writes formatted rows, one per line, to any writer.
pub struct LineSink<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> LineSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    /// Print the matched database names, one per line (used when no query
    /// was given).
    pub fn write_databases(&self, names: &[String]) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        for name in names {
            if let Err(e) = writeln!(out, "{}", name) {
                tracing::debug!("Failed to write database name: {}", e);
                return;
            }
        }
    }
}

impl LineSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> RowSink for LineSink<W> {
    fn emit(&self, database: &str, row: &ResultRow) {
        let line = format_row(database, row);
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{}", line) {
            tracing::debug!("Failed to write row for {}: {}", database, e);
        }
    }
}

//! Benchmark output parsing for the `*.data` files written by sysbench.
//!
//! The layout is consumed strictly in order:
//!
//! ```text
//! Number of threads: 8              preamble, up to "Threads started!"
//! [  10s] threads: 8, tps: 1.0, ... interval reports, up to "OLTP"
//! OLTP test statistics:
//!     queries performed:
//!         read/write/other/total    exactly 4 lines
//!     transactions: ...             free-form, up to a blank line
//!
//! General statistics:
//!     total time ...                exactly 3 lines
//!     response time:
//!          min/avg/max/percentile   up to a blank line
//!
//! Threads fairness:
//!     events ...                    up to a blank line or end of file
//! ```
//!
//! Section titles are skipped by position, not matched. A file whose
//! sections are reordered or resized is misread without complaint; only
//! running out of lines inside a fixed-size block is reported.

use crate::classify::{parse_stat_line, LineError, ParseError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const NUMBER_OF_THREADS: &str = "Number of threads";
const THREADS_STARTED: &str = "Threads started!";
const OLTP_MARKER: &str = "OLTP";

const QUERIES_PERFORMED_LINES: usize = 4;
const GENERAL_STATISTICS_LINES: usize = 3;

pub type StatBlock = BTreeMap<String, String>;

/// One `[  10s] threads: 8, tps: ...` progress line.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntervalReport {
    pub elapsed: String,
    pub values: StatBlock,
}

/// Structured content of one benchmark output file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BenchmarkFileStats {
    pub preamble: StatBlock,
    pub reports: Vec<IntervalReport>,
    pub queries_performed: StatBlock,
    pub oltp_statistics: StatBlock,
    pub general_statistics: StatBlock,
    pub response_times: StatBlock,
    pub threads_fairness: StatBlock,
}

impl BenchmarkFileStats {
    /// Value of the `Number of threads` preamble line.
    pub fn number_of_threads(&self) -> Result<&str, ParseError> {
        lookup(&self.preamble, "preamble", NUMBER_OF_THREADS)
    }

    pub fn query_total(&self) -> Result<&str, ParseError> {
        lookup(&self.queries_performed, "queries performed", "total")
    }

    pub fn response_time(&self, key: &str) -> Result<&str, ParseError> {
        lookup(&self.response_times, "response times", key)
    }

    pub fn ignored_errors(&self) -> Result<&str, ParseError> {
        lookup(&self.oltp_statistics, "oltp statistics", "ignored errors")
    }
}

fn lookup<'a>(block: &'a StatBlock, section: &str, key: &str) -> Result<&'a str, ParseError> {
    block
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| ParseError::MissingKey {
            section: section.to_string(),
            key: key.to_string(),
        })
}

/// Forward-only cursor over the lines of a file.
struct LineCursor<'a> {
    lines: Vec<&'a str>,
    position: usize,
}

impl<'a> LineCursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().collect(),
            position: 0,
        }
    }

    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.position).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn at_blank_or_end(&self) -> bool {
        self.peek().map_or(true, |line| line.trim().is_empty())
    }

    fn error(&self, source: ParseError) -> LineError {
        LineError::new(self.position, source)
    }

    /// Read `key: value` lines until a blank line or end of file. The blank
    /// line itself is not consumed.
    fn stat_block(&mut self) -> Result<StatBlock, LineError> {
        let mut block = StatBlock::new();
        while !self.at_blank_or_end() {
            let line = self.peek().unwrap_or_default();
            let (key, value) = parse_stat_line(line).map_err(|e| self.error(e))?;
            block.insert(key, value);
            self.advance();
        }
        Ok(block)
    }

    /// Read exactly `count` `key: value` lines.
    fn fixed_block(
        &mut self,
        section: &'static str,
        count: usize,
    ) -> Result<StatBlock, LineError> {
        if self.position + count > self.lines.len() {
            return Err(self.error(ParseError::Truncated {
                section,
                expected: count,
            }));
        }
        let mut block = StatBlock::new();
        for _ in 0..count {
            let line = self.peek().unwrap_or_default();
            let (key, value) = parse_stat_line(line).map_err(|e| self.error(e))?;
            block.insert(key, value);
            self.advance();
        }
        Ok(block)
    }
}

/// Split `[  10s] threads: 8, tps: 123.45, ...` into its elapsed time and
/// the comma-separated `key: value` pairs.
pub fn parse_interval_report(line: &str) -> Result<IntervalReport, ParseError> {
    let line = line.trim();
    let mut fields = line.split(',');
    let first = fields.next().unwrap_or_default();

    let (elapsed, rest) = match first.strip_prefix('[').and_then(|s| s.split_once(']')) {
        Some((elapsed, rest)) => (elapsed.trim(), rest),
        None => {
            return Err(ParseError::MissingField {
                index: 0,
                line: line.to_string(),
            })
        }
    };

    let mut values = StatBlock::new();
    let (key, value) = parse_stat_line(rest)?;
    values.insert(key, value);
    for field in fields {
        let (key, value) = parse_stat_line(field)?;
        values.insert(key, value);
    }

    Ok(IntervalReport {
        elapsed: elapsed.to_string(),
        values,
    })
}

/// Parse the text of one benchmark output file.
pub fn parse_benchmark_text(text: &str) -> Result<BenchmarkFileStats, LineError> {
    let mut cursor = LineCursor::new(text);
    let mut stats = BenchmarkFileStats::default();

    while let Some(line) = cursor.peek() {
        if line.starts_with(THREADS_STARTED) {
            break;
        }
        if line.starts_with(NUMBER_OF_THREADS) {
            let (key, value) = parse_stat_line(line).map_err(|e| cursor.error(e))?;
            stats.preamble.insert(key, value);
        }
        cursor.advance();
    }
    cursor.advance(); // "Threads started!"

    while let Some(line) = cursor.peek() {
        if line.starts_with(OLTP_MARKER) {
            break;
        }
        if !line.trim().is_empty() {
            let report = parse_interval_report(line).map_err(|e| cursor.error(e))?;
            stats.reports.push(report);
        }
        cursor.advance();
    }
    cursor.advance(); // "OLTP test statistics:"
    cursor.advance(); // "queries performed:"

    stats.queries_performed = cursor.fixed_block("queries performed", QUERIES_PERFORMED_LINES)?;
    stats.oltp_statistics = cursor.stat_block()?;
    cursor.advance(); // blank
    cursor.advance(); // "General statistics:"

    stats.general_statistics =
        cursor.fixed_block("general statistics", GENERAL_STATISTICS_LINES)?;
    cursor.advance(); // "response time:"
    stats.response_times = cursor.stat_block()?;
    cursor.advance(); // blank
    cursor.advance(); // "Threads fairness:"

    stats.threads_fairness = cursor.stat_block()?;

    Ok(stats)
}

/// Read and parse one benchmark output file.
pub fn process_single_data_file(path: &Path) -> Result<BenchmarkFileStats, DataFileError> {
    let text = std::fs::read_to_string(path).map_err(|source| DataFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let stats = parse_benchmark_text(&text).map_err(|source| DataFileError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(
        path = %path.display(),
        reports = stats.reports.len(),
        "parsed benchmark file"
    );
    Ok(stats)
}

/// Parse every file in `dir` matching `pattern` (e.g. `*.data`), keyed and
/// ordered by path.
pub fn process_data_files(
    dir: &Path,
    pattern: &str,
) -> Result<BTreeMap<PathBuf, BenchmarkFileStats>, DataFileError> {
    let full_pattern = format!(
        "{}/{pattern}",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let entries = glob::glob(&full_pattern).map_err(|source| DataFileError::Pattern {
        pattern: full_pattern.clone(),
        source,
    })?;

    let mut files = BTreeMap::new();
    for entry in entries {
        let path = entry.map_err(|e| DataFileError::Io {
            path: e.path().to_path_buf(),
            source: e.into(),
        })?;
        let stats = process_single_data_file(&path)?;
        files.insert(path, stats);
    }

    if files.is_empty() {
        tracing::warn!(dir = %dir.display(), pattern, "no benchmark files found");
    }
    Ok(files)
}

/// Errors from reading benchmark output files.
#[derive(Debug)]
pub enum DataFileError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },
    Parse {
        path: PathBuf,
        source: LineError,
    },
}

impl std::fmt::Display for DataFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataFileError::Io { path, source } => {
                write!(f, "failed to read data file {}: {source}", path.display())
            }
            DataFileError::Pattern { pattern, source } => {
                write!(f, "invalid data file pattern {pattern:?}: {source}")
            }
            DataFileError::Parse { path, source } => {
                write!(f, "failed to parse data file {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for DataFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DataFileError::Io { source, .. } => Some(source),
            DataFileError::Pattern { source, .. } => Some(source),
            DataFileError::Parse { source, .. } => Some(source),
        }
    }
}

//! Line classification for `timer.txt` resource logs.
//!
//! Each line of a timer log is one of:
//!
//! ```text
//! header   "    PID USER      PR  NI    VIRT    RES    SHR S   CPU  MEM     TIME COMMAND"
//! timer    "21:34:27 == 11924 root  20   0 11.355g 220068  11432 S   0.0  0.1   0:01.37 mysqld"
//! primary  "-- wsrep_flow_control_interval  [ 5000, 5000 ]"
//! secondary "== wsrep_slave_threads  16"
//! status   "Starting warmup"
//! ```

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static HEADER_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s+\S+").unwrap());
static TIMER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d\d:\d\d:\d\d\s").unwrap());
static PRIMARY_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^--\s").unwrap());
static SECONDARY_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^==\s").unwrap());
static STATUS_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\S+").unwrap());

/// The kind of a single timer-log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Column header row of the process monitor table.
    Header,
    /// One process monitor sample, prefixed with `HH:MM:SS`.
    TimerSample,
    /// `-- key value` line dumped from the primary node.
    PrimaryConfig,
    /// `== key value` line dumped from the secondary node.
    SecondaryConfig,
    /// Free text such as `Starting test` or `Ending test`.
    Status,
}

/// Classify a line. Patterns are tried in priority order and the first
/// match wins.
pub fn classify_line(line: &str) -> Result<LineKind, ParseError> {
    if HEADER_PATTERN.is_match(line) {
        Ok(LineKind::Header)
    } else if TIMER_PATTERN.is_match(line) {
        Ok(LineKind::TimerSample)
    } else if PRIMARY_PATTERN.is_match(line) {
        Ok(LineKind::PrimaryConfig)
    } else if SECONDARY_PATTERN.is_match(line) {
        Ok(LineKind::SecondaryConfig)
    } else if STATUS_PATTERN.is_match(line) {
        Ok(LineKind::Status)
    } else {
        Err(ParseError::Unclassified {
            line: line.to_string(),
        })
    }
}

/// Split a `-- key value...` or `== key value...` line into `(key, value)`.
///
/// The value is every token after the key joined with no separator, so
/// `-- key v1 v2` yields `("key", "v1v2")`. Historical logs were compared
/// against values in this form; keep it.
pub fn parse_config_line(line: &str) -> Result<(String, String), ParseError> {
    let mut tokens = line.split_whitespace().skip(1);
    let key = tokens.next().ok_or_else(|| ParseError::MissingField {
        index: 1,
        line: line.to_string(),
    })?;
    let value: String = tokens.collect();
    Ok((key.to_string(), value))
}

/// Split a `key: value` line on its first colon, trimming both halves.
pub fn parse_stat_line(line: &str) -> Result<(String, String), ParseError> {
    let (key, value) = line.split_once(':').ok_or_else(|| ParseError::MissingColon {
        line: line.to_string(),
    })?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

/// String-to-string configuration dump for one node, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct ConfigMap(BTreeMap<String, String>);

impl ConfigMap {
    /// Insert a value; later writes for the same key replace earlier ones.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Look up a key that downstream processing cannot do without.
    pub fn require(&self, section: &str, key: &str) -> Result<&str, ParseError> {
        self.get(key).ok_or_else(|| ParseError::MissingKey {
            section: section.to_string(),
            key: key.to_string(),
        })
    }
}

/// Parse failures in either log format. All of them are fatal for the file.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The line matched none of the known line patterns.
    Unclassified { line: String },
    /// A whitespace-delimited field was missing from a positional line.
    MissingField { index: usize, line: String },
    /// A field that must be numeric could not be converted.
    InvalidNumber { value: String, line: String },
    /// A `Starting test` line did not end in `=<count>`.
    MissingThreadCount { line: String },
    /// A `key: value` line had no colon.
    MissingColon { line: String },
    /// A fixed-size block ran past the end of the file.
    Truncated { section: &'static str, expected: usize },
    /// A key required for aggregation was never recorded.
    MissingKey { section: String, key: String },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Unclassified { line } => {
                write!(f, "line type could not be determined: {line:?}")
            }
            ParseError::MissingField { index, line } => {
                write!(f, "missing field {index} in line {line:?}")
            }
            ParseError::InvalidNumber { value, line } => {
                write!(f, "invalid number {value:?} in line {line:?}")
            }
            ParseError::MissingThreadCount { line } => {
                write!(f, "no thread count in line {line:?}")
            }
            ParseError::MissingColon { line } => {
                write!(f, "expected `key: value` but got {line:?}")
            }
            ParseError::Truncated { section, expected } => {
                write!(
                    f,
                    "section {section:?} truncated: expected {expected} lines before end of file"
                )
            }
            ParseError::MissingKey { section, key } => {
                write!(f, "missing key {key:?} in {section}")
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// A [`ParseError`] tagged with the 1-based line number it occurred on.
#[derive(Debug, Clone, PartialEq)]
pub struct LineError {
    pub line: usize,
    pub source: ParseError,
}

impl LineError {
    pub fn new(index: usize, source: ParseError) -> Self {
        Self {
            line: index + 1,
            source,
        }
    }
}

impl std::fmt::Display for LineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.source)
    }
}

impl std::error::Error for LineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

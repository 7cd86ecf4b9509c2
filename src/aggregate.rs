//! Aggregation of parsed runs across many result directories.
//!
//! Each directory holds one `timer.txt` plus the benchmark `*.data` files of
//! that run. Test records and benchmark files are folded into one
//! accumulator per thread count, then summarised once all directories have
//! been read.

use crate::classify::{ConfigMap, ParseError};
use crate::config::{InputConfig, StatsConfig};
use crate::stats;
use crate::sysbench::{self, BenchmarkFileStats, DataFileError};
use crate::timer::{self, RunRecord, TimerError, TimerFile};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const CLUSTER_SIZE_KEY: &str = "wsrep_cluster_size";
const APPLIER_THREADS_KEY: &str = "wsrep_slave_threads";
const FC_INTERVAL_KEY: &str = "wsrep_flow_control_interval";

/// Cluster-wide settings that must match across every aggregated run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    pub cluster_size: String,
    pub applier_threads: String,
    pub fc_interval: String,
}

impl SystemInfo {
    /// Read the settings from one node's header configuration.
    pub fn from_config(config: &ConfigMap, section: &str) -> Result<Self, ParseError> {
        Ok(Self {
            cluster_size: config.require(section, CLUSTER_SIZE_KEY)?.to_string(),
            applier_threads: config.require(section, APPLIER_THREADS_KEY)?.to_string(),
            fc_interval: config.require(section, FC_INTERVAL_KEY)?.to_string(),
        })
    }

    /// Compare against another node's settings; the first differing field
    /// is reported.
    pub fn check(&self, other: &SystemInfo) -> Result<(), AggregateError> {
        let fields = [
            ("cluster size", &self.cluster_size, &other.cluster_size),
            (
                "applier threads",
                &self.applier_threads,
                &other.applier_threads,
            ),
            ("flow control interval", &self.fc_interval, &other.fc_interval),
        ];
        for (field, expected, found) in fields {
            if expected != found {
                return Err(AggregateError::Mismatch {
                    field,
                    expected: expected.clone(),
                    found: found.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Values collected for one thread count, in the order directories and
/// tests were read. Only ever appended to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupAccumulator {
    pub recv_queue_avg: Vec<String>,
    pub recv_queue_max: Vec<String>,
    pub send_queue_avg: Vec<String>,
    pub send_queue_max: Vec<String>,
    pub flow_control_recv: Vec<String>,
    pub flow_control_paused: Vec<String>,
    pub cert_distance: Vec<String>,
    pub cpu_usage: Vec<f64>,

    pub query_count: Vec<String>,
    pub response_time_min: Vec<String>,
    pub response_time_avg: Vec<String>,
    pub response_time_max: Vec<String>,
    pub ignored_errors: Vec<String>,
}

impl GroupAccumulator {
    /// Append the end-of-test status values and mean CPU of one test run.
    pub fn push_test(&mut self, record: &RunRecord) -> Result<(), ParseError> {
        let secondary = &record.secondary;
        let primary = &record.primary;
        self.recv_queue_avg
            .push(secondary.require("secondary", "wsrep_local_recv_queue_avg")?.to_string());
        self.recv_queue_max
            .push(secondary.require("secondary", "wsrep_local_recv_queue_max")?.to_string());
        self.send_queue_avg
            .push(primary.require("primary", "wsrep_local_send_queue_avg")?.to_string());
        self.send_queue_max
            .push(primary.require("primary", "wsrep_local_send_queue_max")?.to_string());
        self.flow_control_recv
            .push(primary.require("primary", "wsrep_flow_control_recv")?.to_string());
        self.flow_control_paused
            .push(primary.require("primary", "wsrep_flow_control_paused")?.to_string());
        self.cert_distance
            .push(primary.require("primary", "wsrep_cert_deps_distance")?.to_string());

        let cpu: Vec<f64> = record.samples.iter().map(|s| s.cpu).collect();
        self.cpu_usage.push(stats::mean(&cpu));
        Ok(())
    }

    /// Append the totals of one benchmark output file.
    pub fn push_benchmark(&mut self, data: &BenchmarkFileStats) -> Result<(), ParseError> {
        self.query_count.push(data.query_total()?.to_string());
        self.response_time_min
            .push(data.response_time("min")?.to_string());
        self.response_time_avg
            .push(data.response_time("avg")?.to_string());
        self.response_time_max
            .push(data.response_time("max")?.to_string());
        self.ignored_errors.push(data.ignored_errors()?.to_string());
        Ok(())
    }
}

/// Summary row for one thread count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub thread_count: u32,
    pub samples: usize,
    pub qps_min: f64,
    pub qps_max: f64,
    pub qps_avg: f64,
    pub qps_std: f64,
    /// Half-width of the confidence interval around `qps_avg`.
    pub qps_ci: f64,
    pub cpu_usage: f64,
    pub recv_queue_avg: f64,
    /// Fraction of time replication was paused by flow control.
    pub fc_paused: f64,
    pub fc_events: f64,
    /// Milliseconds.
    pub response_time_avg: f64,
}

/// Folds runs from many directories into per-thread-count groups.
#[derive(Debug)]
pub struct Aggregator {
    stats: StatsConfig,
    system: Option<SystemInfo>,
    groups: BTreeMap<u32, GroupAccumulator>,
}

impl Aggregator {
    pub fn new(stats: StatsConfig) -> Self {
        Self {
            stats,
            system: None,
            groups: BTreeMap::new(),
        }
    }

    pub fn system_info(&self) -> Option<&SystemInfo> {
        self.system.as_ref()
    }

    /// Fold one directory's parsed timer log and benchmark files.
    ///
    /// The first directory fixes the expected cluster settings; every
    /// directory's primary and secondary header configs must match them.
    pub fn add_run(
        &mut self,
        timer: &TimerFile,
        data_files: &BTreeMap<PathBuf, BenchmarkFileStats>,
    ) -> Result<(), AggregateError> {
        let primary = SystemInfo::from_config(&timer.system.primary, "system primary")?;
        let secondary = SystemInfo::from_config(&timer.system.secondary, "system secondary")?;

        let expected = self.system.get_or_insert_with(|| primary.clone());
        expected.check(&primary)?;
        expected.check(&secondary)?;

        for record in &timer.tests {
            let thread_count = record.thread_count.ok_or_else(|| ParseError::MissingKey {
                section: "test".to_string(),
                key: "thread-count".to_string(),
            })?;
            self.groups
                .entry(thread_count)
                .or_default()
                .push_test(record)?;
        }

        for (path, data) in data_files {
            let threads = data.number_of_threads()?;
            let thread_count =
                threads
                    .parse::<u32>()
                    .map_err(|_| AggregateError::Parse {
                        path: Some(path.clone()),
                        source: ParseError::InvalidNumber {
                            value: threads.to_string(),
                            line: "Number of threads".to_string(),
                        },
                    })?;
            // Every benchmark file must belong to a test recorded in timer.txt
            let group =
                self.groups
                    .get_mut(&thread_count)
                    .ok_or_else(|| AggregateError::Parse {
                        path: Some(path.clone()),
                        source: ParseError::MissingKey {
                            section: "test".to_string(),
                            key: thread_count.to_string(),
                        },
                    })?;
            group
                .push_benchmark(data)
                .map_err(|source| AggregateError::Parse {
                    path: Some(path.clone()),
                    source,
                })?;
        }

        Ok(())
    }

    /// Summarise every group, ordered by ascending thread count.
    pub fn finish(self) -> Result<Vec<AggregateResult>, AggregateError> {
        let mut results = Vec::with_capacity(self.groups.len());
        for (thread_count, group) in &self.groups {
            results.push(summarise(*thread_count, group, &self.stats)?);
        }
        Ok(results)
    }
}

fn parse_number(value: &str, field: &str) -> Result<f64, ParseError> {
    value.trim().parse::<f64>().map_err(|_| ParseError::InvalidNumber {
        value: value.to_string(),
        line: field.to_string(),
    })
}

fn parse_all(values: &[String], field: &str) -> Result<Vec<f64>, ParseError> {
    values.iter().map(|v| parse_number(v, field)).collect()
}

/// Response times are printed as e.g. `26.66ms`.
fn parse_millis(value: &str) -> Result<f64, ParseError> {
    let number = value
        .strip_suffix("ms")
        .ok_or_else(|| ParseError::InvalidNumber {
            value: value.to_string(),
            line: "response times.avg".to_string(),
        })?;
    parse_number(number, "response times.avg")
}

fn summarise(
    thread_count: u32,
    group: &GroupAccumulator,
    config: &StatsConfig,
) -> Result<AggregateResult, AggregateError> {
    let qps: Vec<f64> = parse_all(&group.query_count, "queries performed.total")?
        .into_iter()
        .map(|count| count / config.qps_scale)
        .collect();
    let description =
        stats::describe(&qps).ok_or(AggregateError::EmptyGroup { thread_count })?;

    let response_times = group
        .response_time_avg
        .iter()
        .map(|v| parse_millis(v))
        .collect::<Result<Vec<_>, _>>()?;

    let result = AggregateResult {
        thread_count,
        samples: description.count,
        qps_min: description.min,
        qps_max: description.max,
        qps_avg: description.mean,
        qps_std: description.std_dev(),
        qps_ci: description.confidence_half_width(config.confidence),
        cpu_usage: stats::mean(&group.cpu_usage),
        recv_queue_avg: stats::mean(&parse_all(
            &group.recv_queue_avg,
            "wsrep_local_recv_queue_avg",
        )?),
        fc_paused: stats::mean(&parse_all(
            &group.flow_control_paused,
            "wsrep_flow_control_paused",
        )?),
        fc_events: stats::mean(&parse_all(
            &group.flow_control_recv,
            "wsrep_flow_control_recv",
        )?),
        response_time_avg: stats::mean(&response_times),
    };
    tracing::debug!(
        thread_count,
        samples = result.samples,
        qps_avg = result.qps_avg,
        "summarised group"
    );
    Ok(result)
}

/// A directory matched by the run prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunDirectory {
    Process(PathBuf),
    Skip(PathBuf),
}

impl RunDirectory {
    pub fn path(&self) -> &Path {
        match self {
            RunDirectory::Process(path) | RunDirectory::Skip(path) => path,
        }
    }
}

/// Find every directory whose path starts with `prefix`, sorted by path.
/// Directories ending in `skip_suffix` are returned as [`RunDirectory::Skip`].
pub fn discover_run_directories(
    prefix: &str,
    skip_suffix: &str,
) -> Result<Vec<RunDirectory>, AggregateError> {
    let pattern = format!("{}*", glob::Pattern::escape(prefix));
    let entries = glob::glob(&pattern).map_err(|source| AggregateError::Glob {
        pattern: pattern.clone(),
        source,
    })?;

    let mut dirs = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| AggregateError::Io {
            path: e.path().to_path_buf(),
            source: e.into(),
        })?;
        if !path.is_dir() {
            tracing::debug!(path = %path.display(), "ignoring non-directory match");
            continue;
        }
        dirs.push(path);
    }
    dirs.sort();

    Ok(dirs
        .into_iter()
        .map(|path| {
            if !skip_suffix.is_empty() && path.to_string_lossy().ends_with(skip_suffix) {
                RunDirectory::Skip(path)
            } else {
                RunDirectory::Process(path)
            }
        })
        .collect())
}

/// Parsed contents of one run directory.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryData {
    pub timer: TimerFile,
    pub data_files: BTreeMap<PathBuf, BenchmarkFileStats>,
}

/// Parse the timer log and benchmark files of one run directory.
pub fn load_directory(dir: &Path, input: &InputConfig) -> Result<DirectoryData, AggregateError> {
    let data_files = sysbench::process_data_files(dir, &input.data_pattern)?;
    let timer = timer::process_timer_file(&dir.join(&input.timer_file))?;
    Ok(DirectoryData { timer, data_files })
}

/// Aggregate every run directory matching `prefix`.
///
/// `on_directory` is called for each matched directory, skipped or not,
/// before it is processed.
pub fn aggregate_prefix(
    prefix: &str,
    input: &InputConfig,
    stats: &StatsConfig,
    mut on_directory: impl FnMut(&RunDirectory),
) -> Result<Vec<AggregateResult>, AggregateError> {
    let mut aggregator = Aggregator::new(stats.clone());
    let dirs = discover_run_directories(prefix, &input.skip_suffix)?;
    if dirs.is_empty() {
        tracing::warn!(prefix, "no run directories matched");
    }

    for dir in &dirs {
        on_directory(dir);
        let RunDirectory::Process(path) = dir else {
            continue;
        };
        tracing::info!(path = %path.display(), "processing run directory");
        let loaded = load_directory(path, input)?;
        aggregator.add_run(&loaded.timer, &loaded.data_files)?;
    }

    if let Some(info) = aggregator.system_info() {
        tracing::info!(
            cluster_size = %info.cluster_size,
            applier_threads = %info.applier_threads,
            fc_interval = %info.fc_interval,
            "cluster settings consistent across runs"
        );
    }
    aggregator.finish()
}

/// Errors that abort an aggregation pass.
#[derive(Debug)]
pub enum AggregateError {
    /// Cluster settings differ between runs.
    Mismatch {
        field: &'static str,
        expected: String,
        found: String,
    },
    /// A thread count had test records but no benchmark totals.
    EmptyGroup { thread_count: u32 },
    Glob {
        pattern: String,
        source: glob::PatternError,
    },
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Timer(TimerError),
    Data(DataFileError),
    /// A value needed for aggregation was missing or malformed, in the
    /// named benchmark file when known.
    Parse {
        path: Option<PathBuf>,
        source: ParseError,
    },
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateError::Mismatch {
                field,
                expected,
                found,
            } => write!(f, "{field} mismatch! {expected} != {found}"),
            AggregateError::EmptyGroup { thread_count } => {
                write!(f, "no query counts recorded for thread count {thread_count}")
            }
            AggregateError::Glob { pattern, source } => {
                write!(f, "invalid directory pattern {pattern:?}: {source}")
            }
            AggregateError::Io { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            AggregateError::Timer(e) => write!(f, "{e}"),
            AggregateError::Data(e) => write!(f, "{e}"),
            AggregateError::Parse {
                path: Some(path),
                source,
            } => write!(f, "{}: {source}", path.display()),
            AggregateError::Parse { path: None, source } => write!(f, "{source}"),
        }
    }
}

impl std::error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AggregateError::Mismatch { .. } | AggregateError::EmptyGroup { .. } => None,
            AggregateError::Glob { source, .. } => Some(source),
            AggregateError::Io { source, .. } => Some(source),
            AggregateError::Timer(e) => Some(e),
            AggregateError::Data(e) => Some(e),
            AggregateError::Parse { source, .. } => Some(source),
        }
    }
}

impl From<TimerError> for AggregateError {
    fn from(e: TimerError) -> Self {
        AggregateError::Timer(e)
    }
}

impl From<DataFileError> for AggregateError {
    fn from(e: DataFileError) -> Self {
        AggregateError::Data(e)
    }
}

impl From<ParseError> for AggregateError {
    fn from(e: ParseError) -> Self {
        AggregateError::Parse {
            path: None,
            source: e,
        }
    }
}

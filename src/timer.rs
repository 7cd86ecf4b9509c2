/// Timer log parsing: fold a `timer.txt` resource log into the system
/// configuration snapshot plus one record per test run.
use crate::classify::{
    classify_line, parse_config_line, ConfigMap, LineError, LineKind, ParseError,
};
use regex::Regex;
use serde::Serialize;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Primary config key whose in-test value is kept as a baseline.
pub const FC_PAUSED_NS_KEY: &str = "wsrep_flow_control_paused_ns";
/// Synthetic key under which the in-test flow-control baseline is stored.
pub const FC_PAUSED_NS_PREVIOUS_KEY: &str = "wsrep_flow_control_paused_ns (previous)";

const STARTING_TEST: &str = "Starting test";
const ENDING_TEST: &str = "Ending test";
const STARTING_WARMUP: &str = "Starting warmup";

static THREAD_COUNT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\D+=(\d+)").unwrap());

/// One row of the process monitor table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerSample {
    pub time: String,
    pub vm: String,
    pub res: String,
    pub shr: String,
    pub cpu: f64,
}

/// Node configuration captured before any warmup ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemConfig {
    pub primary: ConfigMap,
    pub secondary: ConfigMap,
}

/// One benchmark execution at a fixed thread count.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunRecord {
    pub thread_count: Option<u32>,
    pub primary: ConfigMap,
    pub secondary: ConfigMap,
    pub samples: Vec<TimerSample>,
}

/// Everything parsed out of one `timer.txt`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimerFile {
    pub system: SystemConfig,
    pub tests: Vec<RunRecord>,
}

/// Line ranges of the header and each test section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sections {
    pub header: Range<usize>,
    pub tests: Vec<Range<usize>>,
}

/// Parse one sample row by column position:
/// time (0), VIRT (6), RES (7), SHR (8), %CPU (10).
///
/// ```text
/// 21:54:55 == 11924 root      20   0 19.386g 7.595g 6.012g S  73.3  3.0  99:12.53 mysqld
/// ```
pub fn parse_timer_sample(line: &str) -> Result<TimerSample, ParseError> {
    let fields: Vec<&str> = line.split_whitespace().collect();

    let cpu_text = field(&fields, 10, line)?;
    let cpu = cpu_text
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidNumber {
            value: cpu_text.to_string(),
            line: line.to_string(),
        })?;

    Ok(TimerSample {
        time: field(&fields, 0, line)?.to_string(),
        vm: field(&fields, 6, line)?.to_string(),
        res: field(&fields, 7, line)?.to_string(),
        shr: field(&fields, 8, line)?.to_string(),
        cpu,
    })
}

fn field<'a>(fields: &[&'a str], index: usize, line: &str) -> Result<&'a str, ParseError> {
    fields
        .get(index)
        .copied()
        .ok_or_else(|| ParseError::MissingField {
            index,
            line: line.to_string(),
        })
}

fn is_starting_line(line: &str) -> bool {
    line.starts_with(STARTING_TEST)
}

fn is_ending_line(line: &str) -> bool {
    line.starts_with(ENDING_TEST)
}

/// Split the file into the header (everything before the first
/// `Starting test` line) and test sections, each running from one
/// `Starting test` line up to the next one or end of file.
pub fn segment(lines: &[&str]) -> Sections {
    let mut starts = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| is_starting_line(line))
        .map(|(index, _)| index)
        .peekable();

    let header_end = starts.peek().copied().unwrap_or(lines.len());
    let mut tests = Vec::new();
    while let Some(start) = starts.next() {
        let end = starts.peek().copied().unwrap_or(lines.len());
        tests.push(start..end);
    }

    Sections {
        header: 0..header_end,
        tests,
    }
}

/// Collect primary/secondary configuration from the header section.
///
/// Config lines after a `Starting warmup` line belong to the warmup run and
/// are ignored.
pub fn parse_header(lines: &[&str]) -> Result<SystemConfig, LineError> {
    let mut config = SystemConfig::default();
    let mut warmup_seen = false;

    for (index, line) in lines.iter().enumerate() {
        apply_header_line(&mut config, &mut warmup_seen, line)
            .map_err(|e| LineError::new(index, e))?;
    }

    Ok(config)
}

fn apply_header_line(
    config: &mut SystemConfig,
    warmup_seen: &mut bool,
    line: &str,
) -> Result<(), ParseError> {
    let kind = classify_line(line)?;
    if line.starts_with(STARTING_WARMUP) {
        *warmup_seen = true;
        return Ok(());
    }
    if *warmup_seen {
        return Ok(());
    }
    match kind {
        LineKind::PrimaryConfig => {
            let (key, value) = parse_config_line(line)?;
            config.primary.insert(key, value);
        }
        LineKind::SecondaryConfig => {
            let (key, value) = parse_config_line(line)?;
            config.secondary.insert(key, value);
        }
        _ => {}
    }
    Ok(())
}

/// Phase of a test section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before `Starting test` or after `Ending test`: config lines update
    /// the record.
    Config,
    /// Between `Starting test` and `Ending test`: samples are recorded.
    Timer,
}

/// State machine over the lines of one test section.
///
/// A fresh parser is created for every section so nothing carries over
/// between thread-count variants.
#[derive(Debug)]
pub struct TestSectionParser {
    phase: Phase,
    record: RunRecord,
}

impl TestSectionParser {
    pub fn new() -> Self {
        Self {
            phase: Phase::Config,
            record: RunRecord::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    /// Apply one line to the current state.
    pub fn feed(&mut self, line: &str) -> Result<(), ParseError> {
        let kind = classify_line(line)?;

        if is_starting_line(line) {
            self.record.thread_count = Some(parse_thread_count(line)?);
            self.phase = Phase::Timer;
            return Ok(());
        }
        if is_ending_line(line) {
            self.phase = Phase::Config;
            return Ok(());
        }

        match (self.phase, kind) {
            (Phase::Config, LineKind::PrimaryConfig) => {
                let (key, value) = parse_config_line(line)?;
                self.record.primary.insert(key, value);
            }
            (Phase::Config, LineKind::SecondaryConfig) => {
                let (key, value) = parse_config_line(line)?;
                self.record.secondary.insert(key, value);
            }
            (Phase::Timer, LineKind::PrimaryConfig) => {
                let (key, value) = parse_config_line(line)?;
                if key == FC_PAUSED_NS_KEY {
                    self.record.primary.insert(FC_PAUSED_NS_PREVIOUS_KEY, value);
                }
            }
            (Phase::Timer, LineKind::TimerSample) => {
                self.record.samples.push(parse_timer_sample(line)?);
            }
            _ => {}
        }
        Ok(())
    }

    pub fn finish(self) -> RunRecord {
        self.record
    }
}

impl Default for TestSectionParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract `N` from `Starting test thread-count=N`.
fn parse_thread_count(line: &str) -> Result<u32, ParseError> {
    let missing = || ParseError::MissingThreadCount {
        line: line.to_string(),
    };
    let captures = THREAD_COUNT_PATTERN.captures(line).ok_or_else(missing)?;
    captures[1].parse::<u32>().map_err(|_| missing())
}

/// Parse one test section. `offset` is the index of its first line in the
/// file and only used for error reporting.
pub fn parse_test_section(lines: &[&str], offset: usize) -> Result<RunRecord, LineError> {
    let mut parser = TestSectionParser::new();
    for (index, line) in lines.iter().enumerate() {
        parser
            .feed(line)
            .map_err(|e| LineError::new(offset + index, e))?;
    }
    if parser.phase() == Phase::Timer {
        tracing::debug!(
            line = offset + 1,
            thread_count = ?parser.record().thread_count,
            "test section ended without `Ending test`"
        );
    }
    Ok(parser.finish())
}

/// Parse the full contents of a timer log.
pub fn parse_timer_text(text: &str) -> Result<TimerFile, LineError> {
    let lines: Vec<&str> = text.lines().collect();
    let sections = segment(&lines);

    let system = parse_header(&lines[sections.header.clone()])?;

    let mut tests = Vec::with_capacity(sections.tests.len());
    for range in sections.tests {
        let start = range.start;
        tests.push(parse_test_section(&lines[range], start)?);
    }

    Ok(TimerFile { system, tests })
}

/// Read and parse a timer log from disk.
pub fn process_timer_file(path: &Path) -> Result<TimerFile, TimerError> {
    let text = std::fs::read_to_string(path).map_err(|source| TimerError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = parse_timer_text(&text).map_err(|source| TimerError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(
        path = %path.display(),
        tests = parsed.tests.len(),
        "parsed timer file"
    );
    Ok(parsed)
}

/// Errors from reading a timer log.
#[derive(Debug)]
pub enum TimerError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: LineError,
    },
}

impl std::fmt::Display for TimerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerError::Io { path, source } => {
                write!(f, "failed to read timer file {}: {source}", path.display())
            }
            TimerError::Parse { path, source } => {
                write!(f, "failed to parse timer file {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for TimerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TimerError::Io { source, .. } => Some(source),
            TimerError::Parse { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE_A: &str =
        "21:34:27 == 11924 root      20   0 11.355g 220068  11432 S  10.0  0.1   0:01.37 mysqld";
    const SAMPLE_B: &str =
        "21:34:28 == 11924 root      20   0 11.355g 220068  11432 S  30.0  0.1   0:01.39 mysqld";
    const SAMPLE_C: &str =
        "21:40:01 == 11924 root      20   0 19.386g 7.595g 6.012g S  73.3  3.0  99:12.53 mysqld";
    const TOP_HEADER: &str =
        "  \t  PID USER      PR  NI    VIRT    RES    SHR S   CPU  MEM      TIME COMMAND";

    fn synthetic_timer_file() -> String {
        [
            "-- wsrep_cluster_size 3",
            "-- wsrep_slave_threads 16",
            "-- wsrep_flow_control_interval [ 5000, 5000 ]",
            "== wsrep_cluster_size 3",
            "== wsrep_slave_threads 16",
            "== wsrep_flow_control_interval [ 5000, 5000 ]",
            "Starting warmup",
            "-- wsrep_slave_threads 99",
            "Ending warmup",
            "Starting test thread-count=4",
            TOP_HEADER,
            SAMPLE_A,
            "-- wsrep_flow_control_paused_ns 1234",
            "== wsrep_local_recv_queue_avg 7",
            SAMPLE_B,
            "Ending test",
            "-- wsrep_flow_control_paused_ns 5678",
            "-- wsrep_flow_control_paused 0.25",
            "== wsrep_local_recv_queue_avg 0.5",
            SAMPLE_A,
            "Starting test thread-count=16",
            SAMPLE_C,
            "Ending test",
            "-- wsrep_flow_control_paused 0.5",
        ]
        .join("\n")
    }

    #[test]
    fn parse_sample_extracts_positional_fields() {
        let sample = parse_timer_sample(SAMPLE_C).unwrap();
        assert_eq!(sample.time, "21:40:01");
        assert_eq!(sample.vm, "19.386g");
        assert_eq!(sample.res, "7.595g");
        assert_eq!(sample.shr, "6.012g");
        assert_eq!(sample.cpu, 73.3);
    }

    #[test]
    fn parse_short_sample_fails() {
        let err = parse_timer_sample("21:40:01 == 11924 root 20 0 19.386g").unwrap_err();
        assert!(matches!(err, ParseError::MissingField { index: 10, .. }));
    }

    #[test]
    fn parse_sample_with_bad_cpu_fails() {
        let line = "21:40:01 == 11924 root 20 0 1g 2g 3g S abc 3.0 1:00 mysqld";
        assert!(matches!(
            parse_timer_sample(line).unwrap_err(),
            ParseError::InvalidNumber { .. }
        ));
    }

    #[test]
    fn segment_without_tests_is_all_header() {
        let lines = ["-- a 1", "== b 2"];
        let sections = segment(&lines);
        assert_eq!(sections.header, 0..2);
        assert!(sections.tests.is_empty());
    }

    #[test]
    fn segment_finds_test_boundaries() {
        let text = synthetic_timer_file();
        let lines: Vec<&str> = text.lines().collect();
        let sections = segment(&lines);
        assert_eq!(sections.header, 0..9);
        assert_eq!(sections.tests, vec![9..20, 20..24]);
    }

    #[test]
    fn segment_file_starting_with_test_has_empty_header() {
        let lines = ["Starting test thread-count=1", "Ending test"];
        let sections = segment(&lines);
        assert_eq!(sections.header, 0..0);
        assert_eq!(sections.tests, vec![0..2]);
    }

    #[test]
    fn header_ignores_config_after_warmup() {
        let lines = [
            "-- wsrep_slave_threads 16",
            "Starting warmup",
            "-- wsrep_slave_threads 99",
            "== wsrep_cluster_size 5",
        ];
        let config = parse_header(&lines).unwrap();
        assert_eq!(config.primary.get("wsrep_slave_threads"), Some("16"));
        assert_eq!(config.secondary, ConfigMap::default());
    }

    #[test]
    fn header_rejects_blank_line() {
        assert!(parse_header(&["-- a 1", ""]).is_err());
    }

    #[test]
    fn state_machine_transitions() {
        let mut parser = TestSectionParser::new();
        assert_eq!(parser.phase(), Phase::Config);

        parser.feed("Starting test thread-count=8").unwrap();
        assert_eq!(parser.phase(), Phase::Timer);
        assert_eq!(parser.record().thread_count, Some(8));

        parser.feed("Some other status").unwrap();
        assert_eq!(parser.phase(), Phase::Timer);

        parser.feed("Ending test").unwrap();
        assert_eq!(parser.phase(), Phase::Config);
    }

    #[test]
    fn config_phase_updates_maps_last_write_wins() {
        let mut parser = TestSectionParser::new();
        parser.feed("-- wsrep_flow_control_paused 0.1").unwrap();
        parser.feed("-- wsrep_flow_control_paused 0.2").unwrap();
        parser.feed("== wsrep_local_recv_queue_avg 3").unwrap();
        let record = parser.finish();
        assert_eq!(record.primary.get("wsrep_flow_control_paused"), Some("0.2"));
        assert_eq!(record.secondary.get("wsrep_local_recv_queue_avg"), Some("3"));
        assert_eq!(record.thread_count, None);
    }

    #[test]
    fn timer_phase_keeps_paused_ns_baseline_only() {
        let mut parser = TestSectionParser::new();
        parser.feed("Starting test thread-count=2").unwrap();
        parser.feed("-- wsrep_flow_control_paused_ns 100").unwrap();
        parser.feed("-- wsrep_flow_control_paused 0.9").unwrap();
        parser.feed("== wsrep_local_recv_queue_avg 3").unwrap();
        let record = parser.finish();
        assert_eq!(record.primary.get(FC_PAUSED_NS_PREVIOUS_KEY), Some("100"));
        assert_eq!(record.primary.get(FC_PAUSED_NS_KEY), None);
        assert_eq!(record.primary.get("wsrep_flow_control_paused"), None);
        assert_eq!(record.secondary, ConfigMap::default());
    }

    #[test]
    fn samples_outside_timer_phase_are_ignored() {
        let mut parser = TestSectionParser::new();
        parser.feed(SAMPLE_A).unwrap();
        parser.feed("Starting test thread-count=2").unwrap();
        parser.feed(SAMPLE_B).unwrap();
        parser.feed("Ending test").unwrap();
        parser.feed(SAMPLE_C).unwrap();
        let record = parser.finish();
        assert_eq!(record.samples.len(), 1);
        assert_eq!(record.samples[0].time, "21:34:28");
    }

    #[test]
    fn starting_line_without_count_fails() {
        let mut parser = TestSectionParser::new();
        let err = parser.feed("Starting test now").unwrap_err();
        assert!(matches!(err, ParseError::MissingThreadCount { .. }));
    }

    #[test]
    fn parse_synthetic_file() {
        let timer = parse_timer_text(&synthetic_timer_file()).unwrap();

        assert_eq!(timer.system.primary.get("wsrep_slave_threads"), Some("16"));
        assert_eq!(
            timer.system.primary.get("wsrep_flow_control_interval"),
            Some("[5000,5000]")
        );
        assert_eq!(timer.system.secondary.get("wsrep_cluster_size"), Some("3"));

        assert_eq!(timer.tests.len(), 2);

        let first = &timer.tests[0];
        assert_eq!(first.thread_count, Some(4));
        assert_eq!(first.samples.len(), 2);
        assert_eq!(first.samples[0].cpu, 10.0);
        assert_eq!(first.samples[1].cpu, 30.0);
        assert_eq!(first.primary.get(FC_PAUSED_NS_PREVIOUS_KEY), Some("1234"));
        assert_eq!(first.primary.get(FC_PAUSED_NS_KEY), Some("5678"));
        assert_eq!(first.primary.get("wsrep_flow_control_paused"), Some("0.25"));
        assert_eq!(
            first.secondary.get("wsrep_local_recv_queue_avg"),
            Some("0.5")
        );

        let second = &timer.tests[1];
        assert_eq!(second.thread_count, Some(16));
        assert_eq!(second.samples.len(), 1);
        assert_eq!(second.samples[0].time, "21:40:01");
        assert_eq!(second.primary.get("wsrep_flow_control_paused"), Some("0.5"));
        assert_eq!(second.primary.get(FC_PAUSED_NS_PREVIOUS_KEY), None);
    }

    #[test]
    fn parse_error_reports_line_number() {
        let text = "-- a 1\nStarting test thread-count=1\n\nEnding test";
        let err = parse_timer_text(text).unwrap_err();
        assert_eq!(err.line, 3);
        assert!(matches!(err.source, ParseError::Unclassified { .. }));
    }

    #[test]
    fn header_parse_error_reports_line_number() {
        let err = parse_timer_text("-- a 1\n\n-- b 2").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn process_timer_file_reads_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("timer.txt");
        std::fs::write(&path, synthetic_timer_file()).unwrap();
        let timer = process_timer_file(&path).unwrap();
        assert_eq!(timer.tests.len(), 2);
    }

    #[test]
    fn process_missing_timer_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = process_timer_file(&dir.path().join("timer.txt")).unwrap_err();
        assert!(matches!(err, TimerError::Io { .. }));
        assert!(err.to_string().contains("timer.txt"));
    }
}

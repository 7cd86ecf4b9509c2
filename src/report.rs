/// Rendering of aggregate results and parsed structures.
use crate::aggregate::AggregateResult;
use serde::Serialize;
use std::io::Write;

pub const TABLE_HEADER: &str =
    "#thds      qps qps(sd)       cpu    recv-q    rsp-tm  fc-time   fc-msgs";
pub const CSV_HEADER: &str = "#thds,qps,qps(sd),cpu,recv-q,rsp-tm,fc-time,fc-msgs";

/// Output layout for the aggregate command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Aligned columns, preceded by progress lines.
    #[default]
    Table,
    /// Comma separated, no progress lines.
    Csv,
    /// Full results including confidence intervals.
    Json,
}

impl OutputFormat {
    /// Whether `Processing`/`Skipping` lines belong in the output.
    pub fn shows_progress(self) -> bool {
        matches!(self, OutputFormat::Table)
    }
}

/// Fixed-point rendering that prints NaN as `nan`, as the historical
/// reports did.
fn number(value: f64, width: usize, precision: usize) -> String {
    if value.is_nan() {
        format!("{:>width$}", "nan")
    } else {
        format!("{value:width$.precision$}")
    }
}

fn table_row(r: &AggregateResult) -> String {
    format!(
        "{:3}  {}  {}  {}%  {}   {}ms    {}% {}",
        r.thread_count,
        number(r.qps_avg, 9, 2),
        number(r.qps_std, 6, 2),
        number(r.cpu_usage, 7, 2),
        number(r.recv_queue_avg, 8, 2),
        number(r.response_time_avg, 5, 2),
        number(r.fc_paused * 100.0, 4, 1),
        number(r.fc_events, 9, 1),
    )
}

fn csv_row(r: &AggregateResult) -> String {
    format!(
        "{},{},{},{},{},{},{},{}",
        r.thread_count,
        number(r.qps_avg, 0, 2),
        number(r.qps_std, 0, 2),
        number(r.cpu_usage, 0, 2),
        number(r.recv_queue_avg, 0, 2),
        number(r.response_time_avg, 0, 2),
        number(r.fc_paused * 100.0, 0, 1),
        number(r.fc_events, 0, 1),
    )
}

/// Write results in the requested format. Rows are written in the order
/// given, which [`crate::aggregate::Aggregator::finish`] makes ascending by
/// thread count.
pub fn write_results(
    out: &mut impl Write,
    results: &[AggregateResult],
    format: OutputFormat,
) -> std::io::Result<()> {
    match format {
        OutputFormat::Table => {
            writeln!(out, "{TABLE_HEADER}")?;
            for r in results {
                writeln!(out, "{}", table_row(r))?;
            }
        }
        OutputFormat::Csv => {
            writeln!(out, "{CSV_HEADER}")?;
            for r in results {
                writeln!(out, "{}", csv_row(r))?;
            }
        }
        OutputFormat::Json => write_pretty(out, &results)?,
    }
    Ok(())
}

/// Pretty-print any parsed structure as indented JSON.
pub fn write_pretty<T: Serialize + ?Sized>(out: &mut impl Write, value: &T) -> std::io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)
}

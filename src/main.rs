mod aggregate;
mod classify;
mod config;
mod report;
mod stats;
mod sysbench;
mod timer;

use aggregate::RunDirectory;
use clap::{Parser, Subcommand};
use config::PerfConfig;
use report::OutputFormat;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Parse Galera cluster benchmark logs and summarise throughput by
/// client thread count.
#[derive(Parser, Debug)]
#[command(name = "galera-perf", version, about)]
pub struct Cli {
    /// Config file path (default: galera-perf.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Aggregate every run directory whose path starts with PREFIX.
    /// Directories ending in `.1` are skipped.
    Aggregate {
        /// Directory base, e.g. `results/run-`
        prefix: String,
        #[arg(value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Dump the parsed timer log and benchmark files of one run directory.
    ProcessDataDirectory { dir: PathBuf },
    /// Dump one parsed benchmark output file.
    ProcessSingleDataFile { file: PathBuf },
    /// Dump one parsed timer log.
    ProcessTimer { file: PathBuf },
}

/// Exit status for a failed argument parse. Usage errors exit with 1;
/// `--help` and `--version` are not failures and return `None`.
fn usage_exit_code(e: &clap::Error) -> Option<u8> {
    e.use_stderr().then_some(1)
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => match usage_exit_code(&e) {
            Some(code) => {
                let _ = e.print();
                return ExitCode::from(code);
            }
            None => e.exit(),
        },
    };

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
    tracing::debug!(?cli, "parsed CLI arguments");

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = PerfConfig::load(cli.config.as_deref())?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match &cli.command {
        Command::Aggregate { prefix, format } => {
            let format = *format;
            let mut progress_error = None;
            let results = aggregate::aggregate_prefix(
                prefix,
                &config.input,
                &config.stats,
                |dir| {
                    if !format.shows_progress() {
                        return;
                    }
                    let action = match dir {
                        RunDirectory::Process(_) => "Processing",
                        RunDirectory::Skip(_) => "Skipping",
                    };
                    if let Err(e) = writeln!(out, "{action} {}", dir.path().display()) {
                        progress_error.get_or_insert(e);
                    }
                },
            )?;
            if let Some(e) = progress_error {
                return Err(e.into());
            }
            report::write_results(&mut out, &results, format)?;
        }
        Command::ProcessDataDirectory { dir } => {
            let loaded = aggregate::load_directory(dir, &config.input)?;
            report::write_pretty(&mut out, &loaded.timer)?;
            report::write_pretty(&mut out, &loaded.data_files)?;
        }
        Command::ProcessSingleDataFile { file } => {
            let stats = sysbench::process_single_data_file(file)?;
            report::write_pretty(&mut out, &stats)?;
        }
        Command::ProcessTimer { file } => {
            let timer = timer::process_timer_file(file)?;
            report::write_pretty(&mut out, &timer)?;
        }
    }

    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prefix_is_usage_error() {
        let err = Cli::try_parse_from(["galera-perf", "aggregate"]).unwrap_err();
        assert!(err.use_stderr());
        assert_eq!(usage_exit_code(&err), Some(1));
    }

    #[test]
    fn extra_argument_is_usage_error() {
        let err =
            Cli::try_parse_from(["galera-perf", "aggregate", "p", "csv", "extra"]).unwrap_err();
        assert!(err.use_stderr());
        assert_eq!(usage_exit_code(&err), Some(1));
    }

    #[test]
    fn help_is_not_a_failure() {
        let err = Cli::try_parse_from(["galera-perf", "--help"]).unwrap_err();
        assert_eq!(usage_exit_code(&err), None);
    }

    #[test]
    fn aggregate_accepts_format() {
        let cli = Cli::try_parse_from(["galera-perf", "aggregate", "p", "csv"]).unwrap();
        match cli.command {
            Command::Aggregate { prefix, format } => {
                assert_eq!(prefix, "p");
                assert_eq!(format, OutputFormat::Csv);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn aggregate_defaults_to_table() {
        let cli = Cli::try_parse_from(["galera-perf", "aggregate", "p"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Aggregate {
                format: OutputFormat::Table,
                ..
            }
        ));
    }
}

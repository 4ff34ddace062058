//! Cleanser CLI - CSV quality reports and cleaning
//!
//! # Commands
//!
//! ```bash
//! cleanser serve                              # Start HTTP server (port 5000)
//! cleanser analyze input.csv                  # Print a quality report
//! cleanser preprocess input.csv -o out.csv    # Clean a file locally
//! cleanser clean input.csv --server URL       # Clean a file on a running server
//! ```
//!
//! Cleaning flags are shared by `preprocess` and `clean`:
//!
//! ```bash
//! cleanser preprocess sales.csv --remove-duplicates --standardize-columns \
//!     --trim-whitespace --convert-types --handle-missing fill_median -o clean.csv
//! ```

use clap::{Args, Parser, Subcommand};
use cleanser::analysis::{analyze_source, analyze_table, ScanInfo};
use cleanser::api::start_server;
use cleanser::client::{ApiClient, RetryPolicy};
use cleanser::config::{Limits, Settings};
use cleanser::models::{MissingStrategy, PreprocessOptions};
use cleanser::parser::{read_table, write_csv};
use cleanser::transform::run_pipeline;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "cleanser")]
#[command(about = "Data-quality reports and cleaning for CSV files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start HTTP server
    Serve {
        #[command(flatten)]
        settings: Settings,
    },

    /// Print the quality report of a CSV file as JSON
    Analyze {
        /// Input CSV file
        input: PathBuf,

        /// Size in MiB from which only a row sample is analyzed
        #[arg(long, default_value_t = 50)]
        sampling_threshold_mb: u64,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Clean a CSV file locally
    Preprocess {
        /// Input CSV file
        input: PathBuf,

        #[command(flatten)]
        options: OptionFlags,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also print the quality report of the cleaned table
        #[arg(long)]
        report: bool,
    },

    /// Upload a CSV file to a server, clean it there and download the result
    Clean {
        /// Input CSV file
        input: PathBuf,

        /// Server base URL
        #[arg(long, env = "CLEANSER_SERVER", default_value = "http://localhost:5000")]
        server: String,

        #[command(flatten)]
        options: OptionFlags,

        /// Status polls before giving up
        #[arg(long, default_value_t = 600)]
        max_attempts: u32,

        /// Milliseconds between status polls
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Cleaning steps to enable.
#[derive(Args)]
struct OptionFlags {
    /// Drop exact duplicate rows
    #[arg(long)]
    remove_duplicates: bool,

    /// Lowercase headers and replace separators with underscores
    #[arg(long)]
    standardize_columns: bool,

    /// Strip whitespace around text values
    #[arg(long)]
    trim_whitespace: bool,

    /// Cast columns to their inferred types
    #[arg(long)]
    convert_types: bool,

    /// none, drop, fill_mean, fill_median or fill_mode
    #[arg(long, default_value = "none", value_parser = parse_strategy)]
    handle_missing: MissingStrategy,
}

impl From<OptionFlags> for PreprocessOptions {
    fn from(flags: OptionFlags) -> Self {
        Self {
            remove_duplicates: flags.remove_duplicates,
            standardize_columns: flags.standardize_columns,
            trim_whitespace: flags.trim_whitespace,
            convert_types: flags.convert_types,
            handle_missing: flags.handle_missing,
        }
    }
}

fn parse_strategy(value: &str) -> Result<MissingStrategy, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("unknown strategy '{value}'"))
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { settings } => start_server(settings).await,

        Commands::Analyze {
            input,
            sampling_threshold_mb,
            output,
        } => cmd_analyze(&input, sampling_threshold_mb, output.as_deref()),

        Commands::Preprocess {
            input,
            options,
            output,
            report,
        } => cmd_preprocess(&input, options.into(), output.as_deref(), report),

        Commands::Clean {
            input,
            server,
            options,
            max_attempts,
            poll_ms,
            output,
        } => {
            let policy = RetryPolicy {
                max_attempts,
                initial_delay: Duration::from_millis(poll_ms),
                ..RetryPolicy::default()
            };
            cmd_clean(&input, &server, options.into(), &policy, output.as_deref()).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_analyze(
    input: &Path,
    sampling_threshold_mb: u64,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("Analyzing: {}", input.display());

    let limits = Limits {
        sampling_threshold_bytes: sampling_threshold_mb * 1024 * 1024,
        ..Limits::default()
    };
    let byte_size = fs::metadata(input)?.len();
    let file = fs::File::open(input)?;
    let analysis = analyze_source(std::io::BufReader::new(file), byte_size, &limits)?;

    let report = &analysis.report;
    eprintln!("   Rows: {}{}", report.total_rows, if report.is_sampled { " (sample)" } else { "" });
    eprintln!("   Columns: {}", report.total_columns);
    eprintln!("   Missing: {}%", report.missing_percentage);
    eprintln!("   Duplicates: {}", report.duplicate_rows);

    let json = serde_json::to_string_pretty(report)?;
    write_output(json.as_bytes(), output)?;
    Ok(())
}

fn cmd_preprocess(
    input: &Path,
    options: PreprocessOptions,
    output: Option<&Path>,
    report: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("Processing: {}", input.display());

    let byte_size = fs::metadata(input)?.len();
    let loaded = read_table(std::io::BufReader::new(fs::File::open(input)?), None)?;
    eprintln!("   Encoding: {}", loaded.encoding.label());
    eprintln!("   Delimiter: '{}'", format_delimiter(loaded.delimiter));
    eprintln!("   Rows: {}", loaded.table.row_count());

    let result = run_pipeline(loaded.table, &options);
    eprintln!("   Rows kept: {}", result.rows_processed);
    eprintln!("   Rows removed: {}", result.rows_removed);
    if !result.unresolved_columns.is_empty() {
        eprintln!("   Unresolved missing values in: {}", result.unresolved_columns.join(", "));
    }

    if report {
        let scan = ScanInfo::full(byte_size, result.rows_processed);
        let quality = analyze_table(&result.table, scan, &Limits::default())?;
        eprintln!("{}", serde_json::to_string_pretty(&quality)?);
    }

    let bytes = write_csv(&result.table)?;
    write_output(&bytes, output)?;
    Ok(())
}

async fn cmd_clean(
    input: &Path,
    server: &str,
    options: PreprocessOptions,
    policy: &RetryPolicy,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = ApiClient::new(server);
    let name = input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("data.csv")
        .to_string();

    eprintln!("Uploading {} to {}", input.display(), server);
    let upload = client.upload(&name, fs::read(input)?).await?;
    eprintln!("   File ID: {}", upload.file_id);

    let submission = client.submit(&upload.file_id, &options).await?;
    eprintln!("   Task ID: {}", submission.task_id);

    let result = client.wait_for_task(&submission.task_id, policy).await?;
    eprintln!("   Rows processed: {}", result.rows_processed);

    let bytes = client.download(&result.output_file_id).await?;
    write_output(&bytes, output)?;
    Ok(())
}

fn format_delimiter(d: u8) -> String {
    match d {
        b'\t' => "\\t".to_string(),
        c => (c as char).to_string(),
    }
}

fn write_output(content: &[u8], output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        Some(path) => {
            fs::write(path, content)?;
            eprintln!("Saved to: {}", path.display());
        }
        None => std::io::stdout().write_all(content)?,
    }
    Ok(())
}

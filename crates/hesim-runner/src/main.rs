//! # hesim
//!
//! Command line runner for HESim, a discrete-event model of 802.11ax PHYs
//! sharing one medium.

use hesim_runner::metrics_export;
use hesim_runner::{create_event_loop, EventLoop, ProgressInfo, RunnerError, SimTime, SimulationStats};

use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Seed used when neither the command line nor the model gives one.
pub const DEFAULT_SEED: u64 = 1;

// ============================================================================
// Duration Parsing
// ============================================================================

/// Parse a duration string with units into seconds.
///
/// Supported formats:
/// - Plain number: `2` (interpreted as seconds)
/// - With unit suffix: `250us`, `500ms`, `2s`, `10m`, `1h`, `1d`
/// - Combined units: `1s500ms`, `1m30s`
fn parse_duration(s: &str) -> Result<f64, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<f64>() {
        return Ok(secs);
    }
    if s.is_empty() {
        return Err("Empty duration".to_string());
    }

    let mut total_seconds = 0.0;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail.find(|c: char| c.is_ascii_digit() || c == '.').unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let value: f64 = number
            .parse()
            .map_err(|_| format!("Invalid number '{}' in duration '{}'", number, s))?;
        total_seconds += value * unit_seconds(unit).ok_or_else(|| {
            format!("Unknown duration unit '{}' in '{}'. Use us, ms, s, m, h, or d.", unit, s)
        })?;
        rest = tail;
    }
    Ok(total_seconds)
}

/// Seconds per duration unit. A bare number counts as seconds.
fn unit_seconds(unit: &str) -> Option<f64> {
    match unit {
        "us" => Some(1e-6),
        "ms" => Some(1e-3),
        "" | "s" => Some(1.0),
        "m" => Some(60.0),
        "h" => Some(3600.0),
        "d" => Some(86400.0),
        _ => None,
    }
}

// ============================================================================
// CLI Configuration
// ============================================================================

/// Output format for metrics at end of simulation.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum MetricsOutputFormat {
    /// JSON format for programmatic consumption.
    Json,
    /// Prometheus text exposition format.
    Prometheus,
}

/// HESim - 802.11ax PHY simulator
#[derive(Parser, Debug)]
#[command(name = "hesim")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a simulation from YAML model files
    Run(RunnerConfig),
    /// List all available metrics with descriptions and labels
    Metrics,
}

/// Configuration for the `run` command
#[derive(Parser, Debug)]
pub struct RunnerConfig {
    /// Path(s) to YAML model file(s). Multiple files are merged in order (later overrides earlier).
    #[arg(required = true)]
    pub models: Vec<PathBuf>,

    /// Simulation duration. Overrides `simulation.duration_s` from the model.
    /// Accepts plain seconds or units: 0.5, 500ms, 2s, 1m, 1s250ms
    #[arg(short, long, value_parser = parse_duration)]
    pub duration: Option<f64>,

    /// Random seed. Overrides `simulation.seed` from the model.
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Output trace file path (JSON)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Output format for metrics at end of simulation.
    #[arg(long, value_enum)]
    pub metrics_output: Option<MetricsOutputFormat>,

    /// File path to write metrics (stdout if not specified).
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Metrics warmup period; metrics recorded before it are discarded.
    #[arg(long, value_parser = parse_duration)]
    pub metrics_warmup: Option<f64>,
}

// ============================================================================
// Summary Output
// ============================================================================

/// Print a boxed table to stderr. Headers are centered, the first column is
/// left-aligned and the others right-aligned.
fn print_table(headers: &[&str], widths: &[usize], rows: &[Vec<String>]) {
    let border = |left: &str, join: &str, right: &str| {
        let segments: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
        format!("{}{}{}", left, segments.join(join), right)
    };
    let line = |cells: Vec<String>| format!("│ {} │", cells.join(" │ "));

    let mut err = std::io::stderr().lock();
    let header = headers
        .iter()
        .zip(widths)
        .map(|(h, w)| format!("{:^w$}", h, w = *w))
        .collect();
    let _ = writeln!(err);
    let _ = writeln!(err, "{}", border("┌", "┬", "┐"));
    let _ = writeln!(err, "{}", line(header));
    let _ = writeln!(err, "{}", border("├", "┼", "┤"));
    for row in rows {
        let cells = row
            .iter()
            .zip(widths)
            .enumerate()
            .map(|(i, (cell, w))| {
                if i == 0 {
                    format!("{:<w$}", cell, w = *w)
                } else {
                    format!("{:>w$}", cell, w = *w)
                }
            })
            .collect();
        let _ = writeln!(err, "{}", line(cells));
    }
    let _ = writeln!(err, "{}", border("└", "┴", "┘"));
    let _ = err.flush();
}

fn print_station_table(event_loop: &EventLoop) {
    let rows: Vec<Vec<String>> = event_loop
        .station_infos()
        .into_iter()
        .map(|info| {
            vec![
                info.name.clone(),
                info.role.to_string(),
                info.channel_number.to_string(),
                info.color.to_string(),
                format!("{:.1}, {:.1}, {:.1}", info.position.x, info.position.y, info.position.z),
            ]
        })
        .collect();
    print_table(
        &["Station", "Role", "Channel", "Color", "Position (m)"],
        &[16, 4, 7, 5, 20],
        &rows,
    );
}

/// Print the final summary table with per-station statistics.
fn print_summary_table(stats: &SimulationStats) {
    let rows: Vec<Vec<String>> = stats
        .nodes
        .iter()
        .map(|(name, node)| {
            vec![
                name.clone(),
                node.tx.to_string(),
                node.tx_dropped.to_string(),
                node.rx_ok.to_string(),
                node.rx_error.to_string(),
                node.rx_dropped.to_string(),
            ]
        })
        .collect();
    print_table(
        &["Station", "TX", "TX drop", "RX ok", "RX error", "RX drop"],
        &[16, 6, 8, 6, 8, 8],
        &rows,
    );
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Run a simulation with the given configuration.
pub fn run_simulation(config: RunnerConfig) -> Result<SimulationStats, RunnerError> {
    let metrics_recorder = if config.metrics_output.is_some() {
        let recorder = Arc::new(metrics_export::InMemoryRecorder::new());
        if let Err(e) = metrics::set_global_recorder((*recorder).clone()) {
            eprintln!("Warning: Failed to set metrics recorder: {}", e);
            None
        } else {
            hesim_metrics::describe_metrics();
            Some(recorder)
        }
    } else {
        None
    };

    let paths: Vec<&Path> = config.models.iter().map(|p| p.as_path()).collect();
    let model = hesim_runner::load_models(&paths)?;

    if config.verbose {
        eprintln!(
            "Loaded model with {} stations from {} file(s)",
            model.stations().len(),
            config.models.len()
        );
    }

    let seed = config.seed.or(model.simulation().seed).unwrap_or(DEFAULT_SEED);
    let duration_secs = config.duration.or(model.simulation().duration_s).ok_or_else(|| {
        RunnerError::ConfigError("no duration: pass --duration or set simulation.duration_s".to_string())
    })?;
    if duration_secs <= 0.0 {
        return Err(RunnerError::ConfigError(format!(
            "duration must be positive, got {}",
            duration_secs
        )));
    }

    if config.verbose {
        eprintln!("Using seed: {}", seed);
    }

    let trace_output: Option<Box<dyn Write>> = match config.output {
        Some(ref path) => Some(Box::new(std::io::BufWriter::new(std::fs::File::create(path)?))),
        None => None,
    };

    let mut event_loop = create_event_loop(&model, seed, trace_output)?;

    if config.verbose {
        print_station_table(&event_loop);
    }

    let warmup_time = config
        .metrics_warmup
        .filter(|secs| *secs > 0.0)
        .map(SimTime::from_secs);
    let mut warmup_cleared = false;

    let duration = SimTime::from_secs(duration_secs);
    eprintln!("⏱  Running simulation for {} seconds...", duration_secs);

    let print_progress = |_event_loop: &EventLoop, progress: ProgressInfo, is_final: bool| {
        if let Some(warmup) = warmup_time {
            if !warmup_cleared && progress.sim_time >= warmup {
                if let Some(ref recorder) = metrics_recorder {
                    recorder.clear();
                    if config.verbose {
                        eprintln!(
                            "  [WARMUP] Cleared metrics at {:.3}s (warmup period: {:.3}s)",
                            progress.sim_time.as_secs_f64(),
                            warmup.as_secs_f64()
                        );
                    }
                }
                warmup_cleared = true;
            }
        }
        if is_final {
            return;
        }
        eprintln!(
            "  [{:5.1}%] sim: {:.3}s | events: {} | speed: {:.1}x",
            progress.progress_percent,
            progress.sim_time.as_secs_f64(),
            progress.events_processed,
            progress.time_multiplier
        );
    };

    let stats = event_loop.run_with_progress(duration, print_progress)?;

    print_summary_table(&stats);

    if config.verbose {
        eprintln!("Simulation complete!");
        eprintln!("  Total events: {}", stats.total_events);
        eprintln!("  Frames TX: {}", stats.frames_transmitted);
        eprintln!("  Frames RX: {}", stats.frames_received);
        eprintln!("  RX errors: {}", stats.rx_errors);
        eprintln!("  RX drops: {}", stats.rx_drops);
        eprintln!("  Wall time: {}ms", stats.wall_time_ms);
    }

    if let (Some(format), Some(recorder)) = (config.metrics_output, metrics_recorder) {
        let mut writer: Box<dyn Write> = match &config.metrics_file {
            Some(path) => Box::new(std::fs::File::create(path)?),
            None => Box::new(std::io::stdout()),
        };
        let snapshot = recorder.snapshot();
        match format {
            MetricsOutputFormat::Json => metrics_export::export_json(&snapshot, &mut writer)?,
            MetricsOutputFormat::Prometheus => metrics_export::export_prometheus(&snapshot, &mut writer)?,
        }
        if config.verbose {
            if let Some(ref path) = config.metrics_file {
                eprintln!("Metrics written to {}", path.display());
            }
        }
    }

    Ok(stats)
}

fn main() -> Result<(), RunnerError> {
    // RUST_LOG controls verbosity; warnings and errors only by default
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(config) => {
            let metrics_to_stdout = config.metrics_output.is_some() && config.metrics_file.is_none();
            let stats = run_simulation(config)?;

            // Stats go to stdout unless metrics already do
            if !metrics_to_stdout {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
        }
        Commands::Metrics => print_metrics_info(),
    }

    Ok(())
}

/// Print information about all available metrics
fn print_metrics_info() {
    use hesim_metrics::metric_defs;

    println!("HESim Available Metrics");
    println!("=======================\n");

    println!("All metrics support the following labels:");
    println!("  - node: Station name");
    println!("  - node_type: ap, sta, or agent");
    println!("  - groups: Custom grouping tags (comma-separated)");
    println!();

    let categories = [
        ("PHY", "hesim.phy."),
        ("Shared Medium", "hesim.channel."),
        ("Traffic Agents", "hesim.agent."),
        ("Timing", "hesim.timing."),
    ];

    for (category_name, prefix) in categories {
        println!("## {}\n", category_name);

        for metric in metric_defs::ALL {
            if metric.name.starts_with(prefix) {
                println!("  {}", metric.name);
                println!("    Type: {}", metric.kind);
                let unit_str = metric.unit_str();
                if !unit_str.is_empty() {
                    println!("    Unit: {}", unit_str);
                }
                if !metric.description.is_empty() {
                    println!("    Description: {}", metric.description);
                }
                if !metric.labels.is_empty() {
                    println!("    Extra labels: {}", metric.labels.join(", "));
                }
                println!();
            }
        }
    }

    println!("## Usage Examples\n");
    println!("  # Run a scenario and export metrics as JSON:");
    println!("  hesim run models/two_stations.yaml --duration 500ms --metrics-output json\n");
    println!("  # Layer an override file and write a trace:");
    println!("  hesim run models/two_stations.yaml models/obss.yaml -d 1s -o trace.json\n");
}

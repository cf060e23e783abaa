//! TIGHTLY: run a synthetic tightly-coupled INS/GNSS scenario.
//!
//! A static receiver observes a frozen GPS constellation while a strapdown INS is corrected
//! with raw pseudoranges and range rates (or L1 Doppler). The receiver clock drifts and may
//! jump by whole milliseconds; the filter is expected to detect and absorb such jumps.
//!
//! The scenario is taken from a JSON file (`--config`) or from the defaults, and command-line
//! flags override individual settings.
use std::error::Error;
use std::fs::File;
use std::path::PathBuf;

use clap::Parser;
use log::{error, info};

use tightly::sim::{ClockJump, Scenario, ScenarioConfig, write_raw_data_csv};

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Synthetic tightly-coupled INS/GNSS scenarios.")]
struct Cli {
    /// Scenario configuration file (JSON); flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Scenario duration in seconds
    #[arg(long)]
    duration: Option<f64>,
    /// IMU sampling rate in Hz
    #[arg(long)]
    imu_rate: Option<f64>,
    /// Random seed of the measurement noise
    #[arg(long)]
    seed: Option<u64>,
    /// Scenario time of a receiver clock jump, s
    #[arg(long)]
    clock_jump_at: Option<f64>,
    /// Size of the receiver clock jump, ms
    #[arg(long, default_value_t = 1.0)]
    clock_jump_ms: f64,
    /// Report L1 Doppler instead of range rate
    #[arg(long)]
    use_doppler: bool,
    /// Navigation result CSV
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Raw observation CSV
    #[arg(long)]
    raw_output: Option<PathBuf>,
    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logger(log_level: &str) -> Result<(), Box<dyn Error>> {
    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .try_init()?;
    Ok(())
}

fn scenario_config(cli: &Cli) -> Result<ScenarioConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => ScenarioConfig::from_json(path)?,
        None => ScenarioConfig::default(),
    };
    if let Some(duration) = cli.duration {
        config.duration_s = duration;
    }
    if let Some(rate) = cli.imu_rate {
        if rate <= 0.0 {
            return Err(format!("IMU rate must be positive, got {rate}").into());
        }
        config.imu_dt_s = 1.0 / rate;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(at_s) = cli.clock_jump_at {
        config.clock_jump = Some(ClockJump {
            at_s,
            milliseconds: cli.clock_jump_ms,
        });
    }
    config.use_doppler |= cli.use_doppler;
    Ok(config)
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let scenario = Scenario::new(scenario_config(cli)?);
    let raw = scenario.raw_data();
    if let Some(path) = &cli.raw_output {
        write_raw_data_csv(File::create(path)?, &raw)?;
        info!("raw observations written to {}", path.display());
    }
    let result = scenario.run_closed_loop(&raw)?;
    if let Some(last) = result.last() {
        info!(
            "final: position error {:.3} m, clock error {:.3} m (truth {:.3} m)",
            last.position_error_m, last.clock_error_m, last.clock_error_truth_m
        );
    }
    let jumps = result
        .records
        .iter()
        .filter(|record| record.outcome.starts_with("jump"))
        .count();
    info!("{} epochs, {} with a clock jump", result.records.len(), jumps);
    if let Some(path) = &cli.output {
        result.to_csv(path)?;
        info!("navigation result written to {}", path.display());
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logger(&cli.log_level) {
        eprintln!("Failed to initialize logger: {}", e);
    }
    if let Err(e) = run(&cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}

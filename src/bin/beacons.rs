//! Beacons CLI - Command-line interface for the beacon engine
//!
//! Commands:
//! - replay: Feed recorded scan cycles through the engine and print events
//! - layout: Parse a layout spec and optionally decode a frame with it
//! - estimate: Distance and proximity for an RSSI reading
//! - doctor: Diagnose configuration and saved state

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use beacon_engine::distance::{classify, DistanceModel};
use beacon_engine::layout::BeaconLayout;
use beacon_engine::scan::TransmissionSupport;
use beacon_engine::{
    BeaconError, BeaconEvent, BeaconManager, EngineConfig, FilterRegistry, RawFrame, Region,
    ENGINE_VERSION, PRODUCER_NAME,
};

/// Beacons - region monitoring and ranging engine
#[derive(Parser)]
#[command(name = "beacons")]
#[command(author = "Synheart AI Inc")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Replay and inspect BLE beacon scan cycles", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded scan cycles (NDJSON, one cycle per line)
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Engine configuration JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Region to monitor: ID[:UUID[:MAJOR[:MINOR]]], empty parts are wildcards
        #[arg(long = "monitor")]
        monitor: Vec<String>,

        /// Region to range: ID[:UUID[:MAJOR[:MINOR]]]
        #[arg(long = "range")]
        range: Vec<String>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Load RSSI filter state from file
        #[arg(long)]
        load_filter_state: Option<PathBuf>,

        /// Save RSSI filter state to file after replay
        #[arg(long)]
        save_filter_state: Option<PathBuf>,
    },

    /// Parse a layout spec
    Layout {
        /// Layout spec, e.g. "m:0-3=4c000215,i:4-19,i:20-21,i:22-23,p:24-24"
        spec: String,

        /// Hex-encoded frame to decode with the layout
        #[arg(long)]
        frame: Option<String>,
    },

    /// Estimate distance from an RSSI reading
    Estimate {
        /// Smoothed RSSI (dBm)
        #[arg(long, allow_hyphen_values = true)]
        rssi: f64,

        /// Reference power at one meter (dBm)
        #[arg(long, allow_hyphen_values = true, default_value = "-59")]
        power: i32,
    },

    /// Diagnose configuration and saved state
    Doctor {
        /// Engine configuration JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Saved RSSI filter state
        #[arg(long)]
        filter_state: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one event per line)
    Ndjson,
    /// Pretty-printed JSON array of events
    JsonPretty,
}

/// One recorded scan cycle
#[derive(Deserialize)]
struct ScanCycle {
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    frames: Vec<RawFrame>,
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable.
/// `BEACONS_LOG` takes precedence over `RUST_LOG`.
fn init_logging() {
    let filter = EnvFilter::try_from_env("BEACONS_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}

fn run(cli: Cli) -> Result<(), BeaconsCliError> {
    match cli.command {
        Commands::Replay {
            input,
            config,
            monitor,
            range,
            output_format,
            load_filter_state,
            save_filter_state,
        } => cmd_replay(
            &input,
            config.as_deref(),
            &monitor,
            &range,
            output_format,
            load_filter_state.as_deref(),
            save_filter_state.as_deref(),
        ),
        Commands::Layout { spec, frame } => cmd_layout(&spec, frame.as_deref()),
        Commands::Estimate { rssi, power } => cmd_estimate(rssi, power),
        Commands::Doctor {
            config,
            filter_state,
            json,
        } => cmd_doctor(config.as_deref(), filter_state.as_deref(), json),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, BeaconsCliError> {
    match path {
        Some(path) => Ok(EngineConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(EngineConfig::default()),
    }
}

/// Parse `ID[:UUID[:MAJOR[:MINOR]]]`
fn parse_region(arg: &str) -> Result<Region, BeaconsCliError> {
    let mut parts = arg.split(':');
    let id = parts.next().unwrap_or_default();
    if id.is_empty() {
        return Err(BeaconsCliError::Usage(format!("region '{arg}' has no id")));
    }
    let uuid = parts.next().filter(|s| !s.is_empty());
    let mut number = |name: &str| -> Result<Option<i32>, BeaconsCliError> {
        match parts.next().filter(|s| !s.is_empty()) {
            None => Ok(None),
            Some(s) => s
                .parse()
                .map(Some)
                .map_err(|_| BeaconsCliError::Usage(format!("{name} '{s}' is not a number"))),
        }
    };
    let major = number("major")?;
    let minor = number("minor")?;
    Ok(Region::from_parts(id, uuid, major, minor)?)
}

#[allow(clippy::too_many_arguments)]
fn cmd_replay(
    input: &Path,
    config: Option<&Path>,
    monitor: &[String],
    range: &[String],
    output_format: OutputFormat,
    load_filter_state: Option<&Path>,
    save_filter_state: Option<&Path>,
) -> Result<(), BeaconsCliError> {
    let config = load_config(config)?;
    let (manager, mut events) = BeaconManager::with_config(config)?;

    if let Some(path) = load_filter_state {
        manager.load_filter_state(&fs::read_to_string(path)?)?;
    }
    for arg in monitor {
        manager.start_monitoring(parse_region(arg)?);
    }
    for arg in range {
        manager.start_ranging(parse_region(arg)?);
    }

    let reader: Box<dyn BufRead> = if input.to_string_lossy() == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(fs::File::open(input)?))
    };

    let mut stdout = io::stdout();
    let mut collected = Vec::new();
    let mut emit = |event: BeaconEvent, collected: &mut Vec<serde_json::Value>| -> Result<(), BeaconsCliError> {
        match output_format {
            OutputFormat::Ndjson => {
                writeln!(stdout, "{}", serde_json::to_string(&event.to_envelope())?)?;
            }
            OutputFormat::JsonPretty => collected.push(event.to_envelope()),
        }
        Ok(())
    };

    let mut cycles = 0usize;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let cycle: ScanCycle = serde_json::from_str(&line).map_err(|e| {
            BeaconsCliError::Usage(format!("line {}: invalid scan cycle: {e}", line_no + 1))
        })?;
        manager.process_cycle(&cycle.frames, cycle.timestamp.unwrap_or_else(Utc::now));
        cycles += 1;

        while let Ok(event) = events.try_recv() {
            emit(event, &mut collected)?;
        }
    }
    while let Ok(event) = events.try_recv() {
        emit(event, &mut collected)?;
    }

    if cycles == 0 {
        return Err(BeaconsCliError::NoCycles);
    }

    if matches!(output_format, OutputFormat::JsonPretty) {
        println!("{}", serde_json::to_string_pretty(&collected)?);
    }

    if let Some(path) = save_filter_state {
        fs::write(path, manager.save_filter_state()?)?;
    }
    Ok(())
}

fn cmd_layout(spec: &str, frame: Option<&str>) -> Result<(), BeaconsCliError> {
    let layout = BeaconLayout::parse(spec)?;
    let decoded = match frame {
        None => None,
        Some(hex_frame) => {
            let data = hex::decode(hex_frame.trim().trim_start_matches("0x"))
                .map_err(BeaconError::from)?;
            Some(layout.apply(&RawFrame::new(data, 0)))
        }
    };

    let mut report = serde_json::json!({ "layout": layout });
    if let Some(beacon) = decoded {
        report["beacon"] = serde_json::to_value(beacon)?;
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_estimate(rssi: f64, power: i32) -> Result<(), BeaconsCliError> {
    let distance = DistanceModel::default().estimate(rssi, power);
    let report = serde_json::json!({
        "rssi": rssi,
        "reference_power": power,
        "distance": distance,
        "proximity": classify(distance).as_str(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_doctor(
    config: Option<&Path>,
    filter_state: Option<&Path>,
    json: bool,
) -> Result<(), BeaconsCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Beacon engine version {}", ENGINE_VERSION),
    });

    let engine_config = match config {
        None => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: "Using default configuration (iBeacon layout)".to_string(),
            });
            Some(EngineConfig::default())
        }
        Some(path) => match load_config(Some(path)) {
            Ok(cfg) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Config valid ({} layouts, {} filter)",
                        cfg.layouts.len(),
                        cfg.filter.kind.as_str()
                    ),
                });
                Some(cfg)
            }
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Invalid config: {}", CliError::from(e).message),
                });
                None
            }
        },
    };

    if let Some(path) = filter_state {
        let check = if !path.exists() {
            DoctorCheck {
                name: "filter_state".to_string(),
                status: CheckStatus::Warning,
                message: "Filter state file does not exist".to_string(),
            }
        } else {
            match fs::read_to_string(path)
                .map_err(BeaconsCliError::from)
                .and_then(|s| Ok(FilterRegistry::from_json(&s)?))
            {
                Ok(registry) => DoctorCheck {
                    name: "filter_state".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Filter state valid ({} beacons, {} filter)",
                        registry.len(),
                        registry.settings().kind.as_str()
                    ),
                },
                Err(e) => DoctorCheck {
                    name: "filter_state".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Invalid filter state: {}", CliError::from(e).message),
                },
            }
        };
        checks.push(check);
    }

    if let Some(cfg) = engine_config {
        match BeaconManager::with_config(cfg) {
            Ok((manager, _events)) => {
                let support = manager.check_transmission_supported();
                checks.push(DoctorCheck {
                    name: "transmission".to_string(),
                    status: transmission_status(support),
                    message: format!("Transmission status {} ({})", support.code(), support.constant_name()),
                });
            }
            Err(e) => checks.push(DoctorCheck {
                name: "engine".to_string(),
                status: CheckStatus::Error,
                message: format!("Engine failed to start: {e}"),
            }),
        }
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (use --input FILE for replay)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (replay --input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Beacons Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(BeaconsCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

/// A headless host cannot advertise; that is expected, not a failure
fn transmission_status(support: TransmissionSupport) -> CheckStatus {
    match support.ensure_supported() {
        Ok(()) => CheckStatus::Ok,
        Err(_) => CheckStatus::Warning,
    }
}

// Error types

#[derive(Debug)]
enum BeaconsCliError {
    Io(io::Error),
    Engine(BeaconError),
    Json(serde_json::Error),
    Usage(String),
    NoCycles,
    DoctorFailed,
}

impl From<io::Error> for BeaconsCliError {
    fn from(e: io::Error) -> Self {
        BeaconsCliError::Io(e)
    }
}

impl From<BeaconError> for BeaconsCliError {
    fn from(e: BeaconError) -> Self {
        BeaconsCliError::Engine(e)
    }
}

impl From<serde_json::Error> for BeaconsCliError {
    fn from(e: serde_json::Error) -> Self {
        BeaconsCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<BeaconsCliError> for CliError {
    fn from(e: BeaconsCliError) -> Self {
        match e {
            BeaconsCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            BeaconsCliError::Engine(e) => CliError {
                code: e.error_code().to_string(),
                message: e.to_string(),
                hint: Some(
                    match e {
                        BeaconError::InvalidLayout { .. } => "Run 'beacons layout <spec>' to check the layout",
                        BeaconError::ParseError { .. } => "Identifiers are 0x-hex, UUIDs or 0..=65535",
                        _ => "Check the engine configuration",
                    }
                    .to_string(),
                ),
            },
            BeaconsCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            BeaconsCliError::Usage(msg) => CliError {
                code: "USAGE_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'beacons --help'".to_string()),
            },
            BeaconsCliError::NoCycles => CliError {
                code: "NO_CYCLES".to_string(),
                message: "No scan cycles found in input".to_string(),
                hint: Some(
                    "Each line should be {\"timestamp\": ..., \"frames\": [...]}".to_string(),
                ),
            },
            BeaconsCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

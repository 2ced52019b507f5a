//! Triage CLI - Command-line interface for Synheart Triage
//!
//! Commands:
//! - run: Replay NDJSON readings through the engine and print alert events
//! - simulate: Emit simulated wearable readings as NDJSON
//! - validate: Check readings against normalization rules
//! - doctor: Diagnose configuration and environment

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use synheart_triage::normalizer::Normalizer;
use synheart_triage::types::{FacilitySummary, TriageEntry};
use synheart_triage::{
    RawReading, ResourceUnit, Scenario, TriageConfig, TriageEngine, TriageError, VitalsSimulator,
    PRODUCER_NAME, TRIAGE_VERSION,
};

/// Triage - Real-time health telemetry and emergency triage engine
#[derive(Parser)]
#[command(name = "triage")]
#[command(author = "Synheart AI Inc")]
#[command(version = TRIAGE_VERSION)]
#[command(about = "Turn wearable telemetry into a ranked emergency board", long_about = None)]
struct Cli {
    /// Policy file (JSON); defaults apply to anything it omits
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay readings through the engine (reading timestamps drive the sweep clock)
    Run {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Resource units to seed the ledger with (JSON array)
        #[arg(long)]
        resources: Option<PathBuf>,

        /// Print the triage board and facility summary after the replay
        #[arg(long)]
        board: bool,

        /// Restrict the board to one facility
        #[arg(long)]
        facility: Option<String>,

        /// Run a final liveness sweep this many seconds after the last reading
        #[arg(long, default_value = "0")]
        tail_secs: i64,

        /// Flush output after each record
        #[arg(long, default_value = "true")]
        flush: bool,
    },

    /// Emit simulated readings as NDJSON
    Simulate {
        /// Scenario (stable, tachycardia, hypoxia, fever, fall, dropout, low_battery)
        #[arg(long, default_value = "stable")]
        scenario: Scenario,

        /// Number of simulated patients
        #[arg(long, default_value = "1")]
        patients: usize,

        /// Samples per patient
        #[arg(long, default_value = "20")]
        ticks: usize,

        /// Seconds between samples
        #[arg(long, default_value = "5")]
        interval_secs: i64,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// First sample time (RFC 3339); defaults to now
        #[arg(long)]
        start: Option<DateTime<Utc>>,
    },

    /// Validate readings against normalization rules
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Check a resources file
        #[arg(long)]
        resources: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();

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

fn run(cli: Cli) -> Result<(), TriageCliError> {
    match cli.command {
        Commands::Run {
            input,
            resources,
            board,
            facility,
            tail_secs,
            flush,
        } => {
            let config = load_config(cli.config.as_deref())?;
            cmd_run(
                config,
                &input,
                resources.as_deref(),
                board,
                facility.as_deref(),
                tail_secs,
                flush,
            )
        }

        Commands::Simulate {
            scenario,
            patients,
            ticks,
            interval_secs,
            seed,
            start,
        } => cmd_simulate(
            scenario,
            patients,
            ticks,
            interval_secs,
            seed,
            start.unwrap_or_else(Utc::now),
        ),

        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::Doctor { resources, json } => {
            cmd_doctor(cli.config.as_deref(), resources.as_deref(), json)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<TriageConfig, TriageCliError> {
    match path {
        Some(path) => Ok(TriageConfig::from_file(path)?),
        None => Ok(TriageConfig::default()),
    }
}

fn load_resources(path: &Path) -> Result<Vec<ResourceUnit>, TriageCliError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn open_input(input: &Path) -> Result<Box<dyn BufRead>, TriageCliError> {
    if input.to_string_lossy() == "-" {
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        Ok(Box::new(BufReader::new(fs::File::open(input)?)))
    }
}

fn cmd_run(
    config: TriageConfig,
    input: &Path,
    resources: Option<&Path>,
    board: bool,
    facility: Option<&str>,
    tail_secs: i64,
    flush: bool,
) -> Result<(), TriageCliError> {
    let mut engine = TriageEngine::with_config(config)?;
    if let Some(path) = resources {
        engine = engine.with_resources(load_resources(path)?)?;
    }

    let mut stdout = io::stdout();
    let mut clock: Option<DateTime<Utc>> = None;
    let mut rejected = 0usize;

    for line in open_input(input)?.lines() {
        let line = line?;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        let raw: RawReading = serde_json::from_str(trimmed).map_err(|e| {
            TriageCliError::ParseError(format!("Failed to parse reading: {}", e))
        })?;

        // Silence of other patients is detected as the replay clock advances
        let mut events = Vec::new();
        if let Some(ts) = raw.timestamp {
            if clock.map_or(true, |c| ts > c) {
                clock = Some(ts);
                events.extend(engine.sweep(ts));
            }
        }

        match engine.submit_reading(&raw) {
            Ok(produced) => events.extend(produced),
            Err(TriageError::Validation(_)) => rejected += 1,
            Err(e) => return Err(e.into()),
        }

        for event in &events {
            writeln!(stdout, "{}", serde_json::to_string(event)?)?;
        }
        if flush && !events.is_empty() {
            stdout.flush()?;
        }
    }

    if let (Some(last), true) = (clock, tail_secs > 0) {
        for event in engine.sweep(last + Duration::seconds(tail_secs)) {
            writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
        }
    }

    if board {
        let report = BoardReport {
            producer: PRODUCER_NAME.to_string(),
            version: TRIAGE_VERSION.to_string(),
            rejected_readings: rejected,
            summary: engine.facility_summary(facility),
            alerts: engine.open_alerts(facility),
        };
        writeln!(stdout, "{}", serde_json::to_string_pretty(&report)?)?;
    }
    stdout.flush()?;

    if rejected > 0 {
        tracing::warn!(rejected, "Some readings were rejected");
    }
    Ok(())
}

fn cmd_simulate(
    scenario: Scenario,
    patients: usize,
    ticks: usize,
    interval_secs: i64,
    seed: u64,
    start: DateTime<Utc>,
) -> Result<(), TriageCliError> {
    if patients == 0 || interval_secs <= 0 {
        return Err(TriageCliError::ParseError(
            "patients and interval must be positive".to_string(),
        ));
    }

    let mut sims: Vec<VitalsSimulator> = (0..patients)
        .map(|i| {
            VitalsSimulator::new(
                format!("sim-{}", i + 1),
                scenario,
                seed.wrapping_add(i as u64),
                start,
            )
            .with_interval(Duration::seconds(interval_secs))
        })
        .collect();

    let mut stdout = io::stdout();
    for _ in 0..ticks {
        for sim in sims.iter_mut() {
            if let Some(reading) = sim.next_reading() {
                writeln!(stdout, "{}", serde_json::to_string(&reading)?)?;
            }
        }
    }
    stdout.flush()?;
    Ok(())
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), TriageCliError> {
    let mut last_accepted: HashMap<String, DateTime<Utc>> = HashMap::new();
    let mut report = ValidationReport::default();

    for (index, line) in open_input(input)?.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        report.total_readings += 1;

        let raw: RawReading = match serde_json::from_str(trimmed) {
            Ok(raw) => raw,
            Err(e) => {
                report.push_error(index, None, format!("invalid JSON: {}", e));
                continue;
            }
        };

        let patient_id = raw.patient_id.as_deref().map(|id| id.trim().to_string());
        let previous = patient_id
            .as_ref()
            .and_then(|id| last_accepted.get(id))
            .copied();

        match Normalizer::normalize(&raw, previous) {
            Ok(reading) => {
                report.valid_readings += 1;
                if reading.suspect {
                    report.suspect_readings += 1;
                }
                last_accepted.insert(reading.patient_id, reading.timestamp);
            }
            Err(e) => report.push_error(index, patient_id, e.to_string()),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total readings:   {}", report.total_readings);
        println!("Valid readings:   {}", report.valid_readings);
        println!("Suspect readings: {}", report.suspect_readings);
        println!("Invalid readings: {}", report.invalid_readings);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Patient {} (line {}): {}",
                    err.patient_id.as_deref().unwrap_or("unknown"),
                    err.line,
                    err.error
                );
            }
        }
    }

    if report.invalid_readings > 0 {
        Err(TriageCliError::ValidationFailed(report.invalid_readings))
    } else {
        Ok(())
    }
}

fn cmd_doctor(
    config: Option<&Path>,
    resources: Option<&Path>,
    json: bool,
) -> Result<(), TriageCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck::new(
        "triage_version",
        CheckStatus::Ok,
        format!("Triage version {}", TRIAGE_VERSION),
    ));

    checks.push(match config {
        Some(path) => match TriageConfig::from_file(path) {
            Ok(cfg) => DoctorCheck::new(
                "config",
                CheckStatus::Ok,
                format!(
                    "Policy valid (window {}, timeout {}s, clear debounce {}s)",
                    cfg.classifier.history_window,
                    cfg.connection.timeout_secs,
                    cfg.alerts.clear_debounce_secs
                ),
            ),
            Err(e) => DoctorCheck::new("config", CheckStatus::Error, e.to_string()),
        },
        None => DoctorCheck::new(
            "config",
            CheckStatus::Warning,
            "No policy file given, using defaults".to_string(),
        ),
    });

    if let Some(path) = resources {
        checks.push(match load_resources(path) {
            Ok(units) if units.is_empty() => DoctorCheck::new(
                "resources",
                CheckStatus::Warning,
                "Resources file lists no units".to_string(),
            ),
            Ok(units) => match TriageEngine::new().with_resources(units) {
                Ok(engine) => DoctorCheck::new(
                    "resources",
                    CheckStatus::Ok,
                    format!("{} resource units", engine.ledger().len()),
                ),
                Err(e) => DoctorCheck::new("resources", CheckStatus::Error, e.to_string()),
            },
            Err(e) => DoctorCheck::new(
                "resources",
                CheckStatus::Error,
                CliError::from(e).message,
            ),
        });
    }

    // Check stdin is available (for replay mode)
    checks.push(if atty::is(atty::Stream::Stdin) {
        DoctorCheck::new(
            "stdin",
            CheckStatus::Ok,
            "stdin is a TTY (interactive mode)".to_string(),
        )
    } else {
        DoctorCheck::new(
            "stdin",
            CheckStatus::Ok,
            "stdin is a pipe (replay mode ready)".to_string(),
        )
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: TRIAGE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Triage Doctor Report");
        println!("====================");
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
        Err(TriageCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum TriageCliError {
    Io(io::Error),
    Engine(TriageError),
    Json(serde_json::Error),
    ValidationFailed(usize),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for TriageCliError {
    fn from(e: io::Error) -> Self {
        TriageCliError::Io(e)
    }
}

impl From<TriageError> for TriageCliError {
    fn from(e: TriageError) -> Self {
        TriageCliError::Engine(e)
    }
}

impl From<serde_json::Error> for TriageCliError {
    fn from(e: serde_json::Error) -> Self {
        TriageCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<TriageCliError> for CliError {
    fn from(e: TriageCliError) -> Self {
        match e {
            TriageCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            TriageCliError::Engine(e) => {
                let hint = match &e {
                    TriageError::Config(_) => "Run 'triage doctor --config <file>' for details",
                    TriageError::Conflict { .. } => "Check resource ids for duplicates",
                    _ => "Check input against the reading format",
                };
                CliError {
                    code: e.code().to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            TriageCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            TriageCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} readings failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            TriageCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            TriageCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct BoardReport {
    producer: String,
    version: String,
    rejected_readings: usize,
    summary: FacilitySummary,
    alerts: Vec<TriageEntry>,
}

#[derive(Default, serde::Serialize)]
struct ValidationReport {
    total_readings: usize,
    valid_readings: usize,
    suspect_readings: usize,
    invalid_readings: usize,
    errors: Vec<ValidationErrorDetail>,
}

impl ValidationReport {
    fn push_error(&mut self, index: usize, patient_id: Option<String>, error: String) {
        self.invalid_readings += 1;
        self.errors.push(ValidationErrorDetail {
            line: index + 1,
            patient_id,
            error,
        });
    }
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    line: usize,
    patient_id: Option<String>,
    error: String,
}

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

impl DoctorCheck {
    fn new(name: &str, status: CheckStatus, message: String) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
        }
    }
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

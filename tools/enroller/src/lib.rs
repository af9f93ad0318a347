pub mod artifacts;
pub mod browser;
pub mod config;
pub mod controller;
pub mod errors;
pub mod log_retention;
pub mod logging;
pub mod records;
pub mod recording;
pub mod report;
pub mod runtime;
pub mod types;
pub mod variant;

use browser::driver::{DriverSessionFactory, DriverSettings};
use browser::scripted::{ScriptedFactory, ScriptedStep};
use browser::SessionFactory;
use clap::{error::ErrorKind, Parser};
use config::{load_config, CliOverrides};
use controller::AttemptController;
use errors::EnrollerError;
use logging::{append_run_log, clear_run_logger, init_run_logger, JsonlLogger};
use records::load_records;
use report::write_reports;
use runtime::ProductionRuntime;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use types::AttemptStatus;

#[derive(Debug, Clone, Parser)]
#[command(name = "enroller")]
#[command(about = "Drives a flaky signup flow to a target number of created accounts")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub records: Option<PathBuf>,
    #[arg(long)]
    pub target: Option<u32>,
    #[arg(long)]
    pub driver: Option<String>,
    #[arg(long = "reports-dir")]
    pub reports_dir: Option<PathBuf>,
    /// Simulate every attempt as an instant success instead of talking
    /// to a driver. Exercises recording, artifacts and reports.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

pub fn run() -> Result<i32, EnrollerError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| EnrollerError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &std::path::Path,
    runtime: &ProductionRuntime,
) -> Result<i32, EnrollerError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(EnrollerError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        records_path: cli.records.clone(),
        target: cli.target,
        driver_program: cli.driver.clone(),
        reports_dir: cli.reports_dir.clone(),
        dry_run: cli.dry_run,
    };

    let fs = runtime.file_system.as_ref();
    let cfg = load_config(&overrides, cwd, fs)?;

    fs.create_dir_all(&cfg.reports.dir)?;
    fs.create_dir_all(&cfg.reports.dir.join("videos"))?;
    fs.create_dir_all(&cfg.reports.dir.join("errors"))?;

    let mut logger = JsonlLogger::new(cfg.reports.dir.join("run-log.jsonl"));
    logger.budget_bytes = cfg.reports.log_budget_bytes;
    init_run_logger(logger);

    let records = load_records(&cfg.records.path, fs)?;
    runtime.terminal.write_line(&format!(
        "loaded {} records from {}",
        records.len(),
        cfg.records.path.display()
    ))?;

    let scripted;
    let driven;
    let factory: &dyn SessionFactory = if cli.dry_run {
        scripted = ScriptedFactory::unlimited(ScriptedStep::outcome(
            AttemptStatus::Success,
            "dry-run simulated success",
        ))
        .with_artifact_fs(Arc::clone(&runtime.file_system));
        &scripted
    } else {
        let program = cfg.driver.program.clone().ok_or_else(|| {
            EnrollerError::InvalidConfig("driver.program is required".to_string())
        })?;
        driven = DriverSessionFactory::new(
            Arc::clone(&runtime.process_runner),
            DriverSettings {
                program,
                args: cfg.driver.args.clone(),
                entry_url: cfg.driver.entry_url.clone(),
            },
        );
        &driven
    };

    let controller = AttemptController::new(
        &cfg,
        factory,
        fs,
        runtime.clock.as_ref(),
        runtime.terminal.as_ref(),
    );
    let state = controller.run(&records);

    write_reports(fs, runtime.clock.as_ref(), &cfg.reports.dir, &state)?;

    let successes = state.success_count();
    let target = cfg.run.target_success as usize;
    runtime.terminal.write_line(&format!(
        "completed run: {successes}/{target} accounts created over {} attempts, {} recordings",
        state.results.len(),
        state.videos.len()
    ))?;

    let exit = if successes < target {
        append_run_log(
            "error",
            "run.shortfall",
            json!({ "successes": successes, "target": target }),
        );
        1
    } else {
        0
    };
    clear_run_logger();
    Ok(exit)
}

use crate::errors::EnrollerError;
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub records_path: Option<PathBuf>,
    pub target: Option<u32>,
    pub driver_program: Option<String>,
    pub reports_dir: Option<PathBuf>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub run: RunConfig,
    pub recording: RecordingConfig,
    pub driver: DriverConfig,
    pub reports: ReportsConfig,
    pub records: RecordsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunConfig {
    /// SUCCESS outcomes required before the run stops.
    pub target_success: u32,
    /// Email variants tried per input record.
    pub per_row_attempts: u32,
    /// Same-variant retries after the executor raises.
    pub attempt_retries_on_exception: u32,
    /// Base for the exponential backoff between exception retries.
    pub base_delay_ms: u64,
    /// Pause after a non-exception failed variant.
    pub pause_between_variants_ms: u64,
    /// Upper bound on synthetic fallback attempts. Exhausting it ends
    /// the run with a reported shortfall instead of looping forever.
    pub max_synthetic_attempts: u64,
    /// Internal retry budget handed to the signup executor.
    pub executor_max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordingConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriverConfig {
    pub program: Option<String>,
    pub args: Vec<String>,
    pub entry_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportsConfig {
    pub dir: PathBuf,
    pub log_budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordsConfig {
    pub path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            run: RunConfig {
                target_success: 10,
                per_row_attempts: 4,
                attempt_retries_on_exception: 2,
                base_delay_ms: 300,
                pause_between_variants_ms: 300,
                max_synthetic_attempts: 50,
                executor_max_attempts: 6,
            },
            recording: RecordingConfig {
                width: 640,
                height: 360,
            },
            driver: DriverConfig {
                program: None,
                args: Vec::new(),
                entry_url: "https://automationexercise.com/login".to_string(),
            },
            reports: ReportsConfig {
                dir: PathBuf::from("reports"),
                log_budget_bytes: 50 * 1024 * 1024,
            },
            records: RecordsConfig {
                path: PathBuf::from("test-data/signup-records.csv"),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    run: Option<PartialRunConfig>,
    recording: Option<PartialRecordingConfig>,
    driver: Option<PartialDriverConfig>,
    reports: Option<PartialReportsConfig>,
    records: Option<PartialRecordsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRunConfig {
    target_success: Option<u32>,
    per_row_attempts: Option<u32>,
    attempt_retries_on_exception: Option<u32>,
    base_delay_ms: Option<u64>,
    pause_between_variants_ms: Option<u64>,
    max_synthetic_attempts: Option<u64>,
    executor_max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRecordingConfig {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialDriverConfig {
    program: Option<String>,
    args: Option<Vec<String>>,
    entry_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialReportsConfig {
    dir: Option<PathBuf>,
    log_budget_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRecordsConfig {
    path: Option<PathBuf>,
}

pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<AppConfig, EnrollerError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path)?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| EnrollerError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    resolve_paths(&mut cfg, process_cwd);
    validate_config(&cfg, overrides.dry_run)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(run) = partial.run {
        if let Some(value) = run.target_success {
            cfg.run.target_success = value;
        }
        if let Some(value) = run.per_row_attempts {
            cfg.run.per_row_attempts = value;
        }
        if let Some(value) = run.attempt_retries_on_exception {
            cfg.run.attempt_retries_on_exception = value;
        }
        if let Some(value) = run.base_delay_ms {
            cfg.run.base_delay_ms = value;
        }
        if let Some(value) = run.pause_between_variants_ms {
            cfg.run.pause_between_variants_ms = value;
        }
        if let Some(value) = run.max_synthetic_attempts {
            cfg.run.max_synthetic_attempts = value;
        }
        if let Some(value) = run.executor_max_attempts {
            cfg.run.executor_max_attempts = value;
        }
    }

    if let Some(recording) = partial.recording {
        if let Some(value) = recording.width {
            cfg.recording.width = value;
        }
        if let Some(value) = recording.height {
            cfg.recording.height = value;
        }
    }

    if let Some(driver) = partial.driver {
        if driver.program.is_some() {
            cfg.driver.program = driver.program;
        }
        if let Some(value) = driver.args {
            cfg.driver.args = value;
        }
        if let Some(value) = driver.entry_url {
            cfg.driver.entry_url = value;
        }
    }

    if let Some(reports) = partial.reports {
        if let Some(value) = reports.dir {
            cfg.reports.dir = value;
        }
        if let Some(value) = reports.log_budget_bytes {
            cfg.reports.log_budget_bytes = value;
        }
    }

    if let Some(records) = partial.records {
        if let Some(value) = records.path {
            cfg.records.path = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(target) = overrides.target {
        cfg.run.target_success = target;
    }
    if let Some(program) = &overrides.driver_program {
        cfg.driver.program = Some(program.clone());
    }
    if let Some(dir) = &overrides.reports_dir {
        cfg.reports.dir = dir.clone();
    }
    if let Some(path) = &overrides.records_path {
        cfg.records.path = path.clone();
    }
}

fn resolve_paths(cfg: &mut AppConfig, process_cwd: &Path) {
    if cfg.reports.dir.is_relative() {
        cfg.reports.dir = process_cwd.join(&cfg.reports.dir);
    }
    if cfg.records.path.is_relative() {
        cfg.records.path = process_cwd.join(&cfg.records.path);
    }
}

fn validate_config(cfg: &AppConfig, dry_run: bool) -> Result<(), EnrollerError> {
    if cfg.run.target_success == 0 {
        return Err(EnrollerError::InvalidConfig(
            "run.target_success must be at least 1".to_string(),
        ));
    }
    if cfg.run.per_row_attempts == 0 {
        return Err(EnrollerError::InvalidConfig(
            "run.per_row_attempts must be at least 1".to_string(),
        ));
    }
    if cfg.run.executor_max_attempts == 0 {
        return Err(EnrollerError::InvalidConfig(
            "run.executor_max_attempts must be at least 1".to_string(),
        ));
    }
    if cfg.recording.width == 0 || cfg.recording.height == 0 {
        return Err(EnrollerError::InvalidConfig(
            "recording resolution must be non-zero".to_string(),
        ));
    }
    if !dry_run && cfg.driver.program.as_deref().unwrap_or("").is_empty() {
        return Err(EnrollerError::InvalidConfig(
            "driver.program is required outside --dry-run".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeFileSystem;

    fn overrides() -> CliOverrides {
        CliOverrides {
            dry_run: true,
            ..CliOverrides::default()
        }
    }

    #[test]
    fn defaults_match_run_contract() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.run.target_success, 10);
        assert_eq!(cfg.run.per_row_attempts, 4);
        assert_eq!(cfg.recording.width, 640);
        assert_eq!(cfg.recording.height, 360);
        assert_eq!(cfg.run.executor_max_attempts, 6);
    }

    #[test]
    fn toml_partial_merges_over_defaults() {
        let fs = FakeFileSystem::with_file(
            "/cfg/enroller.toml",
            "[run]\ntarget_success = 3\nbase_delay_ms = 50\n\n[driver]\nprogram = \"signup-driver\"\n",
        );
        let cli = CliOverrides {
            config_path: Some(PathBuf::from("/cfg/enroller.toml")),
            ..CliOverrides::default()
        };
        let cfg = load_config(&cli, Path::new("/work"), &fs).expect("load");
        assert_eq!(cfg.run.target_success, 3);
        assert_eq!(cfg.run.base_delay_ms, 50);
        assert_eq!(cfg.run.per_row_attempts, 4);
        assert_eq!(cfg.driver.program.as_deref(), Some("signup-driver"));
    }

    #[test]
    fn cli_overrides_beat_file_values() {
        let fs = FakeFileSystem::with_file("/cfg/enroller.toml", "[run]\ntarget_success = 3\n");
        let cli = CliOverrides {
            config_path: Some(PathBuf::from("/cfg/enroller.toml")),
            target: Some(2),
            driver_program: Some("alt-driver".to_string()),
            ..CliOverrides::default()
        };
        let cfg = load_config(&cli, Path::new("/work"), &fs).expect("load");
        assert_eq!(cfg.run.target_success, 2);
        assert_eq!(cfg.driver.program.as_deref(), Some("alt-driver"));
    }

    #[test]
    fn relative_paths_resolve_against_cwd() {
        let fs = FakeFileSystem::default();
        let cfg = load_config(&overrides(), Path::new("/work"), &fs).expect("load");
        assert_eq!(cfg.reports.dir, PathBuf::from("/work/reports"));
        assert_eq!(
            cfg.records.path,
            PathBuf::from("/work/test-data/signup-records.csv")
        );
    }

    #[test]
    fn missing_driver_program_rejected_outside_dry_run() {
        let fs = FakeFileSystem::default();
        let cli = CliOverrides::default();
        let err = load_config(&cli, Path::new("/work"), &fs).expect_err("must fail");
        assert!(matches!(err, EnrollerError::InvalidConfig(_)));
    }

    #[test]
    fn zero_target_rejected() {
        let fs = FakeFileSystem::default();
        let cli = CliOverrides {
            target: Some(0),
            dry_run: true,
            ..CliOverrides::default()
        };
        let err = load_config(&cli, Path::new("/work"), &fs).expect_err("must fail");
        assert!(format!("{err}").contains("target_success"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let fs = FakeFileSystem::with_file("/cfg/enroller.toml", "[run\n");
        let cli = CliOverrides {
            config_path: Some(PathBuf::from("/cfg/enroller.toml")),
            dry_run: true,
            ..CliOverrides::default()
        };
        let err = load_config(&cli, Path::new("/work"), &fs).expect_err("must fail");
        assert!(matches!(err, EnrollerError::ConfigParse(_)));
    }
}

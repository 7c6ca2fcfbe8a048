use anyhow::Result;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::jobs::state_machine::{JobSettings, PollPeriods};

const CONFIG_FILE: &str = "scrape-orchestrator.toml";
const RC_FILE: &str = ".scrape-orchestrator-rc";
const ENV_PREFIX: &str = "SCRAPE_ORCHESTRATOR";

/// Main configuration structure for the scrape orchestrator
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Scrape backend connection
    pub backend: BackendConfig,
    /// Status poll cadence per job kind
    pub polling: PollingConfig,
    /// Session marker storage
    pub markers: MarkerConfig,
    /// Result display settings
    pub display: DisplayConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Base URL of the scrape API, without the `/api/v1` suffix
    pub base_url: String,
    /// Per-request timeout
    pub request_timeout_seconds: u64,
    /// Retries for transient status poll failures
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PollingConfig {
    pub work_order_period_ms: u64,
    pub batch_dispenser_period_ms: u64,
    pub single_dispenser_period_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MarkerConfig {
    /// Directory holding `markers.json`
    pub directory: PathBuf,
    /// Markers older than this are abandoned sessions
    pub max_age_minutes: i64,
    /// When false, markers are never stored and resume is disabled
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DisplayConfig {
    /// How long a final result is shown before reverting to idle
    pub hold_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level, overridden by RUST_LOG when set
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    pub json: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                base_url: "http://localhost:8000".to_string(),
                request_timeout_seconds: 30,
                max_retries: 3,
            },
            polling: PollingConfig {
                work_order_period_ms: 2000,
                batch_dispenser_period_ms: 2000,
                single_dispenser_period_ms: 1000,
            },
            markers: MarkerConfig {
                directory: PathBuf::from(".scrape-orchestrator/markers"),
                max_age_minutes: 10,
                enabled: true,
            },
            display: DisplayConfig { hold_seconds: 5 },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json: false,
            },
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (scrape-orchestrator.toml, .scrape-orchestrator-rc)
    /// 3. Environment variables (prefixed with SCRAPE_ORCHESTRATOR_)
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like `load`, with an explicit file taking the place of
    /// scrape-orchestrator.toml
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        match path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Configuration file not found: {}", path.display());
                }
                builder = builder.add_source(File::from(path).format(FileFormat::Toml));
            }
            None => {
                if Path::new(CONFIG_FILE).exists() {
                    builder = builder.add_source(File::new(CONFIG_FILE, FileFormat::Toml));
                }
                if Path::new(RC_FILE).exists() {
                    builder = builder.add_source(File::new(RC_FILE, FileFormat::Toml));
                }
            }
        }

        // Override with environment variables, e.g. SCRAPE_ORCHESTRATOR_BACKEND__BASE_URL
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: OrchestratorConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            anyhow::bail!("backend.base_url must not be empty");
        }
        let periods = [
            self.polling.work_order_period_ms,
            self.polling.batch_dispenser_period_ms,
            self.polling.single_dispenser_period_ms,
        ];
        if periods.contains(&0) {
            anyhow::bail!("polling periods must be greater than zero");
        }
        if self.markers.max_age_minutes <= 0 {
            anyhow::bail!("markers.max_age_minutes must be positive");
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            poll_periods: PollPeriods {
                work_orders: Duration::from_millis(self.polling.work_order_period_ms),
                batch_dispensers: Duration::from_millis(self.polling.batch_dispenser_period_ms),
                single_dispenser: Duration::from_millis(self.polling.single_dispenser_period_ms),
            },
            display_hold: Duration::from_secs(self.display.hold_seconds),
        }
    }

    pub fn marker_max_age(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.markers.max_age_minutes)
    }
}

//! Configuration loader and validator for the payroll sync service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub server: Server,
    pub sheets: Sheets,
    pub mail: Mail,
    pub sms: Sms,
    pub audit: Audit,
    pub storage: Storage,
    pub bulk: Bulk,
    pub process: Process,
}

/// WebSocket server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Server {
    pub bind_addr: String,
    pub allowed_origins: Vec<String>,
    pub jwt_secret: String,
    /// When true, a missing or invalid token at upgrade time is replaced
    /// with a synthetic superadmin identity. Never enable outside local
    /// development.
    #[serde(default)]
    pub allow_unauthenticated_dev_identity: bool,
}

/// Spreadsheet API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sheets {
    pub base_url: String,
    pub token: String,
}

/// Outbound mail API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Mail {
    pub base_url: String,
    pub token: String,
    /// Public site URL embedded in welcome/reset/payslip links.
    pub domain: String,
}

/// SMS gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sms {
    pub base_url: String,
    pub token: String,
}

/// Audit log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Audit {
    pub log_dir: String,
    pub max_file_bytes: u64,
    pub max_rotated_files: usize,
}

/// Local persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Storage {
    pub data_dir: String,
}

/// Pacing knobs for bulk sends and spreadsheet ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bulk {
    /// Emails sent before inserting the anti-spam pause.
    pub batch_size: usize,
    /// Anti-spam pause length in seconds.
    pub batch_wait_seconds: u64,
    /// Delay between processed spreadsheet rows, in milliseconds.
    pub inter_row_delay_ms: u64,
    /// Delay between bulk items, in milliseconds.
    pub inter_item_delay_ms: u64,
}

/// Background process registry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Process {
    /// How long finished jobs stay visible in history, in seconds.
    pub retention_seconds: u64,
    /// How often the registry sweeps out expired jobs, in seconds.
    pub sweep_interval_seconds: u64,
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.server.bind_addr.trim().is_empty() {
        return Err(ConfigError::Invalid("server.bind_addr must be non-empty"));
    }
    if cfg.server.allowed_origins.is_empty() {
        return Err(ConfigError::Invalid(
            "server.allowed_origins must list at least one origin",
        ));
    }
    if cfg.server.jwt_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("server.jwt_secret must be non-empty"));
    }

    if cfg.sheets.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("sheets.base_url must be non-empty"));
    }
    if cfg.mail.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("mail.base_url must be non-empty"));
    }
    if cfg.mail.domain.trim().is_empty() {
        return Err(ConfigError::Invalid("mail.domain must be non-empty"));
    }
    if cfg.sms.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("sms.base_url must be non-empty"));
    }

    if cfg.audit.log_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("audit.log_dir must be non-empty"));
    }
    if cfg.audit.max_file_bytes == 0 {
        return Err(ConfigError::Invalid("audit.max_file_bytes must be > 0"));
    }
    if cfg.audit.max_rotated_files == 0 {
        return Err(ConfigError::Invalid("audit.max_rotated_files must be > 0"));
    }

    if cfg.storage.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.data_dir must be non-empty"));
    }

    if cfg.bulk.batch_size == 0 {
        return Err(ConfigError::Invalid("bulk.batch_size must be > 0"));
    }

    if cfg.process.retention_seconds == 0 {
        return Err(ConfigError::Invalid("process.retention_seconds must be > 0"));
    }
    if cfg.process.sweep_interval_seconds == 0 {
        return Err(ConfigError::Invalid(
            "process.sweep_interval_seconds must be > 0",
        ));
    }

    Ok(())
}

/// Example YAML configuration kept in sync with the schema above.
pub fn example() -> &'static str {
    r#"server:
  bind_addr: "0.0.0.0:8081"
  allowed_origins:
    - "https://cms.example.com.gt"
    - "http://localhost:3000"
  jwt_secret: "CHANGE_ME"
  allow_unauthenticated_dev_identity: false

sheets:
  base_url: "https://sheets.googleapis.com"
  token: "YOUR_SHEETS_API_TOKEN"

mail:
  base_url: "https://mail.example.com.gt"
  token: "YOUR_MAIL_API_TOKEN"
  domain: "https://cms.example.com.gt"

sms:
  base_url: "https://sms.example.com.gt"
  token: "YOUR_SMS_API_TOKEN"

audit:
  log_dir: "logs"
  max_file_bytes: 10485760
  max_rotated_files: 10

storage:
  data_dir: "data"

bulk:
  batch_size: 5
  batch_wait_seconds: 300
  inter_row_delay_ms: 100
  inter_item_delay_ms: 500

process:
  retention_seconds: 3600
  sweep_interval_seconds: 300
"#
}

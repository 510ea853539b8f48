use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration, loaded from a TOML file with environment
/// variable overrides layered on top (§6). `SettingsManager` (see
/// [`crate::settings`]) owns loading/saving/validating; this struct is pure
/// data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub mapping_store: MappingStoreConfig,
    #[serde(default)]
    pub clients: ClientsConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            sync: SyncConfig::default(),
            mapping_store: MappingStoreConfig::default(),
            clients: ClientsConfig::default(),
            workflow: WorkflowConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `~/.triad-sync/config.toml`, falling back to
    /// defaults when the file does not exist, then apply environment
    /// overrides (§6's named options take precedence over the file).
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        let mut cfg = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?
        } else {
            Config::default()
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let mut cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".triad-sync").join("config.toml")
    }

    /// Overlay the §6 environment variables on top of whatever the TOML file
    /// set. Unset variables leave the existing value untouched.
    pub fn apply_env_overrides(&mut self) {
        use std::env;

        if let Ok(v) = env::var("SYNC_INTERVAL_MS") {
            if let Ok(n) = v.parse() {
                self.sync.sync_interval_ms = n;
            }
        }
        if let Ok(v) = env::var("API_DELAY_MS") {
            if let Ok(n) = v.parse() {
                self.sync.api_delay_ms = n;
            }
        }
        if let Ok(v) = env::var("DRY_RUN") {
            self.sync.dry_run = parse_bool(&v);
        }
        if let Ok(v) = env::var("DB_PATH") {
            self.mapping_store.db_path = v;
        }
        if let Ok(v) = env::var("H_API_URL") {
            self.clients.h_api_url = v;
        }
        if let Ok(v) = env::var("V_API_URL") {
            self.clients.v_api_url = Some(v);
        }
        if let Ok(v) = env::var("WORKFLOW_TASK_QUEUE") {
            self.workflow.task_queue = v;
        }
        if let Ok(v) = env::var("WORKFLOW_ADDRESS") {
            self.workflow.address = v;
        }
        if let Ok(v) = env::var("RECONCILIATION_ACTION") {
            if let Some(action) = ReconciliationAction::parse(&v) {
                self.reconciliation.action = action;
            }
        }
        if let Ok(v) = env::var("RECONCILIATION_DRY_RUN") {
            self.reconciliation.dry_run = parse_bool(&v);
        }
        if let Ok(v) = env::var("DEDUPE_CACHE_TTL_MS") {
            if let Ok(n) = v.parse() {
                self.sync.dedupe_cache_ttl_ms = n;
            }
        }
        if let Ok(v) = env::var("MAX_WORKERS") {
            if let Ok(n) = v.parse() {
                self.sync.max_workers = n;
            }
        }
        if let Ok(v) = env::var("BATCH_SIZE") {
            if let Ok(n) = v.parse() {
                self.sync.batch_size = n;
            }
        }
        if let Ok(v) = env::var("ADMIN_BIND_ADDR") {
            self.admin.bind_addr = v;
        }
    }

    /// Reject configurations the rest of the service can't safely run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.max_workers == 0 {
            return Err(ConfigError::Validation("sync.max_workers must be >= 1".into()));
        }
        if self.sync.batch_size == 0 {
            return Err(ConfigError::Validation("sync.batch_size must be >= 1".into()));
        }
        if self.clients.h_api_url.is_empty() {
            return Err(ConfigError::Validation("clients.h_api_url must not be empty".into()));
        }
        Ok(())
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_project_name() -> String {
    "triad-sync".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

/// §4.5/§4.4/§4.6/§5 tunables: the controller's debounce/timeout/worker caps
/// and the event sources' tick interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    #[serde(default = "default_api_delay_ms")]
    pub api_delay_ms: u64,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_dedupe_ttl_ms")]
    pub dedupe_cache_ttl_ms: u64,
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_burst_threshold")]
    pub burst_threshold: u32,
    #[serde(default = "default_burst_window_ms")]
    pub burst_window_ms: u64,
    #[serde(default = "default_burst_idle_ms")]
    pub burst_idle_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: default_sync_interval_ms(),
            api_delay_ms: default_api_delay_ms(),
            dry_run: false,
            dedupe_cache_ttl_ms: default_dedupe_ttl_ms(),
            max_workers: default_max_workers(),
            batch_size: default_batch_size(),
            debounce_ms: default_debounce_ms(),
            burst_threshold: default_burst_threshold(),
            burst_window_ms: default_burst_window_ms(),
            burst_idle_ms: default_burst_idle_ms(),
        }
    }
}

fn default_sync_interval_ms() -> u64 {
    30_000
}
fn default_api_delay_ms() -> u64 {
    10
}
fn default_dedupe_ttl_ms() -> u64 {
    15_000
}
fn default_max_workers() -> u32 {
    8
}
fn default_batch_size() -> u32 {
    25
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_burst_threshold() -> u32 {
    20
}
fn default_burst_window_ms() -> u64 {
    2_000
}
fn default_burst_idle_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingStoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for MappingStoreConfig {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}

fn default_db_path() -> String {
    "~/.triad-sync/mapping.db".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientsConfig {
    #[serde(default = "default_h_api_url")]
    pub h_api_url: String,
    #[serde(default)]
    pub v_api_url: Option<String>,
    #[serde(default = "default_h_token_env")]
    pub h_api_token_env: String,
    #[serde(default = "default_v_token_env")]
    pub v_api_token_env: String,
}

impl Default for ClientsConfig {
    fn default() -> Self {
        Self {
            h_api_url: default_h_api_url(),
            v_api_url: None,
            h_api_token_env: default_h_token_env(),
            v_api_token_env: default_v_token_env(),
        }
    }
}

fn default_h_api_url() -> String {
    "http://localhost:3000/api".into()
}
fn default_h_token_env() -> String {
    "H_API_TOKEN".into()
}
fn default_v_token_env() -> String {
    "V_API_TOKEN".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_task_queue")]
    pub task_queue: String,
    #[serde(default = "default_workflow_address")]
    pub address: String,
    #[serde(default = "default_max_concurrent_orchestrations")]
    pub max_concurrent_orchestrations: u32,
    #[serde(default = "default_max_concurrent_activities")]
    pub max_concurrent_activities: u32,
    #[serde(default = "default_activity_retries")]
    pub activity_max_retries: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            task_queue: default_task_queue(),
            address: default_workflow_address(),
            max_concurrent_orchestrations: default_max_concurrent_orchestrations(),
            max_concurrent_activities: default_max_concurrent_activities(),
            activity_max_retries: default_activity_retries(),
        }
    }
}

fn default_task_queue() -> String {
    "triad-sync".into()
}
fn default_workflow_address() -> String {
    "127.0.0.1:0".into()
}
fn default_max_concurrent_orchestrations() -> u32 {
    8
}
fn default_max_concurrent_activities() -> u32 {
    20
}
fn default_activity_retries() -> u32 {
    5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationAction {
    MarkDeleted,
    HardDelete,
}

impl ReconciliationAction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "mark_deleted" => Some(ReconciliationAction::MarkDeleted),
            "hard_delete" => Some(ReconciliationAction::HardDelete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    #[serde(default = "default_reconciliation_action")]
    pub action: ReconciliationAction,
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self { action: default_reconciliation_action(), dry_run: false }
    }
}

fn default_reconciliation_action() -> ReconciliationAction {
    ReconciliationAction::MarkDeleted
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_bind_addr")]
    pub bind_addr: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self { bind_addr: default_admin_bind_addr() }
    }
}

fn default_admin_bind_addr() -> String {
    "127.0.0.1:8787".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.sync.sync_interval_ms, 30_000);
        assert_eq!(cfg.sync.api_delay_ms, 10);
        assert_eq!(cfg.sync.dedupe_cache_ttl_ms, 15_000);
        assert_eq!(cfg.sync.batch_size, 25);
        assert_eq!(cfg.workflow.max_concurrent_orchestrations, 8);
        assert_eq!(cfg.workflow.max_concurrent_activities, 20);
        assert_eq!(cfg.reconciliation.action, ReconciliationAction::MarkDeleted);
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut cfg = Config::default();
        cfg.sync.max_workers = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_h_api_url() {
        let mut cfg = Config::default();
        cfg.clients.h_api_url = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_override_applies_dry_run() {
        std::env::set_var("DRY_RUN", "true");
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        assert!(cfg.sync.dry_run);
        std::env::remove_var("DRY_RUN");
    }

    #[test]
    fn env_override_applies_reconciliation_action() {
        std::env::set_var("RECONCILIATION_ACTION", "hard_delete");
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.reconciliation.action, ReconciliationAction::HardDelete);
        std::env::remove_var("RECONCILIATION_ACTION");
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = Config::default();
        let text = cfg.to_toml().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.sync.batch_size, cfg.sync.batch_size);
    }
}

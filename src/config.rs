//! Configuration system for the refresh worker
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (REFRESH_WORKER_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Environment variable prefix for all overrides
pub const ENV_PREFIX: &str = "REFRESH_WORKER_";

/// Main worker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Retry/run limits and queue selection
    pub robot: RobotSettings,

    /// External application invocation
    pub application: ApplicationSettings,

    /// Download polling
    pub fetch: FetchSettings,

    /// Remote document store
    pub remote: RemoteSettings,

    /// Monthly archive publishing
    pub archive: ArchiveSettings,

    /// Queue persistence and upstream seeding
    pub queue: QueueSettings,

    /// Local working storage
    pub storage: StorageSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Run-level limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotSettings {
    /// Logical queue the worker consumes
    pub queue_name: String,

    /// Outer retry ceiling (MAX_RETRY_COUNT)
    pub max_retry_count: u32,

    /// Run-wide task ceiling (MAX_TASK_COUNT)
    pub max_task_count: u32,

    /// Exit non-zero when every retry attempt failed
    pub fail_robot_on_too_many_errors: bool,
}

/// External application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Executable to launch for each refresh
    pub program: String,

    /// Arguments; `{artifact}`, `{artifact_url}` and `{artifact_dir}` are substituted
    pub args: Vec<String>,

    /// Process names killed during cleanup (every instance on the host)
    pub process_names: Vec<String>,

    /// Hard wall-clock bound for one refresh, in seconds
    pub timeout_secs: u64,

    /// Show the application window
    pub show_ui: bool,

    /// Suppress interactive alerts and dialogs
    pub suppress_alerts: bool,

    /// Extra arguments appended when `show_ui` is false
    pub headless_args: Vec<String>,

    /// Extra arguments appended when `suppress_alerts` is true
    pub quiet_args: Vec<String>,

    /// Pause after force-terminating the application, in milliseconds
    pub kill_settle_ms: u64,
}

/// Download polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// How long to wait for a downloaded file to appear locally
    pub wait_secs: u64,

    /// Interval between existence checks
    pub poll_interval_ms: u64,
}

/// Which remote store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    /// SharePoint REST API
    Sharepoint,
    /// A local directory tree standing in for remote sites
    Local,
}

/// Remote store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub kind: RemoteKind,

    /// Root directory for the local store (one subdirectory per site)
    pub local_root: String,

    /// App registration credential: username = tenant, password = client id
    pub credential: String,

    /// Signing certificate credential: username = SHA-1 thumbprint, password = PEM key path
    pub certificate_credential: String,

    /// OAuth authority issuing app-only tokens
    pub authority: String,

    /// Site used for legacy queue references that carry no site
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_site: Option<String>,

    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
}

/// Monthly archive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Document library holding the archive folder
    pub library: String,

    /// Archive folder inside the library
    pub folder: String,

    /// Filename prefix of archived copies
    pub file_prefix: String,

    /// Language of month folder names: "da" or "en"
    pub month_locale: String,
}

/// Queue persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// SQLite database file
    pub database: String,

    /// Upstream table seeding the queue
    pub upstream_table: String,

    /// Minimum age of an upstream row's timestamp before it is seeded again
    pub seed_interval_hours: u32,
}

/// Storage path settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory receiving local artifacts; wiped on every reset
    pub work_dir: String,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for RobotSettings {
    fn default() -> Self {
        Self {
            queue_name: "ExcelRefresher".to_string(),
            max_retry_count: 3,
            max_task_count: 100,
            fail_robot_on_too_many_errors: true,
        }
    }
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            program: "soffice".to_string(),
            args: vec![
                "--norestore".to_string(),
                "macro:///Standard.Refresh.RefreshAndSave(\"{artifact_url}\")".to_string(),
            ],
            process_names: vec!["soffice.bin".to_string(), "soffice".to_string()],
            timeout_secs: 3600,
            show_ui: false,
            suppress_alerts: true,
            headless_args: vec!["--headless".to_string(), "--invisible".to_string()],
            quiet_args: vec!["--nologo".to_string(), "--nodefault".to_string()],
            kill_settle_ms: 2000,
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            wait_secs: 60,
            poll_interval_ms: 1000,
        }
    }
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            kind: RemoteKind::Sharepoint,
            local_root: "~/.refresh-worker/remote".to_string(),
            credential: "SharePointAPI".to_string(),
            certificate_credential: "SharePointCert".to_string(),
            authority: "https://login.microsoftonline.com".to_string(),
            default_site: None,
            request_timeout_secs: 120,
        }
    }
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            library: "Dokumenter".to_string(),
            folder: "Historik".to_string(),
            file_prefix: "DKPlan".to_string(),
            month_locale: "da".to_string(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            database: "~/.refresh-worker/queue.db".to_string(),
            upstream_table: "QueueExcelRefresher".to_string(),
            seed_interval_hours: 24,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            work_dir: "~/.refresh-worker/work".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl ApplicationSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn kill_settle(&self) -> Duration {
        Duration::from_millis(self.kill_settle_ms)
    }
}

impl FetchSettings {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl WorkerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|e| Error::IoRead {
                path: path.clone(),
                source: e,
            })?;
            config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
                message: format!("{}: {}", path.display(), e.message()),
                source: Some(e),
            })?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::config_not_found(path));
        }

        let search_paths = [
            PathBuf::from("refresh-worker.toml"),
            dirs::config_dir()
                .map(|p| p.join("refresh-worker").join("worker.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".refresh-worker").join("worker.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/refresh-worker/worker.toml"),
        ];

        for path in &search_paths {
            if path.is_file() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Robot settings
        if let Some(val) = env_var("QUEUE_NAME") {
            self.robot.queue_name = val;
        }
        if let Some(n) = env_parse("MAX_RETRY_COUNT") {
            self.robot.max_retry_count = n;
        }
        if let Some(n) = env_parse("MAX_TASK_COUNT") {
            self.robot.max_task_count = n;
        }
        if let Some(val) = env_var("FAIL_ROBOT_ON_TOO_MANY_ERRORS") {
            self.robot.fail_robot_on_too_many_errors = parse_bool(&val);
        }

        // Application settings
        if let Some(val) = env_var("APP_PROGRAM") {
            self.application.program = val;
        }
        if let Some(n) = env_parse("APP_TIMEOUT_SECS") {
            self.application.timeout_secs = n;
        }
        if let Some(val) = env_var("APP_SHOW_UI") {
            self.application.show_ui = parse_bool(&val);
        }

        // Fetch settings
        if let Some(n) = env_parse("FETCH_WAIT_SECS") {
            self.fetch.wait_secs = n;
        }

        // Remote settings
        if let Some(val) = env_var("REMOTE_KIND") {
            match val.to_lowercase().as_str() {
                "local" => self.remote.kind = RemoteKind::Local,
                "sharepoint" => self.remote.kind = RemoteKind::Sharepoint,
                other => debug!(value = other, "Ignoring unknown remote kind override"),
            }
        }
        if let Some(val) = env_var("REMOTE_LOCAL_ROOT") {
            self.remote.local_root = val;
        }
        if let Some(val) = env_var("REMOTE_AUTHORITY") {
            self.remote.authority = val;
        }
        if let Some(val) = env_var("DEFAULT_SITE") {
            self.remote.default_site = Some(val);
        }

        // Queue and storage
        if let Some(val) = env_var("QUEUE_DATABASE") {
            self.queue.database = val;
        }
        if let Some(val) = env_var("WORK_DIR") {
            self.storage.work_dir = val;
        }

        // Logging settings
        if let Some(val) = env_var("LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = env_var("LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Some(val) = env_var("LOG_JSON") {
            self.logging.json_format = parse_bool(&val);
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.remote.local_root = expand_path(&self.remote.local_root);
        self.queue.database = expand_path(&self.queue.database);
        self.storage.work_dir = expand_path(&self.storage.work_dir);

        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.robot.queue_name.trim().is_empty() {
            return Err(Error::config_field_invalid("robot.queue_name", "Queue name cannot be empty"));
        }
        if self.robot.max_retry_count == 0 {
            return Err(Error::config_field_invalid(
                "robot.max_retry_count",
                "max_retry_count must be at least 1",
            ));
        }
        if self.robot.max_task_count == 0 {
            return Err(Error::config_field_invalid(
                "robot.max_task_count",
                "max_task_count must be at least 1",
            ));
        }

        if self.application.program.trim().is_empty() {
            return Err(Error::config_field_invalid("application.program", "Program cannot be empty"));
        }
        if self.application.process_names.iter().all(|n| n.trim().is_empty()) {
            return Err(Error::config_field_invalid(
                "application.process_names",
                "At least one process name is required for cleanup",
            ));
        }
        if self.application.timeout_secs == 0 {
            return Err(Error::config_field_invalid(
                "application.timeout_secs",
                "timeout_secs must be positive",
            ));
        }
        if self.fetch.poll_interval_ms == 0 {
            return Err(Error::config_field_invalid(
                "fetch.poll_interval_ms",
                "poll_interval_ms must be positive",
            ));
        }

        if !is_sql_identifier(&self.queue.upstream_table) {
            return Err(Error::config_field_invalid(
                "queue.upstream_table",
                format!(
                    "'{}' is not a plain table name (letters, digits and underscores only)",
                    self.queue.upstream_table
                ),
            ));
        }

        if self.remote.kind == RemoteKind::Sharepoint {
            let authority = url::Url::parse(&self.remote.authority).map_err(|e| {
                Error::config_field_invalid(
                    "remote.authority",
                    format!("'{}' is not a URL: {}", self.remote.authority, e),
                )
            })?;
            if !matches!(authority.scheme(), "https" | "http") {
                return Err(Error::config_field_invalid(
                    "remote.authority",
                    "authority must be an http(s) URL",
                ));
            }
        }

        self.validate_work_dir()?;

        let valid_locales = ["da", "en"];
        if !valid_locales.contains(&self.archive.month_locale.as_str()) {
            return Err(Error::config_field_invalid(
                "archive.month_locale",
                format!(
                    "Invalid month locale '{}'. Must be one of: {}",
                    self.archive.month_locale,
                    valid_locales.join(", ")
                ),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_validation(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    /// Reset empties the work directory, so nothing else may live inside it
    fn validate_work_dir(&self) -> Result<()> {
        let work_dir = self.work_dir();
        if work_dir.as_os_str().is_empty() {
            return Err(Error::config_field_invalid("storage.work_dir", "work_dir cannot be empty"));
        }

        let mut kept = vec![("queue.database", PathBuf::from(&self.queue.database))];
        if self.remote.kind == RemoteKind::Local {
            kept.push(("remote.local_root", PathBuf::from(&self.remote.local_root)));
        }
        if let Some(ref file) = self.logging.file {
            kept.push(("logging.file", PathBuf::from(file)));
        }

        for (field, path) in kept {
            if path.starts_with(&work_dir) {
                return Err(Error::config_field_invalid(
                    field,
                    format!(
                        "{} lies inside storage.work_dir ({}), which is wiped on every reset",
                        path.display(),
                        work_dir.display()
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn work_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.work_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.queue.database)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, name)).ok()
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.trim().parse().ok())
}

fn parse_bool(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or(std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path.map(|p| PathBuf::from(expand_path(p))).unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".refresh-worker")
            .join("worker.toml")
    });

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir(parent)?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| Error::IoWrite {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# refresh-worker configuration

[robot]
# Queue consumed by this worker
queue_name = "ExcelRefresher"

# Full reset-and-retry passes before the run gives up
max_retry_count = 3

# Upper bound on tasks processed in one run, across all retries
max_task_count = 100

# Exit with an error when every retry attempt failed
fail_robot_on_too_many_errors = true

[application]
# Application that opens, refreshes, saves and closes the artifact
program = "soffice"
args = ["--norestore", "macro:///Standard.Refresh.RefreshAndSave(\"{artifact_url}\")"]

# Every process with one of these names is killed when a task fails
process_names = ["soffice.bin", "soffice"]

# Hard bound for one refresh (seconds)
timeout_secs = 3600

show_ui = false
suppress_alerts = true
headless_args = ["--headless", "--invisible"]
quiet_args = ["--nologo", "--nodefault"]

# Pause after killing the application (milliseconds)
kill_settle_ms = 2000

[fetch]
wait_secs = 60
poll_interval_ms = 1000

[remote]
# "sharepoint" or "local"
kind = "sharepoint"
local_root = "~/.refresh-worker/remote"
# Credential holding the tenant (username) and client id (password)
credential = "SharePointAPI"
# Credential holding the certificate thumbprint (username) and PEM key path (password)
certificate_credential = "SharePointCert"
authority = "https://login.microsoftonline.com"
# default_site = "https://example.sharepoint.com/Teams/team-site"
request_timeout_secs = 120

[archive]
library = "Dokumenter"
folder = "Historik"
file_prefix = "DKPlan"
month_locale = "da"

[queue]
database = "~/.refresh-worker/queue.db"
upstream_table = "QueueExcelRefresher"
seed_interval_hours = 24

[storage]
# Wiped on every reset; do not share with anything else
work_dir = "~/.refresh-worker/work"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.refresh-worker/logs/worker.log"

max_file_size_mb = 100
max_files = 5
json_format = false
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.robot.queue_name, "ExcelRefresher");
        assert_eq!(config.robot.max_retry_count, 3);
        assert_eq!(config.application.timeout_secs, 3600);
        assert_eq!(config.fetch.wait_secs, 60);
        assert_eq!(config.archive.folder, "Historik");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_override() {
        env::set_var("REFRESH_WORKER_MAX_RETRY_COUNT", "7");
        env::set_var("REFRESH_WORKER_MAX_TASK_COUNT", "12");
        env::set_var("REFRESH_WORKER_FAIL_ROBOT_ON_TOO_MANY_ERRORS", "false");

        let mut config = WorkerConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.robot.max_retry_count, 7);
        assert_eq!(config.robot.max_task_count, 12);
        assert!(!config.robot.fail_robot_on_too_many_errors);

        env::remove_var("REFRESH_WORKER_MAX_RETRY_COUNT");
        env::remove_var("REFRESH_WORKER_MAX_TASK_COUNT");
        env::remove_var("REFRESH_WORKER_FAIL_ROBOT_ON_TOO_MANY_ERRORS");
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(WorkerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_zero_retries() {
        let mut config = WorkerConfig::default();
        config.robot.max_retry_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_timeout() {
        let mut config = WorkerConfig::default();
        config.application.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_table_injection() {
        let mut config = WorkerConfig::default();
        config.queue.upstream_table = "Queue; DROP TABLE x".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_unknown_locale() {
        let mut config = WorkerConfig::default();
        config.archive.month_locale = "fr".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = WorkerConfig::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_paths_inside_work_dir() {
        let mut config = WorkerConfig::default();
        config.storage.work_dir = "/srv/refresh/work".to_string();
        config.queue.database = "/srv/refresh/work/queue.db".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("queue.database"), "{}", err);

        config.queue.database = "/srv/refresh/queue.db".to_string();
        config.logging.file = Some("/srv/refresh/work/logs/worker.log".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("logging.file"), "{}", err);

        config.logging.file = None;
        config.remote.kind = RemoteKind::Local;
        config.remote.local_root = "/srv/refresh/work".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("remote.local_root"), "{}", err);
    }

    #[test]
    fn test_validation_allows_sibling_of_work_dir() {
        let mut config = WorkerConfig::default();
        config.storage.work_dir = "/srv/refresh/work".to_string();
        config.queue.database = "/srv/refresh/work-queue.db".to_string();
        config.remote.kind = RemoteKind::Local;
        config.remote.local_root = "/srv/refresh/remote".to_string();
        config.logging.file = Some("/srv/refresh/logs/worker.log".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_authority() {
        let mut config = WorkerConfig::default();
        config.remote.authority = "login.microsoftonline.com".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("remote.authority"), "{}", err);

        // Only the SharePoint store talks to the authority
        config.remote.kind = RemoteKind::Local;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_path_expansion() {
        let mut config = WorkerConfig::default();
        config.storage.work_dir = "~/test/work".to_string();
        config.expand_paths();
        assert!(!config.storage.work_dir.contains('~'));
    }

    #[test]
    fn test_default_config_template_parses() {
        let parsed: WorkerConfig = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(parsed.robot.queue_name, "ExcelRefresher");
        assert_eq!(parsed.application.process_names, vec!["soffice.bin", "soffice"]);
        assert_eq!(parsed.remote.kind, RemoteKind::Sharepoint);
        assert_eq!(parsed.remote.certificate_credential, "SharePointCert");
        assert_eq!(parsed.remote.authority, "https://login.microsoftonline.com");
    }

    #[test]
    fn test_parse_config_file() {
        let config_str = r#"
[robot]
queue_name = "Nightly"
max_retry_count = 2
fail_robot_on_too_many_errors = false

[application]
program = "/opt/refresher/bin/refresh"
process_names = ["refresh"]
timeout_secs = 1800

[remote]
kind = "local"
local_root = "/srv/sites"
"#;

        let config: WorkerConfig = toml::from_str(config_str).unwrap();

        assert_eq!(config.robot.queue_name, "Nightly");
        assert_eq!(config.robot.max_retry_count, 2);
        assert_eq!(config.robot.max_task_count, 100);
        assert!(!config.robot.fail_robot_on_too_many_errors);
        assert_eq!(config.application.timeout(), Duration::from_secs(1800));
        assert_eq!(config.remote.kind, RemoteKind::Local);
        assert_eq!(config.remote.local_root, "/srv/sites");
    }
}

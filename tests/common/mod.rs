//! Common test utilities and fixtures
//!
//! Every test gets its own temporary tree: queue database, work directory,
//! a local "remote" root with one site, and a worker.toml pointing at them.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

/// Site URL served by the local remote store from `<remote>/planning`
pub const SITE: &str = "https://contoso.sharepoint.com/Teams/planning";

/// Remote path of the document used by the end-to-end tests
pub const DOCUMENT: &str = "Dokumenter/Plan/DKPlan.xlsx";

/// Get a command for the refresh-worker binary with a clean environment
pub fn worker_cmd() -> Command {
    let mut cmd = Command::cargo_bin("refresh-worker").unwrap();
    for (key, _) in std::env::vars() {
        if key.starts_with("REFRESH_WORKER_") {
            cmd.env_remove(key);
        }
    }
    cmd.env_remove("RUST_LOG");
    cmd
}

pub struct TestEnvironment {
    pub root: TempDir,
    pub config_path: PathBuf,
    pub database: PathBuf,
    pub work_dir: PathBuf,
    pub remote_root: PathBuf,
    pub process_name: String,
}

/// Behaviour of the fake external application
pub enum App {
    /// Appends a line to the artifact and exits 0
    Refresh,
    /// Never finishes
    Hang,
    /// Exits 3 with a message on stderr
    Crash,
}

impl TestEnvironment {
    pub fn new(app: App) -> Self {
        Self::with_robot(app, 2, 10, true)
    }

    pub fn with_robot(app: App, max_retry_count: u32, max_task_count: u32, fail_on_errors: bool) -> Self {
        let root = TempDir::new().expect("Failed to create temp directory");
        let root_path = root.path();

        let database = root_path.join("queue.db");
        let work_dir = root_path.join("work");
        let remote_root = root_path.join("remote");
        let config_path = root_path.join("worker.toml");

        // Unique per test so the reaper never touches another test's processes
        let process_name = format!("rwk-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let program = root_path.join(&process_name);
        write_app(&program, app);

        fs::create_dir_all(remote_root.join("planning").join("Dokumenter").join("Plan"))
            .expect("Failed to create remote site");

        let config = format!(
            r#"
[robot]
queue_name = "ExcelRefresher"
max_retry_count = {max_retry_count}
max_task_count = {max_task_count}
fail_robot_on_too_many_errors = {fail_on_errors}

[application]
program = "{program}"
args = ["{{artifact}}"]
process_names = ["{process_name}"]
timeout_secs = 2
headless_args = []
quiet_args = []
kill_settle_ms = 0

[fetch]
wait_secs = 2
poll_interval_ms = 50

[remote]
kind = "local"
local_root = "{remote}"
default_site = "{SITE}"

[archive]
library = "Dokumenter"
folder = "Historik"
file_prefix = "DKPlan"
month_locale = "da"

[queue]
database = "{database}"
upstream_table = "QueueExcelRefresher"
seed_interval_hours = 24

[storage]
work_dir = "{work}"

[logging]
level = "warn"
"#,
            program = program.display(),
            remote = remote_root.display(),
            database = database.display(),
            work = work_dir.display(),
        );
        fs::write(&config_path, config).expect("Failed to write config");

        Self {
            root,
            config_path,
            database,
            work_dir,
            remote_root,
            process_name,
        }
    }

    pub fn config_arg(&self) -> &str {
        self.config_path.to_str().unwrap()
    }

    /// Directory of the test site
    pub fn site_dir(&self) -> PathBuf {
        self.remote_root.join("planning")
    }

    /// Put a document on the remote site
    pub fn put_document(&self, remote_path: &str, content: &str) -> PathBuf {
        let path = remote_path
            .split('/')
            .fold(self.site_dir(), |acc, part| acc.join(part));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn enqueue(&self, reference: &str, data: Option<&str>) {
        let mut cmd = worker_cmd();
        cmd.arg("enqueue")
            .arg("--config")
            .arg(self.config_arg())
            .arg("--reference")
            .arg(reference);
        if let Some(data) = data {
            cmd.arg("--data").arg(data);
        }
        cmd.assert().success();
    }

    pub fn run(&self) -> assert_cmd::assert::Assert {
        worker_cmd()
            .arg("run")
            .arg("--config")
            .arg(self.config_arg())
            .assert()
    }

    pub fn connection(&self) -> rusqlite::Connection {
        rusqlite::Connection::open(&self.database).expect("Failed to open queue database")
    }

    /// (reference, status, message) of every element in insertion order
    pub fn elements(&self) -> Vec<(String, String, Option<String>)> {
        let conn = self.connection();
        let mut stmt = conn
            .prepare("SELECT reference, status, message FROM queue_elements ORDER BY seq")
            .unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap();
        rows.map(|r| r.unwrap()).collect()
    }
}

/// JSON payload the way upstream rows are enqueued
pub fn payload(folder_path: &str, custom_function: Option<&str>) -> String {
    serde_json::json!({
        "SharePointSite": SITE,
        "FolderPath": folder_path,
        "CustomFunction": custom_function,
    })
    .to_string()
}

/// Every file below `dir`, as paths relative to it
pub fn files_below(dir: &Path) -> Vec<String> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if let Ok(relative) = path.strip_prefix(dir) {
                found.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    found.sort();
    found
}

#[cfg(unix)]
fn write_app(path: &Path, app: App) {
    use std::os::unix::fs::PermissionsExt;

    let body = match app {
        App::Refresh => "echo refreshed >> \"$1\"\n",
        App::Hang => "while true; do sleep 0.1; done\n",
        App::Crash => "echo 'macro not found' >&2\nexit 3\n",
    };
    fs::write(path, format!("#!/bin/sh\n{}", body)).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(not(unix))]
fn write_app(path: &Path, _app: App) {
    fs::write(path, "").unwrap();
}

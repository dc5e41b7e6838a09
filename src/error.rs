use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::RunMode;

/// Troubleshooting entry for the PostgreSQL password mismatch.
pub const PASSWORD_MISMATCH_HELP: &str =
    "https://www.ghostwriter.wiki/getting-help/faq#ghostwriter-cli-reports-an-issue-with-postgresql";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Neither Docker nor Podman is installed on this system, so please install Docker or Podman (in Docker compatibility mode) and try again")]
    EngineNotFound,

    #[error("{engine} is installed, but you don't have permission to talk to the daemon (try running with sudo or adjusting your group membership)")]
    DaemonPermissionDenied { engine: String },

    #[error("{engine} is installed on this system, but the daemon may not be running")]
    DaemonUnavailable { engine: String },

    #[error("The deprecated `docker-compose` v1 script is no longer supported; please upgrade to Docker Compose v2 and try again: https://docs.docker.com/compose/install/")]
    ComposeDeprecated,

    #[error("Docker Compose is not installed, so please install it and try again: https://docs.docker.com/compose/install/")]
    ComposeNotFound,

    #[error("{}", compose_missing_message(.mode, .path))]
    ComposeFileMissing { mode: RunMode, path: PathBuf },

    #[error("Unknown mode `{0}`; expected one of `prod`, `local-dev` or `local-prod`")]
    UnknownMode(String),

    #[error("Could not determine the application data directory for this system")]
    NoDataDir,

    #[error("Could not parse environment file: {0}")]
    Settings(#[from] dotenvy::Error),

    #[error("Value `{value}` of `{key}` is not a valid {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("`{command}` exited with {}", exit_description(.code))]
    CommandFailed { command: String, code: Option<i32> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Container API error: {0}")]
    Daemon(#[from] bollard::errors::Error),

    #[error("The {service} container exited unexpectedly; check the logs of the ghostwriter_{service} container")]
    ServiceCrashed { service: String },

    #[error("PostgreSQL cannot start because of a password mismatch. Please read: {}", PASSWORD_MISMATCH_HELP)]
    DatabasePasswordMismatch,

    #[error("Django did not start after {:.1} seconds", .waited.as_secs_f64())]
    StartupTimedOut { waited: Duration },

    #[error("Stopped waiting for Django to start")]
    StartupCancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

fn compose_missing_message(mode: &RunMode, path: &std::path::Path) -> String {
    if mode.manages_compose_file() {
        format!(
            "Ghostwriter is not installed yet ({} does not exist); run the `install` command first",
            path.display()
        )
    } else {
        format!(
            "Ghostwriter CLI must be run in the same directory as the `{}` file ({} does not exist)",
            mode.compose_file(),
            path.display()
        )
    }
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

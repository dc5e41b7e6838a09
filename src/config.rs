use crate::error::{Error, Result};
use crate::util;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Directory name used under the OS application-data directory in `prod` mode.
pub const APP_DIR_NAME: &str = "ghostwriter";

pub const PROD_IMAGES: &[&str] = &[
    "ghostwriter_production_django",
    "ghostwriter_production_nginx",
    "ghostwriter_production_redis",
    "ghostwriter_production_postgres",
    "ghostwriter_production_graphql",
    "ghostwriter_production_queue",
    "ghostwriter_production_collab_server",
];

pub const DEV_IMAGES: &[&str] = &[
    "ghostwriter_local_django",
    "ghostwriter_local_redis",
    "ghostwriter_local_postgres",
    "ghostwriter_local_graphql",
    "ghostwriter_local_queue",
    "ghostwriter_local_collab_server",
    "ghostwriter_local_frontend",
];

/// Deployment target selected for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Source checkout, development compose file.
    LocalDev,
    /// Source checkout, production compose file.
    LocalProd,
    /// Released compose file installed in the application-data directory.
    #[default]
    Prod,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::LocalDev => "local-dev",
            RunMode::LocalProd => "local-prod",
            RunMode::Prod => "prod",
        }
    }

    pub fn compose_file(&self) -> &'static str {
        match self {
            RunMode::LocalDev => "local.yml",
            RunMode::LocalProd => "production.yml",
            RunMode::Prod => "docker-compose.yml",
        }
    }

    /// Only `prod` downloads and writes its own compose file.
    pub fn manages_compose_file(&self) -> bool {
        matches!(self, RunMode::Prod)
    }

    /// Whether the development settings profile and images apply.
    pub fn uses_dev_infra(&self) -> bool {
        matches!(self, RunMode::LocalDev)
    }

    pub fn required_images(&self) -> &'static [&'static str] {
        if self.uses_dev_infra() {
            DEV_IMAGES
        } else {
            PROD_IMAGES
        }
    }

    /// Directory holding the compose file and the `.env` settings file.
    pub fn working_dir(&self) -> Result<PathBuf> {
        match self {
            RunMode::LocalDev | RunMode::LocalProd => util::cwd_from_exe(),
            RunMode::Prod => dirs::data_dir()
                .map(|d| d.join(APP_DIR_NAME))
                .ok_or(Error::NoDataDir),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local-dev" => Ok(RunMode::LocalDev),
            "local-prod" => Ok(RunMode::LocalProd),
            "prod" | "production" => Ok(RunMode::Prod),
            other => Err(Error::UnknownMode(other.to_string())),
        }
    }
}

/// Engine executables in order of preference.
pub const ENGINE_CANDIDATES: &[&str] = &["docker", "podman"];

/// Pick the first supported engine for which `available` answers true.
pub fn resolve_engine_binary<F>(available: F) -> Result<String>
where
    F: Fn(&str) -> bool,
{
    ENGINE_CANDIDATES
        .iter()
        .find(|bin| available(bin))
        .map(|bin| bin.to_string())
        .ok_or(Error::EngineNotFound)
}

/// Tick cadence and upper bound of the startup wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupWait {
    pub interval: Duration,
    pub max_ticks: u32,
}

impl StartupWait {
    /// Total sleep before a timeout: polling continues until the counter
    /// exceeds `max_ticks`, which takes `max_ticks + 1` intervals.
    pub fn budget(&self) -> Duration {
        self.interval * (self.max_ticks + 1)
    }
}

impl Default for StartupWait {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_ticks: 120,
        }
    }
}

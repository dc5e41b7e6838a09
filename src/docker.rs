use crate::config::{self, RunMode, StartupWait};
use crate::env::Settings;
use crate::error::{Error, Result};
use crate::frames::LogChunk;
use crate::startup::{self, StartupProbe, APP_STARTED_MARKER, DB_PASSWORD_MISMATCH_MARKER};
use crate::util;
use async_trait::async_trait;
use bollard::models::ContainerSummary;
use bollard::query_parameters::{InspectContainerOptions, ListContainersOptions, LogsOptionsBuilder};
use bollard::Docker;
use futures_util::TryStreamExt;
use regex::Regex;
use serde::Deserialize;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Compose service running the web application.
pub const DJANGO_SERVICE: &str = "django";
/// Label carrying the logical container name in Ghostwriter's compose files.
const NAME_LABEL: &str = "name";
const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";
const VERSION_FILE: &str = "VERSION";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownOptions {
    /// Also delete named volumes.
    pub volumes: bool,
    pub remove_orphans: bool,
}

impl DownOptions {
    fn args(&self) -> Vec<&'static str> {
        let mut args = vec!["down"];
        if self.volumes {
            args.push("--volumes");
        }
        if self.remove_orphans {
            args.push("--remove-orphans");
        }
        args
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub ip: Option<String>,
    pub private_port: u16,
    pub public_port: Option<u16>,
}

/// Snapshot of one running container as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub image: String,
    pub status: String,
    pub ports: Vec<Port>,
    pub name: String,
}

impl From<ContainerSummary> for ContainerHandle {
    fn from(c: ContainerSummary) -> Self {
        let name = logical_name(&c);
        ContainerHandle {
            id: c.id.unwrap_or_default(),
            image: c.image.unwrap_or_default(),
            status: c.status.unwrap_or_default(),
            ports: c
                .ports
                .unwrap_or_default()
                .into_iter()
                .map(|p| Port {
                    ip: p.ip,
                    private_port: p.private_port,
                    public_port: p.public_port,
                })
                .collect(),
            name,
        }
    }
}

/// Logical name of a container: the `name` label, the compose service label,
/// or the first daemon-assigned name.
fn logical_name(c: &ContainerSummary) -> String {
    let labels = c.labels.as_ref();
    labels
        .and_then(|l| l.get(NAME_LABEL).or_else(|| l.get(COMPOSE_SERVICE_LABEL)))
        .cloned()
        .or_else(|| {
            c.names
                .as_ref()
                .and_then(|n| n.first())
                .map(|n| container_name(n))
        })
        .unwrap_or_default()
}

pub fn container_name(raw_name: &str) -> String {
    // daemon names carry a leading slash
    raw_name.trim().trim_start_matches('/').to_string()
}

/// Whether a container called `label` is selected by a log request for `wanted`.
pub fn log_target_matches(label: &str, wanted: &str) -> bool {
    wanted == "all" || label == wanted || label == format!("ghostwriter_{wanted}")
}

/// Container name compose v2 assigns to the first replica of `service`.
pub fn compose_container_name(project: &str, service: &str) -> String {
    format!("{project}-{service}-1")
}

#[derive(Debug, Deserialize)]
struct ComposeConfig {
    name: String,
}

/// Extract the project name from `compose config --format json` output.
pub fn parse_project_name(config_json: &str) -> Result<String> {
    let cfg: ComposeConfig = serde_json::from_str(config_json)?;
    Ok(cfg.name)
}

/// First `vX.Y.Z`-style tag found in `text`.
pub fn extract_version_tag(text: &str) -> Option<String> {
    let re = Regex::new(r"v?\d+\.\d+\.\d+").ok()?;
    re.find(text).map(|m| m.as_str().to_string())
}

/// Map a failed `<engine> info` to the matching environment error.
pub fn classify_daemon_failure(engine: &str, output: &str) -> Error {
    if output.to_lowercase().contains("permission denied") {
        Error::DaemonPermissionDenied {
            engine: engine.to_string(),
        }
    } else {
        Error::DaemonUnavailable {
            engine: engine.to_string(),
        }
    }
}

async fn check_daemon(engine: &str) -> Result<()> {
    match Command::new(engine).arg("info").output().await {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => Err(classify_daemon_failure(
            engine,
            &String::from_utf8_lossy(&out.stderr),
        )),
        Err(e) => Err(classify_daemon_failure(engine, &e.to_string())),
    }
}

async fn check_compose(engine: &str) -> Result<()> {
    let ok = Command::new(engine)
        .args(["compose", "version"])
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false);
    if ok {
        return Ok(());
    }
    if util::check_path("docker-compose") {
        warn!("the deprecated `docker-compose` v1 script was detected on this system");
        Err(Error::ComposeDeprecated)
    } else {
        Err(Error::ComposeNotFound)
    }
}

/// Everything a command needs to drive one deployment: the engine, the
/// compose file for the selected mode, and that deployment's settings.
pub struct DockerInterface {
    pub mode: RunMode,
    /// Directory holding the compose file and `.env`.
    pub dir: PathBuf,
    pub compose_file: &'static str,
    pub env: Settings,
    engine: String,
    client: OnceCell<Docker>,
    project_name: OnceCell<String>,
}

impl DockerInterface {
    /// Validate the container engine and load the deployment for `mode`.
    pub async fn resolve(mode: RunMode) -> Result<Self> {
        info!("checking the status of the container engine and the compose plugin");
        let engine = config::resolve_engine_binary(util::check_path)?;
        if engine != config::ENGINE_CANDIDATES[0] {
            info!(%engine, "docker is not installed, using {engine} as a docker alternative");
        }
        check_daemon(&engine).await?;
        check_compose(&engine).await?;

        let dir = mode.working_dir()?;
        Self::with_engine(mode, dir, engine)
    }

    /// Build an interface for an already validated `engine`.
    pub fn with_engine(mode: RunMode, dir: PathBuf, engine: impl Into<String>) -> Result<Self> {
        let compose_file = mode.compose_file();
        let compose_path = dir.join(compose_file);
        if !util::file_exists(&compose_path) {
            return Err(Error::ComposeFileMissing {
                mode,
                path: compose_path,
            });
        }

        let mut env = Settings::load(&dir)?;
        env.apply_mode(mode);

        Ok(Self {
            mode,
            dir,
            compose_file,
            env,
            engine: engine.into(),
            client: OnceCell::new(),
            project_name: OnceCell::new(),
        })
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    pub fn compose_path(&self) -> PathBuf {
        self.dir.join(self.compose_file)
    }

    pub fn uses_dev_infra(&self) -> bool {
        self.mode.uses_dev_infra()
    }

    pub fn manages_compose_file(&self) -> bool {
        self.mode.manages_compose_file()
    }

    fn command(&self, args: &[&str]) -> Command {
        debug!(engine = %self.engine, ?args, "running");
        let mut cmd = Command::new(&self.engine);
        cmd.current_dir(&self.dir).args(args);
        cmd
    }

    fn failure(&self, args: &[&str], code: Option<i32>) -> Error {
        Error::CommandFailed {
            command: format!("{} {}", self.engine, args.join(" ")),
            code,
        }
    }

    /// Run the engine with `args`, streams passed through to the terminal.
    pub async fn run_cmd(&self, args: &[&str]) -> Result<()> {
        let status = self.command(args).status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(self.failure(args, status.code()))
        }
    }

    /// Like [`DockerInterface::run_cmd`] but stdout is captured and returned.
    pub async fn run_cmd_with_output(&self, args: &[&str]) -> Result<String> {
        let out = self
            .command(args)
            .stdin(Stdio::inherit())
            .stderr(Stdio::inherit())
            .output()
            .await?;
        if out.status.success() {
            Ok(String::from_utf8_lossy(&out.stdout).into_owned())
        } else {
            Err(self.failure(args, out.status.code()))
        }
    }

    fn compose_args<'a>(&self, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = vec!["compose", "-f", self.compose_file];
        full.extend_from_slice(args);
        full
    }

    pub async fn run_compose_cmd(&self, args: &[&str]) -> Result<()> {
        self.run_cmd(&self.compose_args(args)).await
    }

    pub async fn run_compose_cmd_with_output(&self, args: &[&str]) -> Result<String> {
        self.run_cmd_with_output(&self.compose_args(args)).await
    }

    /// Run `manage.py` in a throwaway django container.
    pub async fn run_management_cmd(&self, args: &[&str]) -> Result<()> {
        let mut full = vec!["run", "--rm", DJANGO_SERVICE, "python", "manage.py"];
        full.extend_from_slice(args);
        self.run_compose_cmd(&full).await
    }

    pub async fn up(&self) -> Result<()> {
        info!(engine = %self.engine, file = self.compose_file, "bringing up the containers");
        self.run_compose_cmd(&["up", "-d"]).await
    }

    pub async fn down(&self, opts: DownOptions) -> Result<()> {
        info!(engine = %self.engine, file = self.compose_file, "taking down the containers");
        self.run_compose_cmd(&opts.args()).await
    }

    /// Project name from the resolved compose configuration, queried once.
    pub async fn get_compose_project_name(&self) -> Result<&str> {
        let name = self
            .project_name
            .get_or_try_init(|| async {
                let json = self
                    .run_compose_cmd_with_output(&["config", "--format", "json"])
                    .await?;
                parse_project_name(&json)
            })
            .await?;
        Ok(name.as_str())
    }

    /// Daemon API connection, established on first use.
    pub async fn get_daemon_client(&self) -> Result<&Docker> {
        self.client
            .get_or_try_init(|| async { Docker::connect_with_local_defaults().map_err(Error::from) })
            .await
    }

    /// Inspect the container compose created for `service` in this project.
    pub async fn is_service_running(&self, service: &str) -> Result<bool> {
        let project = self.get_compose_project_name().await?;
        let name = compose_container_name(project, &service.to_lowercase());
        let client = self.get_daemon_client().await?;

        match client
            .inspect_container(&name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => Ok(info.state.and_then(|s| s.running).unwrap_or(false)),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Running containers built from one of the known Ghostwriter images.
    pub async fn get_running(&self) -> Result<Vec<ContainerHandle>> {
        let client = self.get_daemon_client().await?;
        let mut running: Vec<ContainerHandle> = client
            .list_containers(None::<ListContainersOptions>)
            .await?
            .into_iter()
            .map(ContainerHandle::from)
            .filter(|c| {
                config::DEV_IMAGES.contains(&c.image.as_str())
                    || config::PROD_IMAGES.contains(&c.image.as_str())
            })
            .collect();
        running.sort_by(|a, b| a.image.cmp(&b.image));
        Ok(running)
    }

    /// Required images for this mode that have no running container.
    pub async fn missing_services(&self) -> Result<Vec<String>> {
        let running = self.get_running().await?;
        Ok(self
            .mode
            .required_images()
            .iter()
            .filter(|image| !running.iter().any(|c| c.image == **image))
            .map(|image| image.to_string())
            .collect())
    }

    /// Last `tail` log lines of every container matching `container`
    /// (`all` selects everything), with a header per container.
    pub async fn fetch_logs(&self, container: &str, tail: &str) -> Result<Vec<String>> {
        let client = self.get_daemon_client().await?;
        let containers = client
            .list_containers(None::<ListContainersOptions>)
            .await?;

        let mut logs = Vec::new();
        for summary in containers {
            let label = logical_name(&summary);
            if !log_target_matches(&label, container) {
                continue;
            }
            let Some(id) = summary.id.as_deref() else {
                continue;
            };

            logs.push(format!("\n*** Logs for `{label}` ***\n\n"));
            let opts = LogsOptionsBuilder::default()
                .stdout(true)
                .stderr(true)
                .tail(tail)
                .build();
            let output: Vec<_> = client.logs(id, Some(opts)).try_collect().await?;
            logs.extend(output.into_iter().map(|o| LogChunk::from(o).text));
        }

        if logs.is_empty() {
            logs.push(format!(
                "\n*** No logs found for requested container '{container}' ***\n"
            ));
        }
        Ok(logs)
    }

    /// Block until Django reports startup; see [`startup::wait_for_startup`].
    pub async fn wait_for_application_startup<C>(&self, wait: &StartupWait, cancel: C) -> Result<()>
    where
        C: Future<Output = ()>,
    {
        startup::wait_for_startup(self, wait, cancel).await
    }

    /// Installed application version: the deployment's `VERSION` file, or the
    /// one baked into the django image.
    pub async fn get_version(&self) -> Result<String> {
        let file = self.version_file();
        let text = if util::file_exists(&file) {
            std::fs::read_to_string(&file)?
        } else {
            self.run_compose_cmd_with_output(&[
                "run",
                "--rm",
                "-T",
                "--no-deps",
                DJANGO_SERVICE,
                "cat",
                VERSION_FILE,
            ])
            .await?
        };
        extract_version_tag(&text).ok_or(Error::InvalidValue {
            key: VERSION_FILE.to_string(),
            value: text.trim().to_string(),
            expected: "version tag",
        })
    }

    pub fn version_file(&self) -> PathBuf {
        self.dir.join(VERSION_FILE)
    }
}

#[async_trait]
impl StartupProbe for DockerInterface {
    fn service(&self) -> &str {
        DJANGO_SERVICE
    }

    async fn is_running(&self) -> Result<bool> {
        self.is_service_running(DJANGO_SERVICE).await
    }

    async fn has_started(&self) -> Result<bool> {
        let logs = self.fetch_logs("ghostwriter_django", "500").await?;
        Ok(startup::logs_contain(&logs, APP_STARTED_MARKER))
    }

    async fn has_password_mismatch(&self) -> Result<bool> {
        let logs = self.fetch_logs("ghostwriter_postgres", "100").await?;
        Ok(startup::logs_contain(&logs, DB_PASSWORD_MISMATCH_MARKER))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn down_options_map_to_flags() {
        assert_eq!(DownOptions::default().args(), vec!["down"]);
        let all = DownOptions {
            volumes: true,
            remove_orphans: true,
        };
        assert_eq!(all.args(), vec!["down", "--volumes", "--remove-orphans"]);
    }

    #[test]
    fn daemon_failures_are_classified() {
        let err = classify_daemon_failure(
            "docker",
            "permission denied while trying to connect to the Docker daemon socket",
        );
        assert!(matches!(err, Error::DaemonPermissionDenied { engine } if engine == "docker"));

        let err = classify_daemon_failure("podman", "Cannot connect to the Podman socket");
        assert!(matches!(err, Error::DaemonUnavailable { engine } if engine == "podman"));
    }

    #[test]
    fn project_name_from_compose_config() {
        let json = r#"{"name":"ghostwriter","services":{"django":{"image":"ghostwriter_local_django"}}}"#;
        assert_eq!(parse_project_name(json).unwrap(), "ghostwriter");
        assert!(parse_project_name("services: {}").is_err());
        assert_eq!(compose_container_name("ghostwriter", "django"), "ghostwriter-django-1");
    }

    #[test]
    fn log_targets() {
        assert!(log_target_matches("ghostwriter_django", "django"));
        assert!(log_target_matches("ghostwriter_django", "ghostwriter_django"));
        assert!(log_target_matches("ghostwriter_redis", "all"));
        assert!(!log_target_matches("ghostwriter_redis", "django"));
    }

    #[test]
    fn version_tags() {
        assert_eq!(extract_version_tag("v4.3.7\n12 May 2025\n").as_deref(), Some("v4.3.7"));
        assert_eq!(extract_version_tag("Ghostwriter 4.2.0").as_deref(), Some("4.2.0"));
        assert_eq!(extract_version_tag("unknown"), None);
    }

    #[test]
    fn handle_from_daemon_summary() {
        let mut labels = HashMap::new();
        labels.insert(COMPOSE_SERVICE_LABEL.to_string(), "django".to_string());
        let summary = ContainerSummary {
            id: Some("abc123".to_string()),
            image: Some("ghostwriter_local_django".to_string()),
            status: Some("Up 3 minutes".to_string()),
            labels: Some(labels),
            names: Some(vec!["/ghostwriter-django-1".to_string()]),
            ..Default::default()
        };
        let handle = ContainerHandle::from(summary);
        assert_eq!(handle.id, "abc123");
        assert_eq!(handle.name, "django");
        assert!(handle.ports.is_empty());

        let unnamed = ContainerSummary {
            names: Some(vec!["/ghostwriter-redis-1".to_string()]),
            ..Default::default()
        };
        assert_eq!(ContainerHandle::from(unnamed).name, "ghostwriter-redis-1");
    }

    #[test]
    fn missing_compose_file_is_a_configuration_error() {
        let dir = tempdir().unwrap();
        let err = DockerInterface::with_engine(RunMode::LocalDev, dir.path().to_path_buf(), "docker")
            .err()
            .unwrap();
        assert!(matches!(err, Error::ComposeFileMissing { mode: RunMode::LocalDev, .. }));
        assert!(!dir.path().join(".env").exists());
    }

    #[test]
    fn interface_applies_mode_profile() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("production.yml"), "services: {}\n").unwrap();

        let docker =
            DockerInterface::with_engine(RunMode::LocalProd, dir.path().to_path_buf(), "podman")
                .unwrap();
        assert_eq!(docker.engine(), "podman");
        assert_eq!(docker.compose_path(), dir.path().join("production.yml"));
        assert!(!docker.uses_dev_infra());
        assert!(!docker.manages_compose_file());
        assert_eq!(docker.env.get("django_secure_ssl_redirect"), "true");
        assert_eq!(
            docker.compose_args(&["up", "-d"]),
            vec!["compose", "-f", "production.yml", "up", "-d"]
        );
    }

    #[tokio::test]
    async fn version_prefers_local_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("local.yml"), "services: {}\n").unwrap();
        std::fs::write(dir.path().join(VERSION_FILE), "v4.3.0\n01 January 2025\n").unwrap();

        let docker =
            DockerInterface::with_engine(RunMode::LocalDev, dir.path().to_path_buf(), "docker")
                .unwrap();
        assert_eq!(docker.get_version().await.unwrap(), "v4.3.0");
    }
}

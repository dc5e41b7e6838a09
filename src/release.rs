use crate::docker::DockerInterface;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const GITHUB_OWNER: &str = "GhostManager";
pub const GITHUB_REPO: &str = "Ghostwriter";
pub const LAST_CHECK_FILE: &str = ".gwcli-last-update-check";
/// Minimum time between two automatic update checks, in seconds.
pub const CHECK_INTERVAL_SECS: i64 = 24 * 60 * 60;
pub const LOCAL_VERSION_FALLBACK: &str = "Could not read Ghostwriter's `VERSION` file";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = "Ghostwriter-CLI";
const COMPOSE_ASSET: &str = "gw-cli.yml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// `Ghostwriter <version> (<date>)` from `<dir>/VERSION`, or a fallback text.
pub fn get_local_version(dir: &Path) -> String {
    match std::fs::read_to_string(dir.join("VERSION")) {
        Ok(text) => describe_version_file(&text),
        Err(_) => LOCAL_VERSION_FALLBACK.to_string(),
    }
}

fn describe_version_file(text: &str) -> String {
    let mut lines = text.lines().map(str::trim);
    match (lines.next(), lines.next()) {
        (Some(version), Some(date)) if !version.is_empty() => {
            format!("Ghostwriter {version} ({date})")
        }
        _ => LOCAL_VERSION_FALLBACK.to_string(),
    }
}

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()?)
}

pub fn latest_release_url(owner: &str, repo: &str) -> String {
    format!("https://api.github.com/repos/{owner}/{repo}/releases/latest")
}

/// Latest published release of `owner/repo`. Only a `200` response is accepted.
pub async fn fetch_latest_release(owner: &str, repo: &str) -> Result<Release> {
    let url = latest_release_url(owner, repo);
    let resp = http_client()?
        .get(&url)
        .header("Accept", "application/vnd.github+json")
        .header("X-GitHub-Api-Version", "2022-11-28")
        .send()
        .await?;

    let status = resp.status().as_u16();
    if status != 200 {
        return Err(Error::UnexpectedStatus { url, status });
    }
    Ok(resp.json::<Release>().await?)
}

/// Unix timestamp stored in the sidecar file; zero when missing or unreadable.
pub fn read_last_check(path: &Path) -> i64 {
    match std::fs::read_to_string(path) {
        Ok(text) => text.trim().parse().unwrap_or_else(|_| {
            warn!(path = %path.display(), "ignoring unreadable update check timestamp");
            0
        }),
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "could not read update check timestamp");
            }
            0
        }
    }
}

pub fn checked_recently(last_check: i64, now: i64) -> bool {
    last_check + CHECK_INTERVAL_SECS > now
}

/// Warn when the installed version differs from the latest release.
///
/// At most one remote lookup happens per day. Every failure is logged and
/// swallowed so the calling command is never affected.
pub async fn maybe_nag_for_update(docker: &DockerInterface) {
    match docker.env.get_bool("gwcli_auto_check_updates") {
        Ok(true) => {}
        Ok(false) => return,
        Err(e) => {
            warn!(error = %e, "skipping update check");
            return;
        }
    }

    let stamp = docker.dir.join(LAST_CHECK_FILE);
    let now = chrono::Utc::now().timestamp();
    if checked_recently(read_last_check(&stamp), now) {
        debug!("update check already ran in the last 24 hours");
        return;
    }
    if let Err(e) = std::fs::write(&stamp, now.to_string()) {
        warn!(path = %stamp.display(), error = %e, "could not record update check");
    }

    let local = match docker.get_version().await {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "could not get local version");
            return;
        }
    };
    let remote = match fetch_latest_release(GITHUB_OWNER, GITHUB_REPO).await {
        Ok(r) => r.tag_name,
        Err(e) => {
            warn!(error = %e, "could not get latest released version");
            return;
        }
    };

    if local != remote {
        warn!("the latest release of Ghostwriter is version {remote}, the currently installed version is {local}");
        if docker.manages_compose_file() {
            warn!("run the `install` command to update to the latest version");
        }
    }
}

/// Where the production compose file for `version` (or the latest release) is published.
pub fn compose_file_url(version: Option<&str>) -> String {
    match version {
        Some(v) => format!(
            "https://github.com/{GITHUB_OWNER}/{GITHUB_REPO}/releases/download/{v}/{COMPOSE_ASSET}"
        ),
        None => format!(
            "https://github.com/{GITHUB_OWNER}/{GITHUB_REPO}/releases/latest/download/{COMPOSE_ASSET}"
        ),
    }
}

/// Download the production compose file into `dir/docker-compose.yml`.
pub async fn fetch_compose_file(dir: &Path, version: Option<&str>) -> Result<()> {
    let url = compose_file_url(version);
    info!(%url, "downloading the compose file");

    let resp = http_client()?.get(&url).send().await?;
    let status = resp.status().as_u16();
    if status != 200 {
        return Err(Error::UnexpectedStatus { url, status });
    }
    let body = resp.bytes().await?;

    std::fs::create_dir_all(dir)?;
    write_atomically(&dir.join(crate::config::RunMode::Prod.compose_file()), &body)
}

fn write_atomically(dest: &Path, contents: &[u8]) -> Result<()> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".docker-compose")
        .tempfile_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn local_version_reads_tag_and_date() {
        let dir = tempdir().unwrap();
        assert_eq!(get_local_version(dir.path()), LOCAL_VERSION_FALLBACK);

        std::fs::write(dir.path().join("VERSION"), "v4.3.7\n12 May 2025\n").unwrap();
        assert_eq!(get_local_version(dir.path()), "Ghostwriter v4.3.7 (12 May 2025)");

        std::fs::write(dir.path().join("VERSION"), "v4.3.7\n").unwrap();
        assert_eq!(get_local_version(dir.path()), LOCAL_VERSION_FALLBACK);
    }

    #[test]
    fn last_check_defaults_to_zero() {
        let dir = tempdir().unwrap();
        let stamp = dir.path().join(LAST_CHECK_FILE);
        assert_eq!(read_last_check(&stamp), 0);

        std::fs::write(&stamp, "yesterday").unwrap();
        assert_eq!(read_last_check(&stamp), 0);

        std::fs::write(&stamp, "1700000000\n").unwrap();
        assert_eq!(read_last_check(&stamp), 1_700_000_000);
    }

    #[test]
    fn nag_window_is_one_day_in_seconds() {
        let now = 1_700_000_000;
        assert!(checked_recently(now - 60, now));
        assert!(checked_recently(now - CHECK_INTERVAL_SECS + 1, now));
        assert!(!checked_recently(now - CHECK_INTERVAL_SECS, now));
        assert!(!checked_recently(0, now));
    }

    fn local_deployment(dir: &Path) -> DockerInterface {
        std::fs::write(dir.join("local.yml"), "services: {}\n").unwrap();
        DockerInterface::with_engine(crate::config::RunMode::LocalDev, dir.to_path_buf(), "docker")
            .unwrap()
    }

    #[tokio::test]
    async fn update_check_can_be_disabled() {
        let dir = tempdir().unwrap();
        let mut docker = local_deployment(dir.path());
        docker.env.set("gwcli_auto_check_updates", "false");

        maybe_nag_for_update(&docker).await;
        assert!(!dir.path().join(LAST_CHECK_FILE).exists());
    }

    #[tokio::test]
    async fn recent_check_is_not_repeated() {
        let dir = tempdir().unwrap();
        let docker = local_deployment(dir.path());
        assert!(docker.env.get_bool("gwcli_auto_check_updates").unwrap());

        let stamp = dir.path().join(LAST_CHECK_FILE);
        let recent = (chrono::Utc::now().timestamp() - 60).to_string();
        std::fs::write(&stamp, &recent).unwrap();

        maybe_nag_for_update(&docker).await;
        assert_eq!(std::fs::read_to_string(&stamp).unwrap(), recent);
    }

    #[test]
    fn release_payload_parses() {
        let json = r#"{"tag_name":"v4.3.7","html_url":"https://github.com/GhostManager/Ghostwriter/releases/tag/v4.3.7","draft":false}"#;
        let release: Release = serde_json::from_str(json).unwrap();
        assert_eq!(release.tag_name, "v4.3.7");
        assert!(release.html_url.is_some());

        let bare: Release = serde_json::from_str(r#"{"tag_name":"v4.0.0"}"#).unwrap();
        assert_eq!(bare.html_url, None);
    }

    #[test]
    fn release_urls() {
        assert_eq!(
            latest_release_url("GhostManager", "Ghostwriter_CLI"),
            "https://api.github.com/repos/GhostManager/Ghostwriter_CLI/releases/latest"
        );
        assert!(compose_file_url(None).ends_with("/releases/latest/download/gw-cli.yml"));
        assert!(compose_file_url(Some("v4.3.7")).ends_with("/releases/download/v4.3.7/gw-cli.yml"));
    }

    #[test]
    fn compose_file_is_replaced_whole() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("docker-compose.yml");
        std::fs::write(&dest, "old").unwrap();
        write_atomically(&dest, b"services:\n  django: {}\n").unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "services:\n  django: {}\n");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}

use anyhow::{Context, Result};
use ghostwriter_cli::config::{RunMode, StartupWait};
use ghostwriter_cli::docker::{DockerInterface, DJANGO_SERVICE};
use ghostwriter_cli::{logs, release, startup};
use tracing::{info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    logs::init_logging("info")?;

    let mode = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<RunMode>()?,
        None => RunMode::default(),
    };
    info!(%mode, "{}", release::get_local_version(&mode.working_dir()?));

    let docker = DockerInterface::resolve(mode).await?;
    docker
        .env
        .save()
        .with_context(|| format!("saving {}", docker.env.path().display()))?;

    release::maybe_nag_for_update(&docker).await;

    match docker.get_compose_project_name().await {
        Ok(project) => info!(project, file = docker.compose_file, "compose project"),
        Err(e) => warn!(error = %e, "could not read the compose project name"),
    }
    let missing = docker.missing_services().await?;
    if missing.is_empty() {
        info!("all Ghostwriter services are running");
    } else {
        warn!(?missing, "some Ghostwriter services are not running");
    }

    if docker.is_service_running(DJANGO_SERVICE).await? {
        let interrupted = startup::on_signal(tokio::signal::ctrl_c());
        docker
            .wait_for_application_startup(&StartupWait::default(), interrupted)
            .await?;
    }
    Ok(())
}

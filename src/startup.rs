use crate::config::StartupWait;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::future::Future;
use tracing::{debug, info, warn};

/// Logged by the application once it is ready to serve requests.
pub const APP_STARTED_MARKER: &str = "Application startup complete";
/// Logged by PostgreSQL when the stored password no longer matches the data volume.
pub const DB_PASSWORD_MISMATCH_MARKER: &str = "Password does not match for user";

/// Every state other than `Polling` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupState {
    Polling { ticks: u32 },
    Started,
    Crashed,
    PasswordMismatch,
    TimedOut,
    Cancelled,
}

impl StartupState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StartupState::Polling { .. })
    }
}

/// Observations the wait needs from the running deployment.
#[async_trait]
pub trait StartupProbe {
    /// Service whose startup is awaited, used in diagnostics.
    fn service(&self) -> &str;

    async fn is_running(&self) -> Result<bool>;

    async fn has_started(&self) -> Result<bool>;

    async fn has_password_mismatch(&self) -> Result<bool>;
}

pub fn logs_contain<S: AsRef<str>>(chunks: &[S], marker: &str) -> bool {
    chunks.iter().any(|c| c.as_ref().contains(marker))
}

#[derive(Debug)]
pub struct StartupMachine {
    state: StartupState,
    max_ticks: u32,
}

impl StartupMachine {
    pub fn new(max_ticks: u32) -> Self {
        Self {
            state: StartupState::Polling { ticks: 0 },
            max_ticks,
        }
    }

    pub fn state(&self) -> StartupState {
        self.state
    }

    /// Run one poll against `probe` and return the resulting state.
    ///
    /// Probes are consulted lazily in priority order: liveness, startup
    /// marker, password mismatch. Terminal states never change.
    pub async fn step<P>(&mut self, probe: &P) -> Result<StartupState>
    where
        P: StartupProbe + Sync + ?Sized,
    {
        let ticks = match self.state {
            StartupState::Polling { ticks } => ticks,
            terminal => return Ok(terminal),
        };

        self.state = if !probe.is_running().await? {
            StartupState::Crashed
        } else if probe.has_started().await? {
            StartupState::Started
        } else if probe.has_password_mismatch().await? {
            StartupState::PasswordMismatch
        } else if ticks > self.max_ticks {
            StartupState::TimedOut
        } else {
            StartupState::Polling { ticks: ticks + 1 }
        };
        Ok(self.state)
    }

    fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = StartupState::Cancelled;
        }
    }
}

/// Resolve once `signal` fires. A listener that failed to install never fires,
/// so it cannot cancel a wait by accident.
pub async fn on_signal<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn!(error = %e, "could not listen for the interrupt signal");
        std::future::pending::<()>().await;
    }
}

/// Block until `probe` reports startup, a terminal failure, or `cancel` resolves.
pub async fn wait_for_startup<P, C>(probe: &P, wait: &StartupWait, cancel: C) -> Result<()>
where
    P: StartupProbe + Sync + ?Sized,
    C: Future<Output = ()>,
{
    info!(service = probe.service(), "waiting for application startup to complete");
    let mut machine = StartupMachine::new(wait.max_ticks);
    let began = tokio::time::Instant::now();
    tokio::pin!(cancel);

    loop {
        match machine.step(probe).await? {
            StartupState::Started => {
                info!(service = probe.service(), "application started");
                return Ok(());
            }
            StartupState::Crashed => {
                return Err(Error::ServiceCrashed {
                    service: probe.service().to_string(),
                })
            }
            StartupState::PasswordMismatch => return Err(Error::DatabasePasswordMismatch),
            StartupState::TimedOut => {
                return Err(Error::StartupTimedOut {
                    waited: began.elapsed(),
                })
            }
            StartupState::Cancelled => return Err(Error::StartupCancelled),
            StartupState::Polling { ticks } => debug!(ticks, "still waiting"),
        }

        tokio::select! {
            _ = &mut cancel => {
                machine.cancel();
                return Err(Error::StartupCancelled);
            }
            _ = tokio::time::sleep(wait.interval) => {}
        }
    }
}

//! Termination signals
//!
//! SIGINT and SIGTERM (Ctrl+C on Windows) ask the application for a normal
//! exit through the same channel the shell uses, so shutdown runs the usual
//! bundle teardown instead of killing the process.

use std::future::Future;
use std::sync::Weak;

use tokio::task::JoinHandle;

use keystone_core::prelude::*;
use keystone_core::ExitStatus;

use crate::context::Application;

/// Request a normal exit on the first termination signal.
pub fn spawn_signal_handler(app: Weak<Application>) -> JoinHandle<bool> {
    spawn_exit_on(wait_for_signal(), app)
}

/// Request a normal exit once `signal` resolves.
///
/// The task yields whether an exit request was delivered: `false` when the
/// listener failed or the application was already gone.
fn spawn_exit_on<F>(signal: F, app: Weak<Application>) -> JoinHandle<bool>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = signal.await {
            error!("Signal listener failed: {}", e);
            return false;
        }
        match app.upgrade() {
            Some(app) => {
                info!("Termination signal; requesting exit");
                app.request_exit(ExitStatus::Success);
                true
            }
            None => {
                debug!("Termination signal after the application was dropped");
                false
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let listen = |kind: SignalKind, name: &str| {
        signal(kind).map_err(|e| Error::startup(format!("cannot listen for {}: {}", name, e)))
    };
    let mut sigint = listen(SignalKind::interrupt(), "SIGINT")?;
    let mut sigterm = listen(SignalKind::terminate(), "SIGTERM")?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    };
    info!("Received {}", name);
    Ok(())
}

#[cfg(windows)]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::startup(format!("cannot listen for Ctrl+C: {}", e)))?;
    info!("Received Ctrl+C");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsStore;
    use crate::context::{Roots, UiState};
    use crate::shell::HeadlessShell;
    use crate::ui_thread::UiThread;
    use keystone_core::LaunchArguments;
    use serial_test::serial;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    #[serial]
    async fn test_signal_requests_normal_exit() {
        let dir = tempdir().unwrap();
        let ui = UiThread::<UiState>::spawn("signal-ui").unwrap();
        let (app, mut exit_rx) = Application::new(
            LaunchArguments::default(),
            Roots {
                storage: dir.path().join("storage"),
                install: dir.path().join("install"),
            },
            Arc::new(SettingsStore::in_memory()),
            Arc::new(HeadlessShell::new()),
            ui.handle(),
        )
        .unwrap();

        let delivered = spawn_exit_on(async { Ok(()) }, Arc::downgrade(&app))
            .await
            .unwrap();
        assert!(delivered);
        assert_eq!(exit_rx.recv().await, Some(ExitStatus::Success));

        let failed = spawn_exit_on(
            async { Err(Error::startup("no signal support")) },
            Arc::downgrade(&app),
        )
        .await
        .unwrap();
        assert!(!failed);
        assert!(exit_rx.try_recv().is_err());

        drop(app);
        ui.join();
    }

    #[tokio::test]
    async fn test_signal_after_application_dropped_is_ignored() {
        let delivered = spawn_exit_on(async { Ok(()) }, Weak::new()).await.unwrap();
        assert!(!delivered);
    }
}

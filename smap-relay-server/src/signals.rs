// smap-relay server - HTTP front end for the relay
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Process signals: SIGUSR1 steps the credential reload, Ctrl-C stops the server.
//!
//! The administrative command finds the server through its pid file and
//! sends the same signal from outside.

use crate::app::reload_step;
use crate::error::ServerError;
use smap_relay::{CredentialStore, IdentityFactory};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Step the reload once per SIGUSR1 until the process exits
#[cfg(unix)]
pub async fn reload_on_sigusr1<F: IdentityFactory + 'static>(
    store: Arc<CredentialStore<F>>,
) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 = signal(SignalKind::user_defined1())?;
    info!("SIGUSR1 steps the credential reload");
    while usr1.recv().await.is_some() {
        let store = Arc::clone(&store);
        match tokio::task::spawn_blocking(move || reload_step(&store)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => error!("Reload signal ignored: {}", err),
            Err(err) => error!("Reload task failed: {}", err),
        }
    }
    Ok(())
}

/// Without Unix signals only `POST /admin/reload` drives reloads
#[cfg(not(unix))]
pub async fn reload_on_sigusr1<F: IdentityFactory + 'static>(
    _store: Arc<CredentialStore<F>>,
) -> std::io::Result<()> {
    info!("Signal reload unavailable on this platform, use POST /admin/reload");
    Ok(())
}

/// Resolves on Ctrl-C
pub async fn shutdown() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Could not listen for Ctrl-C: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

/// Process id recorded by `serve --pid-file`
pub fn read_pid(path: &Path) -> Result<i32, ServerError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ServerError::io(path.display().to_string(), e))?;
    match raw.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(ServerError::Config(format!(
            "{} does not hold a process id: {:?}",
            path.display(),
            raw.trim()
        ))),
    }
}

/// Send one SIGUSR1 to a running server
#[cfg(unix)]
pub fn send_reload_signal(pid: i32) -> Result<(), ServerError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let target = Pid::from_raw(pid);
    // signal 0 only checks the process exists
    kill(target, None)
        .and_then(|()| kill(target, Signal::SIGUSR1))
        .map_err(|errno| ServerError::io(format!("signal pid {}", pid), errno.into()))?;
    info!(pid, "Sent SIGUSR1");
    Ok(())
}

#[cfg(not(unix))]
pub fn send_reload_signal(pid: i32) -> Result<(), ServerError> {
    Err(ServerError::Config(format!(
        "cannot signal pid {} on this platform, use --server",
        pid
    )))
}

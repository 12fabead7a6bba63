//! Forwards OS signals to the engine as [`ControlSignal`]s.
//!
//! ## Unix
//! - **SIGHUP** — reload configuration
//! - **SIGTERM**, **SIGINT** — graceful shutdown
//!
//! ## Other platforms
//! Only Ctrl-C is handled, as a shutdown request.

use std::io;
use std::sync::mpsc::Sender;
use std::thread;

use logsep_core::ControlSignal;
use tracing::{debug, info};

/// Installs the signal handlers, then starts a thread that forwards signals
/// until the receiving side is dropped.
///
/// Handlers are in place when this returns, so a signal sent right after
/// startup is delivered rather than taking the default action.
pub fn spawn_forwarder(tx: &Sender<ControlSignal>) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let listener = runtime.block_on(async { Listener::install() })?;
    let tx = tx.clone();

    thread::Builder::new()
        .name("logsep-signals".into())
        .spawn(move || runtime.block_on(listener.forward(tx)))?;
    Ok(())
}

#[cfg(unix)]
struct Listener {
    sighup: tokio::signal::unix::Signal,
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Listener {
    fn install() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            sighup: signal(SignalKind::hangup())?,
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    async fn forward(mut self, tx: Sender<ControlSignal>) {
        loop {
            let received = tokio::select! {
                _ = self.sighup.recv() => {
                    info!("received SIGHUP");
                    ControlSignal::Reload
                }
                _ = self.sigterm.recv() => {
                    info!("received SIGTERM");
                    ControlSignal::Terminate
                }
                _ = self.sigint.recv() => {
                    info!("received SIGINT");
                    ControlSignal::Terminate
                }
            };
            if tx.send(received).is_err() {
                debug!("engine stopped, signal forwarder exiting");
                return;
            }
        }
    }
}

#[cfg(not(unix))]
struct Listener;

#[cfg(not(unix))]
impl Listener {
    fn install() -> io::Result<Self> {
        Ok(Self)
    }

    async fn forward(self, tx: Sender<ControlSignal>) {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for Ctrl-C");
                return;
            }
            info!("received Ctrl-C");
            if tx.send(ControlSignal::Terminate).is_err() {
                debug!("engine stopped, signal forwarder exiting");
                return;
            }
        }
    }
}

//! Reaction to reload and terminate requests.
//!
//! ```text
//! RUNNING ──reload──► RELOADING ──config ok, new generation up──► RUNNING
//!    │                   │  └──config load failed────────────────► RUNNING
//!    │                   └──new generation failed──► STOPPING ──► STOPPED
//!    └──terminate──► STOPPING ──► STOPPED
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, SyncSender};

use tracing::{debug, error, info};

use crate::config::ConfigSource;
use crate::engine::{Generation, Handoff};
use crate::error::{Error, Result};
use crate::tailer::StopToken;

/// External control inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Re-read configuration and swap to a new generation.
    Reload,
    /// Graceful shutdown.
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Running,
    Reloading,
    Stopping,
    Stopped,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerState::Running => "RUNNING",
            ControllerState::Reloading => "RELOADING",
            ControllerState::Stopping => "STOPPING",
            ControllerState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Whether the controller keeps waiting for signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Owns the lifecycle of the live generation while the consume loop owns
/// the generation itself.
pub struct ReloadController<S> {
    source: S,
    state: ControllerState,
    generation_id: u64,
    stop: StopToken,
}

impl<S: ConfigSource> ReloadController<S> {
    /// `generation_id` and `stop` belong to the generation currently handed
    /// to the consume loop.
    pub fn new(source: S, generation_id: u64, stop: StopToken) -> Self {
        Self {
            source,
            state: ControllerState::Running,
            generation_id,
            stop,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Handles signals one at a time until STOPPED. Signals that arrive
    /// during a transition wait in the channel.
    pub fn run(
        mut self,
        signals: Receiver<ControlSignal>,
        retired: Receiver<Generation>,
        handoff: SyncSender<Handoff>,
    ) -> Result<()> {
        loop {
            let signal = signals.recv().unwrap_or_else(|_| {
                debug!("signal channel closed");
                ControlSignal::Terminate
            });
            if self.handle(signal, &retired, &handoff)? == Flow::Exit {
                return Ok(());
            }
        }
    }

    /// Performs the transition for one signal.
    ///
    /// The consume loop must hand the stopped generation back on `retired`
    /// and then wait on `handoff`.
    pub fn handle(
        &mut self,
        signal: ControlSignal,
        retired: &Receiver<Generation>,
        handoff: &SyncSender<Handoff>,
    ) -> Result<Flow> {
        match signal {
            ControlSignal::Reload => self.reload(retired, handoff),
            ControlSignal::Terminate => {
                info!("stop log separator");
                self.transition(ControllerState::Stopping);
                self.retire_current(retired);
                self.shutdown(handoff);
                Ok(Flow::Exit)
            }
        }
    }

    fn reload(
        &mut self,
        retired: &Receiver<Generation>,
        handoff: &SyncSender<Handoff>,
    ) -> Result<Flow> {
        info!("reload log separator");
        self.transition(ControllerState::Reloading);

        let config = match self.source.load() {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "config reload failed, keeping previous configuration");
                self.transition(ControllerState::Running);
                return Ok(Flow::Continue);
            }
        };
        debug!("config reload complete");

        self.retire_current(retired);

        let next_id = self.generation_id + 1;
        match Generation::start(next_id, Arc::new(config)) {
            Ok(generation) => {
                self.generation_id = next_id;
                self.stop = generation.stop_token();
                if handoff.send(Handoff::Run(generation)).is_err() {
                    // The consume loop is gone; the unsent generation is
                    // dropped, which stops its tailer and closes its store.
                    self.transition(ControllerState::Stopped);
                    return Ok(Flow::Exit);
                }
                self.transition(ControllerState::Running);
                Ok(Flow::Continue)
            }
            Err(e) => {
                error!(error = %e, "error on restart with new configuration");
                self.transition(ControllerState::Stopping);
                self.shutdown(handoff);
                Err(Error::ReloadFailed { source: Box::new(e) })
            }
        }
    }

    /// Stops the live generation and waits for the consume loop to return it.
    fn retire_current(&mut self, retired: &Receiver<Generation>) {
        self.stop.stop();
        match retired.recv() {
            Ok(generation) => generation.retire(),
            Err(_) => debug!("consume loop already gone"),
        }
    }

    fn shutdown(&mut self, handoff: &SyncSender<Handoff>) {
        // The consume loop may already have exited.
        let _ = handoff.send(Handoff::Shutdown);
        self.transition(ControllerState::Stopped);
    }

    fn transition(&mut self, next: ControllerState) {
        debug!(from = %self.state, to = %next, "controller state");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Route};
    use std::fs;
    use std::path::Path;
    use std::sync::mpsc;

    fn config_for(dir: &Path) -> Config {
        Config {
            input_path: dir.join("in.log"),
            position_file_path: dir.join("logsep.pos"),
            poll_interval_ms: 10,
            routes: vec![Route::new("svc1", dir.join("out"))],
            ..Config::default()
        }
    }

    /// Starts a generation and places it on `retired` as the consume loop
    /// would once its stream ended.
    fn retired_generation(
        config: &Config,
    ) -> (StopToken, mpsc::SyncSender<Generation>, Receiver<Generation>) {
        let generation = Generation::start(1, Arc::new(config.clone())).unwrap();
        let token = generation.stop_token();
        let (tx, rx) = mpsc::sync_channel(1);
        tx.send(generation).unwrap();
        (token, tx, rx)
    }

    #[test]
    fn test_terminate_stops_and_signals_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        fs::write(&config.input_path, "").unwrap();

        let (token, _retired_tx, retired) = retired_generation(&config);
        let (handoff_tx, handoff_rx) = mpsc::sync_channel(1);
        let source = {
            let config = config.clone();
            move || -> Result<Config> { Ok(config.clone()) }
        };
        let mut controller = ReloadController::new(source, 1, token.clone());

        let flow = controller
            .handle(ControlSignal::Terminate, &retired, &handoff_tx)
            .unwrap();

        assert_eq!(flow, Flow::Exit);
        assert_eq!(controller.state(), ControllerState::Stopped);
        assert!(token.is_stopped());
        assert!(matches!(handoff_rx.try_recv(), Ok(Handoff::Shutdown)));
        assert!(config.position_file_path.exists());
    }

    #[test]
    fn test_reload_hands_over_new_generation() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        fs::write(&config.input_path, "").unwrap();

        let (token, _retired_tx, retired) = retired_generation(&config);
        let (handoff_tx, handoff_rx) = mpsc::sync_channel(1);
        let mut reloaded = config.clone();
        reloaded.routes = vec![Route::new("svc2", dir.path().join("other"))];
        let source = {
            let reloaded = reloaded.clone();
            move || -> Result<Config> { Ok(reloaded.clone()) }
        };
        let mut controller = ReloadController::new(source, 1, token.clone());

        let flow = controller
            .handle(ControlSignal::Reload, &retired, &handoff_tx)
            .unwrap();

        assert_eq!(flow, Flow::Continue);
        assert_eq!(controller.state(), ControllerState::Running);
        assert!(token.is_stopped());
        match handoff_rx.try_recv() {
            Ok(Handoff::Run(generation)) => {
                assert_eq!(generation.id(), 2);
                assert_eq!(generation.config().routes, reloaded.routes);
                assert!(!generation.stop_token().is_stopped());
            }
            _ => panic!("expected a new generation"),
        }
    }

    #[test]
    fn test_reload_with_bad_config_keeps_generation() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        fs::write(&config.input_path, "").unwrap();

        let generation = Generation::start(1, Arc::new(config.clone())).unwrap();
        let token = generation.stop_token();
        let (_retired_tx, retired) = mpsc::sync_channel::<Generation>(1);
        let (handoff_tx, handoff_rx) = mpsc::sync_channel(1);
        let source = || -> Result<Config> { Err(Error::ConfigInvalid("broken".into())) };
        let mut controller = ReloadController::new(source, 1, token.clone());

        let flow = controller
            .handle(ControlSignal::Reload, &retired, &handoff_tx)
            .unwrap();

        assert_eq!(flow, Flow::Continue);
        assert_eq!(controller.state(), ControllerState::Running);
        assert!(!token.is_stopped());
        assert!(handoff_rx.try_recv().is_err());
        drop(generation);
    }

    #[test]
    fn test_reload_failure_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        fs::write(&config.input_path, "").unwrap();

        let (token, _retired_tx, retired) = retired_generation(&config);
        let (handoff_tx, handoff_rx) = mpsc::sync_channel(1);
        let mut broken = config.clone();
        broken.input_path = dir.path().join("missing.log");
        let source = move || -> Result<Config> { Ok(broken.clone()) };
        let mut controller = ReloadController::new(source, 1, token);

        let err = controller
            .handle(ControlSignal::Reload, &retired, &handoff_tx)
            .unwrap_err();

        assert!(matches!(err, Error::ReloadFailed { .. }));
        assert_eq!(controller.state(), ControllerState::Stopped);
        assert!(matches!(handoff_rx.try_recv(), Ok(Handoff::Shutdown)));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ControllerState::Reloading.to_string(), "RELOADING");
    }
}

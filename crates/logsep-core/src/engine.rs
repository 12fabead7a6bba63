//! Composition root: generations and the consume loop.
//!
//! # Threads
//!
//! ```text
//!   consume loop (caller thread)          control thread
//!   ─────────────────────────────         ─────────────────────────
//!   owns Generation ──── lines() ──┐      waits for ControlSignal
//!                                  │      stop_token.stop()
//!   stream ends  ◄─────────────────┘
//!   send Generation ──── retired ───────► retire(): stop, persist, close
//!                                         Generation::start(new config)
//!   recv Handoff    ◄─── handoff ──────── Run(new) | Shutdown
//! ```
//!
//! The generation is moved between threads, never shared, so the consume
//! loop can only ever observe a fully constructed generation.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread;

use tracing::{debug, error, info, trace, warn};

use crate::config::{Config, ConfigSource};
use crate::controller::{ControlSignal, ReloadController};
use crate::error::{Error, Result};
use crate::identity::FileIdentity;
use crate::line::ParsedLine;
use crate::position::PositionStore;
use crate::router::Router;
use crate::tailer::{LineTailer, StopToken};

/// Message from the control thread to a consume loop waiting between generations.
pub enum Handoff {
    Run(Generation),
    Shutdown,
}

/// Configuration, position store and tailer that are live together.
pub struct Generation {
    id: u64,
    config: Arc<Config>,
    store: PositionStore,
    tailer: LineTailer,
}

impl Generation {
    /// Opens the position store, resolves the resume offset and starts tailing.
    ///
    /// Only a failure to open the input log is returned; position file
    /// problems are logged and the generation runs from offset 0.
    pub fn start(id: u64, config: Arc<Config>) -> Result<Self> {
        let mut store = match PositionStore::open(&config.position_file_path) {
            Ok(store) => store,
            Err(e) => {
                error!(error = %e, "position tracking disabled for this generation");
                PositionStore::unavailable(&config.position_file_path)
            }
        };

        let record = store.load(&config.input_path);
        let current = match FileIdentity::resolve(&config.input_path) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "assuming input log was rotated");
                None
            }
        };
        let offset = PositionStore::reconcile(&record, current);

        let tailer = LineTailer::open(&config.input_path, offset, config.poll_interval())?;
        info!(
            generation = id,
            input = %config.input_path.display(),
            offset = tailer.current_offset(),
            routes = config.routes.len(),
            "generation started"
        );

        Ok(Self {
            id,
            config,
            store,
            tailer,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn stop_token(&self) -> StopToken {
        self.tailer.stop_token()
    }

    /// Routes every delivered line until the tailer is stopped.
    pub fn consume(&mut self, router: &Router) {
        let Generation {
            id,
            config,
            store,
            tailer,
        } = self;

        for item in tailer.lines() {
            let line = match item {
                Ok(line) => line,
                Err(e) => {
                    error!(error = %e, "error on read new line");
                    continue;
                }
            };

            // Position first: a crash before routing loses this line rather
            // than duplicating it.
            if let Err(e) = store.persist(&config.input_path, line.offset, line.identity) {
                error!(error = %e, "cannot update position");
            }

            let parsed = match ParsedLine::parse(&line.text) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(generation = *id, offset = line.offset, "{}", e);
                    continue;
                }
            };

            if let Err(e) = router.dispatch(&parsed, &config.routes) {
                error!(tag = %parsed.tag, error = %e, "line dropped");
            }
        }
        trace!(generation = *id, "line stream ended");
    }

    /// Stops tailing, persists the final position and closes the store.
    pub fn retire(mut self) {
        self.tailer.stop();
        let offset = self.tailer.current_offset();
        let identity = self.tailer.current_identity();
        if let Err(e) = self.store.persist(&self.config.input_path, offset, identity) {
            error!(error = %e, "cannot persist final position");
        }
        if let Err(e) = self.store.close() {
            error!(error = %e, "cannot close position file");
        }
        debug!(generation = self.id, offset, "generation retired");
    }
}

/// Runs the log separator until terminated.
pub struct Engine<S> {
    source: S,
    router: Router,
}

impl<S: ConfigSource> Engine<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            router: Router::new(),
        }
    }

    /// Starts the first generation and consumes lines on the calling thread,
    /// handing lifecycle transitions to a control thread driven by `signals`.
    ///
    /// Returns an error when the first generation cannot start or when a
    /// reload could not start its replacement generation. A closed `signals`
    /// channel is treated as a terminate request.
    pub fn run(self, signals: Receiver<ControlSignal>) -> Result<()> {
        info!("starting log separator");
        let config = self.source.load()?;
        let mut current = Generation::start(1, Arc::new(config))?;

        let (retired_tx, retired_rx) = mpsc::sync_channel::<Generation>(1);
        let (handoff_tx, handoff_rx) = mpsc::sync_channel::<Handoff>(1);

        let controller = ReloadController::new(self.source, current.id(), current.stop_token());
        let control = thread::Builder::new()
            .name("logsep-control".into())
            .spawn(move || controller.run(signals, retired_rx, handoff_tx))
            .map_err(|source| Error::Spawn {
                name: "control",
                source,
            })?;

        loop {
            current.consume(&self.router);

            if let Err(mpsc::SendError(orphan)) = retired_tx.send(current) {
                orphan.retire();
                break;
            }
            match handoff_rx.recv() {
                Ok(Handoff::Run(next)) => {
                    info!(generation = next.id(), "reloaded");
                    current = next;
                }
                Ok(Handoff::Shutdown) | Err(_) => break,
            }
        }

        let outcome = match control.join() {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("control thread panicked");
                Ok(())
            }
        };
        info!("log separator stopped");
        outcome
    }
}

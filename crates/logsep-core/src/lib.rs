//! logsep-core — log separator engine.
//!
//! Follows one growing log file, splits every line at its first `:` into a
//! tag and a payload, and appends the payload to the output file configured
//! for that tag. The read position is persisted after each line so restarts
//! resume where they left off, and log rotation is detected by file identity.
//!
//! Provides:
//! - `config` — configuration model and the TOML loader
//! - `identity` — device/inode based file identity
//! - `position` — durable read position
//! - `tailer` — rotation-aware line follower
//! - `line` — `<tag>: <payload>` splitting
//! - `router` — per-tag destination writes
//! - `engine` — generations and the consume loop
//! - `controller` — reload/terminate state machine

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod identity;
pub mod line;
pub mod position;
pub mod router;
pub mod tailer;

pub use config::{Config, ConfigSource, Route, TomlConfigFile};
pub use controller::{ControlSignal, ControllerState, ReloadController};
pub use engine::{Engine, Generation};
pub use error::{Error, Result};
pub use identity::FileIdentity;
pub use line::ParsedLine;
pub use position::{PositionRecord, PositionStore};
pub use router::{Dispatch, Router};
pub use tailer::{LineTailer, StopToken, TailedLine};

/// Crate version, reported by the daemon.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

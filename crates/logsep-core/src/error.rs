//! Error type shared by every logsep component.
//!
//! Only `ConfigRead`/`ConfigParse`/`ConfigInvalid` (at startup), `TailOpen`
//! and `ReloadFailed` ever terminate the engine. Everything else is logged at
//! the boundary of the operation it affects and the consume loop moves on.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot read config file [{path}]: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file [{path}]: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("cannot follow input log [{path}]: {source}")]
    TailOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error reading new line from [{path}]: {source}")]
    TailRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("restart with new configuration failed, stopping: {source}")]
    ReloadFailed {
        #[source]
        source: Box<Error>,
    },

    #[error("cannot open position file [{path}]: {source}")]
    PositionOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write position file [{path}]: {source}")]
    PositionWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("position file [{path}] is not open")]
    PositionStoreClosed { path: PathBuf },

    #[error("cannot resolve file identity of [{path}]: {source}")]
    IdentityResolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("log line does not match `<name>: <message>` format")]
    MalformedLine,

    #[error("[{path}] exists but it is not a directory")]
    RouteTargetInvalid { path: PathBuf },

    #[error("cannot make log directory [{path}]: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open log file [{path}]: {source}")]
    OpenDestination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write log to [{path}]: {source}")]
    WriteDestination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

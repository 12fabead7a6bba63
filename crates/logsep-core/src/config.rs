//! Runtime configuration and the loader seam used for startup and reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default input log (LiteSpeed access log).
pub const DEFAULT_INPUT_LOG: &str = "/usr/local/lsws/logs/access.log";
/// Default position file, next to the input log.
pub const DEFAULT_POS_FILE: &str = "/usr/local/lsws/logs/logsep.pos";
/// Default period between polls of the input log for new data.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// One output destination selected by a line tag.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Route {
    /// Tag matched against the text before the first `:` of a line.
    pub name: String,
    /// Destination directory, created on demand.
    #[serde(rename = "path")]
    pub directory: PathBuf,
    /// Destination file name inside `directory`. Empty means `name`.
    #[serde(rename = "file", default)]
    pub filename: Option<String>,
}

impl Route {
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// File name written to, falling back to the route name.
    pub fn file_name(&self) -> &str {
        match self.filename.as_deref() {
            Some(f) if !f.is_empty() => f,
            _ => &self.name,
        }
    }

    /// Full path of the destination file.
    pub fn destination(&self) -> PathBuf {
        self.directory.join(self.file_name())
    }
}

/// Immutable configuration of one engine generation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "input_log")]
    pub input_path: PathBuf,
    #[serde(rename = "pos_file")]
    pub position_file_path: PathBuf,
    pub poll_interval_ms: u64,
    /// Accepted for compatibility with existing config files; not applied.
    pub user: String,
    /// Accepted for compatibility with existing config files; not applied.
    pub group: String,
    /// Ordered routes; the first route whose name matches a tag wins.
    #[serde(rename = "output_log")]
    pub routes: Vec<Route>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from(DEFAULT_INPUT_LOG),
            position_file_path: PathBuf::from(DEFAULT_POS_FILE),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            user: String::new(),
            group: String::new(),
            routes: Vec::new(),
        }
    }
}

impl Config {
    /// Parses a TOML document, applying defaults for missing keys.
    pub fn from_toml(input: &str, origin: &Path) -> Result<Self> {
        let config: Config = toml::from_str(input).map_err(|source| Error::ConfigParse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_path.as_os_str().is_empty() {
            return Err(Error::ConfigInvalid("input_log must not be empty".into()));
        }
        if self.position_file_path.as_os_str().is_empty() {
            return Err(Error::ConfigInvalid("pos_file must not be empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::ConfigInvalid(
                "poll_interval_ms must be greater than 0".into(),
            ));
        }
        for (i, route) in self.routes.iter().enumerate() {
            if route.name.is_empty() {
                return Err(Error::ConfigInvalid(format!(
                    "output_log #{} has an empty name",
                    i + 1
                )));
            }
            if route.directory.as_os_str().is_empty() {
                return Err(Error::ConfigInvalid(format!(
                    "output_log [{}] has an empty path",
                    route.name
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Produces a fresh configuration on startup and on every reload request.
pub trait ConfigSource: Send + 'static {
    fn load(&self) -> Result<Config>;
}

impl<F> ConfigSource for F
where
    F: Fn() -> Result<Config> + Send + 'static,
{
    fn load(&self) -> Result<Config> {
        self()
    }
}

/// Reads configuration from a TOML file on every `load()`.
#[derive(Debug, Clone)]
pub struct TomlConfigFile {
    path: PathBuf,
}

impl TomlConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for TomlConfigFile {
    fn load(&self) -> Result<Config> {
        let input = std::fs::read_to_string(&self.path).map_err(|source| Error::ConfigRead {
            path: self.path.clone(),
            source,
        })?;
        Config::from_toml(&input, &self.path)
    }
}

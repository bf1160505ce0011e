//! Hub settings: where to listen and how much to buffer.
//!
//! Values come from, highest priority first: command-line flags (some also
//! readable from `TASKIFY_HUB_*` variables), the `[server]` section of
//! `~/.config/taskify-hub/config.toml`, then built-in defaults. The two
//! sizing knobs are checked before the hub starts:
//!
//! - `max_frame_size` caps a single WebSocket message. Replies to a
//!   `select` travel as one frame, so it also bounds the largest result set.
//! - `event_buffer` is the per-table broadcast capacity. A subscriber that
//!   falls this many events behind lags and has to re-fetch.

use std::path::{Path, PathBuf};

use crate::hub::DEFAULT_MAX_FRAME_SIZE;
use crate::tables::DEFAULT_EVENT_BUFFER;

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9100";

/// Smallest accepted `max_frame_size`; below this a single task row may
/// not fit in a reply.
pub const MIN_FRAME_SIZE: usize = 4 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read hub config {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("hub config is not valid TOML: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A setting is out of range.
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct HubConfigFile {
    server: ServerSection,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerSection {
    bind_addr: Option<String>,
    max_frame_size: Option<usize>,
    event_buffer: Option<usize>,
}

/// Command-line flags of `taskify-hub`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Taskify realtime table hub")]
pub struct HubCliArgs {
    /// Listen address, e.g. `127.0.0.1:9100`.
    #[arg(short, long, env = "TASKIFY_HUB_ADDR")]
    pub bind: Option<String>,

    /// Config file to read instead of the default location. Must exist.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Largest WebSocket message accepted or sent, in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Change events kept per table for slow subscribers.
    #[arg(long)]
    pub event_buffer: Option<usize>,

    /// Fallback log filter when `RUST_LOG` is unset.
    #[arg(long, default_value = "info", env = "TASKIFY_HUB_LOG")]
    pub log_level: String,
}

/// Settings the hub runs with.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub bind_addr: String,
    pub max_frame_size: usize,
    pub event_buffer: usize,
    pub log_level: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            event_buffer: DEFAULT_EVENT_BUFFER,
            log_level: "info".to_string(),
        }
    }
}

impl HubConfig {
    /// Reads the config file, applies the flags on top and checks the
    /// result.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ReadFile`] if `--config` names a missing or
    ///   unreadable file. A missing default file is fine.
    /// - [`ConfigError::ParseToml`] for a malformed file.
    /// - [`ConfigError::Invalid`] if a size is out of range.
    pub fn load(cli: &HubCliArgs) -> Result<Self, ConfigError> {
        let file = read_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    fn resolve(cli: &HubCliArgs, file: &HubConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            max_frame_size: cli
                .max_frame_size
                .or(file.server.max_frame_size)
                .unwrap_or(defaults.max_frame_size),
            event_buffer: cli
                .event_buffer
                .or(file.server.event_buffer)
                .unwrap_or(defaults.event_buffer),
            log_level: cli.log_level.clone(),
        }
    }

    /// Checks the sizing knobs.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if `event_buffer` is zero or
    /// `max_frame_size` is below [`MIN_FRAME_SIZE`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "event_buffer",
                reason: "must hold at least one event".to_string(),
            });
        }
        if self.max_frame_size < MIN_FRAME_SIZE {
            return Err(ConfigError::Invalid {
                field: "max_frame_size",
                reason: format!(
                    "{} bytes is below the minimum of {MIN_FRAME_SIZE}",
                    self.max_frame_size
                ),
            });
        }
        Ok(())
    }
}

fn read_file(explicit: Option<&Path>) -> Result<HubConfigFile, ConfigError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match dirs::config_dir() {
            Some(dir) => dir.join("taskify-hub").join("config.toml"),
            None => return Ok(HubConfigFile::default()),
        },
    };
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(toml::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && explicit.is_none() => {
            Ok(HubConfigFile::default())
        }
        Err(source) => Err(ConfigError::ReadFile { path, source }),
    }
}

//! Configuration for the `taskify` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskify/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use taskify_proto::user::{Identity, UserRole};

use crate::cache::SnapshotCache;
use crate::remote::hub::HubOptions;
use crate::session::SessionOptions;
use crate::tasks::TransitionPolicy;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The hub URL is not a usable `ws://` or `wss://` URL.
    #[error("invalid hub url {url}: {reason}")]
    InvalidHubUrl { url: String, reason: String },

    /// No user id was configured.
    #[error("no user configured (set --user, TASKIFY_USER or [identity] user_id)")]
    MissingUser,

    /// The configured role is not a known user role.
    #[error("invalid role: {0}")]
    InvalidRole(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    hub: HubFileConfig,
    identity: IdentityFileConfig,
    sync: SyncFileConfig,
    views: ViewsFileConfig,
}

/// `[hub]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct HubFileConfig {
    url: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

/// `[identity]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct IdentityFileConfig {
    user_id: Option<String>,
    email: Option<String>,
    name: Option<String>,
    role: Option<String>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    notice_buffer: Option<usize>,
    signal_buffer: Option<usize>,
    resubscribe_delay_ms: Option<u64>,
    enforce_workflow: Option<bool>,
    cache_path: Option<PathBuf>,
    cache_enabled: Option<bool>,
}

/// `[views]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ViewsFileConfig {
    due_soon_days: Option<u32>,
    recent_limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Hub --
    /// Hub WebSocket URL.
    pub hub_url: String,
    /// Timeout for connecting to the hub.
    pub connect_timeout: Duration,
    /// Timeout for each hub request.
    pub request_timeout: Duration,

    // -- Identity --
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,

    // -- Sync --
    /// Capacity of the notice channel.
    pub notice_buffer: usize,
    /// Capacity of the feed signal channel.
    pub signal_buffer: usize,
    /// Wait before a listener retries a failed subscription.
    pub resubscribe_delay: Duration,
    /// Only allow workflow status transitions.
    pub enforce_workflow: bool,
    /// Snapshot location; `None` means the platform cache directory.
    pub cache_path: Option<PathBuf>,
    pub cache_enabled: bool,

    // -- Views --
    /// Window of the "due soon" list, in days.
    pub due_soon_days: u32,
    /// Length of the "recent" list.
    pub recent_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hub_url: "ws://127.0.0.1:9100/ws".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(15),
            user_id: None,
            email: None,
            name: None,
            role: None,
            notice_buffer: 64,
            signal_buffer: 256,
            resubscribe_delay: Duration::from_millis(500),
            enforce_workflow: false,
            cache_path: None,
            cache_enabled: true,
            due_soon_days: 3,
            recent_limit: 5,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if the resulting hub URL is invalid.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        validate_hub_url(&config.hub_url)?;
        Ok(config)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            hub_url: cli
                .hub_url
                .clone()
                .or_else(|| file.hub.url.clone())
                .unwrap_or(defaults.hub_url),
            connect_timeout: file
                .hub
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: file
                .hub
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            user_id: cli.user.clone().or_else(|| file.identity.user_id.clone()),
            email: cli.email.clone().or_else(|| file.identity.email.clone()),
            name: cli.name.clone().or_else(|| file.identity.name.clone()),
            role: file.identity.role.clone(),
            notice_buffer: file.sync.notice_buffer.unwrap_or(defaults.notice_buffer),
            signal_buffer: file.sync.signal_buffer.unwrap_or(defaults.signal_buffer),
            resubscribe_delay: file
                .sync
                .resubscribe_delay_ms
                .map_or(defaults.resubscribe_delay, Duration::from_millis),
            enforce_workflow: cli.workflow
                || file.sync.enforce_workflow.unwrap_or(defaults.enforce_workflow),
            cache_path: file.sync.cache_path.clone(),
            cache_enabled: !cli.no_cache
                && file.sync.cache_enabled.unwrap_or(defaults.cache_enabled),
            due_soon_days: file.views.due_soon_days.unwrap_or(defaults.due_soon_days),
            recent_limit: file.views.recent_limit.unwrap_or(defaults.recent_limit),
        }
    }

    /// The identity to sign in with.
    ///
    /// The display name falls back to the user id.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingUser`] without a user id,
    /// [`ConfigError::InvalidRole`] for an unknown role.
    pub fn identity(&self) -> Result<Identity, ConfigError> {
        let user_id = self
            .user_id
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or(ConfigError::MissingUser)?;
        let role = match &self.role {
            Some(role) => role
                .parse::<UserRole>()
                .map_err(|e| ConfigError::InvalidRole(e.to_string()))?,
            None => UserRole::default(),
        };
        let name = self.name.clone().unwrap_or_else(|| user_id.clone());
        Ok(Identity::new(user_id, name, self.email.clone().unwrap_or_default()).with_role(role))
    }

    #[must_use]
    pub fn hub_options(&self) -> HubOptions {
        HubOptions {
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            ..HubOptions::default()
        }
    }

    /// Session tunables. A cache that cannot be located is disabled.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        let cache = if self.cache_enabled {
            self.cache_path.clone().map_or_else(
                || {
                    SnapshotCache::at_default_path()
                        .inspect_err(|e| tracing::warn!(error = %e, "snapshot cache disabled"))
                        .ok()
                },
                |path| Some(SnapshotCache::new(path)),
            )
        } else {
            None
        };
        SessionOptions {
            notice_buffer: self.notice_buffer,
            signal_buffer: self.signal_buffer,
            resubscribe_delay: self.resubscribe_delay,
            policy: if self.enforce_workflow {
                TransitionPolicy::Workflow
            } else {
                TransitionPolicy::Permissive
            },
            cache,
        }
    }
}

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Tasks and teams, synced in real time")]
pub struct CliArgs {
    /// WebSocket URL of the hub.
    #[arg(long, env = "TASKIFY_HUB_URL")]
    pub hub_url: Option<String>,

    /// User id to sign in as.
    #[arg(short, long, env = "TASKIFY_USER")]
    pub user: Option<String>,

    /// Email recorded on your profile.
    #[arg(long, env = "TASKIFY_EMAIL")]
    pub email: Option<String>,

    /// Display name recorded on your profile.
    #[arg(long, env = "TASKIFY_NAME")]
    pub name: Option<String>,

    /// Path to config file (default: `~/.config/taskify/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Only allow `todo → in-progress → review → completed` and reopening.
    #[arg(long)]
    pub workflow: bool,

    /// Do not read or write the snapshot cache.
    #[arg(long)]
    pub no_cache: bool,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKIFY_LOG")]
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands. Without one, `summary` runs.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Dashboard counters, due-soon and recent tasks.
    Summary,
    /// List tasks.
    List {
        /// Case-insensitive text in title or description.
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        /// Only tasks assigned to you.
        #[arg(long)]
        mine: bool,
    },
    /// Create a task.
    Add {
        title: String,
        /// Due date as `YYYY-MM-DD` or RFC 3339.
        #[arg(long)]
        due: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long)]
        priority: Option<String>,
        /// User id to assign the task to.
        #[arg(long)]
        assign: Option<String>,
        /// Team id the task belongs to.
        #[arg(long)]
        team: Option<String>,
    },
    /// Set a task's status.
    Status { id: String, status: String },
    /// Move a task one step along the workflow.
    Advance { id: String },
    /// Move a completed task back to todo.
    Reopen { id: String },
    /// Assign a task; omit the user to unassign.
    Assign { id: String, user: Option<String> },
    /// Delete a task.
    Delete { id: String },
    /// List your teams.
    Teams,
    /// Create a team.
    TeamCreate {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Join a team by join code.
    Join { code: String },
    /// Leave a team.
    Leave { team: String },
    /// List the members of a team (default: current team).
    Members { team: Option<String> },
    /// Print change notices until interrupted.
    Watch,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn validate_hub_url(raw: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidHubUrl {
        url: raw.to_string(),
        reason,
    };
    let url = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(invalid(format!("scheme must be ws or wss, got {other}"))),
    }
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("taskify").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

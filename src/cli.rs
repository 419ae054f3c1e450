//! Command-line surface: arguments, `[user@]host:path` targets, JSON profiles
//! and local path expansion.

use clap::{ArgAction, Args, Parser, Subcommand};
use scp_engine::scp::{AckCadence, EngineOptions, ScpConnectionConfig};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Parser)]
#[command(
    name = "scp-copy",
    version,
    about = "Copy single files to and from remote hosts over the legacy SCP protocol"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub engine: EngineArgs,

    /// JSON profile with `connection` and `engine` sections
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send local files to a remote machine
    Send {
        /// One or more `[user@]host:local_file` targets
        #[arg(required = true, value_name = "[USER@]HOST:FILE")]
        targets: Vec<String>,

        /// Remote directory the files are placed in
        #[arg(short = 'd', long = "remote-dir", default_value = "./")]
        remote_dir: String,

        /// Name announced to the remote (single target only)
        #[arg(long)]
        name: Option<String>,
    },

    /// Fetch one remote file into a local directory
    Receive {
        /// `[user@]host:remote_path`
        #[arg(value_name = "[USER@]HOST:PATH")]
        source: String,

        /// Local destination directory
        #[arg(value_name = "LOCAL_DIR", default_value = ".")]
        local_dir: PathBuf,

        /// Store the file under this name instead of the remote one
        #[arg(long)]
        name: Option<String>,
    },

    /// Run a command on the remote host and print its output
    Exec {
        /// `[user@]host`
        #[arg(value_name = "[USER@]HOST")]
        host: String,

        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

#[derive(Debug, Args)]
pub struct ConnectionArgs {
    /// The port to connect to the remote host on
    #[arg(short = 'p', long, global = true)]
    pub port: Option<u16>,

    /// The username to connect to the remote host with
    #[arg(short = 'u', long, global = true)]
    pub username: Option<String>,

    /// Private key file
    #[arg(short = 'i', long, global = true, value_name = "PATH")]
    pub identity: Option<PathBuf>,

    /// Authenticate through the running ssh-agent
    #[arg(long, global = true)]
    pub agent: bool,

    /// Read the password from this environment variable
    #[arg(long = "password-env", global = true, value_name = "VAR")]
    pub password_env: Option<String>,

    /// TCP connect timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Args)]
pub struct EngineArgs {
    /// Acknowledge every received byte (legacy cadence)
    #[arg(long = "per-byte-ack", global = true)]
    pub per_byte_ack: bool,

    /// Fail a download whose body is shorter than announced
    #[arg(long = "enforce-size", global = true)]
    pub enforce_size: bool,

    /// Keep partially received files on failure
    #[arg(long = "keep-partial", global = true)]
    pub keep_partial: bool,

    /// Remote scp program
    #[arg(long = "scp-program", global = true, value_name = "PATH")]
    pub scp_program: Option<String>,
}

// ── Profile ──────────────────────────────────────────────────────────────────

/// Settings loaded from `--config`. Command-line flags win over these.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub connection: ConnectionProfile,
    #[serde(default)]
    pub engine: EngineOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    pub port: Option<u16>,
    pub username: Option<String>,
    pub private_key_path: Option<String>,
    pub private_key_passphrase: Option<String>,
    pub use_agent: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub keepalive_interval_secs: Option<u64>,
    pub compress: Option<bool>,
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read profile '{}': {}", path.display(), e))?;
        Self::parse(&text).map_err(|e| format!("Invalid profile '{}': {}", path.display(), e))
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| e.to_string())
    }
}

// ── Remote targets ───────────────────────────────────────────────────────────

/// A parsed `[user@]host:path` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub user: Option<String>,
    pub host: String,
    pub path: String,
}

impl RemoteTarget {
    /// `[user@]host:path`; the colon is mandatory.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (host_part, path) = s
            .split_once(':')
            .ok_or_else(|| format!("'{}' is not of the form [user@]host:path", s))?;
        let mut target = Self::parse_host(host_part)?;
        target.path = path.to_string();
        Ok(target)
    }

    /// `[user@]host`, with an optional trailing colon.
    pub fn parse_host(s: &str) -> Result<Self, String> {
        let s = s.strip_suffix(':').unwrap_or(s);
        let (user, host) = match s.rsplit_once('@') {
            Some((u, h)) if !u.is_empty() => (Some(u.to_string()), h),
            Some((_, h)) => (None, h),
            None => (None, s),
        };
        if host.is_empty() {
            return Err(format!("'{}' has no host", s));
        }
        Ok(Self {
            user,
            host: host.to_string(),
            path: String::new(),
        })
    }
}

/// Split a remote file path into directory and file name.
pub fn split_remote_path(path: &str) -> Result<(String, String), String> {
    let (dir, name) = match path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((dir, name)) => (dir, name),
        None => ("", path),
    };
    if name.is_empty() {
        return Err(format!("'{}' does not name a file", path));
    }
    Ok((dir.to_string(), name.to_string()))
}

// ── Local paths ──────────────────────────────────────────────────────────────

/// Make `path` absolute against the current directory and fold `.` / `..`.
pub fn expand_path(path: &Path) -> Result<PathBuf, String> {
    let path = expand_home(path);
    if path.is_absolute() {
        return Ok(normalize(&path));
    }
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Failed to get current directory: {}", e))?;
    Ok(normalize(&cwd.join(path)))
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` above the root stays at the root.
                if !out.pop() && !out.has_root() {
                    out.push(comp);
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn default_username() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|u| !u.is_empty())
}

// ── Flag / profile layering ──────────────────────────────────────────────────

impl Cli {
    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Build the connection for `target`: defaults, then profile, then flags, then the target's user.
    pub fn connection_config(
        &self,
        profile: &Profile,
        target: &RemoteTarget,
    ) -> Result<ScpConnectionConfig, String> {
        let p = &profile.connection;
        let args = &self.connection;

        let username = target
            .user
            .clone()
            .or_else(|| args.username.clone())
            .or_else(|| p.username.clone())
            .or_else(default_username)
            .ok_or("Cannot determine the remote username; pass -u")?;

        let mut config = ScpConnectionConfig::new(target.host.clone(), username);
        if let Some(port) = args.port.or(p.port) {
            config.port = port;
        }
        if let Some(t) = args.timeout.or(p.timeout_secs) {
            config.timeout_secs = t;
        }
        if let Some(k) = p.keepalive_interval_secs {
            config.keepalive_interval_secs = k;
        }
        config.compress = p.compress.unwrap_or(false);
        config.private_key_passphrase = p.private_key_passphrase.clone();
        config.private_key_path = match args.identity {
            Some(ref id) => Some(expand_path(id)?.display().to_string()),
            None => p.private_key_path.clone(),
        };
        if let Some(ref var) = args.password_env {
            let password = std::env::var(var)
                .map_err(|_| format!("Environment variable '{}' is not set", var))?;
            config.password = Some(password);
        }
        config.use_agent = args.agent
            || p.use_agent.unwrap_or(false)
            || (config.private_key_path.is_none()
                && config.password.is_none()
                && std::env::var_os("SSH_AUTH_SOCK").is_some());

        config.validate()?;
        Ok(config)
    }

    pub fn engine_options(&self, profile: &Profile) -> EngineOptions {
        let mut opts = profile.engine.clone();
        if self.engine.per_byte_ack {
            opts.ack_cadence = AckCadence::PerByte;
        }
        if self.engine.enforce_size {
            opts.enforce_size = true;
        }
        if self.engine.keep_partial {
            opts.keep_partial = true;
        }
        if let Some(ref program) = self.engine.scp_program {
            opts.scp_program = program.clone();
        }
        opts
    }
}

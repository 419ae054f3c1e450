// ── Types ─────────────────────────────────────────────────────────────────────

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::channel::RemoteCommand;
use super::error::{ScpError, ScpResult};
use super::service::ScpService;

// ── Serde default helpers ────────────────────────────────────────────────────

fn default_scp_port() -> u16 {
    22
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_keepalive_secs() -> u64 {
    60
}
fn default_scp_program() -> String {
    "scp".into()
}
fn default_chunk_size() -> usize {
    32 * 1024
}
fn default_header_limit() -> usize {
    500
}
fn default_remote_dir() -> String {
    "./".into()
}

// ── Connection & Authentication ──────────────────────────────────────────────

/// Configuration for establishing the SSH session an SCP transfer runs over.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScpConnectionConfig {
    pub host: String,
    #[serde(default = "default_scp_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<String>,
    #[serde(default)]
    pub private_key_passphrase: Option<String>,
    #[serde(default)]
    pub private_key_data: Option<String>,
    #[serde(default = "default_false")]
    pub use_agent: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_interval_secs: u64,
    #[serde(default = "default_false")]
    pub compress: bool,
    #[serde(default)]
    pub label: Option<String>,
}

impl ScpConnectionConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_scp_port(),
            username: username.into(),
            password: None,
            private_key_path: None,
            private_key_passphrase: None,
            private_key_data: None,
            use_agent: false,
            timeout_secs: default_timeout_secs(),
            keepalive_interval_secs: default_keepalive_secs(),
            compress: false,
            label: None,
        }
    }

    pub fn validate(&self) -> ScpResult<()> {
        if self.host.trim().is_empty() {
            return Err(ScpError::invalid_config("host must not be empty"));
        }
        if self.username.trim().is_empty() {
            return Err(ScpError::invalid_config("username must not be empty"));
        }
        if self.port == 0 {
            return Err(ScpError::invalid_config("port must be non-zero"));
        }
        Ok(())
    }
}

// ── Engine options ───────────────────────────────────────────────────────────

/// How the sink acknowledges body bytes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum AckCadence {
    /// Read the declared size in chunks, then acknowledge the trailing status byte once.
    #[default]
    Bulk,
    /// Acknowledge every body byte and read until end-of-stream.
    PerByte,
}

/// How nonzero acknowledgment bytes are interpreted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum AckPolicy {
    /// 0x01 / 0x02 carry a message and fail the transfer; anything else is a protocol error.
    #[default]
    Strict,
    /// Any received byte means "proceed".
    Lenient,
}

/// Knobs shared by the source and sink engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineOptions {
    #[serde(default = "default_scp_program")]
    pub scp_program: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub ack_cadence: AckCadence,
    #[serde(default)]
    pub ack_policy: AckPolicy,
    /// Treat end-of-stream before the declared size as a protocol error.
    #[serde(default = "default_false")]
    pub enforce_size: bool,
    /// Apply the header permission bits to the received file (unix only).
    #[serde(default = "default_true")]
    pub preserve_mode: bool,
    /// Leave a partially received file in place when the download fails.
    #[serde(default = "default_false")]
    pub keep_partial: bool,
    #[serde(default = "default_header_limit")]
    pub header_limit: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            scp_program: default_scp_program(),
            chunk_size: default_chunk_size(),
            ack_cadence: AckCadence::default(),
            ack_policy: AckPolicy::default(),
            enforce_size: false,
            preserve_mode: true,
            keep_partial: false,
            header_limit: default_header_limit(),
        }
    }
}

impl EngineOptions {
    pub fn validate(&self) -> ScpResult<()> {
        if self.scp_program.trim().is_empty() {
            return Err(ScpError::invalid_config("scp program must not be empty"));
        }
        if self.chunk_size == 0 {
            return Err(ScpError::invalid_config("chunk size must be non-zero"));
        }
        // Smallest legal record is "C0 0 x\n".
        if self.header_limit < 8 {
            return Err(ScpError::invalid_config("header limit is too small"));
        }
        Ok(())
    }
}

// ── Transfer descriptor ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ScpTransferDirection {
    Upload,
    Download,
}

/// Everything one invocation needs to know about what moves where.
///
/// Upload: `local_path` is the file to send, `remote_directive` the remote
/// target directory, `file_name` an optional override for the header name.
///
/// Download: `local_path` is the destination directory, `remote_directive`
/// the remote directory, `file_name` the remote file name, and `local_name`
/// an optional override for the header-derived destination name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferDescriptor {
    pub direction: ScpTransferDirection,
    pub local_path: PathBuf,
    pub remote_directive: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub local_name: Option<String>,
}

impl TransferDescriptor {
    pub fn upload(local_file: impl Into<PathBuf>, remote_dir: impl Into<String>) -> Self {
        Self {
            direction: ScpTransferDirection::Upload,
            local_path: local_file.into(),
            remote_directive: remote_dir.into(),
            file_name: None,
            local_name: None,
        }
    }

    pub fn download(
        remote_dir: impl Into<String>,
        remote_name: impl Into<String>,
        local_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            direction: ScpTransferDirection::Download,
            local_path: local_dir.into(),
            remote_directive: remote_dir.into(),
            file_name: Some(remote_name.into()),
            local_name: None,
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    /// The remote path this transfer touches, for logs and results.
    pub fn remote_path(&self) -> String {
        match (self.direction, self.file_name.as_deref()) {
            (ScpTransferDirection::Download, Some(name)) => {
                join_remote(&self.remote_directive, name)
            }
            _ => self.remote_directive.clone(),
        }
    }

    /// The remote scp invocation that pairs with this side's role.
    pub fn remote_command(&self) -> ScpResult<RemoteCommand> {
        match self.direction {
            ScpTransferDirection::Upload => {
                let target = if self.remote_directive.is_empty() {
                    default_remote_dir()
                } else {
                    self.remote_directive.clone()
                };
                Ok(RemoteCommand::Sink { target })
            }
            ScpTransferDirection::Download => {
                let name = self
                    .file_name
                    .as_deref()
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| {
                        ScpError::invalid_config("download requires a remote file name")
                    })?;
                Ok(RemoteCommand::Source {
                    path: join_remote(&self.remote_directive, name),
                })
            }
        }
    }
}

/// `dir` + "/" + `name`, without doubling the separator.
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

// ── Session ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScpSessionInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_method: String,
    pub connected: bool,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub server_banner: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub transfers_count: u64,
    pub server_fingerprint: Option<String>,
}

/// Type alias for the managed state.
pub type ScpServiceState = Arc<Mutex<ScpService>>;

// ── Transfer requests ────────────────────────────────────────────────────────

/// Request to push one local file to a remote directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScpUploadRequest {
    pub session_id: String,
    pub local_path: String,
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,
    /// Name announced in the header; defaults to the local base name.
    #[serde(default)]
    pub remote_name: Option<String>,
    #[serde(default)]
    pub engine: EngineOptions,
}

/// Request to pull one remote file into a local directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScpDownloadRequest {
    pub session_id: String,
    pub remote_dir: String,
    pub remote_name: String,
    pub local_dir: String,
    /// Destination name; defaults to the name in the remote header.
    #[serde(default)]
    pub local_name: Option<String>,
    #[serde(default)]
    pub engine: EngineOptions,
}

// ── Transfer result ──────────────────────────────────────────────────────────

/// Terminal state of one engine run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferOutcome {
    Done,
    /// The remote source closed the channel without announcing a file.
    NoFile,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScpTransferResult {
    pub transfer_id: String,
    pub direction: ScpTransferDirection,
    pub local_path: String,
    pub remote_path: String,
    pub bytes_transferred: u64,
    pub duration_ms: u64,
    pub average_speed: f64,
    pub success: bool,
    pub error: Option<String>,
    pub remote_exit_status: Option<i32>,
}

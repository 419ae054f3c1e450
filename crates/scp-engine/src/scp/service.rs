// ── ScpService – session lifecycle management ───────────────────────────────

use crate::scp::error::{ScpError, ScpResult};
use crate::scp::types::*;
use chrono::Utc;
use log::{debug, info, warn};
use ssh2::Session;
use std::collections::HashMap;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

// ── Internal session handle ──────────────────────────────────────────────────

pub(crate) struct ScpSessionHandle {
    pub info: ScpSessionInfo,
    pub session: Session,
}

// ── Service struct ───────────────────────────────────────────────────────────

pub struct ScpService {
    pub(crate) sessions: HashMap<String, ScpSessionHandle>,
}

impl ScpService {
    /// Create a new ScpService wrapped in the managed state type.
    pub fn new() -> ScpServiceState {
        Arc::new(Mutex::new(ScpService {
            sessions: HashMap::new(),
        }))
    }

    // ── Connect ──────────────────────────────────────────────────────────────

    /// Establish an SSH session for SCP transfers.
    pub async fn connect(&mut self, config: ScpConnectionConfig) -> ScpResult<ScpSessionInfo> {
        config.validate()?;
        let addr = format!("{}:{}", config.host, config.port);
        info!("SCP connecting to {}", addr);

        let tcp = connect_tcp(&addr, Duration::from_secs(config.timeout_secs))?;

        let mut session = Session::new()
            .map_err(|e| ScpError::connection_failed(format!("Failed to create SSH session: {}", e)))?;
        if config.compress {
            session.set_compress(true);
        }
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| ScpError::connection_failed(format!("SSH handshake with {} failed: {}", addr, e)))?;

        let banner = session.banner().map(|b| b.to_string());
        let fingerprint = session
            .host_key_hash(ssh2::HashType::Sha256)
            .map(format_fingerprint);
        if let Some(ref fp) = fingerprint {
            debug!("SCP host key for {}: {}", addr, fp);
        }

        let auth_method = self.authenticate(&mut session, &config)?;
        if !session.authenticated() {
            return Err(ScpError::auth_failed(
                "not authenticated after auth attempt",
            ));
        }
        info!("SCP authenticated to {} via {}", addr, auth_method);

        let keepalive_interval = config.keepalive_interval_secs;
        session.set_keepalive(keepalive_interval > 0, keepalive_interval as u32);

        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let info = ScpSessionInfo {
            id: session_id.clone(),
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            auth_method,
            connected: true,
            label: config.label.clone(),
            server_banner: banner,
            connected_at: now,
            last_activity: now,
            bytes_uploaded: 0,
            bytes_downloaded: 0,
            transfers_count: 0,
            server_fingerprint: fingerprint,
        };

        self.sessions.insert(
            session_id,
            ScpSessionHandle {
                info: info.clone(),
                session,
            },
        );

        Ok(info)
    }

    /// Reuse a live session for the same endpoint and user, or open a new one.
    pub async fn ensure_session(&mut self, config: ScpConnectionConfig) -> ScpResult<ScpSessionInfo> {
        if let Some(info) = self.find_session(&config) {
            debug!("SCP reusing session {} for {}@{}", info.id, info.username, info.host);
            return Ok(info);
        }
        self.connect(config).await
    }

    fn find_session(&self, config: &ScpConnectionConfig) -> Option<ScpSessionInfo> {
        self.sessions
            .values()
            .find(|h| {
                h.info.connected
                    && h.info.host == config.host
                    && h.info.port == config.port
                    && h.info.username == config.username
            })
            .map(|h| h.info.clone())
    }

    // ── Disconnect ───────────────────────────────────────────────────────────

    pub async fn disconnect(&mut self, session_id: &str) -> ScpResult<()> {
        let handle = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| ScpError::session_not_found(session_id))?;
        info!("SCP disconnecting session {}", session_id);
        if let Err(e) = handle.session.disconnect(None, "Client disconnecting", None) {
            debug!("SCP disconnect of {} reported: {}", session_id, e);
        }
        Ok(())
    }

    /// Disconnect all active sessions.
    pub async fn disconnect_all(&mut self) -> u32 {
        let ids: Vec<String> = self.sessions.keys().cloned().collect();
        let count = ids.len() as u32;
        for id in ids {
            let _ = self.disconnect(&id).await;
        }
        count
    }

    // ── Session queries ──────────────────────────────────────────────────────

    pub async fn get_session_info(&self, session_id: &str) -> ScpResult<ScpSessionInfo> {
        self.sessions
            .get(session_id)
            .map(|h| h.info.clone())
            .ok_or_else(|| ScpError::session_not_found(session_id))
    }

    pub async fn list_sessions(&self) -> Vec<ScpSessionInfo> {
        self.sessions.values().map(|h| h.info.clone()).collect()
    }

    // ── Authentication ───────────────────────────────────────────────────────

    pub(crate) fn authenticate(
        &self,
        session: &mut Session,
        config: &ScpConnectionConfig,
    ) -> ScpResult<String> {
        // 1. Agent auth
        if config.use_agent {
            if session.userauth_agent(&config.username).is_ok() && session.authenticated() {
                return Ok("agent".into());
            }
            warn!("SCP agent auth failed for {}, trying other methods", config.username);
        }

        let passphrase = config.private_key_passphrase.as_deref();

        // 2. Private key from memory
        if let Some(ref key_data) = config.private_key_data {
            if session
                .userauth_pubkey_memory(&config.username, None, key_data, passphrase)
                .is_ok()
                && session.authenticated()
            {
                return Ok("publickey-memory".into());
            }
            warn!("SCP publickey-memory auth failed for {}", config.username);
        }

        // 3. Private key from file
        if let Some(ref key_path) = config.private_key_path {
            let path = Path::new(key_path);
            if !path.exists() {
                return Err(ScpError::invalid_config(format!(
                    "identity file '{}' does not exist",
                    key_path
                )));
            }
            if session
                .userauth_pubkey_file(&config.username, None, path, passphrase)
                .is_ok()
                && session.authenticated()
            {
                return Ok("publickey-file".into());
            }
            warn!("SCP publickey-file auth failed for {}", config.username);
        }

        // 4. Default key files (~/.ssh/id_ed25519, id_rsa, ...)
        if let Some(home) = dirs::home_dir() {
            let ssh_dir = home.join(".ssh");
            for key_name in &["id_ed25519", "id_rsa", "id_ecdsa"] {
                let key_path = ssh_dir.join(key_name);
                if key_path.exists()
                    && session
                        .userauth_pubkey_file(&config.username, None, &key_path, passphrase)
                        .is_ok()
                    && session.authenticated()
                {
                    return Ok(format!("publickey-default({})", key_name));
                }
            }
        }

        // 5. Password auth
        if let Some(ref password) = config.password {
            if session.userauth_password(&config.username, password).is_ok()
                && session.authenticated()
            {
                return Ok("password".into());
            }
            warn!("SCP password auth failed for {}", config.username);
        }

        Err(ScpError::auth_failed(format!(
            "All authentication methods exhausted for user '{}'",
            config.username
        )))
    }

    // ── Execute remote command ───────────────────────────────────────────────

    /// Run `command` on the remote host and return its trimmed stdout.
    pub fn exec_remote(&mut self, session_id: &str, command: &str) -> ScpResult<String> {
        let handle = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| ScpError::session_not_found(session_id))?;

        let mut channel = handle
            .session
            .channel_session()
            .map_err(|e| ScpError::transport(format!("Failed to open channel: {}", e)))?;
        channel.exec(command).map_err(|e| {
            ScpError::transport(format!("Failed to execute command '{}': {}", command, e))
        })?;
        debug!("SCP exec on {}: {}", session_id, command);

        let mut output = String::new();
        channel
            .read_to_string(&mut output)
            .map_err(|e| ScpError::channel_io("reading command output", e))?;
        let mut stderr = String::new();
        let _ = channel.stderr().read_to_string(&mut stderr);
        channel.wait_close()?;
        let status = channel.exit_status()?;
        handle.info.last_activity = Utc::now();

        if status != 0 {
            let detail = if stderr.trim().is_empty() {
                output.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(ScpError::remote(format!(
                "'{}' exited with status {}: {}",
                command, status, detail
            ))
            .with_session(session_id));
        }

        Ok(output.trim().to_string())
    }

    // ── Update session activity stats ────────────────────────────────────────

    pub(crate) fn update_activity(&mut self, session_id: &str, uploaded: u64, downloaded: u64) {
        if let Some(handle) = self.sessions.get_mut(session_id) {
            handle.info.last_activity = Utc::now();
            handle.info.bytes_uploaded += uploaded;
            handle.info.bytes_downloaded += downloaded;
            handle.info.transfers_count += 1;
        }
    }

    // ── Get raw SSH session (for transfer engine) ────────────────────────────

    pub(crate) fn get_session(&self, session_id: &str) -> ScpResult<Session> {
        self.sessions
            .get(session_id)
            .map(|h| h.session.clone())
            .ok_or_else(|| ScpError::session_not_found(session_id))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Try every resolved address in turn, each bounded by `timeout`.
fn connect_tcp(addr: &str, timeout: Duration) -> ScpResult<TcpStream> {
    let candidates = addr
        .to_socket_addrs()
        .map_err(|e| ScpError::connection_failed(format!("Invalid address '{}': {}", addr, e)))?;

    let mut last_err = None;
    for sock in candidates {
        match TcpStream::connect_timeout(&sock, timeout) {
            Ok(tcp) => {
                tcp.set_nonblocking(false).map_err(|e| {
                    ScpError::connection_failed(format!("Failed to set blocking mode: {}", e))
                })?;
                return Ok(tcp);
            }
            Err(e) => {
                debug!("SCP connect to {} failed: {}", sock, e);
                last_err = Some(e);
            }
        }
    }
    Err(ScpError::connection_failed(match last_err {
        Some(e) => format!("TCP connection to {} failed: {}", addr, e),
        None => format!("'{}' did not resolve to any address", addr),
    }))
}

pub(crate) fn format_fingerprint(hash: &[u8]) -> String {
    let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD_NO_PAD, hash);
    format!("SHA256:{}", encoded)
}

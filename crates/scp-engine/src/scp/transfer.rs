// ── Transfer glue – remote command + engine task over one channel ────────────

use crate::scp::channel::{CommandChannel, ScpTransport};
use crate::scp::error::{ScpError, ScpResult};
use crate::scp::service::ScpService;
use crate::scp::sink::SinkEngine;
use crate::scp::source::SourceEngine;
use crate::scp::ssh::Ssh2Transport;
use crate::scp::types::*;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

/// What happened during one transfer.
#[derive(Debug)]
pub struct TransferReport {
    pub direction: ScpTransferDirection,
    pub outcome: TransferOutcome,
    pub bytes_transferred: u64,
    /// File sent (upload) or written (download).
    pub local_file: Option<PathBuf>,
    pub remote_path: String,
    /// Everything drained from the error sink, in order, plus remote exit failures.
    pub errors: Vec<ScpError>,
    pub remote_exit: Option<i32>,
    pub duration: Duration,
}

impl TransferReport {
    pub fn is_success(&self) -> bool {
        self.outcome != TransferOutcome::Failed && self.errors.is_empty()
    }

    /// Collapse into the first recorded error when the transfer failed.
    pub fn into_result(mut self) -> ScpResult<Self> {
        if self.is_success() {
            return Ok(self);
        }
        if self.errors.is_empty() {
            return Err(ScpError::internal("transfer failed without an error report"));
        }
        Err(self.errors.remove(0))
    }
}

struct EngineResult {
    outcome: TransferOutcome,
    bytes: u64,
    local_file: Option<PathBuf>,
}

/// Run one single-file transfer over a fresh command channel.
///
/// The remote scp is started first, the engine then runs on a blocking task,
/// and the remote command is reaped once the engine has closed its write side.
pub async fn execute(
    transport: &dyn ScpTransport,
    descriptor: &TransferDescriptor,
    options: &EngineOptions,
) -> ScpResult<TransferReport> {
    options.validate()?;
    let command = descriptor
        .remote_command()?
        .command_line(&options.scp_program);
    let remote_path = descriptor.remote_path();
    let started = Instant::now();

    let CommandChannel {
        mut writer,
        mut reader,
        mut run,
    } = transport.open_command_channel()?;
    if let Err(e) = run.start(&command) {
        if let Err(close_err) = writer.close() {
            debug!("SCP closing channel input: {}", close_err);
        }
        return Err(e);
    }
    info!(
        "SCP {:?} started: {} <-> {}",
        descriptor.direction,
        descriptor.local_path.display(),
        remote_path
    );

    let (err_tx, mut err_rx) = mpsc::unbounded_channel::<ScpError>();
    let desc = descriptor.clone();
    let opts = options.clone();
    let engine = tokio::task::spawn_blocking(move || {
        // Progress is kept on failure so the caller sees how far it got.
        let (result, bytes, local_file) = match desc.direction {
            ScpTransferDirection::Upload => match SourceEngine::from_descriptor(&desc, opts) {
                Ok(mut engine) => {
                    let r = engine.run(&mut *reader, &mut *writer).map(|_| TransferOutcome::Done);
                    (r, engine.bytes_sent(), Some(desc.local_path.clone()))
                }
                Err(e) => (Err(e), 0, None),
            },
            ScpTransferDirection::Download => match SinkEngine::from_descriptor(&desc, opts) {
                Ok(mut engine) => {
                    let r = engine.run(&mut *reader, &mut *writer);
                    let local_file = engine.destination().map(|p| p.to_path_buf());
                    (r, engine.bytes_received(), local_file)
                }
                Err(e) => (Err(e), 0, None),
            },
        };

        if let Err(e) = writer.close() {
            debug!("SCP closing channel input: {}", e);
        }

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = err_tx.send(e);
                TransferOutcome::Failed
            }
        };
        EngineResult {
            outcome,
            bytes,
            local_file,
        }
    });

    let mut errors = Vec::new();
    while let Some(e) = err_rx.recv().await {
        error!("SCP transfer to {} failed: {}", remote_path, e);
        errors.push(e);
    }
    // Reap the remote command even when the engine task itself died.
    let joined = engine.await;

    let remote_exit = match tokio::task::spawn_blocking(move || run.wait()).await? {
        Ok(status) => status,
        Err(e) => {
            warn!("SCP remote command did not finish cleanly: {}", e);
            errors.push(e);
            None
        }
    };
    let result = joined?;
    if let Some(code) = remote_exit.filter(|c| *c != 0) {
        warn!("SCP remote '{}' exited with status {}", command, code);
        errors.push(ScpError::remote(format!(
            "remote scp exited with status {}",
            code
        )));
    }

    let outcome = if errors.is_empty() {
        result.outcome
    } else {
        TransferOutcome::Failed
    };
    let report = TransferReport {
        direction: descriptor.direction,
        outcome,
        bytes_transferred: result.bytes,
        local_file: result.local_file,
        remote_path,
        errors,
        remote_exit,
        duration: started.elapsed(),
    };
    info!(
        "SCP {:?} finished: {:?}, {} bytes in {} ms",
        report.direction,
        report.outcome,
        report.bytes_transferred,
        report.duration.as_millis()
    );
    Ok(report)
}

impl ScpService {
    // ── SCP Upload ───────────────────────────────────────────────────────────

    pub async fn upload(&mut self, request: ScpUploadRequest) -> ScpResult<ScpTransferResult> {
        let transport = Ssh2Transport::new(self.get_session(&request.session_id)?);
        let mut descriptor = TransferDescriptor::upload(&request.local_path, &request.remote_dir);
        if let Some(ref name) = request.remote_name {
            descriptor = descriptor.with_file_name(name);
        }

        let report = execute(&transport, &descriptor, &request.engine)
            .await
            .map_err(|e| e.with_session(&request.session_id))?;
        if report.is_success() {
            self.update_activity(&request.session_id, report.bytes_transferred, 0);
        }
        Ok(to_result(&request.local_path, report))
    }

    // ── SCP Download ─────────────────────────────────────────────────────────

    pub async fn download(&mut self, request: ScpDownloadRequest) -> ScpResult<ScpTransferResult> {
        let transport = Ssh2Transport::new(self.get_session(&request.session_id)?);
        let mut descriptor = TransferDescriptor::download(
            &request.remote_dir,
            &request.remote_name,
            &request.local_dir,
        );
        if let Some(ref name) = request.local_name {
            descriptor = descriptor.with_local_name(name);
        }

        let report = execute(&transport, &descriptor, &request.engine)
            .await
            .map_err(|e| e.with_session(&request.session_id))?;
        if report.is_success() {
            self.update_activity(&request.session_id, 0, report.bytes_transferred);
        }
        Ok(to_result(&request.local_dir, report))
    }
}

fn to_result(requested_local: &str, report: TransferReport) -> ScpTransferResult {
    let duration_ms = (report.duration.as_millis() as u64).max(1);
    let success = report.is_success();
    ScpTransferResult {
        transfer_id: Uuid::new_v4().to_string(),
        direction: report.direction,
        local_path: report
            .local_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| requested_local.to_string()),
        remote_path: report.remote_path,
        bytes_transferred: report.bytes_transferred,
        duration_ms,
        average_speed: report.bytes_transferred as f64 / (duration_ms as f64 / 1000.0),
        success,
        error: report.errors.first().map(|e| e.to_string()),
        remote_exit_status: report.remote_exit,
    }
}

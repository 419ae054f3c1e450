// ── Source engine – this side sends one file ─────────────────────────────────

use crate::scp::ack;
use crate::scp::error::{ScpError, ScpResult};
use crate::scp::header::FileHeader;
use crate::scp::types::{EngineOptions, ScpTransferDirection, TransferDescriptor};
use log::debug;
use std::fs::{File, Metadata};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Init,
    AwaitingReady,
    HeaderSent,
    AwaitingHeaderAck,
    StreamingBody,
    TerminatorSent,
    AwaitingFinalAck,
    Done,
    Failed,
}

/// Streams one local file to a remote `scp -t`.
pub struct SourceEngine {
    local_path: PathBuf,
    file_name: Option<String>,
    options: EngineOptions,
    state: SourceState,
    bytes_sent: u64,
}

impl SourceEngine {
    pub fn new(local_path: impl Into<PathBuf>, options: EngineOptions) -> Self {
        Self {
            local_path: local_path.into(),
            file_name: None,
            options,
            state: SourceState::Init,
            bytes_sent: 0,
        }
    }

    /// Announce the file under `name` instead of the local base name.
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn from_descriptor(desc: &TransferDescriptor, options: EngineOptions) -> ScpResult<Self> {
        if desc.direction != ScpTransferDirection::Upload {
            return Err(ScpError::invalid_config(
                "source engine needs an upload descriptor",
            ));
        }
        let mut engine = Self::new(desc.local_path.clone(), options);
        engine.file_name = desc.file_name.clone();
        Ok(engine)
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Drive the whole exchange. Returns the number of body bytes sent.
    pub fn run<R, W>(&mut self, reader: &mut R, writer: &mut W) -> ScpResult<u64>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        match self.send(reader, writer) {
            Ok(()) => {
                self.transition(SourceState::Done);
                Ok(self.bytes_sent)
            }
            Err(e) => {
                debug!("scp source failed in {:?}: {}", self.state, e);
                self.state = SourceState::Failed;
                Err(e)
            }
        }
    }

    fn send<R, W>(&mut self, reader: &mut R, writer: &mut W) -> ScpResult<()>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        let (mut file, meta) = open_regular(&self.local_path)?;
        let header = FileHeader::new(file_mode(&meta), meta.len(), self.header_name()?);
        let policy = self.options.ack_policy;

        // The remote sink speaks first.
        self.transition(SourceState::AwaitingReady);
        ack::expect_ok(reader, policy)?;

        let line = header.encode();
        writer
            .write_all(&line)
            .and_then(|_| writer.flush())
            .map_err(|e| ScpError::channel_io("writing header", e))?;
        log::trace!(">>> {}", String::from_utf8_lossy(&line).trim_end());
        self.transition(SourceState::HeaderSent);

        self.transition(SourceState::AwaitingHeaderAck);
        ack::expect_ok(reader, policy)?;

        self.transition(SourceState::StreamingBody);
        self.stream_body(&mut file, header.size, writer)?;
        drop(file);

        writer
            .write_all(&[ack::ACK_OK])
            .and_then(|_| writer.flush())
            .map_err(|e| ScpError::channel_io("writing terminator", e))?;
        self.transition(SourceState::TerminatorSent);

        self.transition(SourceState::AwaitingFinalAck);
        ack::expect_ok(reader, policy)?;
        Ok(())
    }

    fn stream_body<W: Write + ?Sized>(
        &mut self,
        file: &mut File,
        size: u64,
        writer: &mut W,
    ) -> ScpResult<()> {
        let mut buf = vec![0u8; self.options.chunk_size];
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = match file.read(&mut buf[..want]) {
                Ok(0) => {
                    return Err(ScpError::local_io(format!(
                        "'{}' shrank during transfer: {} of {} bytes read",
                        self.local_path.display(),
                        size - remaining,
                        size
                    )))
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ScpError::file_io(&self.local_path, e)),
            };
            writer
                .write_all(&buf[..n])
                .map_err(|e| ScpError::channel_io("writing body", e))?;
            remaining -= n as u64;
            self.bytes_sent += n as u64;
        }
        writer
            .flush()
            .map_err(|e| ScpError::channel_io("flushing body", e))
    }

    /// Name announced in the header. Must fit on one control line.
    fn header_name(&self) -> ScpResult<String> {
        if let Some(ref name) = self.file_name {
            if name.is_empty() || name.contains('/') || name.contains('\n') {
                return Err(ScpError::invalid_config(format!(
                    "remote file name {:?} is not a single path component",
                    name
                )));
            }
            return Ok(name.clone());
        }
        let base = self.local_path.file_name().ok_or_else(|| {
            ScpError::local_io(format!("'{}' has no file name", self.local_path.display()))
        })?;
        match base.to_str() {
            Some(name) if !name.contains('\n') => Ok(name.to_string()),
            _ => Err(ScpError::local_io(format!(
                "'{}' cannot be sent as an scp file name",
                self.local_path.display()
            ))),
        }
    }

    fn transition(&mut self, next: SourceState) {
        debug!("scp source: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

fn open_regular(path: &Path) -> ScpResult<(File, Metadata)> {
    let file = File::open(path).map_err(|e| ScpError::file_io(path, e))?;
    let meta = file.metadata().map_err(|e| ScpError::file_io(path, e))?;
    if !meta.is_file() {
        return Err(ScpError::local_io(format!(
            "'{}' is not a regular file",
            path.display()
        )));
    }
    Ok((file, meta))
}

#[cfg(unix)]
fn file_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(meta: &Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

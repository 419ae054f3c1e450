// ── Sink engine – this side receives one file ────────────────────────────────

use crate::scp::ack;
use crate::scp::error::{ScpError, ScpErrorKind, ScpResult};
use crate::scp::header::{self, FileHeader};
use crate::scp::types::{
    AckCadence, EngineOptions, ScpTransferDirection, TransferDescriptor, TransferOutcome,
};
use log::{debug, warn};
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Init,
    ReadySent,
    HeaderReceiving,
    HeaderAcked,
    BodyReceiving,
    Synced,
    Done,
    Failed,
}

/// Receives one file from a remote `scp -f` into a local directory.
pub struct SinkEngine {
    local_dir: PathBuf,
    local_name: Option<String>,
    options: EngineOptions,
    state: SinkState,
    header: Option<FileHeader>,
    destination: Option<PathBuf>,
    bytes_received: u64,
}

impl SinkEngine {
    pub fn new(local_dir: impl Into<PathBuf>, options: EngineOptions) -> Self {
        Self {
            local_dir: local_dir.into(),
            local_name: None,
            options,
            state: SinkState::Init,
            header: None,
            destination: None,
            bytes_received: 0,
        }
    }

    /// Store the file as `name` instead of the name the remote announces.
    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    pub fn from_descriptor(desc: &TransferDescriptor, options: EngineOptions) -> ScpResult<Self> {
        if desc.direction != ScpTransferDirection::Download {
            return Err(ScpError::invalid_config(
                "sink engine needs a download descriptor",
            ));
        }
        let mut engine = Self::new(desc.local_path.clone(), options);
        engine.local_name = desc.local_name.clone();
        Ok(engine)
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn header(&self) -> Option<&FileHeader> {
        self.header.as_ref()
    }

    /// Where the file was (or was being) written.
    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Drive the whole exchange.
    pub fn run<R, W>(&mut self, reader: &mut R, writer: &mut W) -> ScpResult<TransferOutcome>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        match self.receive(reader, writer) {
            Ok(outcome) => {
                self.transition(SinkState::Done);
                Ok(outcome)
            }
            Err(e) => {
                debug!("scp sink failed in {:?}: {}", self.state, e);
                self.state = SinkState::Failed;
                self.discard_partial();
                Err(e)
            }
        }
    }

    fn receive<R, W>(&mut self, reader: &mut R, writer: &mut W) -> ScpResult<TransferOutcome>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        ack::send_ok(writer)?;
        self.transition(SinkState::ReadySent);

        self.transition(SinkState::HeaderReceiving);
        let line = match header::read_line(reader, self.options.header_limit)? {
            Some(line) => line,
            None => {
                debug!("scp sink: remote closed without sending a file");
                return Ok(TransferOutcome::NoFile);
            }
        };
        let hdr = match FileHeader::decode(&line) {
            Ok(h) => h,
            Err(e) => {
                if e.kind != ScpErrorKind::Remote {
                    let _ = ack::send_fatal(writer, &e.message);
                }
                return Err(e);
            }
        };

        ack::send_ok(writer)?;
        self.transition(SinkState::HeaderAcked);

        let name = self.local_name.clone().unwrap_or_else(|| hdr.name.clone());
        let dest = self.local_dir.join(&name);
        let mut file = match File::create(&dest) {
            Ok(f) => f,
            Err(e) => {
                let err = ScpError::file_io(&dest, e);
                let _ = ack::send_fatal(writer, &err.message);
                return Err(err);
            }
        };
        self.destination = Some(dest.clone());
        let size = hdr.size;
        let mode = hdr.mode;
        self.header = Some(hdr);

        self.transition(SinkState::BodyReceiving);
        let saw_eof = match self.options.ack_cadence {
            AckCadence::Bulk => self.body_bulk(reader, &mut file, &dest, size)?,
            AckCadence::PerByte => self.body_per_byte(reader, writer, &mut file, &dest, size)?,
        };

        if self.bytes_received < size {
            if self.options.enforce_size {
                return Err(ScpError::protocol(format!(
                    "channel closed after {} of {} declared bytes",
                    self.bytes_received, size
                )));
            }
            warn!(
                "scp sink: '{}' is short, {} of {} declared bytes",
                dest.display(),
                self.bytes_received,
                size
            );
        } else if !saw_eof {
            self.finish_status(reader, writer)?;
        }

        file.sync_all().map_err(|e| ScpError::file_io(&dest, e))?;
        if self.options.preserve_mode {
            apply_mode(&dest, mode)?;
        }
        self.transition(SinkState::Synced);
        Ok(TransferOutcome::Done)
    }

    /// Read up to `size` bytes in chunks. Returns true when the stream ended early.
    fn body_bulk<R: Read + ?Sized>(
        &mut self,
        reader: &mut R,
        file: &mut File,
        dest: &Path,
        size: u64,
    ) -> ScpResult<bool> {
        let mut buf = vec![0u8; self.options.chunk_size];
        while self.bytes_received < size {
            let want = (size - self.bytes_received).min(buf.len() as u64) as usize;
            let n = match reader.read(&mut buf[..want]) {
                Ok(0) => return Ok(true),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ScpError::channel_io("reading body", e)),
            };
            file.write_all(&buf[..n])
                .map_err(|e| ScpError::file_io(dest, e))?;
            self.bytes_received += n as u64;
        }
        Ok(false)
    }

    /// Legacy cadence: acknowledge every body byte as it arrives.
    fn body_per_byte<R, W>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
        file: &mut File,
        dest: &Path,
        size: u64,
    ) -> ScpResult<bool>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        while self.bytes_received < size {
            let byte = match ack::read_byte(reader)? {
                Some(b) => b,
                None => return Ok(true),
            };
            file.write_all(&[byte])
                .map_err(|e| ScpError::file_io(dest, e))?;
            self.bytes_received += 1;
            ack::send_ok(writer)?;
        }
        Ok(false)
    }

    /// Trailing status after a complete body. End-of-stream is accepted.
    fn finish_status<R, W>(&mut self, reader: &mut R, writer: &mut W) -> ScpResult<()>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        match ack::read_byte(reader)? {
            None => {
                debug!("scp sink: stream ended after body");
                Ok(())
            }
            Some(b) => {
                ack::classify(b, reader, self.options.ack_policy)?.into_result()?;
                ack::send_ok(writer)
            }
        }
    }

    fn discard_partial(&mut self) {
        if self.options.keep_partial {
            return;
        }
        if let Some(ref path) = self.destination {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("scp sink: removed partial '{}'", path.display()),
                Err(e) => warn!("scp sink: could not remove '{}': {}", path.display(), e),
            }
        }
    }

    fn transition(&mut self, next: SinkState) {
        debug!("scp sink: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) -> ScpResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
        .map_err(|e| ScpError::file_io(path, e))
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32) -> ScpResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sink(dir: &Path) -> SinkEngine {
        SinkEngine::new(dir, EngineOptions::default())
    }

    #[test]
    fn test_receives_file_and_eof_after_body() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = Cursor::new(b"C0755 5 hello\nhello".to_vec());
        let mut output = Vec::new();
        let mut engine = sink(dir.path());

        let outcome = engine.run(&mut input, &mut output).unwrap();
        assert_eq!(outcome, TransferOutcome::Done);
        assert_eq!(engine.state(), SinkState::Done);
        assert_eq!(std::fs::read(dir.path().join("hello")).unwrap(), b"hello");
        // ready + header ack
        assert_eq!(output, vec![0u8, 0]);
    }

    #[cfg(unix)]
    #[test]
    fn test_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let mut input = Cursor::new(b"C0750 2 run\nok".to_vec());
        sink(dir.path()).run(&mut input, &mut Vec::new()).unwrap();
        let meta = std::fs::metadata(dir.path().join("run")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o7777, 0o750);
    }

    #[test]
    fn test_local_name_override() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = Cursor::new(b"C0644 5 hello\nhello\0".to_vec());
        let mut output = Vec::new();
        let mut engine = sink(dir.path()).with_local_name("renamed.txt");
        engine.run(&mut input, &mut output).unwrap();

        assert!(!dir.path().join("hello").exists());
        assert_eq!(std::fs::read(dir.path().join("renamed.txt")).unwrap(), b"hello");
        // ready + header ack + terminator ack
        assert_eq!(output, vec![0u8, 0, 0]);
        assert_eq!(engine.destination(), Some(dir.path().join("renamed.txt").as_path()));
    }

    #[test]
    fn test_short_body_is_kept_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = Cursor::new(b"C0644 10 short\nabcd".to_vec());
        let mut engine = sink(dir.path());
        let outcome = engine.run(&mut input, &mut Vec::new()).unwrap();

        assert_eq!(outcome, TransferOutcome::Done);
        assert_eq!(engine.bytes_received(), 4);
        assert_eq!(std::fs::read(dir.path().join("short")).unwrap(), b"abcd");
    }

    #[test]
    fn test_short_body_with_enforce_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = Cursor::new(b"C0644 10 short\nabcd".to_vec());
        let mut engine = SinkEngine::new(
            dir.path(),
            EngineOptions {
                enforce_size: true,
                ..EngineOptions::default()
            },
        );
        let err = engine.run(&mut input, &mut Vec::new()).unwrap_err();

        assert_eq!(err.kind, ScpErrorKind::Protocol);
        assert_eq!(engine.state(), SinkState::Failed);
        assert!(!dir.path().join("short").exists());
    }

    #[test]
    fn test_keep_partial() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = Cursor::new(b"C0644 10 short\nabcd".to_vec());
        let mut engine = SinkEngine::new(
            dir.path(),
            EngineOptions {
                enforce_size: true,
                keep_partial: true,
                ..EngineOptions::default()
            },
        );
        assert!(engine.run(&mut input, &mut Vec::new()).is_err());
        assert!(dir.path().join("short").exists());
    }

    #[test]
    fn test_per_byte_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = Cursor::new(b"C0755 5 hello\nhello".to_vec());
        let mut output = Vec::new();
        let mut engine = SinkEngine::new(
            dir.path(),
            EngineOptions {
                ack_cadence: AckCadence::PerByte,
                ..EngineOptions::default()
            },
        );
        engine.run(&mut input, &mut output).unwrap();

        assert_eq!(std::fs::read(dir.path().join("hello")).unwrap(), b"hello");
        // ready + header ack + one per body byte
        assert_eq!(output, vec![0u8; 7]);
    }

    fn per_byte(dir: &Path, enforce_size: bool) -> SinkEngine {
        SinkEngine::new(
            dir,
            EngineOptions {
                ack_cadence: AckCadence::PerByte,
                enforce_size,
                ..EngineOptions::default()
            },
        )
    }

    #[test]
    fn test_per_byte_terminator_stays_out_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = Cursor::new(b"C0644 5 hello\nhello\0".to_vec());
        let mut output = Vec::new();
        let mut engine = per_byte(dir.path(), false);
        let outcome = engine.run(&mut input, &mut output).unwrap();

        assert_eq!(outcome, TransferOutcome::Done);
        assert_eq!(engine.bytes_received(), 5);
        assert_eq!(std::fs::read(dir.path().join("hello")).unwrap(), b"hello");
        // ready + header ack + five body acks + terminator ack
        assert_eq!(output, vec![0u8; 8]);
    }

    #[test]
    fn test_per_byte_short_body_is_kept_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = Cursor::new(b"C0644 10 short\nabcd".to_vec());
        let mut output = Vec::new();
        let mut engine = per_byte(dir.path(), false);
        let outcome = engine.run(&mut input, &mut output).unwrap();

        assert_eq!(outcome, TransferOutcome::Done);
        assert_eq!(engine.bytes_received(), 4);
        assert_eq!(std::fs::read(dir.path().join("short")).unwrap(), b"abcd");
        assert_eq!(output, vec![0u8; 6]);
    }

    #[test]
    fn test_per_byte_short_body_with_enforce_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = Cursor::new(b"C0644 10 short\nabcd".to_vec());
        let mut engine = per_byte(dir.path(), true);
        let err = engine.run(&mut input, &mut Vec::new()).unwrap_err();

        assert_eq!(err.kind, ScpErrorKind::Protocol);
        assert_eq!(engine.state(), SinkState::Failed);
        assert_eq!(engine.bytes_received(), 4);
        assert!(!dir.path().join("short").exists());
    }

    #[test]
    fn test_no_file_on_immediate_eof() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = sink(dir.path());
        let outcome = engine
            .run(&mut Cursor::new(Vec::new()), &mut Vec::new())
            .unwrap();
        assert_eq!(outcome, TransferOutcome::NoFile);
        assert!(engine.destination().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_malformed_header_is_reported_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = Cursor::new(b"C0644 12\n".to_vec());
        let mut output = Vec::new();
        let err = sink(dir.path()).run(&mut input, &mut output).unwrap_err();

        assert_eq!(err.kind, ScpErrorKind::Protocol);
        assert_eq!(output[0], 0);
        assert_eq!(output[1], ack::ACK_FATAL);
    }

    #[test]
    fn test_remote_error_in_header_position() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = Cursor::new(b"\x01scp: missing: No such file or directory\n".to_vec());
        let err = sink(dir.path()).run(&mut input, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind, ScpErrorKind::Remote);
        assert!(err.message.contains("No such file"));
    }

    #[test]
    fn test_directory_record_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = Cursor::new(b"D0755 0 sub\n".to_vec());
        let err = sink(dir.path()).run(&mut input, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind, ScpErrorKind::Unsupported);
    }

    #[test]
    fn test_trailing_error_status_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = Cursor::new(b"C0644 2 f\nab\x02scp: read error\n".to_vec());
        let err = sink(dir.path()).run(&mut input, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind, ScpErrorKind::Remote);
        assert!(!dir.path().join("f").exists());
    }
}

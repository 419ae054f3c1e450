//! Full transfers through an in-process remote.
//!
//! The fake remote answers `scp -t <dir>` with a [`SinkEngine`] and
//! `scp -f <path>` with a [`SourceEngine`], rooted in a scratch directory,
//! over a Unix socket pair.

#![cfg(unix)]

use scp_engine::scp::{
    execute, AckCadence, AckPolicy, ChannelWriter, CommandChannel, EngineOptions, RunHandle, ScpErrorKind, ScpResult,
    ScpTransport, SinkEngine, SourceEngine, TransferDescriptor, TransferOutcome,
};
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

// ── Fake transport ───────────────────────────────────────────────────────────

struct Loopback {
    remote_root: PathBuf,
}

impl Loopback {
    fn new(remote_root: &Path) -> Self {
        Self {
            remote_root: remote_root.to_path_buf(),
        }
    }
}

struct SocketWriter(UnixStream);

impl Write for SocketWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl ChannelWriter for SocketWriter {
    fn close(&mut self) -> io::Result<()> {
        self.0.shutdown(Shutdown::Write)
    }
}

struct FakeRemote {
    root: PathBuf,
    stream: Option<UnixStream>,
    worker: Option<JoinHandle<i32>>,
}

impl RunHandle for FakeRemote {
    fn start(&mut self, command: &str) -> ScpResult<()> {
        let stream = self.stream.take().expect("started twice");
        let root = self.root.clone();
        let command = command.to_string();
        self.worker = Some(std::thread::spawn(move || serve(&root, &command, stream)));
        Ok(())
    }

    fn wait(self: Box<Self>) -> ScpResult<Option<i32>> {
        let worker = self.worker.expect("never started");
        Ok(Some(worker.join().expect("remote thread panicked")))
    }
}

impl ScpTransport for Loopback {
    fn open_command_channel(&self) -> ScpResult<CommandChannel> {
        let (local, remote) = UnixStream::pair()?;
        Ok(CommandChannel {
            reader: Box::new(local.try_clone()?),
            writer: Box::new(SocketWriter(local)),
            run: Box::new(FakeRemote {
                root: self.remote_root.clone(),
                stream: Some(remote),
                worker: None,
            }),
        })
    }
}

/// Plays the remote scp. Returns its exit status.
fn serve(root: &Path, command: &str, stream: UnixStream) -> i32 {
    let mut reader = stream.try_clone().unwrap();
    let mut writer = stream;
    let parts: Vec<&str> = command.splitn(3, ' ').collect();

    let status = match parts.as_slice() {
        ["scp", "-t", dir] => {
            let target = root.join(dir.trim_start_matches('/'));
            match SinkEngine::new(target, EngineOptions::default()).run(&mut reader, &mut writer) {
                Ok(_) => 0,
                Err(_) => 1,
            }
        }
        ["scp", "-f", path] => {
            let file = root.join(path.trim_start_matches('/'));
            if !file.is_file() {
                let msg = format!("\x01scp: {}: No such file or directory\n", path);
                let _ = writer.write_all(msg.as_bytes());
                1
            } else {
                match SourceEngine::new(file, EngineOptions::default()).run(&mut reader, &mut writer)
                {
                    Ok(_) => 0,
                    Err(_) => 1,
                }
            }
        }
        // Unknown program: hang up without a word.
        _ => 127,
    };
    let _ = writer.shutdown(Shutdown::Write);
    // Let the local side finish whatever it is reading before the socket goes away.
    let mut rest = Vec::new();
    let _ = reader.read_to_end(&mut rest);
    status
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

struct Dirs {
    _tmp: tempfile::TempDir,
    local: PathBuf,
    remote: PathBuf,
    back: PathBuf,
}

fn dirs() -> Dirs {
    let tmp = tempfile::tempdir().unwrap();
    let local = tmp.path().join("local");
    let remote = tmp.path().join("remote");
    let back = tmp.path().join("back");
    for d in [&local, &remote, &back] {
        std::fs::create_dir_all(d).unwrap();
    }
    std::fs::create_dir_all(remote.join("up")).unwrap();
    Dirs {
        _tmp: tmp,
        local,
        remote,
        back,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upload_then_download_reproduces_content() {
    let d = dirs();
    let transport = Loopback::new(&d.remote);
    let opts = EngineOptions {
        chunk_size: 4096,
        ..EngineOptions::default()
    };

    for size in [0usize, 1, 2, 17, 4095, 4096, 4097, 100_000] {
        let name = format!("f{}.bin", size);
        let data = pattern(size);
        let local = d.local.join(&name);
        std::fs::write(&local, &data).unwrap();

        let up = execute(&transport, &TransferDescriptor::upload(&local, "up"), &opts)
            .await
            .unwrap();
        assert!(up.is_success(), "upload {}: {:?}", size, up.errors);
        assert_eq!(up.bytes_transferred, size as u64);
        assert_eq!(up.remote_exit, Some(0));
        assert_eq!(std::fs::read(d.remote.join("up").join(&name)).unwrap(), data);

        let down = execute(
            &transport,
            &TransferDescriptor::download("up", &name, &d.back),
            &opts,
        )
        .await
        .unwrap();
        assert!(down.is_success(), "download {}: {:?}", size, down.errors);
        assert_eq!(down.outcome, TransferOutcome::Done);
        assert_eq!(down.bytes_transferred, size as u64);
        assert_eq!(std::fs::read(d.back.join(&name)).unwrap(), data);
    }
}

#[tokio::test]
async fn per_byte_download_keeps_terminator_out_of_file() {
    let d = dirs();
    let opts = EngineOptions {
        ack_cadence: AckCadence::PerByte,
        ..EngineOptions::default()
    };

    for size in [0usize, 1, 300] {
        let name = format!("p{}.bin", size);
        let data = pattern(size);
        std::fs::write(d.remote.join("up").join(&name), &data).unwrap();

        let report = execute(
            &Loopback::new(&d.remote),
            &TransferDescriptor::download("up", &name, &d.back),
            &opts,
        )
        .await
        .unwrap();

        assert!(report.is_success(), "download {}: {:?}", size, report.errors);
        assert_eq!(report.bytes_transferred, size as u64);
        assert_eq!(std::fs::read(d.back.join(&name)).unwrap(), data);
    }
}

#[tokio::test]
async fn lenient_acks_round_trip() {
    let d = dirs();
    let opts = EngineOptions {
        ack_policy: AckPolicy::Lenient,
        ..EngineOptions::default()
    };
    let data = pattern(5000);
    let local = d.local.join("lenient.bin");
    std::fs::write(&local, &data).unwrap();
    let transport = Loopback::new(&d.remote);

    let up = execute(&transport, &TransferDescriptor::upload(&local, "up"), &opts)
        .await
        .unwrap();
    assert!(up.is_success(), "{:?}", up.errors);

    let down = execute(
        &transport,
        &TransferDescriptor::download("up", "lenient.bin", &d.back),
        &opts,
    )
    .await
    .unwrap();
    assert!(down.is_success(), "{:?}", down.errors);
    assert_eq!(std::fs::read(d.back.join("lenient.bin")).unwrap(), data);
}

#[tokio::test]
async fn empty_file_arrives_empty() {
    let d = dirs();
    let local = d.local.join("empty.txt");
    std::fs::write(&local, b"").unwrap();

    let report = execute(
        &Loopback::new(&d.remote),
        &TransferDescriptor::upload(&local, "/up"),
        &EngineOptions::default(),
    )
    .await
    .unwrap();

    assert!(report.is_success());
    let meta = std::fs::metadata(d.remote.join("up/empty.txt")).unwrap();
    assert_eq!(meta.len(), 0);
}

#[tokio::test]
async fn upload_preserves_mode_and_honours_name_override() {
    use std::os::unix::fs::PermissionsExt;
    let d = dirs();
    let local = d.local.join("secret");
    std::fs::write(&local, b"token").unwrap();
    std::fs::set_permissions(&local, std::fs::Permissions::from_mode(0o600)).unwrap();

    let desc = TransferDescriptor::upload(&local, "up").with_file_name("renamed");
    let report = execute(&Loopback::new(&d.remote), &desc, &EngineOptions::default())
        .await
        .unwrap();

    assert!(report.is_success());
    let remote = d.remote.join("up/renamed");
    assert_eq!(std::fs::read(&remote).unwrap(), b"token");
    assert_eq!(
        std::fs::metadata(&remote).unwrap().permissions().mode() & 0o777,
        0o600
    );
}

#[tokio::test]
async fn download_with_local_name() {
    let d = dirs();
    std::fs::write(d.remote.join("up/hello"), b"hello").unwrap();

    let desc = TransferDescriptor::download("up", "hello", &d.back).with_local_name("greeting.txt");
    let report = execute(&Loopback::new(&d.remote), &desc, &EngineOptions::default())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.local_file.as_deref(), Some(d.back.join("greeting.txt").as_path()));
    assert_eq!(std::fs::read(d.back.join("greeting.txt")).unwrap(), b"hello");
    assert!(!d.back.join("hello").exists());
}

#[tokio::test]
async fn download_of_missing_file_reports_remote_error() {
    let d = dirs();
    let report = execute(
        &Loopback::new(&d.remote),
        &TransferDescriptor::download("up", "nope", &d.back),
        &EngineOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, TransferOutcome::Failed);
    assert_eq!(report.remote_exit, Some(1));
    assert_eq!(report.errors[0].kind, ScpErrorKind::Remote);
    assert!(report.errors[0].message.contains("No such file"));
    assert_eq!(std::fs::read_dir(&d.back).unwrap().count(), 0);
}

#[tokio::test]
async fn remote_hangup_before_any_ack_fails_source() {
    let d = dirs();
    let local = d.local.join("a.txt");
    std::fs::write(&local, b"abc").unwrap();
    let opts = EngineOptions {
        scp_program: "/opt/missing/scp".into(),
        ..EngineOptions::default()
    };

    let report = execute(
        &Loopback::new(&d.remote),
        &TransferDescriptor::upload(&local, "up"),
        &opts,
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, TransferOutcome::Failed);
    assert_eq!(report.errors[0].kind, ScpErrorKind::Transport);
    assert_eq!(report.remote_exit, Some(127));
    let err = report.into_result().unwrap_err();
    assert_eq!(err.kind, ScpErrorKind::Transport);
}

#[tokio::test]
async fn upload_into_missing_remote_dir_fails() {
    let d = dirs();
    let local = d.local.join("a.txt");
    std::fs::write(&local, b"abc").unwrap();

    let report = execute(
        &Loopback::new(&d.remote),
        &TransferDescriptor::upload(&local, "does/not/exist"),
        &EngineOptions::default(),
    )
    .await
    .unwrap();

    // The remote sink refuses the header with an error reply.
    assert_eq!(report.outcome, TransferOutcome::Failed);
    assert_eq!(report.errors[0].kind, ScpErrorKind::Remote);
}

// ── ssh2 channel adapter ─────────────────────────────────────────────────────
//
// One `ssh2::Channel` is split three ways (reader, writer, run handle). The
// engine uses reader and writer from a single thread and the run handle is only
// touched before the engine starts and after it has closed the writer, so the
// shared lock is never contended.

use crate::scp::channel::{ChannelWriter, CommandChannel, RunHandle, ScpTransport};
use crate::scp::error::{ScpError, ScpResult};
use log::{debug, warn};
use ssh2::{Channel, Session};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

type SharedChannel = Arc<Mutex<Channel>>;

fn lock(ch: &SharedChannel) -> io::Result<MutexGuard<'_, Channel>> {
    ch.lock()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "ssh channel lock poisoned"))
}

/// Opens SCP command channels on an authenticated ssh2 session.
#[derive(Clone)]
pub struct Ssh2Transport {
    session: Session,
}

impl Ssh2Transport {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

impl ScpTransport for Ssh2Transport {
    fn open_command_channel(&self) -> ScpResult<CommandChannel> {
        let channel = self
            .session
            .channel_session()
            .map_err(|e| ScpError::transport(format!("Failed to open channel: {}", e)))?;
        let shared: SharedChannel = Arc::new(Mutex::new(channel));
        Ok(CommandChannel {
            writer: Box::new(Ssh2Writer {
                channel: shared.clone(),
            }),
            reader: Box::new(Ssh2Reader {
                channel: shared.clone(),
            }),
            run: Box::new(Ssh2Run {
                channel: shared,
                command: None,
            }),
        })
    }
}

struct Ssh2Reader {
    channel: SharedChannel,
}

impl Read for Ssh2Reader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        lock(&self.channel)?.read(buf)
    }
}

struct Ssh2Writer {
    channel: SharedChannel,
}

impl Write for Ssh2Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.channel)?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        lock(&self.channel)?.flush()
    }
}

impl ChannelWriter for Ssh2Writer {
    fn close(&mut self) -> io::Result<()> {
        lock(&self.channel)?
            .send_eof()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

struct Ssh2Run {
    channel: SharedChannel,
    command: Option<String>,
}

impl RunHandle for Ssh2Run {
    fn start(&mut self, command: &str) -> ScpResult<()> {
        let mut ch = lock(&self.channel).map_err(ScpError::from)?;
        ch.exec(command).map_err(|e| {
            ScpError::transport(format!("Failed to execute command '{}': {}", command, e))
        })?;
        debug!("scp remote started: {}", command);
        self.command = Some(command.to_string());
        Ok(())
    }

    fn wait(self: Box<Self>) -> ScpResult<Option<i32>> {
        let mut ch = lock(&self.channel).map_err(ScpError::from)?;
        ch.wait_eof()?;

        let mut stderr = String::new();
        if ch.stderr().read_to_string(&mut stderr).is_ok() && !stderr.trim().is_empty() {
            warn!(
                "scp remote stderr ({}): {}",
                self.command.as_deref().unwrap_or("?"),
                stderr.trim()
            );
        }

        ch.close()?;
        ch.wait_close()?;
        let status = ch.exit_status()?;
        debug!("scp remote exited with status {}", status);
        Ok(Some(status))
    }
}

//! Channel adapter between the SSH transport and the SCP engines.
//!
//! A transfer owns exactly one [`CommandChannel`]: the engine gets the
//! reader/writer pair, the invoking layer keeps the [`RunHandle`] so the remote
//! command can be started before the engine and reaped after it.

use crate::scp::error::ScpResult;
use std::fmt;
use std::io::{Read, Write};

/// Write side of the channel. `close` signals end-of-input to the remote command.
pub trait ChannelWriter: Write + Send {
    fn close(&mut self) -> std::io::Result<()>;
}

/// Lifecycle of the remote command running on the far end of the channel.
pub trait RunHandle: Send {
    /// Begin executing `command` without waiting for it to finish.
    fn start(&mut self, command: &str) -> ScpResult<()>;

    /// Block until the remote command exits; yields its exit status when known.
    fn wait(self: Box<Self>) -> ScpResult<Option<i32>>;
}

/// The three pieces of one remote-command channel.
pub struct CommandChannel {
    pub writer: Box<dyn ChannelWriter>,
    pub reader: Box<dyn Read + Send>,
    pub run: Box<dyn RunHandle>,
}

/// Anything that can hand out fresh, authenticated command channels.
pub trait ScpTransport: Send + Sync {
    fn open_command_channel(&self) -> ScpResult<CommandChannel>;
}

/// The remote half of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    /// `scp -t <target>`: the remote receives into `target`.
    Sink { target: String },
    /// `scp -f <path>`: the remote sends `path`.
    Source { path: String },
}

impl RemoteCommand {
    /// Full command line for the given scp program.
    ///
    /// Paths are passed through as-is, without shell quoting.
    pub fn command_line(&self, program: &str) -> String {
        match self {
            RemoteCommand::Sink { target } => format!("{} -t {}", program, target),
            RemoteCommand::Source { path } => format!("{} -f {}", program, path),
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line("scp"))
    }
}

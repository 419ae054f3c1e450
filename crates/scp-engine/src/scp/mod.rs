// ── scp-engine / scp module ───────────────────────────────────────────────────
//
// Legacy SCP single-file transfer:
//   • `header`   – control record codec (`C0644 12 name\n`)
//   • `ack`      – single-byte acknowledgment primitive
//   • `channel`  – duplex channel contract (writer / reader / remote run handle)
//   • `source`   – upload state machine (this side sends)
//   • `sink`     – download state machine (this side receives)
//   • `transfer` – engine task + remote command lifecycle, error sink
//   • `ssh`      – ssh2 session adapter implementing the channel contract
//   • `service`  – session registry, authentication, high-level upload/download

pub mod types;
pub mod error;
pub mod header;
pub mod ack;
pub mod channel;
pub mod source;
pub mod sink;
pub mod transfer;
pub mod ssh;
pub mod service;

pub use types::*;
pub use error::{ScpError, ScpErrorKind, ScpResult};
pub use ack::Ack;
pub use header::FileHeader;
pub use channel::{ChannelWriter, CommandChannel, RemoteCommand, RunHandle, ScpTransport};
pub use source::{SourceEngine, SourceState};
pub use sink::{SinkEngine, SinkState};
pub use transfer::{execute, TransferReport};
pub use service::ScpService;
pub use ssh::Ssh2Transport;

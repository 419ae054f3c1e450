//! # scp-engine
//!
//! Single-file copy over the legacy SCP wire protocol:
//!   • `C<mode> <size> <name>` control-line encoding / decoding
//!   • ACK-byte handshake with warning / error message handling
//!   • Source (upload) and sink (download) state machines over any duplex byte channel
//!   • Two-task transfer lifecycle with an error sink and remote exit status
//!   • ssh2-backed session service (agent / key / password auth, remote exec)

pub mod scp;

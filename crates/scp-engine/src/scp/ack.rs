//! Single-byte acknowledgment handling.

use crate::scp::error::{ScpError, ScpResult};
use crate::scp::types::AckPolicy;
use std::io::{ErrorKind, Read, Write};

pub const ACK_OK: u8 = 0x00;
pub const ACK_WARNING: u8 = 0x01;
pub const ACK_FATAL: u8 = 0x02;

/// A decoded acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Ok,
    Warning(String),
    Error(String),
}

impl Ack {
    pub fn into_result(self) -> ScpResult<()> {
        match self {
            Ack::Ok => Ok(()),
            Ack::Warning(msg) => {
                log::warn!("remote scp warning: {}", msg);
                Err(ScpError::remote(msg))
            }
            Ack::Error(msg) => Err(ScpError::remote(msg)),
        }
    }
}

/// Write one `0x00` byte.
pub fn send_ok<W: Write + ?Sized>(writer: &mut W) -> ScpResult<()> {
    writer
        .write_all(&[ACK_OK])
        .and_then(|_| writer.flush())
        .map_err(|e| ScpError::channel_io("writing acknowledgment", e))
}

/// Tell the peer we are giving up: `0x02` followed by a one-line message.
pub fn send_fatal<W: Write + ?Sized>(writer: &mut W, msg: &str) -> ScpResult<()> {
    let line = msg.replace('\n', " ");
    let mut buf = Vec::with_capacity(line.len() + 2);
    buf.push(ACK_FATAL);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    log::trace!(">>> \\x02{}", line);
    writer
        .write_all(&buf)
        .and_then(|_| writer.flush())
        .map_err(|e| ScpError::channel_io("writing error reply", e))
}

/// Read one byte; `None` on clean end-of-stream.
pub fn read_byte<R: Read + ?Sized>(reader: &mut R) -> ScpResult<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(ScpError::channel_io("reading acknowledgment", e)),
        }
    }
}

/// Interpret an already-read status byte, pulling the message line for 0x01 / 0x02.
pub fn classify<R: Read + ?Sized>(byte: u8, reader: &mut R, policy: AckPolicy) -> ScpResult<Ack> {
    if policy == AckPolicy::Lenient {
        return Ok(Ack::Ok);
    }
    match byte {
        ACK_OK => Ok(Ack::Ok),
        ACK_WARNING => Ok(Ack::Warning(read_message(reader)?)),
        ACK_FATAL => Ok(Ack::Error(read_message(reader)?)),
        other => Err(ScpError::protocol(format!(
            "unexpected acknowledgment byte 0x{:02x}",
            other
        ))),
    }
}

/// Block for one acknowledgment; end-of-stream here is a transport failure.
pub fn read_ack<R: Read + ?Sized>(reader: &mut R, policy: AckPolicy) -> ScpResult<Ack> {
    match read_byte(reader)? {
        Some(b) => classify(b, reader, policy),
        None => Err(ScpError::transport(
            "channel closed before acknowledgment",
        )),
    }
}

/// Shorthand for `read_ack(..)?.into_result()`.
pub fn expect_ok<R: Read + ?Sized>(reader: &mut R, policy: AckPolicy) -> ScpResult<()> {
    read_ack(reader, policy)?.into_result()
}

fn read_message<R: Read + ?Sized>(reader: &mut R) -> ScpResult<String> {
    let mut msg = Vec::new();
    while let Some(b) = read_byte(reader)? {
        if b == b'\n' {
            break;
        }
        msg.push(b);
    }
    let text = String::from_utf8_lossy(&msg).trim_end().to_string();
    log::trace!("<<< {}", text);
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scp::error::ScpErrorKind;
    use std::io::Cursor;

    #[test]
    fn test_ok() {
        let mut cur = Cursor::new(vec![0u8]);
        assert_eq!(read_ack(&mut cur, AckPolicy::Strict).unwrap(), Ack::Ok);
    }

    #[test]
    fn test_warning_carries_message() {
        let mut cur = Cursor::new(b"\x01scp: disk nearly full\n".to_vec());
        assert_eq!(
            read_ack(&mut cur, AckPolicy::Strict).unwrap(),
            Ack::Warning("scp: disk nearly full".into())
        );
    }

    #[test]
    fn test_fatal_is_remote_error() {
        let mut cur = Cursor::new(b"\x02scp: /nope: Permission denied\n".to_vec());
        let err = expect_ok(&mut cur, AckPolicy::Strict).unwrap_err();
        assert_eq!(err.kind, ScpErrorKind::Remote);
        assert!(err.message.contains("Permission denied"));
    }

    #[test]
    fn test_eof_is_transport_error() {
        let mut cur = Cursor::new(Vec::new());
        let err = read_ack(&mut cur, AckPolicy::Strict).unwrap_err();
        assert_eq!(err.kind, ScpErrorKind::Transport);
        // Even the lenient policy needs some byte.
        let mut cur = Cursor::new(Vec::new());
        assert!(read_ack(&mut cur, AckPolicy::Lenient).is_err());
    }

    #[test]
    fn test_unknown_byte_strict_vs_lenient() {
        let mut cur = Cursor::new(vec![b'C']);
        assert_eq!(
            read_ack(&mut cur, AckPolicy::Strict).unwrap_err().kind,
            ScpErrorKind::Protocol
        );
        let mut cur = Cursor::new(vec![0x02]);
        assert_eq!(read_ack(&mut cur, AckPolicy::Lenient).unwrap(), Ack::Ok);
    }

    #[test]
    fn test_send_fatal_is_single_line() {
        let mut out = Vec::new();
        send_fatal(&mut out, "disk\nfull").unwrap();
        assert_eq!(out, b"\x02disk full\n");
    }

    #[test]
    fn test_send_ok() {
        let mut out = Vec::new();
        send_ok(&mut out).unwrap();
        assert_eq!(out, vec![0u8]);
    }
}

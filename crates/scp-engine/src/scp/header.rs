//! SCP control-record codec.
//!
//! Handles:
//! - Encoding the single-file `C<mode> <size> <name>\n` record
//! - Reading one control line from the channel without over-reading into the body
//! - Classifying and decoding received records

use crate::scp::error::{ScpError, ScpResult};
use std::io::{ErrorKind, Read};

/// Metadata announced ahead of a file body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Permission bits (lower 12 bits).
    pub mode: u32,
    /// Exact number of body bytes that follow the header ack.
    pub size: u64,
    pub name: String,
}

impl FileHeader {
    pub fn new(mode: u32, size: u64, name: impl Into<String>) -> Self {
        Self {
            mode,
            size,
            name: name.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(self.mode, self.size, &self.name)
    }

    pub fn decode(line: &[u8]) -> ScpResult<Self> {
        decode(line)
    }
}

/// `C` + four-digit octal mode + size + name + newline.
pub fn encode(mode: u32, size: u64, name: &str) -> Vec<u8> {
    format!("C{:04o} {} {}\n", mode & 0o7777, size, name).into_bytes()
}

/// Decode a control line received in header position.
pub fn decode(line: &[u8]) -> ScpResult<FileHeader> {
    let first = match line.first() {
        Some(b) => *b,
        None => return Err(ScpError::protocol("empty control record")),
    };

    match first {
        b'C' => {}
        0x01 | 0x02 => {
            let msg = String::from_utf8_lossy(&line[1..]);
            return Err(ScpError::remote(trim_control(&msg).to_string()));
        }
        b'D' => return Err(ScpError::unsupported("directory records (D) are not supported")),
        b'E' => return Err(ScpError::unsupported("end-directory records (E) are not supported")),
        b'T' => return Err(ScpError::unsupported("timestamp records (T) are not supported")),
        other => {
            return Err(ScpError::protocol(format!(
                "unexpected control record type 0x{:02x}",
                other
            )))
        }
    }

    let text = std::str::from_utf8(line)
        .map_err(|_| ScpError::protocol("control record is not valid UTF-8"))?;
    let fields: Vec<&str> = text.splitn(3, ' ').collect();
    if fields.len() < 3 {
        return Err(ScpError::protocol(format!(
            "malformed header '{}': expected mode, size and name",
            trim_control(text)
        )));
    }

    let mode_str = &fields[0][1..];
    if mode_str.is_empty() {
        return Err(ScpError::protocol("header has an empty mode"));
    }
    let mode = u32::from_str_radix(mode_str, 8)
        .map_err(|_| ScpError::protocol(format!("invalid octal mode '{}'", mode_str)))?;

    let size = fields[1]
        .parse::<u64>()
        .map_err(|_| ScpError::protocol(format!("invalid size '{}'", fields[1])))?;

    let name = trim_control(fields[2]);
    validate_name(name)?;

    Ok(FileHeader {
        mode: mode & 0o7777,
        size,
        name: name.to_string(),
    })
}

/// Read one control line, byte by byte, so nothing past the newline is consumed.
///
/// Returns `Ok(None)` on a clean end-of-stream before any byte arrived.
pub fn read_line<R: Read + ?Sized>(reader: &mut R, limit: usize) -> ScpResult<Option<Vec<u8>>> {
    let mut line = Vec::with_capacity(64);
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) if line.is_empty() => return Ok(None),
            Ok(0) => {
                return Err(ScpError::protocol(format!(
                    "channel closed inside control record after {} bytes",
                    line.len()
                )))
            }
            Ok(_) => {
                line.push(byte[0]);
                if byte[0] == b'\n' {
                    log::trace!("<<< {}", String::from_utf8_lossy(&line).trim_end());
                    return Ok(Some(line));
                }
                if line.len() >= limit {
                    return Err(ScpError::protocol(format!(
                        "control record exceeds {} bytes",
                        limit
                    )));
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(ScpError::channel_io("reading control record", e)),
        }
    }
}

fn trim_control(s: &str) -> &str {
    s.trim_end_matches(|c: char| c.is_control())
}

// A peer must never be able to steer the sink outside its directory.
fn validate_name(name: &str) -> ScpResult<()> {
    if name.is_empty() {
        return Err(ScpError::protocol("header has an empty file name"));
    }
    if name == "." || name == ".." || name.contains('/') {
        return Err(ScpError::protocol(format!(
            "refusing unsafe file name '{}'",
            name
        )));
    }
    Ok(())
}

//! # scp-copy
//!
//! Command-line front end for `scp-engine`: argument parsing, profile loading
//! and local path expansion. The binary in `main.rs` wires these to
//! [`scp_engine::scp::ScpService`].

pub mod cli;

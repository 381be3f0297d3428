//! Remote session infrastructure.
//!
//! One authenticated SSH connection per host, exposing command execution and
//! SFTP upload. The pipeline only sees the [`Connector`] and
//! [`RemoteSession`] traits, so it can be driven without a network.

pub mod diagnostics;
pub mod executor;

pub use diagnostics::diagnose_ssh_error;
pub use executor::{SshConnector, SshSession};

use crate::config::HostTarget;
use crate::error::Result;
use std::path::Path;

/// Captured streams of one remote command, kept as raw bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// An authenticated connection to a single host.
pub trait RemoteSession {
    /// Runs `command`, blocking until both streams are drained.
    ///
    /// The command's own exit status is not inspected.
    fn run(&mut self, command: &str) -> Result<ExecutionResult>;

    /// Copies a local file to `remote_path` on the host.
    fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<()>;
}

/// Opens sessions to hosts.
pub trait Connector {
    type Session: RemoteSession;

    fn connect(&self, target: &HostTarget) -> Result<Self::Session>;
}

/// Asks the host for its machine type (`uname -m`), trimmed of trailing
/// newline, carriage-return and space characters and otherwise verbatim.
pub fn detect_arch<S: RemoteSession + ?Sized>(session: &mut S) -> Result<String> {
    let result = session.run("uname -m")?;
    let raw = String::from_utf8_lossy(&result.stdout);
    Ok(raw.trim_end_matches(['\n', '\r', ' ']).to_string())
}

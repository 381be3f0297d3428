//! SSH-backed remote sessions built on libssh2.

use crate::config::HostTarget;
use crate::error::{Error, Result};
use crate::remote::diagnostics::diagnose_ssh_error;
use crate::remote::{Connector, ExecutionResult, RemoteSession};
use log::{debug, info, warn};
use ssh2::{CheckResult, KnownHostFileKind, Session};
use std::fs::File;
use std::io::{self, Read};
use std::net::TcpStream;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Opens [`SshSession`]s. No timeouts and no retries are applied.
#[derive(Debug, Clone, Default)]
pub struct SshConnector;

impl SshConnector {
    pub fn new() -> Self {
        Self
    }

    /// Performs the TCP connect, handshake, host key check and login.
    fn connect_once(&self, target: &HostTarget) -> std::result::Result<Session, String> {
        let addr = format!("{}:{}", target.host, target.port);
        debug!("Attempting SSH connection to {}", addr);

        let tcp = TcpStream::connect(&addr)
            .map_err(|e| format!("Failed to connect to {}: {}", addr, e))?;

        let mut sess = Session::new().map_err(|e| format!("Failed to create SSH session: {}", e))?;
        sess.set_tcp_stream(tcp);
        sess.handshake()
            .map_err(|e| format!("SSH handshake failed: {}", e))?;

        check_host_key(&sess, target)?;
        authenticate(&sess, target)?;

        debug!("SSH connection to {} established", addr);
        Ok(sess)
    }
}

impl Connector for SshConnector {
    type Session = SshSession;

    fn connect(&self, target: &HostTarget) -> Result<SshSession> {
        info!("Connecting to {}", target.connection_string());

        self.connect_once(target)
            .map(|session| SshSession {
                host: target.host.clone(),
                session,
            })
            .map_err(|reason| Error::ConnectionFailed {
                host: target.host.clone(),
                reason: diagnose_ssh_error(
                    &reason,
                    &target.host,
                    target.port,
                    target.credentials.key_file.as_deref(),
                ),
            })
    }
}

/// Checks the server key against the user's known_hosts.
///
/// Unknown hosts are accepted for this connection; a key that contradicts a
/// recorded one is rejected.
fn check_host_key(sess: &Session, target: &HostTarget) -> std::result::Result<(), String> {
    let mut known_hosts = sess
        .known_hosts()
        .map_err(|e| format!("Failed to initialise known hosts: {}", e))?;

    if let Some(path) = dirs::home_dir().map(|h| h.join(".ssh").join("known_hosts")) {
        if path.exists() {
            if let Err(e) = known_hosts.read_file(&path, KnownHostFileKind::OpenSSH) {
                warn!("Could not read {}: {}", path.display(), e);
            }
        }
    }

    let (key, _) = sess
        .host_key()
        .ok_or_else(|| "Server did not present a host key".to_string())?;

    match known_hosts.check_port(&target.host, target.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound => {
            info!("Accepting unknown host key for {}", target.host);
            Ok(())
        }
        CheckResult::Mismatch => Err(format!(
            "Host key verification failed: host key for {} does not match known_hosts",
            target.host
        )),
        CheckResult::Failure => Err(format!(
            "Host key verification failed: unable to check host key for {}",
            target.host
        )),
    }
}

/// Tries the key file, then the agent, then the password; stops at the
/// first method the server accepts.
fn authenticate(sess: &Session, target: &HostTarget) -> std::result::Result<(), String> {
    let creds = &target.credentials;
    let user = creds.username();
    debug!("Authenticating as user: {}", user);

    let mut tried = Vec::new();

    if let Some(key_path) = creds.expanded_key_file() {
        tried.push(key_path.display().to_string());
        match sess.userauth_pubkey_file(&user, None, &key_path, creds.password.as_deref()) {
            Ok(_) if sess.authenticated() => {
                debug!("Public key authentication successful");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => warn!("Public key authentication failed: {}", e),
        }
    }

    tried.push("agent".to_string());
    match sess.userauth_agent(&user) {
        Ok(_) if sess.authenticated() => {
            debug!("Agent authentication successful");
            return Ok(());
        }
        Ok(_) => {}
        Err(e) => debug!("Agent authentication failed: {}", e),
    }

    if let Some(password) = creds.password.as_deref() {
        tried.push("password".to_string());
        match sess.userauth_password(&user, password) {
            Ok(_) if sess.authenticated() => {
                debug!("Password authentication successful");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => warn!("Password authentication failed: {}", e),
        }
    }

    Err(format!(
        "SSH authentication failed for user {}. Tried: {}",
        user,
        tried.join(", ")
    ))
}

/// Reads two non-blocking streams to EOF, alternating between them.
///
/// Returns once both have reported EOF; sleeps briefly when neither had data.
fn drain_streams<O: Read, E: Read>(stdout: &mut O, stderr: &mut E) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut out_done = false;
    let mut err_done = false;
    let mut buffer = [0u8; 4096];

    while !(out_done && err_done) {
        let mut progressed = false;

        if !out_done {
            match read_chunk(stdout, &mut buffer, &mut out)? {
                Some(0) => out_done = true,
                Some(_) => progressed = true,
                None => {}
            }
        }
        if !err_done {
            match read_chunk(stderr, &mut buffer, &mut err)? {
                Some(0) => err_done = true,
                Some(_) => progressed = true,
                None => {}
            }
        }

        if !progressed && !(out_done && err_done) {
            thread::sleep(Duration::from_millis(10));
        }
    }

    Ok((out, err))
}

/// One read; `None` when the stream has nothing yet.
fn read_chunk<R: Read>(reader: &mut R, buffer: &mut [u8], sink: &mut Vec<u8>) -> io::Result<Option<usize>> {
    match reader.read(buffer) {
        Ok(n) => {
            sink.extend_from_slice(&buffer[..n]);
            Ok(Some(n))
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// One authenticated connection to a host.
pub struct SshSession {
    host: String,
    session: Session,
}

impl SshSession {
    fn command_failed(&self, command: &str, reason: impl ToString) -> Error {
        Error::CommandFailed {
            host: self.host.clone(),
            command: command.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl RemoteSession for SshSession {
    fn run(&mut self, command: &str) -> Result<ExecutionResult> {
        debug!("Executing on {}: {}", self.host, command);

        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| self.command_failed(command, format!("failed to open channel: {}", e)))?;
        channel
            .exec(command)
            .map_err(|e| self.command_failed(command, e))?;

        // Both streams share one channel window, so they are drained together.
        let mut stderr_stream = channel.stderr();
        self.session.set_blocking(false);
        let drained = drain_streams(&mut channel, &mut stderr_stream);
        self.session.set_blocking(true);
        let (stdout, stderr) = drained.map_err(|e| self.command_failed(command, e))?;

        if let Err(e) = channel.wait_close() {
            debug!("Failed to close channel cleanly: {}", e);
        }
        match channel.exit_status() {
            Ok(code) => debug!("`{}` exited with {}", command, code),
            Err(e) => debug!("No exit status for `{}`: {}", command, e),
        }

        Ok(ExecutionResult { stdout, stderr })
    }

    fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<()> {
        let label = format!("sftp put {}", remote_path);
        info!(
            "Uploading {} to {}:{}",
            local_path.display(),
            self.host,
            remote_path
        );

        let mut local = File::open(local_path)?;
        let sftp = self
            .session
            .sftp()
            .map_err(|e| self.command_failed(&label, format!("failed to open SFTP channel: {}", e)))?;
        let mut remote = sftp
            .create(Path::new(remote_path))
            .map_err(|e| self.command_failed(&label, e))?;

        let bytes = io::copy(&mut local, &mut remote).map_err(|e| self.command_failed(&label, e))?;
        debug!("Uploaded {} bytes", bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    enum Step {
        Data(&'static [u8]),
        Block,
    }

    /// Replays a script, then reports EOF.
    struct Scripted {
        steps: VecDeque<Step>,
        consumed: Rc<Cell<usize>>,
        /// Blocks until this many bytes were read from the other stream
        wait_for: Option<(Rc<Cell<usize>>, usize)>,
    }

    impl Scripted {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                consumed: Rc::default(),
                wait_for: None,
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some((other, needed)) = &self.wait_for {
                if other.get() < *needed {
                    return Err(io::ErrorKind::WouldBlock.into());
                }
            }
            match self.steps.pop_front() {
                Some(Step::Data(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(bytes);
                    self.consumed.set(self.consumed.get() + bytes.len());
                    Ok(bytes.len())
                }
                Some(Step::Block) => Err(io::ErrorKind::WouldBlock.into()),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn test_drain_reads_stderr_while_stdout_waits() {
        let mut stderr = Scripted::new(vec![
            Step::Data(b"warn 1\n"),
            Step::Block,
            Step::Data(b"warn 2\n"),
        ]);
        let mut stdout = Scripted::new(vec![Step::Data(b"digraph {}\n")]);
        stdout.wait_for = Some((stderr.consumed.clone(), 14));

        let (out, err) = drain_streams(&mut stdout, &mut stderr).unwrap();
        assert_eq!(out, b"digraph {}\n");
        assert_eq!(err, b"warn 1\nwarn 2\n");
    }

    #[test]
    fn test_drain_empty_streams() {
        let (out, err) =
            drain_streams(&mut Scripted::new(Vec::new()), &mut Scripted::new(Vec::new())).unwrap();
        assert!(out.is_empty());
        assert!(err.is_empty());
    }

    #[test]
    fn test_drain_propagates_read_errors() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::ErrorKind::ConnectionReset.into())
            }
        }

        let err = drain_streams(&mut Broken, &mut Scripted::new(Vec::new())).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}

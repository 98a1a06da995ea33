// SPDX-License-Identifier: Apache-2.0

//! The owner's SSH session (§4.3.2, §4.3.5): a single resource with
//! `start()`, `local_port()`, and `disconnect()` operations. Modeled as a
//! trait so the multiplexer's locking and state-machine logic can be
//! exercised without a real SSH server.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::{SshAuth, SshHostKeyPolicy, TunnelConfig};
use crate::error::{TunnelError, TunnelResult};

/// A started (or startable) local port forward into a remote service
/// reachable from the jump host.
pub trait SshSession: Send {
    /// Connects, authenticates, and installs a local forward on a
    /// kernel-assigned port. Idempotent only in the sense that calling it
    /// twice is a logic error; the multiplexer never does so.
    fn start(&mut self, config: &TunnelConfig) -> TunnelResult<()>;

    /// The local port the forward is listening on, once `start` succeeded.
    fn local_port(&self) -> Option<u16>;

    /// Tears the forward and the underlying SSH connection down. Safe to
    /// call more than once.
    fn disconnect(&mut self);
}

/// Real `ssh2`-backed implementation.
#[derive(Default)]
pub struct Ssh2Session {
    local_port: Option<u16>,
    stop: Option<Arc<AtomicBool>>,
    pump: Option<JoinHandle<()>>,
}

impl Ssh2Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_host_key(session: &ssh2::Session, config: &TunnelConfig) -> TunnelResult<()> {
        if config.host_key_policy == SshHostKeyPolicy::InsecureNoCheck {
            return Ok(());
        }
        let (key, _key_type) = session.host_key().ok_or_else(|| TunnelError::SshConnect {
            host: config.ssh_host.clone(),
            port: config.ssh_port,
            message: "server presented no host key".to_string(),
        })?;
        let mut known_hosts = session.known_hosts().map_err(|e| TunnelError::SshConnect {
            host: config.ssh_host.clone(),
            port: config.ssh_port,
            message: e.to_string(),
        })?;
        if let Some(path) = &config.known_hosts_path {
            let _ = known_hosts.read_file(Path::new(path), ssh2::KnownHostFileKind::OpenSSH);
        }
        use ssh2::CheckResult;
        match known_hosts.check(&config.ssh_host, key) {
            CheckResult::Match => Ok(()),
            CheckResult::NotFound if config.host_key_policy == SshHostKeyPolicy::AcceptNew => {
                Ok(())
            }
            CheckResult::NotFound => Err(TunnelError::SshConnect {
                host: config.ssh_host.clone(),
                port: config.ssh_port,
                message: "host key not found in known_hosts under strict policy".to_string(),
            }),
            CheckResult::Mismatch => Err(TunnelError::SshConnect {
                host: config.ssh_host.clone(),
                port: config.ssh_port,
                message: "host key mismatch, possible tampering".to_string(),
            }),
            CheckResult::Failure => Err(TunnelError::SshConnect {
                host: config.ssh_host.clone(),
                port: config.ssh_port,
                message: "host key check failed".to_string(),
            }),
        }
    }

    fn authenticate(session: &ssh2::Session, config: &TunnelConfig) -> TunnelResult<()> {
        match &config.auth {
            SshAuth::Password(password) => session
                .userauth_password(&config.ssh_user, password)
                .map_err(|e| TunnelError::SshAuth {
                    user: config.ssh_user.clone(),
                    host: config.ssh_host.clone(),
                    message: e.to_string(),
                }),
            SshAuth::Key {
                private_key_path,
                passphrase,
            } => session
                .userauth_pubkey_file(
                    &config.ssh_user,
                    None,
                    Path::new(private_key_path),
                    passphrase.as_deref(),
                )
                .map_err(|e| TunnelError::SshAuth {
                    user: config.ssh_user.clone(),
                    host: config.ssh_host.clone(),
                    message: e.to_string(),
                }),
        }
    }
}

impl SshSession for Ssh2Session {
    fn start(&mut self, config: &TunnelConfig) -> TunnelResult<()> {
        let tcp = TcpStream::connect((config.ssh_host.as_str(), config.ssh_port))
            .map_err(|e| TunnelError::SshConnect {
                host: config.ssh_host.clone(),
                port: config.ssh_port,
                message: e.to_string(),
            })?;
        tcp.set_nodelay(true).ok();

        let mut session = ssh2::Session::new().map_err(|e| TunnelError::SshConnect {
            host: config.ssh_host.clone(),
            port: config.ssh_port,
            message: e.to_string(),
        })?;
        session.set_tcp_stream(tcp);
        session.set_timeout(config.connect_timeout.as_millis() as u32);
        session.handshake().map_err(|e| TunnelError::SshConnect {
            host: config.ssh_host.clone(),
            port: config.ssh_port,
            message: e.to_string(),
        })?;

        Self::check_host_key(&session, config)?;
        Self::authenticate(&session, config)?;
        if !session.authenticated() {
            return Err(TunnelError::SshAuth {
                user: config.ssh_user.clone(),
                host: config.ssh_host.clone(),
                message: "server did not confirm authentication".to_string(),
            });
        }

        let listener = TcpListener::bind(("127.0.0.1", 0)).map_err(TunnelError::Io)?;
        listener.set_nonblocking(true).map_err(TunnelError::Io)?;
        let local_port = listener.local_addr().map_err(TunnelError::Io)?.port();

        session.set_blocking(false);

        let stop = Arc::new(AtomicBool::new(false));
        let pump_stop = Arc::clone(&stop);
        let remote_host = config.remote_host.clone();
        let remote_port = config.remote_port;
        let pump = std::thread::spawn(move || {
            run_forward_reactor(session, listener, remote_host, remote_port, pump_stop);
        });

        self.local_port = Some(local_port);
        self.stop = Some(stop);
        self.pump = Some(pump);
        Ok(())
    }

    fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    fn disconnect(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.store(true, Ordering::SeqCst);
        }
        if let Some(handle) = self.pump.take() {
            let _ = handle.join();
        }
        self.local_port = None;
    }
}

impl Drop for Ssh2Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Single-threaded reactor pumping bytes between locally accepted
/// connections and their forwarded channels. Everything runs non-blocking
/// and polled so one thread can multiplex an arbitrary number of local
/// clients over the one SSH connection, which libssh2 requires be driven
/// from a single thread at a time.
fn run_forward_reactor(
    session: ssh2::Session,
    listener: TcpListener,
    remote_host: String,
    remote_port: u16,
    stop: Arc<AtomicBool>,
) {
    let mut streams: HashMap<usize, (TcpStream, ssh2::Channel)> = HashMap::new();
    let mut next_id = 0usize;
    let mut buf = [0u8; 16 * 1024];

    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    tracing::warn!(error = %e, "failed to set accepted stream non-blocking");
                    continue;
                }
                match session.channel_direct_tcpip(&remote_host, remote_port, None) {
                    Ok(channel) => {
                        let id = next_id;
                        next_id += 1;
                        streams.insert(id, (stream, channel));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to open forwarded channel");
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                tracing::warn!(error = %e, "local listener accept failed");
            }
        }

        let mut dead = Vec::new();
        for (id, (stream, channel)) in streams.iter_mut() {
            if !pump_pair(stream, channel, &mut buf) {
                dead.push(*id);
            }
        }
        for id in dead {
            streams.remove(&id);
        }

        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Copies any bytes currently available in either direction. Returns
/// `false` once either side is closed.
fn pump_pair(stream: &mut TcpStream, channel: &mut ssh2::Channel, buf: &mut [u8]) -> bool {
    loop {
        match stream.read(buf) {
            Ok(0) => return false,
            Ok(n) => {
                if channel.write_all(&buf[..n]).is_err() {
                    return false;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(_) => return false,
        }
    }
    loop {
        match channel.read(buf) {
            Ok(0) => return !channel.eof(),
            Ok(n) => {
                if stream.write_all(&buf[..n]).is_err() {
                    return false;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(_) => return false,
        }
    }
    true
}

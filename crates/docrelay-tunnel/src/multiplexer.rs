// SPDX-License-Identifier: Apache-2.0

//! `acquire`/`release` (§4.3.3) and the owner's watcher task (§4.3.4).

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::config::TunnelConfig;
use crate::error::{TunnelError, TunnelResult};
use crate::identity::{TunnelIdentity, TunnelPaths};
use crate::lock::FileLock;
use crate::session::{Ssh2Session, SshSession};

/// Global lock poll interval (§4.3.5: "bounded to 100ms").
const GLOBAL_LOCK_POLL: Duration = Duration::from_millis(100);
/// How long `acquire` waits overall to become owner or see a port published.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
/// Watcher sweep interval (§4.3.4).
const WATCHER_POLL: Duration = Duration::from_millis(500);

type SessionFactory = dyn Fn() -> Box<dyn SshSession> + Send + Sync;

/// Coordinates SSH tunnels shared across any number of callers in any
/// number of processes, keyed by tunnel identity and backed entirely by
/// filesystem locks (§4.3).
pub struct TunnelMultiplexer {
    runtime_dir: PathBuf,
    session_factory: Arc<SessionFactory>,
}

impl TunnelMultiplexer {
    pub fn new(runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime_dir: runtime_dir.into(),
            session_factory: Arc::new(|| Box::new(Ssh2Session::new())),
        }
    }

    /// Builds a multiplexer driven by a custom session implementation,
    /// primarily so the acquire/release/watcher protocol can be tested
    /// without a real SSH server.
    pub fn with_session_factory(
        runtime_dir: impl Into<PathBuf>,
        session_factory: Arc<SessionFactory>,
    ) -> Self {
        Self {
            runtime_dir: runtime_dir.into(),
            session_factory,
        }
    }

    /// Returns the local forwarded port and a handle the caller must
    /// eventually pass to [`release`](Self::release) (or simply drop).
    pub fn acquire(&self, config: &TunnelConfig) -> TunnelResult<(u16, ClientHandle)> {
        let identity = TunnelIdentity::compute(
            &config.ssh_user,
            &config.ssh_host,
            config.auth.private_key_path(),
            &config.remote_endpoint(),
        );
        let paths = TunnelPaths::new(&self.runtime_dir, &identity);
        fs::create_dir_all(paths.clients_dir())?;

        let local_port = self.become_owner_or_join(&paths, config)?;

        let client_id: u64 = rand::thread_rng().gen();
        let client_lock_path = paths.clients_dir().join(format!("{client_id:016x}.lock"));
        let client_lock = FileLock::acquire(&client_lock_path)?;

        Ok((
            local_port,
            ClientHandle {
                lock: Some(client_lock),
                path: client_lock_path,
            },
        ))
    }

    /// Explicit counterpart to dropping a [`ClientHandle`]; both release
    /// the same way.
    pub fn release(&self, handle: ClientHandle) {
        drop(handle);
    }

    fn become_owner_or_join(&self, paths: &TunnelPaths, config: &TunnelConfig) -> TunnelResult<u16> {
        let global = FileLock::acquire_with_timeout(
            &paths.global_lock(),
            GLOBAL_LOCK_POLL,
            STARTUP_TIMEOUT,
        )?
        .ok_or(TunnelError::StartupTimeout {
            waited_ms: STARTUP_TIMEOUT.as_millis() as u64,
        })?;

        match FileLock::try_acquire(&paths.server_lock())? {
            Some(server_lock) => {
                // We're the new owner. Hold the startup lock while we
                // bring the session up so joiners can wait on it instead
                // of busy-polling the port file.
                let startup_lock = FileLock::acquire(&paths.startup_lock())?;
                drop(global);

                let mut session = (self.session_factory)();
                let start_result = session.start(config);
                let local_port = match start_result {
                    Ok(()) => session.local_port().ok_or_else(|| TunnelError::PortForward {
                        message: "session started but reported no local port".to_string(),
                    })?,
                    Err(e) => {
                        drop(startup_lock);
                        drop(server_lock);
                        return Err(e);
                    }
                };

                fs::write(paths.port_file(), local_port.to_string())?;
                drop(startup_lock);

                spawn_watcher(paths.clone(), server_lock, session);
                Ok(local_port)
            }
            None => {
                drop(global);
                self.join_existing(paths)
            }
        }
    }

    fn join_existing(&self, paths: &TunnelPaths) -> TunnelResult<u16> {
        if let Some(port) = read_port_file(paths)? {
            return Ok(port);
        }
        // Not yet published; wait for the owner to finish starting up.
        if let Some(lock) = FileLock::acquire_with_timeout(
            &paths.startup_lock(),
            GLOBAL_LOCK_POLL,
            STARTUP_TIMEOUT,
        )? {
            drop(lock);
        }
        read_port_file(paths)?.ok_or(TunnelError::StartupTimeout {
            waited_ms: STARTUP_TIMEOUT.as_millis() as u64,
        })
    }
}

fn read_port_file(paths: &TunnelPaths) -> TunnelResult<Option<u16>> {
    let path = paths.port_file();
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path)?;
    contents
        .trim()
        .parse::<u16>()
        .map(Some)
        .map_err(|_| TunnelError::MalformedPortFile {
            path: path.display().to_string(),
        })
}

/// Held by a caller of [`TunnelMultiplexer::acquire`]. Dropping it (or
/// passing it to [`TunnelMultiplexer::release`]) deletes the client's lock
/// file, which the owner's watcher notices on its next sweep.
pub struct ClientHandle {
    lock: Option<FileLock>,
    path: PathBuf,
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.lock.take();
        let _ = fs::remove_file(&self.path);
    }
}

fn spawn_watcher(paths: TunnelPaths, server_lock: FileLock, mut session: Box<dyn SshSession>) {
    std::thread::spawn(move || {
        let _server_lock = server_lock;
        loop {
            std::thread::sleep(WATCHER_POLL);

            let global = match FileLock::acquire(&paths.global_lock()) {
                Ok(lock) => lock,
                Err(e) => {
                    tracing::warn!(error = %e, "watcher failed to take global lock");
                    continue;
                }
            };

            let live_clients = sweep_clients(&paths);
            drop(global);

            if live_clients == 0 {
                session.disconnect();
                let _ = fs::remove_file(paths.port_file());
                return;
            }
        }
    });
}

/// Deletes any client lock file that isn't actually held (the client
/// crashed or was killed; the OS already released its lock) and returns
/// how many are still genuinely live.
fn sweep_clients(paths: &TunnelPaths) -> usize {
    let entries = match fs::read_dir(paths.clients_dir()) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut live = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        match crate::lock::is_locked(&path) {
            Ok(true) => live += 1,
            Ok(false) => {
                let _ = fs::remove_file(&path);
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to probe client lock");
            }
        }
    }
    live
}

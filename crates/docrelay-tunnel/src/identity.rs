// SPDX-License-Identifier: Apache-2.0

//! Tunnel identity (§4.3.1) and the filesystem layout every coordination
//! path derives from.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// A deterministic hash of `(ssh_user, ssh_host, ssh_private_key_path,
/// remote_endpoint)`. Two `acquire` calls with the same identity share one
/// tunnel; calls with different identities never do.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TunnelIdentity(String);

impl TunnelIdentity {
    pub fn compute(
        ssh_user: &str,
        ssh_host: &str,
        ssh_private_key_path: Option<&str>,
        remote_endpoint: &str,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(ssh_user.as_bytes());
        hasher.update([0u8]);
        hasher.update(ssh_host.as_bytes());
        hasher.update([0u8]);
        hasher.update(ssh_private_key_path.unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(remote_endpoint.as_bytes());
        let digest = hasher.finalize();
        Self(format!("{digest:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The filesystem layout for one tunnel identity, all rooted under a shared
/// runtime directory (§4.3.2).
#[derive(Debug, Clone)]
pub struct TunnelPaths {
    root: PathBuf,
}

impl TunnelPaths {
    pub fn new(runtime_dir: &Path, identity: &TunnelIdentity) -> Self {
        Self {
            root: runtime_dir.join(identity.as_str()),
        }
    }

    /// The global filesystem lock guarding the acquire/release/watcher
    /// protocol for this identity.
    pub fn global_lock(&self) -> PathBuf {
        self.root.join("global.lock")
    }

    /// Held exclusively for the tunnel's entire *Starting* phase, so a
    /// concurrent acquirer can wait on it instead of busy-polling the port
    /// file.
    pub fn startup_lock(&self) -> PathBuf {
        self.root.join("startup.lock")
    }

    /// Held exclusively by the owner process for as long as the tunnel is
    /// *Running* or *Draining*.
    pub fn server_lock(&self) -> PathBuf {
        self.root.join("server.lock")
    }

    /// Plain-text local forwarded port, written once the owner's SSH
    /// session is up.
    pub fn port_file(&self) -> PathBuf {
        self.root.join("port")
    }

    /// Subdirectory holding one lock file per live client.
    pub fn clients_dir(&self) -> PathBuf {
        self.root.join("clients")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

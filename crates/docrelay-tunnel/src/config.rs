// SPDX-License-Identifier: Apache-2.0

//! Connection parameters for one tunnel (§6.1 `ssh*` connection options).

use std::time::Duration;

/// How the SSH client verifies the jump host's public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshHostKeyPolicy {
    /// Trust on first use: accept and remember keys not already known.
    AcceptNew,
    /// Only accept a key already present in `known_hosts_path`.
    Strict,
    /// Accept any key. Only meant for throwaway/local development setups.
    InsecureNoCheck,
}

#[derive(Debug, Clone)]
pub enum SshAuth {
    Password(String),
    Key {
        private_key_path: String,
        passphrase: Option<String>,
    },
}

impl SshAuth {
    /// The private key path, if this auth method has one — part of the
    /// tunnel identity (§4.3.1).
    pub fn private_key_path(&self) -> Option<&str> {
        match self {
            SshAuth::Key { private_key_path, .. } => Some(private_key_path.as_str()),
            SshAuth::Password(_) => None,
        }
    }
}

/// Everything `acquire` (§4.3.3) needs to start or join a tunnel.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub ssh_user: String,
    pub ssh_host: String,
    pub ssh_port: u16,
    pub auth: SshAuth,
    pub host_key_policy: SshHostKeyPolicy,
    pub known_hosts_path: Option<String>,
    pub remote_host: String,
    pub remote_port: u16,
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
}

impl TunnelConfig {
    pub fn remote_endpoint(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }
}

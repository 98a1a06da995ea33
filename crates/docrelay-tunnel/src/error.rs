// SPDX-License-Identifier: Apache-2.0

use docrelay_core::error::DriverError;

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("ssh connection to {host}:{port} failed: {message}")]
    SshConnect {
        host: String,
        port: u16,
        message: String,
    },

    #[error("ssh authentication failed for {user}@{host}: {message}")]
    SshAuth {
        user: String,
        host: String,
        message: String,
    },

    #[error("failed to install local port forward: {message}")]
    PortForward { message: String },

    #[error("timed out waiting for tunnel startup lock after {waited_ms}ms")]
    StartupTimeout { waited_ms: u64 },

    #[error("port file at {path} did not contain a valid port number")]
    MalformedPortFile { path: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<TunnelError> for DriverError {
    fn from(err: TunnelError) -> Self {
        DriverError::tunnel_startup(err.to_string())
    }
}

pub type TunnelResult<T> = Result<T, TunnelError>;

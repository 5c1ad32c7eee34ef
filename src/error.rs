//! Error kinds surfaced by a run.
//!
//! Everything except [`DbError::Scan`] is fatal: it travels straight to the
//! process boundary and ends the run with a non-zero exit status.

use crate::services::database::BarrierError;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the SSH tunnel session.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("cannot reach SSH host {addr}: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: russh::Error,
    },

    #[error("SSH authentication failed for {user}@{addr}: no method succeeded")]
    AuthenticationExhausted { user: String, addr: String },

    #[error("unable to read private key {}: {source}", path.display())]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decrypt private key {}: {source}", path.display())]
    KeyDecryption {
        path: PathBuf,
        #[source]
        source: russh_keys::Error,
    },

    #[error("could not read key passphrase: {0}")]
    Prompt(String),

    #[error("tunnel session closed while opening a channel to {addr}")]
    SessionClosed { addr: String },

    #[error("tunnel refused channel to {addr}: {reason}")]
    Dial { addr: String, reason: String },

    #[error("invalid tunnel target address `{0}`, expected host:port")]
    BadAddress(String),

    #[error("remote command `{command}` failed: {source}")]
    Command {
        command: String,
        #[source]
        source: russh::Error,
    },
}

/// Failures of a named transport or its loopback relay.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport `{0}` is already registered")]
    Duplicate(String),

    #[error("no transport registered under `{0}`")]
    Unknown(String),

    #[error("failed to start transport relay: {0}")]
    Relay(#[source] std::io::Error),

    #[error("dial to {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tunnel(#[from] TunnelError),
}

/// Failures while talking to one database.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("connect failed: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("query failed: {0}")]
    Execute(#[source] sqlx::Error),

    /// A row could not be read after the query started returning rows.
    #[error("row scan failed: {0}")]
    Scan(#[source] sqlx::Error),

    /// The connection never reached the server because the transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Fatal errors of a run, grouped the way an operator reads them.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("connectivity error: {0}")]
    Connectivity(String),

    #[error("authentication error: {0}")]
    Authentication(#[source] TunnelError),

    #[error("failed to list databases: {0}")]
    Enumeration(#[source] DbError),

    #[error("{database}: {source}")]
    Dispatch {
        database: String,
        #[source]
        source: DbError,
    },

    /// A concurrent task exited without reporting, e.g. it panicked.
    #[error("dispatch ended early: {0}")]
    Incomplete(#[from] BarrierError),
}

impl RunError {
    /// Failure on one target. Transport failures stay connectivity errors.
    pub fn dispatch(database: &str, source: DbError) -> Self {
        match source {
            DbError::Transport(e) => e.into(),
            source => RunError::Dispatch {
                database: database.to_string(),
                source,
            },
        }
    }

    /// Failure while listing databases. Transport failures stay connectivity
    /// errors.
    pub fn enumeration(source: DbError) -> Self {
        match source {
            DbError::Transport(e) => e.into(),
            source => RunError::Enumeration(source),
        }
    }
}

impl From<TunnelError> for RunError {
    fn from(err: TunnelError) -> Self {
        match err {
            TunnelError::AuthenticationExhausted { .. }
            | TunnelError::KeyRead { .. }
            | TunnelError::KeyDecryption { .. }
            | TunnelError::Prompt(_) => RunError::Authentication(err),
            other => RunError::Connectivity(other.to_string()),
        }
    }
}

impl From<TransportError> for RunError {
    fn from(err: TransportError) -> Self {
        RunError::Connectivity(err.to_string())
    }
}

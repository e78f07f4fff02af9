use std::{io, path::PathBuf};
use thiserror::Error;

/// Setup and configuration failures.
///
/// Failures of individual calls never show up here; they are delivered as a
/// [`Status`](crate::Status) on the completed call record.
#[derive(Debug, Error)]
pub enum Error {
    #[error("listen address is empty")]
    EmptyAddress,

    #[error("worker thread count must be positive")]
    NoWorkers,

    #[error("a server identity needs both a private key and a certificate")]
    IncompleteIdentity,

    #[error("reading credential file {path}: {source}")]
    Credential {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("credential file {0} is empty")]
    EmptyCredential(PathBuf),

    #[error("binding {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("starting transport runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("spawning worker thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("host is already running")]
    AlreadyRunning,

    #[error("completion queue is shut down")]
    ShutDown,

    #[error("parsing configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

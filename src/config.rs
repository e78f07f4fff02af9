//! Configuration, loadable from TOML.
//!
//! ```toml
//! [server]
//! address = "0.0.0.0:50051"
//! threads = 4
//!
//! [server.tls]
//! key = "certs/key.pem"
//! certificate = "certs/cert.pem"
//!
//! [client]
//! threads = 1
//!
//! [[connections]]
//! address = "127.0.0.1:50051"
//! deadline_secs = 3
//! certificate = "certs/cert.pem"
//! target_domain = "test.com"
//! ```

use crate::{credentials::ServerIdentity, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// `host:port` to listen on (default: 127.0.0.1:50051).
    #[serde(default = "default_address")]
    pub address: String,
    /// Poll loop threads (default: 1).
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Threads of the transport runtime (default: 1).
    #[serde(default = "default_threads")]
    pub transport_threads: usize,
    /// How long shutdown waits for outstanding calls (default: 5).
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            threads: default_threads(),
            transport_threads: default_threads(),
            drain_timeout_secs: default_drain_timeout(),
            tls: None,
        }
    }
}

impl ServerConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_tls(mut self, key: impl Into<PathBuf>, certificate: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsConfig {
            key: Some(key.into()),
            certificate: Some(certificate.into()),
        });
        self
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub(crate) fn identity(&self) -> Result<Option<ServerIdentity>> {
        match &self.tls {
            Some(tls) => ServerIdentity::from_paths(tls.key.as_deref(), tls.certificate.as_deref()),
            None => Ok(None),
        }
    }
}

/// Key and certificate of a secured listener. Both or neither.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    pub key: Option<PathBuf>,
    pub certificate: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_threads")]
    pub transport_threads: usize,
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            transport_threads: default_threads(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

impl ClientConfig {
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub address: String,
    /// Default per-call deadline (default: 3).
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,
    /// Certificate the server must present. Absent means an unauthenticated
    /// channel.
    #[serde(default)]
    pub certificate: Option<PathBuf>,
    /// Name to expect instead of the host part of `address`.
    #[serde(default)]
    pub target_domain: Option<String>,
}

impl ConnectionConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            deadline_secs: default_deadline(),
            certificate: None,
            target_domain: None,
        }
    }

    pub fn with_deadline_secs(mut self, secs: u64) -> Self {
        self.deadline_secs = secs;
        self
    }

    pub fn with_certificate(mut self, certificate: impl Into<PathBuf>, target_domain: Option<String>) -> Self {
        self.certificate = Some(certificate.into());
        self.target_domain = target_domain;
        self
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

fn default_address() -> String {
    "127.0.0.1:50051".to_string()
}

fn default_threads() -> usize {
    1
}

fn default_drain_timeout() -> u64 {
    5
}

fn default_deadline() -> u64 {
    3
}

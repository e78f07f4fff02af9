//! Certificate and key material, read verbatim from disk.

use crate::{Error, Result};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};
use tracing::debug;

/// The contents of one credential file.
#[derive(Clone)]
pub struct Credential {
    path: PathBuf,
    pem: Vec<u8>,
}

impl Credential {
    /// Reads `path` into memory. An unreadable or empty file is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let pem = fs::read(&path).map_err(|source| Error::Credential {
            path: path.clone(),
            source,
        })?;
        if pem.is_empty() {
            return Err(Error::EmptyCredential(path));
        }
        debug!(path = %path.display(), bytes = pem.len(), "loaded credential");
        Ok(Self { path, pem })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pem
    }
}

// Keep key material out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("path", &self.path)
            .field("bytes", &self.pem.len())
            .finish()
    }
}

/// Private key and certificate a server presents.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    key: Credential,
    certificate: Credential,
}

impl ServerIdentity {
    /// Both files must load.
    pub fn load(key: impl AsRef<Path>, certificate: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            key: Credential::load(key)?,
            certificate: Credential::load(certificate)?,
        })
    }

    /// Builds an identity from optional paths: both present loads them, both
    /// absent means an unauthenticated listener, anything else is an error.
    pub fn from_paths(key: Option<&Path>, certificate: Option<&Path>) -> Result<Option<Self>> {
        match (key, certificate) {
            (Some(key), Some(certificate)) => Self::load(key, certificate).map(Some),
            (None, None) => Ok(None),
            _ => Err(Error::IncompleteIdentity),
        }
    }

    pub fn key(&self) -> &Credential {
        &self.key
    }

    pub fn certificate(&self) -> &Credential {
        &self.certificate
    }
}

/// Trust material a client attaches to its channel.
#[derive(Debug, Clone)]
pub struct ChannelCredentials {
    root_certificate: Credential,
    target_name_override: Option<String>,
}

impl ChannelCredentials {
    pub fn load(certificate: impl AsRef<Path>, target_name_override: Option<String>) -> Result<Self> {
        Ok(Self {
            root_certificate: Credential::load(certificate)?,
            target_name_override,
        })
    }

    pub fn root_certificate(&self) -> &Credential {
        &self.root_certificate
    }

    pub fn target_name_override(&self) -> Option<&str> {
        self.target_name_override.as_deref()
    }
}

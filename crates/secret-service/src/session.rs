//! Sessions
//!
//! A session is the context secrets are read and written through. It is
//! opened with `Service::open_session`, owned by the caller and must be closed
//! explicitly. [`Session::close`] consumes the handle, so a closed session
//! cannot be used again.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bus::Bus;
use crate::constants::{session, ALGORITHM_DH, ALGORITHM_PLAIN, SESSION_INTERFACE};
use crate::error::Result;
use crate::value::ObjectPath;

/// Session transfer algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    /// Secrets travel unencrypted
    #[default]
    #[serde(rename = "plain")]
    Plain,
    /// Recognized, not supported
    #[serde(rename = "dh-ietf1024-sha256-aes128-cbc-pkcs7")]
    DhIetf1024Sha256Aes128CbcPkcs7,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => ALGORITHM_PLAIN,
            Self::DhIetf1024Sha256Aes128CbcPkcs7 => ALGORITHM_DH,
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Plain)
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An open session
#[derive(Debug)]
pub struct Session {
    path: ObjectPath,
    bus: Bus,
    algorithm: Algorithm,
    closed: bool,
}

impl Session {
    pub(crate) fn new(bus: Bus, path: ObjectPath, algorithm: Algorithm) -> Self {
        Self {
            path,
            bus,
            algorithm,
            closed: false,
        }
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Close the session on the service
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.bus
            .call(&self.path, SESSION_INTERFACE, session::CLOSE, Vec::new())?;
        debug!(path = %self.path, "Session closed");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            warn!(path = %self.path, "Session dropped without being closed");
        }
    }
}

//! Shared connection context
//!
//! Every handle carries a [`Bus`]: a reference to the shared connection plus
//! the client configuration. Cloning is cheap and never duplicates the
//! connection itself.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::value::{FromValue, ObjectPath, Value};

#[derive(Clone)]
pub struct Bus {
    connection: Arc<dyn Connection>,
    config: Arc<ClientConfig>,
}

impl Bus {
    pub fn new(connection: Arc<dyn Connection>, config: ClientConfig) -> Self {
        Self {
            connection,
            config: Arc::new(config),
        }
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn call(
        &self,
        path: &ObjectPath,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>> {
        debug!(%path, interface, method, "Calling remote method");
        Ok(self.connection.call(path, interface, method, args)?)
    }

    pub(crate) fn get<T: FromValue>(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> Result<T> {
        debug!(%path, interface, name, "Reading property");
        let value = self.connection.get_property(path, interface, name)?;
        T::from_value(value)
    }

    /// Read a `u64` unix-seconds property as a timestamp
    pub(crate) fn timestamp(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> Result<DateTime<Utc>> {
        let secs: u64 = self.get(path, interface, name)?;
        i64::try_from(secs)
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| Error::Decode(format!("timestamp out of range: {}", secs)))
    }

    pub(crate) fn set(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
        value: Value,
    ) -> Result<()> {
        debug!(%path, interface, name, "Writing property");
        Ok(self.connection.set_property(path, interface, name, value)?)
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus").field("config", &self.config).finish_non_exhaustive()
    }
}

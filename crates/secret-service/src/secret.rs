//! Secret envelope
//!
//! The `(oayays)` record that carries a secret value across the bus, bound to
//! the session it was produced for. Built fresh for every read and write.

use std::fmt;

use zbus::zvariant::StructureBuilder;

use crate::error::{Error, Result};
use crate::value::{self, FromValue, ObjectPath, Value};

/// A secret value as transferred over the bus
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    /// Session the value is encoded for
    pub session: ObjectPath,
    /// Algorithm parameters (empty for `plain`)
    pub parameters: Vec<u8>,
    /// Raw value bytes
    pub value: Vec<u8>,
    /// Content type, e.g. `text/plain`
    pub content_type: String,
}

impl Secret {
    /// Envelope for the unencrypted transport mode
    pub fn plain(
        session: ObjectPath,
        value: impl Into<Vec<u8>>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            session,
            parameters: Vec::new(),
            value: value.into(),
            content_type: content_type.into(),
        }
    }

    /// The value as UTF-8, if it is valid UTF-8
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }

    pub fn to_value(&self) -> Value {
        let fields = StructureBuilder::new()
            .add_field(self.session.clone())
            .add_field(self.parameters.clone())
            .add_field(self.value.clone())
            .add_field(self.content_type.clone())
            .build();
        Value::Structure(fields)
    }
}

impl FromValue for Secret {
    fn from_value(value: Value) -> Result<Self> {
        let fields = match value::into_inner(value) {
            Value::Structure(fields) => fields.into_fields(),
            other => return Err(Error::unexpected("(oayays)", other.value_signature())),
        };
        let [session, parameters, value, content_type]: [Value; 4] = fields
            .try_into()
            .map_err(|fields: Vec<Value>| Error::arity(4, fields.len()))?;

        Ok(Self {
            session: ObjectPath::from_value(session)?,
            parameters: Vec::from_value(parameters)?,
            value: Vec::from_value(value)?,
            content_type: String::from_value(content_type)?,
        })
    }
}

// Keep secret bytes out of logs
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("session", &self.session)
            .field("parameters", &self.parameters.len())
            .field("value", &format_args!("<{} bytes>", self.value.len()))
            .field("content_type", &self.content_type)
            .finish()
    }
}

//! D-Bus transport
//!
//! [`DbusConnection`] implements [`Connection`] over a blocking zbus
//! connection to the session bus. Method calls and property access go to the
//! `org.freedesktop.secrets` name. Signals are received through one zbus
//! message stream per `(interface, member)` pair; a forwarder thread feeds
//! each stream into a [`SignalRouter`], which fans signals out to
//! subscriptions.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use tracing::{debug, warn};
use zbus::blocking::{self, MessageIterator};
use zbus::message::{Message, Type as MessageType};
use zbus::zvariant::{OwnedStructure, OwnedValue, Structure, StructureBuilder};
use zbus::MatchRule as DbusMatchRule;

use crate::connection::{Connection, MatchRule, Signal, SignalRouter, Subscription, SubscriptionId};
use crate::constants::SERVICE_NAME;
use crate::error::TransportError;
use crate::value::{ObjectPath, Value};

const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

type Forwarders = Arc<Mutex<HashSet<(String, String)>>>;

impl From<zbus::Error> for TransportError {
    fn from(e: zbus::Error) -> Self {
        match e {
            zbus::Error::MethodError(name, detail, _) => {
                TransportError::named(name.to_string(), detail.unwrap_or_default())
            }
            other => TransportError::new(other.to_string()),
        }
    }
}

/// Connection to a secret service on a real message bus
pub struct DbusConnection {
    connection: blocking::Connection,
    destination: String,
    router: Arc<SignalRouter>,
    forwarders: Forwarders,
}

impl DbusConnection {
    /// Connect to the session bus
    pub fn session() -> Result<Self, TransportError> {
        Ok(Self::new(blocking::Connection::session()?))
    }

    pub fn new(connection: blocking::Connection) -> Self {
        Self::with_destination(connection, SERVICE_NAME)
    }

    /// Talk to a service registered under `destination` instead
    pub fn with_destination(connection: blocking::Connection, destination: &str) -> Self {
        Self {
            connection,
            destination: destination.to_string(),
            router: Arc::new(SignalRouter::new()),
            forwarders: Arc::default(),
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Start forwarding `interface.member` signals unless already running
    ///
    /// The match rule is registered with the bus before this returns.
    fn ensure_forwarder(&self, interface: &str, member: &str) -> Result<(), TransportError> {
        let key = (interface.to_string(), member.to_string());
        let mut forwarders = lock(&self.forwarders);
        if forwarders.contains(&key) {
            return Ok(());
        }

        let rule = DbusMatchRule::builder()
            .msg_type(MessageType::Signal)
            .interface(interface)?
            .member(member)?
            .build();
        let stream = MessageIterator::for_match_rule(rule, &self.connection, None)?;

        let router = self.router.clone();
        let registry = self.forwarders.clone();
        let thread_key = key.clone();
        thread::Builder::new()
            .name(format!("dbus-{}", member))
            .spawn(move || forward(stream, &router, &registry, thread_key))
            .map_err(|e| TransportError::new(format!("Failed to start signal forwarder: {}", e)))?;

        debug!(interface, member, "Forwarding signals");
        forwarders.insert(key);
        Ok(())
    }
}

impl Connection for DbusConnection {
    fn call(
        &self,
        path: &ObjectPath,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, TransportError> {
        let destination = Some(self.destination.as_str());
        let reply = if args.is_empty() {
            self.connection
                .call_method(destination, path.as_str(), Some(interface), method, &())?
        } else {
            let body = arguments(args);
            self.connection
                .call_method(destination, path.as_str(), Some(interface), method, &body)?
        };
        decode_body(&reply)
    }

    fn get_property(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> Result<Value, TransportError> {
        let reply = self.connection.call_method(
            Some(self.destination.as_str()),
            path.as_str(),
            Some(PROPERTIES_INTERFACE),
            "Get",
            &(interface, name),
        )?;
        let value: OwnedValue = reply.body().deserialize()?;
        Ok(Value::from(value))
    }

    fn set_property(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
        value: Value,
    ) -> Result<(), TransportError> {
        self.connection.call_method(
            Some(self.destination.as_str()),
            path.as_str(),
            Some(PROPERTIES_INTERFACE),
            "Set",
            &(interface, name, value),
        )?;
        Ok(())
    }

    fn subscribe(&self, rule: MatchRule) -> Result<Subscription, TransportError> {
        self.ensure_forwarder(&rule.interface, &rule.member)?;
        Ok(self.router.subscribe(rule))
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError> {
        self.router.release(id);
        Ok(())
    }
}

/// Message body carrying `args` as separate arguments
fn arguments(args: Vec<Value>) -> Structure<'static> {
    args.into_iter()
        .fold(StructureBuilder::new(), |body, arg| body.append_field(arg))
        .build()
}

fn lock(forwarders: &Forwarders) -> MutexGuard<'_, HashSet<(String, String)>> {
    forwarders.lock().unwrap_or_else(|e| e.into_inner())
}

/// Pump one signal stream into the router until the connection goes away
fn forward(
    stream: MessageIterator,
    router: &SignalRouter,
    registry: &Forwarders,
    key: (String, String),
) {
    for message in stream {
        let signal = message.map_err(TransportError::from).and_then(|m| signal_from(&m));
        match signal {
            Ok(signal) => {
                router.emit(&signal);
            }
            Err(e) => warn!(member = %key.1, "Skipping malformed signal: {}", e),
        }
    }
    debug!(interface = %key.0, member = %key.1, "Signal stream ended");
    lock(registry).remove(&key);
    // Waiting subscribers observe the end of their stream
    router.close();
}

fn signal_from(message: &Message) -> Result<Signal, TransportError> {
    let header = message.header();
    let path = header
        .path()
        .ok_or_else(|| TransportError::new("signal without a path"))?;
    let interface = header
        .interface()
        .ok_or_else(|| TransportError::new("signal without an interface"))?;
    let member = header
        .member()
        .ok_or_else(|| TransportError::new("signal without a member"))?;

    Ok(Signal::new(
        ObjectPath::from(path.clone()),
        interface.as_str(),
        member.as_str(),
        decode_body(message)?,
    ))
}

/// Split a message body into its top-level values
fn decode_body(message: &Message) -> Result<Vec<Value>, TransportError> {
    let body = message.body();
    let signature = match body.signature() {
        Some(signature) if !signature.as_str().is_empty() => signature.as_str().to_string(),
        _ => return Ok(Vec::new()),
    };

    let OwnedStructure(structure) = body.deserialize()?;
    // A body holding exactly one struct is not wrapped again
    if structure.signature().as_str() == signature {
        Ok(vec![Value::Structure(structure)])
    } else {
        Ok(structure.into_fields())
    }
}

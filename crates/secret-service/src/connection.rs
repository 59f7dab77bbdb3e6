//! Transport seam
//!
//! The client talks to the service through a [`Connection`]: method calls,
//! property access and signal subscriptions. Message framing and connection
//! setup belong to the implementation ([`crate::dbus::DbusConnection`] on a
//! real bus); the handles in this crate only hold an `Arc<dyn Connection>`
//! and never own it exclusively.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{trace, warn};
use zbus::zvariant;

use crate::error::TransportError;
use crate::value::{ObjectPath, Value};

/// Identifies one live subscription on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A signal emitted by a remote object
#[derive(Debug, PartialEq)]
pub struct Signal {
    pub path: ObjectPath,
    pub interface: String,
    pub member: String,
    pub body: Vec<Value>,
}

impl Signal {
    pub fn new(path: ObjectPath, interface: &str, member: &str, body: Vec<Value>) -> Self {
        Self {
            path,
            interface: interface.to_string(),
            member: member.to_string(),
            body,
        }
    }

    /// Copy the signal for another subscriber
    ///
    /// Fails only when the body carries a file descriptor that cannot be
    /// duplicated.
    pub fn try_clone(&self) -> Result<Self, zvariant::Error> {
        Ok(Self {
            path: self.path.clone(),
            interface: self.interface.clone(),
            member: self.member.clone(),
            body: self
                .body
                .iter()
                .map(Value::try_clone)
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Which signals a subscription receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRule {
    pub interface: String,
    pub member: String,
    /// Restrict to one emitting object; `None` matches every object
    pub path: Option<ObjectPath>,
}

impl MatchRule {
    pub fn signal(interface: &str, member: &str) -> Self {
        Self {
            interface: interface.to_string(),
            member: member.to_string(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: ObjectPath) -> Self {
        self.path = Some(path);
        self
    }

    pub fn matches(&self, signal: &Signal) -> bool {
        self.interface == signal.interface
            && self.member == signal.member
            && self.path.as_ref().map_or(true, |p| *p == signal.path)
    }
}

/// Receiving end of a signal subscription
///
/// The stream ends when the transport drops the sending half, either because
/// the subscription was released or because the connection went away.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    events: UnboundedReceiver<Signal>,
}

impl Subscription {
    pub fn new(id: SubscriptionId, events: UnboundedReceiver<Signal>) -> Self {
        Self { id, events }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn into_events(self) -> UnboundedReceiver<Signal> {
        self.events
    }
}

/// Bus operations the client depends on
///
/// Implementations must be usable from several threads at once: handles and
/// prompt waits share one connection.
pub trait Connection: Send + Sync {
    /// Invoke `method` on the object at `path`
    fn call(
        &self,
        path: &ObjectPath,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, TransportError>;

    fn get_property(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> Result<Value, TransportError>;

    fn set_property(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
        value: Value,
    ) -> Result<(), TransportError>;

    /// Start receiving signals matching `rule`
    ///
    /// Must not return before the subscription is active: signals emitted
    /// after this returns are delivered to the subscription.
    fn subscribe(&self, rule: MatchRule) -> Result<Subscription, TransportError>;

    /// Release a subscription
    ///
    /// The local sending half is always dropped, even when remote cleanup
    /// fails, so that a pending receiver observes the end of the stream.
    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError>;
}

struct Route {
    id: SubscriptionId,
    rule: MatchRule,
    sender: UnboundedSender<Signal>,
}

/// Fan-out of incoming signals to live subscriptions
///
/// Transport implementations feed every received signal to [`emit`] and
/// delegate [`Connection::subscribe`]/[`Connection::unsubscribe`] here.
///
/// [`emit`]: SignalRouter::emit
#[derive(Default)]
pub struct SignalRouter {
    next_id: AtomicU64,
    routes: Mutex<Vec<Route>>,
}

impl SignalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, rule: MatchRule) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (sender, events) = mpsc::unbounded_channel();
        self.lock().push(Route { id, rule, sender });
        Subscription::new(id, events)
    }

    /// Drop the route for `id`; returns false when it was not registered
    pub fn release(&self, id: SubscriptionId) -> bool {
        let mut routes = self.lock();
        let before = routes.len();
        routes.retain(|route| route.id != id);
        routes.len() != before
    }

    /// Deliver `signal` to every matching subscription, returning how many
    /// received it. Routes whose receiver is gone are pruned.
    pub fn emit(&self, signal: &Signal) -> usize {
        let mut delivered = 0;
        self.lock().retain(|route| {
            if !route.rule.matches(signal) {
                return !route.sender.is_closed();
            }
            let copy = match signal.try_clone() {
                Ok(copy) => copy,
                Err(e) => {
                    warn!(path = %signal.path, "Dropping undeliverable signal: {}", e);
                    return true;
                }
            };
            match route.sender.send(copy) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        trace!(path = %signal.path, member = %signal.member, delivered, "Routed signal");
        delivered
    }

    /// End every subscription
    pub fn close(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Route>> {
        // A panic while holding the lock cannot leave the route list invalid
        self.routes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

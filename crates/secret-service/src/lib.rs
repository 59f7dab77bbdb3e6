//! secret-service - Client for the freedesktop Secret Service
//!
//! Talks to a `org.freedesktop.secrets` provider (GNOME Keyring, KWallet,
//! KeePassXC) through typed handles for the service, its collections and
//! items, transfer sessions and prompts.
//!
//! Operations that the service may refuse until the user confirms them
//! (delete, create collection, lock, unlock) are driven through the prompt
//! machinery in [`prompt`] and [`privileged`]: the client subscribes to the
//! prompt's completion signal, shows the prompt and blocks until the user
//! completes or dismisses it.
//!
//! The bus itself sits behind the [`Connection`] trait. [`DbusConnection`]
//! implements it over zbus on the session bus; the `testing` feature adds an
//! in-process simulated service.

pub mod bus;
pub mod collection;
pub mod config;
pub mod connection;
pub mod constants;
pub mod dbus;
pub mod error;
pub mod item;
pub mod privileged;
pub mod prompt;
pub mod secret;
pub mod service;
pub mod session;
pub mod value;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bus::Bus;
pub use collection::Collection;
pub use config::ClientConfig;
pub use connection::{Connection, MatchRule, Signal, SignalRouter, Subscription, SubscriptionId};
pub use dbus::DbusConnection;
pub use error::{Error, Result, TransportError};
pub use item::Item;
pub use prompt::{Prompt, PromptOutcome, PromptState};
pub use secret::Secret;
pub use service::Service;
pub use session::{Algorithm, Session};
pub use value::{FromValue, ObjectPath, Value};

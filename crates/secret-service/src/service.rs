//! Service facade (org.freedesktop.Secret.Service)
//!
//! Entry point of the client: sessions, collections, aliases, cross-collection
//! search and the privileged create/lock/unlock operations. Lookups go to the
//! service every time; nothing is cached.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::bus::Bus;
use crate::collection::Collection;
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::constants::{collection, service, SERVICE_INTERFACE};
use crate::error::{Error, Result};
use crate::item::Item;
use crate::privileged::{self, Pending};
use crate::secret::Secret;
use crate::session::Session;
use crate::value::{self, FromValue, ObjectPath, Reply, Value};

/// Client for the secret service
#[derive(Debug, Clone)]
pub struct Service {
    bus: Bus,
}

impl Service {
    /// Client with the default configuration
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self::with_config(connection, ClientConfig::default())
    }

    pub fn with_config(connection: Arc<dyn Connection>, config: ClientConfig) -> Self {
        Self::from_bus(Bus::new(connection, config))
    }

    pub(crate) fn from_bus(bus: Bus) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn path(&self) -> &ObjectPath {
        &self.bus.config().service_path
    }

    /// Open a session using the configured algorithm
    pub fn open_session(&self) -> Result<Session> {
        let algorithm = self.bus.config().algorithm;
        if !algorithm.is_supported() {
            return Err(Error::UnsupportedAlgorithm(algorithm.to_string()));
        }

        let reply = self.call(
            service::OPEN_SESSION,
            vec![Value::from(algorithm.as_str()), value::variant("")],
        )?;
        let mut reply = Reply::new(reply, 2)?;
        let _output: Value = reply.next()?;
        let path: ObjectPath = reply.next()?;

        debug!(session = %path, %algorithm, "Opened session");
        Ok(Session::new(self.bus.clone(), path, algorithm))
    }

    /// All collections known to the service
    ///
    /// Fails as a whole if any collection cannot be opened.
    pub fn get_all_collections(&self) -> Result<Vec<Collection>> {
        let paths: Vec<ObjectPath> = self
            .bus
            .get(self.path(), SERVICE_INTERFACE, service::PROP_COLLECTIONS)?;
        paths
            .into_iter()
            .map(|path| Collection::open(self.bus.clone(), path))
            .collect()
    }

    /// First collection whose label equals `label`
    pub fn get_collection(&self, label: &str) -> Result<Collection> {
        for collection in self.get_all_collections()? {
            if collection.label()? == label {
                return Ok(collection);
            }
        }
        Err(Error::NotFound("unknown collection".to_string()))
    }

    /// The collection behind the configured default alias
    pub fn get_default_collection(&self) -> Result<Collection> {
        let path = self.bus.config().default_collection()?;
        Collection::open(self.bus.clone(), path)
    }

    /// Resolve `alias` and open the collection it points to
    pub fn get_collection_by_alias(&self, alias: &str) -> Result<Collection> {
        let path = self.read_alias(alias)?;
        Collection::open(self.bus.clone(), path)
    }

    /// Items in any collection matching `attributes`, split into
    /// `(unlocked, locked)`
    pub fn search_items(
        &self,
        attributes: &HashMap<String, String>,
    ) -> Result<(Vec<Item>, Vec<Item>)> {
        let reply = self.call(service::SEARCH_ITEMS, vec![value::string_map(attributes)])?;
        let mut reply = Reply::new(reply, 2)?;
        let unlocked: Vec<ObjectPath> = reply.next()?;
        let locked: Vec<ObjectPath> = reply.next()?;

        Ok((self.open_items(unlocked)?, self.open_items(locked)?))
    }

    /// Secrets of several items in one call
    pub fn get_secrets(
        &self,
        items: &[ObjectPath],
        session: &Session,
    ) -> Result<HashMap<ObjectPath, Secret>> {
        let reply = self.call(
            service::GET_SECRETS,
            vec![value::array(items.iter().cloned()), Value::from(session.path())],
        )?;
        Reply::new(reply, 1)?.next()
    }

    /// Path of the collection `name` refers to
    pub fn read_alias(&self, name: &str) -> Result<ObjectPath> {
        let reply = self.call(service::READ_ALIAS, vec![Value::from(name.to_string())])?;
        let path: ObjectPath = Reply::new(reply, 1)?.next()?;
        if path.is_root() {
            return Err(Error::NotFound("unknown alias".to_string()));
        }
        Ok(path)
    }

    /// Point `name` at `collection`; the `/` path deletes the alias
    pub fn set_alias(&self, name: &str, collection: &ObjectPath) -> Result<()> {
        self.call(
            service::SET_ALIAS,
            vec![Value::from(name.to_string()), Value::from(collection)],
        )?;
        Ok(())
    }

    pub fn remove_alias(&self, name: &str) -> Result<()> {
        self.set_alias(name, &ObjectPath::root())
    }

    /// Create a collection, optionally under `alias` (empty for none)
    pub fn create_collection(&self, label: &str, alias: &str) -> Result<Collection> {
        let properties =
            value::properties([(collection::LABEL_KEY, Value::from(label.to_string()))]);
        let reply = self.call(
            service::CREATE_COLLECTION,
            vec![properties, Value::from(alias.to_string())],
        )?;
        let mut reply = Reply::new(reply, 2)?;
        let pending = Pending::new(reply.next::<ObjectPath>()?, reply.next()?);

        let path = privileged::execute(&self.bus, pending, |_, value| {
            ObjectPath::from_value(value)
        })?;
        info!(collection = %path, label, "Created collection");
        Collection::open(self.bus.clone(), path)
    }

    /// Lock items or collections, returning the objects that were locked
    pub fn lock(&self, objects: &[ObjectPath]) -> Result<Vec<ObjectPath>> {
        self.toggle(service::LOCK, objects)
    }

    /// Unlock items or collections, returning the objects that were unlocked
    pub fn unlock(&self, objects: &[ObjectPath]) -> Result<Vec<ObjectPath>> {
        self.toggle(service::UNLOCK, objects)
    }

    fn toggle(&self, method: &str, objects: &[ObjectPath]) -> Result<Vec<ObjectPath>> {
        let reply = self.call(method, vec![value::array(objects.iter().cloned())])?;
        let mut reply = Reply::new(reply, 2)?;
        let pending = Pending::new(reply.next::<Vec<ObjectPath>>()?, reply.next()?);

        privileged::execute(&self.bus, pending, |mut done, value| {
            done.extend(prompted_objects(value)?);
            Ok(done)
        })
    }

    fn open_items(&self, paths: Vec<ObjectPath>) -> Result<Vec<Item>> {
        paths
            .into_iter()
            .map(|path| Item::open(self.bus.clone(), path))
            .collect()
    }

    fn call(&self, method: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        self.bus.call(self.path(), SERVICE_INTERFACE, method, args)
    }
}

/// Objects handled by a lock/unlock prompt. Services that complete with an
/// empty result report nothing beyond the immediate reply.
fn prompted_objects(value: Value) -> Result<Vec<ObjectPath>> {
    match value::into_inner(value) {
        Value::Str(s) if s.as_str().is_empty() => Ok(Vec::new()),
        value => Vec::from_value(value),
    }
}

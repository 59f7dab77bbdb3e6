//! Collection handles (org.freedesktop.Secret.Collection)

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

use crate::bus::Bus;
use crate::constants::{collection, item, COLLECTION_INTERFACE};
use crate::error::{Error, Result};
use crate::item::Item;
use crate::privileged::{self, Pending};
use crate::secret::Secret;
use crate::session::Session;
use crate::value::{self, FromValue, ObjectPath, Reply, Value};

/// A named container of items
#[derive(Debug, Clone)]
pub struct Collection {
    path: ObjectPath,
    bus: Bus,
}

impl Collection {
    /// Handle for `path` without checking that the collection exists
    pub fn new(bus: Bus, path: ObjectPath) -> Self {
        Self { path, bus }
    }

    /// Handle for `path`, verified by reading its label
    pub fn open(bus: Bus, path: ObjectPath) -> Result<Self> {
        let collection = Self::new(bus, path);
        if let Err(e) = collection.label() {
            return Err(Error::NotFound(format!("collection {}: {}", collection.path, e)));
        }
        Ok(collection)
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn label(&self) -> Result<String> {
        self.bus
            .get(&self.path, COLLECTION_INTERFACE, collection::PROP_LABEL)
    }

    pub fn set_label(&self, label: &str) -> Result<()> {
        self.bus.set(
            &self.path,
            COLLECTION_INTERFACE,
            collection::PROP_LABEL,
            Value::from(label.to_string()),
        )
    }

    pub fn is_locked(&self) -> Result<bool> {
        self.bus
            .get(&self.path, COLLECTION_INTERFACE, collection::PROP_LOCKED)
    }

    pub fn created(&self) -> Result<DateTime<Utc>> {
        self.bus
            .timestamp(&self.path, COLLECTION_INTERFACE, collection::PROP_CREATED)
    }

    pub fn modified(&self) -> Result<DateTime<Utc>> {
        self.bus
            .timestamp(&self.path, COLLECTION_INTERFACE, collection::PROP_MODIFIED)
    }

    /// Delete the collection, prompting if needed
    pub fn delete(&self) -> Result<()> {
        let reply = self
            .bus
            .call(&self.path, COLLECTION_INTERFACE, collection::DELETE, Vec::new())?;
        let prompt: ObjectPath = Reply::new(reply, 1)?.next()?;

        privileged::execute(&self.bus, Pending::new((), prompt), |_, _| Ok(()))
    }

    /// All items in the collection
    ///
    /// Fails as a whole if any item cannot be opened.
    pub fn get_all_items(&self) -> Result<Vec<Item>> {
        let paths: Vec<ObjectPath> = self
            .bus
            .get(&self.path, COLLECTION_INTERFACE, collection::PROP_ITEMS)?;
        self.open_items(paths)
    }

    /// First item whose label equals `label`
    pub fn get_item(&self, label: &str) -> Result<Item> {
        for item in self.get_all_items()? {
            if item.label()? == label {
                return Ok(item);
            }
        }
        Err(Error::NotFound("no such item".to_string()))
    }

    /// Items whose attributes contain every pair in `attributes`
    pub fn search_items(&self, attributes: &HashMap<String, String>) -> Result<Vec<Item>> {
        let reply = self.bus.call(
            &self.path,
            COLLECTION_INTERFACE,
            collection::SEARCH_ITEMS,
            vec![value::string_map(attributes)],
        )?;
        let paths: Vec<ObjectPath> = Reply::new(reply, 1)?.next()?;
        self.open_items(paths)
    }

    /// Create an item, optionally replacing one with the same attributes
    pub fn create_item(
        &self,
        session: &Session,
        label: &str,
        attributes: &HashMap<String, String>,
        secret: &[u8],
        content_type: &str,
        replace: bool,
    ) -> Result<Item> {
        let properties = value::properties([
            (item::LABEL_KEY, Value::from(label.to_string())),
            (item::ATTRIBUTES_KEY, value::string_map(attributes)),
        ]);
        let secret = Secret::plain(session.path().clone(), secret, content_type);

        let reply = self.bus.call(
            &self.path,
            COLLECTION_INTERFACE,
            collection::CREATE_ITEM,
            vec![properties, secret.to_value(), Value::from(replace)],
        )?;
        let mut reply = Reply::new(reply, 2)?;
        let pending = Pending::new(reply.next::<ObjectPath>()?, reply.next()?);

        let path = privileged::execute(&self.bus, pending, |_, value| {
            ObjectPath::from_value(value)
        })?;
        debug!(collection = %self.path, item = %path, "Created item");
        Item::open(self.bus.clone(), path)
    }

    fn open_items(&self, paths: Vec<ObjectPath>) -> Result<Vec<Item>> {
        paths
            .into_iter()
            .map(|path| Item::open(self.bus.clone(), path))
            .collect()
    }
}

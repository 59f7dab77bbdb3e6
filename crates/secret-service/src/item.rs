//! Item handles (org.freedesktop.Secret.Item)

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::bus::Bus;
use crate::constants::{item, ITEM_INTERFACE};
use crate::error::{Error, Result};
use crate::privileged::{self, Pending};
use crate::secret::Secret;
use crate::service::Service;
use crate::session::Session;
use crate::value::{self, ObjectPath, Reply, Value};

/// A secret record inside a collection
#[derive(Debug, Clone)]
pub struct Item {
    path: ObjectPath,
    bus: Bus,
}

impl Item {
    /// Handle for `path` without checking that the item exists
    pub fn new(bus: Bus, path: ObjectPath) -> Self {
        Self { path, bus }
    }

    /// Handle for `path`, verified by reading its label
    pub fn open(bus: Bus, path: ObjectPath) -> Result<Self> {
        let item = Self::new(bus, path);
        if let Err(e) = item.label() {
            return Err(Error::NotFound(format!("item {}: {}", item.path, e)));
        }
        Ok(item)
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn label(&self) -> Result<String> {
        self.bus.get(&self.path, ITEM_INTERFACE, item::PROP_LABEL)
    }

    pub fn set_label(&self, label: &str) -> Result<()> {
        self.bus.set(
            &self.path,
            ITEM_INTERFACE,
            item::PROP_LABEL,
            Value::from(label.to_string()),
        )
    }

    pub fn attributes(&self) -> Result<HashMap<String, String>> {
        self.bus.get(&self.path, ITEM_INTERFACE, item::PROP_ATTRIBUTES)
    }

    pub fn set_attributes(&self, attributes: &HashMap<String, String>) -> Result<()> {
        self.bus.set(
            &self.path,
            ITEM_INTERFACE,
            item::PROP_ATTRIBUTES,
            value::string_map(attributes),
        )
    }

    pub fn is_locked(&self) -> Result<bool> {
        self.bus.get(&self.path, ITEM_INTERFACE, item::PROP_LOCKED)
    }

    pub fn created(&self) -> Result<DateTime<Utc>> {
        self.bus
            .timestamp(&self.path, ITEM_INTERFACE, item::PROP_CREATED)
    }

    pub fn modified(&self) -> Result<DateTime<Utc>> {
        self.bus
            .timestamp(&self.path, ITEM_INTERFACE, item::PROP_MODIFIED)
    }

    /// Unlock this item through the service, prompting if needed
    ///
    /// Returns whether the service reported the item as unlocked.
    pub fn unlock(&self) -> Result<bool> {
        let unlocked = Service::from_bus(self.bus.clone()).unlock(&[self.path.clone()])?;
        Ok(unlocked.contains(&self.path))
    }

    /// Delete the item, prompting if needed
    pub fn delete(&self) -> Result<()> {
        let reply = self
            .bus
            .call(&self.path, ITEM_INTERFACE, item::DELETE, Vec::new())?;
        let prompt: ObjectPath = Reply::new(reply, 1)?.next()?;

        privileged::execute(&self.bus, Pending::new((), prompt), |_, _| Ok(()))
    }

    /// Read the secret through `session`
    pub fn get_secret(&self, session: &Session) -> Result<Secret> {
        let reply = self.bus.call(
            &self.path,
            ITEM_INTERFACE,
            item::GET_SECRET,
            vec![Value::from(session.path())],
        )?;
        Reply::new(reply, 1)?.next()
    }

    /// Replace the secret
    pub fn set_secret(&self, session: &Session, value: &[u8], content_type: &str) -> Result<()> {
        let secret = Secret::plain(session.path().clone(), value, content_type);
        self.bus.call(
            &self.path,
            ITEM_INTERFACE,
            item::SET_SECRET,
            vec![secret.to_value()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BusEvent, MemoryBus, PromptPolicy};
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryBus>, Service, Item) {
        let memory = Arc::new(MemoryBus::new());
        let collection = memory.add_collection("login", Some("default")).unwrap();
        let path = memory.add_item(
            &collection,
            "github token",
            &[("service", "github"), ("user", "octocat")],
            b"ghp_123",
            "text/plain",
        )
        .unwrap();
        let service = Service::new(memory.clone());
        let item = Item::open(service.bus().clone(), path).unwrap();
        (memory, service, item)
    }

    #[test]
    fn test_properties() {
        let (_memory, _service, item) = setup();

        assert_eq!(item.label().unwrap(), "github token");
        assert!(!item.is_locked().unwrap());
        assert_eq!(item.attributes().unwrap()["user"], "octocat");
        assert!(item.created().unwrap() <= item.modified().unwrap());

        item.set_label("renamed").unwrap();
        assert_eq!(item.label().unwrap(), "renamed");

        let mut attrs = HashMap::new();
        attrs.insert("service".to_string(), "gitlab".to_string());
        item.set_attributes(&attrs).unwrap();
        assert_eq!(item.attributes().unwrap(), attrs);
    }

    #[test]
    fn test_open_missing_item() {
        let (_memory, service, _item) = setup();
        let missing = ObjectPath::try_from("/org/freedesktop/secrets/collection/nope/1").unwrap();
        let err = Item::open(service.bus().clone(), missing).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_secret_round_trip() {
        let (_memory, service, item) = setup();
        let session = service.open_session().unwrap();

        item.set_secret(&session, b"my-key", "text/plain").unwrap();
        let secret = item.get_secret(&session).unwrap();
        assert_eq!(secret.value, b"my-key".to_vec());
        assert_eq!(secret.content_type, "text/plain");
        assert_eq!(&secret.session, session.path());

        session.close().unwrap();
    }

    #[test]
    fn test_delete_without_prompt() {
        let (memory, _service, item) = setup();

        item.delete().unwrap();
        assert!(!memory.has_object(item.path()));
        assert!(!memory.with_events(|events| events
            .iter()
            .any(|e| matches!(e, BusEvent::Subscribe { .. }))));
    }

    #[test]
    fn test_delete_with_completed_prompt() {
        let (memory, _service, item) = setup();
        memory.set_prompt_policy(PromptPolicy::Complete);

        item.delete().unwrap();
        assert!(!memory.has_object(item.path()));
    }

    #[test]
    fn test_delete_with_dismissed_prompt() {
        let (memory, _service, item) = setup();
        memory.set_prompt_policy(PromptPolicy::Dismiss);

        let err = item.delete().unwrap_err();
        assert!(matches!(err, Error::PromptDismissed));
        assert!(memory.has_object(item.path()));
    }

    #[test]
    fn test_unlock() {
        let (memory, _service, item) = setup();
        memory.set_locked(item.path(), true);
        assert!(item.is_locked().unwrap());

        memory.set_prompt_policy(PromptPolicy::Complete);
        assert!(item.unlock().unwrap());
        assert!(!item.is_locked().unwrap());
    }
}

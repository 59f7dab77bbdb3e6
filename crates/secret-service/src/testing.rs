//! In-process simulated secret service
//!
//! [`MemoryBus`] implements [`Connection`] by answering the Secret Service
//! protocol from an in-memory object tree. Privileged calls follow the
//! configured [`PromptPolicy`]. Every bus operation is recorded as a
//! [`BusEvent`] for ordering assertions, and [`MemoryBus::close`] simulates a
//! lost connection. Changes emit the same created, deleted and changed
//! signals a real service does.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use zbus::zvariant::{Dict, Signature, Type};

use crate::connection::{
    Connection, MatchRule, Signal, SignalRouter, Subscription, SubscriptionId,
};
use crate::constants::{
    collection, item, prompt, service, session, ALGORITHM_PLAIN, COLLECTION_INTERFACE,
    ITEM_INTERFACE, PROMPT_INTERFACE, SERVICE_INTERFACE, SERVICE_PATH, SESSION_INTERFACE,
};
use crate::error::TransportError;
use crate::secret::Secret;
use crate::value::{self, FromValue, ObjectPath, Reply, Value};

const ERR_FAILED: &str = "org.freedesktop.DBus.Error.Failed";
const ERR_UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
const ERR_UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
const ERR_UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
const ERR_INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
const ERR_NOT_SUPPORTED: &str = "org.freedesktop.DBus.Error.NotSupported";
const ERR_DISCONNECTED: &str = "org.freedesktop.DBus.Error.Disconnected";
const ERR_IS_LOCKED: &str = "org.freedesktop.Secret.Error.IsLocked";
const ERR_NO_SESSION: &str = "org.freedesktop.Secret.Error.NoSession";
const ERR_NO_SUCH_OBJECT: &str = "org.freedesktop.Secret.Error.NoSuchObject";

const SECRET_SIGNATURE: &str = "(oayays)";
const EPOCH: u64 = 1_700_000_000;

/// How privileged calls are answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptPolicy {
    /// Apply immediately and return the `/` prompt
    #[default]
    Never,
    /// Return a prompt that completes when shown
    Complete,
    /// Return a prompt the user dismisses
    Dismiss,
    /// Return a prompt that never signals
    Silent,
}

/// A recorded bus operation
#[derive(Debug, PartialEq)]
pub enum BusEvent {
    Call {
        path: ObjectPath,
        interface: String,
        method: String,
        args: Vec<Value>,
    },
    GetProperty {
        path: ObjectPath,
        interface: String,
        name: String,
    },
    SetProperty {
        path: ObjectPath,
        interface: String,
        name: String,
        value: Value,
    },
    Subscribe {
        interface: String,
        member: String,
    },
    Unsubscribe,
}

#[derive(Debug)]
struct CollectionRecord {
    label: String,
    locked: bool,
    created: u64,
    modified: u64,
    items: Vec<ObjectPath>,
}

#[derive(Debug)]
struct ItemRecord {
    collection: ObjectPath,
    label: String,
    attributes: HashMap<String, String>,
    value: Vec<u8>,
    content_type: String,
    locked: bool,
    created: u64,
    modified: u64,
}

/// Work held back until its prompt completes
#[derive(Debug)]
enum Deferred {
    Fixed(Value),
    DeleteItem(ObjectPath),
    DeleteCollection(ObjectPath),
    CreateCollection { label: String, alias: String },
    Lock(Vec<ObjectPath>),
    Unlock(Vec<ObjectPath>),
}

#[derive(Debug, Default)]
struct State {
    collections: BTreeMap<ObjectPath, CollectionRecord>,
    items: BTreeMap<ObjectPath, ItemRecord>,
    aliases: HashMap<String, ObjectPath>,
    sessions: HashSet<ObjectPath>,
    prompts: HashMap<ObjectPath, Deferred>,
    policy: PromptPolicy,
    next_id: u64,
    clock: u64,
    events: Vec<BusEvent>,
    closed: bool,
}

type CallResult<T> = Result<T, TransportError>;

fn invalid_args(e: crate::error::Error) -> TransportError {
    TransportError::named(ERR_INVALID_ARGS, e.to_string())
}

fn unknown_object(path: &ObjectPath) -> TransportError {
    TransportError::named(ERR_UNKNOWN_OBJECT, format!("no object at {}", path))
}

fn root() -> ObjectPath {
    ObjectPath::from_static(SERVICE_PATH)
}

/// `parent/segment`
fn child(parent: &ObjectPath, segment: &str) -> CallResult<ObjectPath> {
    parent
        .join(segment)
        .map_err(|e| TransportError::named(ERR_FAILED, e.to_string()))
}

/// Copy a value for the event log
fn duplicate(value: &Value) -> CallResult<Value> {
    value
        .try_clone()
        .map_err(|e| TransportError::named(ERR_INVALID_ARGS, e.to_string()))
}

fn collection_changed(path: &ObjectPath) -> Signal {
    Signal::new(
        root(),
        SERVICE_INTERFACE,
        service::SIGNAL_COLLECTION_CHANGED,
        vec![Value::from(path)],
    )
}

fn item_changed(collection: &ObjectPath, path: &ObjectPath) -> Signal {
    Signal::new(
        collection.clone(),
        COLLECTION_INTERFACE,
        collection::SIGNAL_ITEM_CHANGED,
        vec![Value::from(path)],
    )
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        EPOCH + self.clock
    }

    /// Map `/aliases/<name>` paths onto the collection they point to
    fn resolve(&self, path: &ObjectPath) -> ObjectPath {
        let prefix = format!("{}/aliases/", SERVICE_PATH);
        path.as_str()
            .strip_prefix(&prefix)
            .and_then(|alias| self.aliases.get(alias))
            .cloned()
            .unwrap_or_else(|| path.clone())
    }

    fn collection(&self, path: &ObjectPath) -> CallResult<&CollectionRecord> {
        self.collections
            .get(&self.resolve(path))
            .ok_or_else(|| unknown_object(path))
    }

    fn collection_mut(&mut self, path: &ObjectPath) -> CallResult<&mut CollectionRecord> {
        let resolved = self.resolve(path);
        self.collections
            .get_mut(&resolved)
            .ok_or_else(|| unknown_object(path))
    }

    fn item(&self, path: &ObjectPath) -> CallResult<&ItemRecord> {
        self.items.get(path).ok_or_else(|| unknown_object(path))
    }

    fn item_mut(&mut self, path: &ObjectPath) -> CallResult<&mut ItemRecord> {
        self.items.get_mut(path).ok_or_else(|| unknown_object(path))
    }

    fn item_locked(&self, record: &ItemRecord) -> bool {
        record.locked
            || self
                .collections
                .get(&record.collection)
                .map_or(false, |c| c.locked)
    }

    fn check_session(&self, path: &ObjectPath) -> CallResult<()> {
        if self.sessions.contains(path) {
            Ok(())
        } else {
            Err(TransportError::named(ERR_NO_SESSION, format!("no session at {}", path)))
        }
    }

    /// Fresh `<service>/<kind>/<prefix><id>` path
    fn object_path(&mut self, kind: &str, prefix: &str) -> CallResult<ObjectPath> {
        let id = self.next_id();
        child(&child(&root(), kind)?, &format!("{}{}", prefix, id))
    }

    fn create_collection(
        &mut self,
        label: &str,
        alias: &str,
        signals: &mut Vec<Signal>,
    ) -> CallResult<ObjectPath> {
        let slug: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        let mut path = child(&root(), "collection")?;
        if !slug.is_empty() {
            path = child(&path, &slug)?;
        }
        if slug.is_empty() || self.collections.contains_key(&path) {
            path = self.object_path("collection", "c")?;
        }

        let now = self.tick();
        self.collections.insert(
            path.clone(),
            CollectionRecord {
                label: label.to_string(),
                locked: false,
                created: now,
                modified: now,
                items: Vec::new(),
            },
        );
        if !alias.is_empty() {
            self.aliases.insert(alias.to_string(), path.clone());
        }
        signals.push(Signal::new(
            root(),
            SERVICE_INTERFACE,
            service::SIGNAL_COLLECTION_CREATED,
            vec![Value::from(&path)],
        ));
        Ok(path)
    }

    fn delete_collection(&mut self, path: &ObjectPath, signals: &mut Vec<Signal>) {
        if let Some(record) = self.collections.remove(path) {
            for item in record.items {
                self.items.remove(&item);
            }
            self.aliases.retain(|_, target| target != path);
            signals.push(Signal::new(
                root(),
                SERVICE_INTERFACE,
                service::SIGNAL_COLLECTION_DELETED,
                vec![Value::from(path)],
            ));
        }
    }

    fn delete_item(&mut self, path: &ObjectPath, signals: &mut Vec<Signal>) {
        if let Some(record) = self.items.remove(path) {
            if let Some(parent) = self.collections.get_mut(&record.collection) {
                parent.items.retain(|p| p != path);
            }
            signals.push(Signal::new(
                record.collection,
                COLLECTION_INTERFACE,
                collection::SIGNAL_ITEM_DELETED,
                vec![Value::from(path)],
            ));
        }
    }

    fn set_locked(
        &mut self,
        paths: &[ObjectPath],
        locked: bool,
        signals: &mut Vec<Signal>,
    ) -> Vec<ObjectPath> {
        let mut changed = Vec::new();
        for path in paths {
            let resolved = self.resolve(path);
            if let Some(record) = self.collections.get_mut(&resolved) {
                record.locked = locked;
                signals.push(collection_changed(&resolved));
                changed.push(path.clone());
            } else if let Some(record) = self.items.get_mut(path) {
                record.locked = locked;
                signals.push(item_changed(&record.collection, path));
                changed.push(path.clone());
            }
        }
        changed
    }

    fn apply(&mut self, work: Deferred, signals: &mut Vec<Signal>) -> CallResult<Value> {
        let value = match work {
            Deferred::Fixed(value) => value,
            Deferred::DeleteItem(path) => {
                self.delete_item(&path, signals);
                Value::from("")
            }
            Deferred::DeleteCollection(path) => {
                self.delete_collection(&path, signals);
                Value::from("")
            }
            Deferred::CreateCollection { label, alias } => {
                Value::from(self.create_collection(&label, &alias, signals)?)
            }
            Deferred::Lock(paths) => value::array(self.set_locked(&paths, true, signals)),
            Deferred::Unlock(paths) => value::array(self.set_locked(&paths, false, signals)),
        };
        Ok(value)
    }

    /// Apply `work` now, or park it behind a prompt
    fn privileged(
        &mut self,
        work: Deferred,
        signals: &mut Vec<Signal>,
    ) -> CallResult<(Value, ObjectPath)> {
        if self.policy == PromptPolicy::Never {
            return Ok((self.apply(work, signals)?, ObjectPath::root()));
        }
        let path = self.object_path("prompt", "p")?;
        self.prompts.insert(path.clone(), work);
        Ok((Value::from(""), path))
    }

    fn search(
        &self,
        attributes: &HashMap<String, String>,
        within: Option<&ObjectPath>,
    ) -> (Vec<ObjectPath>, Vec<ObjectPath>) {
        let mut unlocked = Vec::new();
        let mut locked = Vec::new();
        for (path, record) in &self.items {
            if within.map_or(false, |c| *c != record.collection) {
                continue;
            }
            if !attributes
                .iter()
                .all(|(k, v)| record.attributes.get(k) == Some(v))
            {
                continue;
            }
            if self.item_locked(record) {
                locked.push(path.clone());
            } else {
                unlocked.push(path.clone());
            }
        }
        (unlocked, locked)
    }

    fn dispatch(
        &mut self,
        path: &ObjectPath,
        interface: &str,
        method: &str,
        args: Vec<Value>,
        signals: &mut Vec<Signal>,
    ) -> CallResult<Vec<Value>> {
        match interface {
            SERVICE_INTERFACE if *path == root() => self.service_call(method, args, signals),
            COLLECTION_INTERFACE => self.collection_call(path, method, args, signals),
            ITEM_INTERFACE => self.item_call(path, method, args, signals),
            SESSION_INTERFACE => match method {
                session::CLOSE => {
                    if self.sessions.remove(path) {
                        Ok(Vec::new())
                    } else {
                        Err(unknown_object(path))
                    }
                }
                _ => Err(unknown_method(interface, method)),
            },
            PROMPT_INTERFACE => self.prompt_call(path, method, signals),
            _ => Err(unknown_object(path)),
        }
    }

    fn service_call(
        &mut self,
        method: &str,
        args: Vec<Value>,
        signals: &mut Vec<Signal>,
    ) -> CallResult<Vec<Value>> {
        match method {
            service::OPEN_SESSION => {
                let mut args = Reply::new(args, 2).map_err(invalid_args)?;
                let algorithm: String = args.next().map_err(invalid_args)?;
                if algorithm != ALGORITHM_PLAIN {
                    return Err(TransportError::named(
                        ERR_NOT_SUPPORTED,
                        format!("algorithm {} is not supported", algorithm),
                    ));
                }
                let path = self.object_path("session", "s")?;
                self.sessions.insert(path.clone());
                Ok(vec![value::variant(""), Value::from(path)])
            }
            service::CREATE_COLLECTION => {
                let mut args = Reply::new(args, 2).map_err(invalid_args)?;
                let mut properties: HashMap<String, Value> =
                    args.next().map_err(invalid_args)?;
                let alias: String = args.next().map_err(invalid_args)?;
                let label = take_property::<String>(&mut properties, collection::LABEL_KEY)?
                    .unwrap_or_default();

                let work = Deferred::CreateCollection { label, alias };
                let (result, prompt) = self.privileged(work, signals)?;
                let created = if prompt.is_root() {
                    result
                } else {
                    Value::from(ObjectPath::root())
                };
                Ok(vec![created, Value::from(prompt)])
            }
            service::SEARCH_ITEMS => {
                let attributes: HashMap<String, String> = single(args)?;
                let (unlocked, locked) = self.search(&attributes, None);
                Ok(vec![value::array(unlocked), value::array(locked)])
            }
            service::LOCK | service::UNLOCK => {
                let objects: Vec<ObjectPath> = single(args)?;
                let work = if method == service::LOCK {
                    Deferred::Lock(objects)
                } else {
                    Deferred::Unlock(objects)
                };
                let (result, prompt) = self.privileged(work, signals)?;
                let done = if prompt.is_root() {
                    result
                } else {
                    value::array(Vec::<ObjectPath>::new())
                };
                Ok(vec![done, Value::from(prompt)])
            }
            service::GET_SECRETS => {
                let mut args = Reply::new(args, 2).map_err(invalid_args)?;
                let items: Vec<ObjectPath> = args.next().map_err(invalid_args)?;
                let session: ObjectPath = args.next().map_err(invalid_args)?;
                self.check_session(&session)?;

                let mut secrets = Dict::new(
                    ObjectPath::signature(),
                    Signature::from_static_str_unchecked(SECRET_SIGNATURE),
                );
                for path in items {
                    let record = self.item(&path)?;
                    if self.item_locked(record) {
                        continue;
                    }
                    let secret = Secret::plain(
                        session.clone(),
                        record.value.clone(),
                        record.content_type.clone(),
                    );
                    secrets
                        .append(Value::from(path), secret.to_value())
                        .map_err(|e| TransportError::named(ERR_FAILED, e.to_string()))?;
                }
                Ok(vec![Value::Dict(secrets)])
            }
            service::READ_ALIAS => {
                let name: String = single(args)?;
                let target = self.aliases.get(&name).cloned().unwrap_or_else(ObjectPath::root);
                Ok(vec![Value::from(target)])
            }
            service::SET_ALIAS => {
                let mut args = Reply::new(args, 2).map_err(invalid_args)?;
                let name: String = args.next().map_err(invalid_args)?;
                let target: ObjectPath = args.next().map_err(invalid_args)?;
                if target.is_root() {
                    self.aliases.remove(&name);
                } else {
                    self.collection(&target)?;
                    self.aliases.insert(name, target);
                }
                Ok(Vec::new())
            }
            _ => Err(unknown_method(SERVICE_INTERFACE, method)),
        }
    }

    fn collection_call(
        &mut self,
        path: &ObjectPath,
        method: &str,
        args: Vec<Value>,
        signals: &mut Vec<Signal>,
    ) -> CallResult<Vec<Value>> {
        let path = self.resolve(path);
        self.collection(&path)?;

        match method {
            collection::DELETE => {
                let (_, prompt) = self.privileged(Deferred::DeleteCollection(path), signals)?;
                Ok(vec![Value::from(prompt)])
            }
            collection::SEARCH_ITEMS => {
                let attributes: HashMap<String, String> = single(args)?;
                let (mut found, locked) = self.search(&attributes, Some(&path));
                found.extend(locked);
                Ok(vec![value::array(found)])
            }
            collection::CREATE_ITEM => {
                let mut args = Reply::new(args, 3).map_err(invalid_args)?;
                let mut properties: HashMap<String, Value> =
                    args.next().map_err(invalid_args)?;
                let secret: Secret = args.next().map_err(invalid_args)?;
                let replace: bool = args.next().map_err(invalid_args)?;
                self.check_session(&secret.session)?;
                if self.collection(&path)?.locked {
                    return Err(TransportError::named(
                        ERR_IS_LOCKED,
                        format!("{} is locked", path),
                    ));
                }

                let label = take_property::<String>(&mut properties, item::LABEL_KEY)?
                    .unwrap_or_default();
                let attributes: HashMap<String, String> =
                    take_property(&mut properties, item::ATTRIBUTES_KEY)?
                        .unwrap_or_default();

                let existing = if replace {
                    self.items
                        .iter()
                        .find(|(_, r)| r.collection == path && r.attributes == attributes)
                        .map(|(p, _)| p.clone())
                } else {
                    None
                };

                let now = self.tick();
                let item_path = match existing {
                    Some(existing) => {
                        let record = self.item_mut(&existing)?;
                        record.label = label;
                        record.value = secret.value;
                        record.content_type = secret.content_type;
                        record.modified = now;
                        signals.push(item_changed(&path, &existing));
                        existing
                    }
                    None => {
                        let item_path = child(&path, &self.next_id().to_string())?;
                        self.items.insert(
                            item_path.clone(),
                            ItemRecord {
                                collection: path.clone(),
                                label,
                                attributes,
                                value: secret.value,
                                content_type: secret.content_type,
                                locked: false,
                                created: now,
                                modified: now,
                            },
                        );
                        self.collection_mut(&path)?.items.push(item_path.clone());
                        signals.push(Signal::new(
                            path.clone(),
                            COLLECTION_INTERFACE,
                            collection::SIGNAL_ITEM_CREATED,
                            vec![Value::from(&item_path)],
                        ));
                        item_path
                    }
                };
                Ok(vec![Value::from(item_path), Value::from(ObjectPath::root())])
            }
            _ => Err(unknown_method(COLLECTION_INTERFACE, method)),
        }
    }

    fn item_call(
        &mut self,
        path: &ObjectPath,
        method: &str,
        args: Vec<Value>,
        signals: &mut Vec<Signal>,
    ) -> CallResult<Vec<Value>> {
        self.item(path)?;

        match method {
            item::DELETE => {
                let work = Deferred::DeleteItem(path.clone());
                let (_, prompt) = self.privileged(work, signals)?;
                Ok(vec![Value::from(prompt)])
            }
            item::GET_SECRET => {
                let session: ObjectPath = single(args)?;
                self.check_session(&session)?;
                let record = self.item(path)?;
                if self.item_locked(record) {
                    return Err(TransportError::named(
                        ERR_IS_LOCKED,
                        format!("{} is locked", path),
                    ));
                }
                let secret =
                    Secret::plain(session, record.value.clone(), record.content_type.clone());
                Ok(vec![secret.to_value()])
            }
            item::SET_SECRET => {
                let secret: Secret = single(args)?;
                self.check_session(&secret.session)?;
                let now = self.tick();
                let record = self.item_mut(path)?;
                record.value = secret.value;
                record.content_type = secret.content_type;
                record.modified = now;
                signals.push(item_changed(&record.collection, path));
                Ok(Vec::new())
            }
            _ => Err(unknown_method(ITEM_INTERFACE, method)),
        }
    }

    fn prompt_call(
        &mut self,
        path: &ObjectPath,
        method: &str,
        signals: &mut Vec<Signal>,
    ) -> CallResult<Vec<Value>> {
        let work = self.prompts.remove(path).ok_or_else(|| {
            TransportError::named(ERR_NO_SUCH_OBJECT, format!("no prompt at {}", path))
        })?;

        let completion = match method {
            prompt::PROMPT => match self.policy {
                PromptPolicy::Never | PromptPolicy::Complete => {
                    Some((false, self.apply(work, signals)?))
                }
                PromptPolicy::Dismiss => Some((true, Value::from(""))),
                PromptPolicy::Silent => None,
            },
            prompt::DISMISS => Some((true, Value::from(""))),
            _ => return Err(unknown_method(PROMPT_INTERFACE, method)),
        };

        if let Some((dismissed, result)) = completion {
            signals.push(Signal::new(
                path.clone(),
                PROMPT_INTERFACE,
                prompt::SIGNAL_COMPLETED,
                vec![Value::from(dismissed), value::variant(result)],
            ));
        }
        Ok(Vec::new())
    }

    fn property(&self, path: &ObjectPath, interface: &str, name: &str) -> CallResult<Value> {
        let value = match (interface, name) {
            (SERVICE_INTERFACE, service::PROP_COLLECTIONS) if *path == root() => {
                value::array(self.collections.keys().cloned())
            }
            (COLLECTION_INTERFACE, _) => {
                let record = self.collection(path)?;
                match name {
                    collection::PROP_LABEL => Value::from(record.label.clone()),
                    collection::PROP_LOCKED => Value::from(record.locked),
                    collection::PROP_ITEMS => value::array(record.items.iter().cloned()),
                    collection::PROP_CREATED => Value::from(record.created),
                    collection::PROP_MODIFIED => Value::from(record.modified),
                    _ => return Err(unknown_property(interface, name)),
                }
            }
            (ITEM_INTERFACE, _) => {
                let record = self.item(path)?;
                match name {
                    item::PROP_LABEL => Value::from(record.label.clone()),
                    item::PROP_LOCKED => Value::from(self.item_locked(record)),
                    item::PROP_ATTRIBUTES => value::string_map(&record.attributes),
                    item::PROP_CREATED => Value::from(record.created),
                    item::PROP_MODIFIED => Value::from(record.modified),
                    _ => return Err(unknown_property(interface, name)),
                }
            }
            _ => return Err(unknown_property(interface, name)),
        };
        Ok(value::variant(value))
    }

    fn set_property(
        &mut self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
        value: Value,
        signals: &mut Vec<Signal>,
    ) -> CallResult<()> {
        let now = self.tick();
        match (interface, name) {
            (COLLECTION_INTERFACE, collection::PROP_LABEL) => {
                let label = String::from_value(value).map_err(invalid_args)?;
                let resolved = self.resolve(path);
                let record = self.collection_mut(&resolved)?;
                record.label = label;
                record.modified = now;
                signals.push(collection_changed(&resolved));
            }
            (ITEM_INTERFACE, item::PROP_LABEL) => {
                let label = String::from_value(value).map_err(invalid_args)?;
                let record = self.item_mut(path)?;
                record.label = label;
                record.modified = now;
                signals.push(item_changed(&record.collection, path));
            }
            (ITEM_INTERFACE, item::PROP_ATTRIBUTES) => {
                let attributes =
                    HashMap::<String, String>::from_value(value).map_err(invalid_args)?;
                let record = self.item_mut(path)?;
                record.attributes = attributes;
                record.modified = now;
                signals.push(item_changed(&record.collection, path));
            }
            _ => return Err(unknown_property(interface, name)),
        }
        Ok(())
    }
}

fn unknown_method(interface: &str, method: &str) -> TransportError {
    TransportError::named(
        ERR_UNKNOWN_METHOD,
        format!("{}.{} is not implemented", interface, method),
    )
}

fn unknown_property(interface: &str, name: &str) -> TransportError {
    TransportError::named(
        ERR_UNKNOWN_PROPERTY,
        format!("{}.{} does not exist", interface, name),
    )
}

/// Decode a call whose only argument is a `T`
fn single<T: FromValue>(args: Vec<Value>) -> CallResult<T> {
    Reply::new(args, 1)
        .and_then(|mut args| args.next())
        .map_err(invalid_args)
}

/// Remove and decode `key` from an `a{sv}` properties dictionary
fn take_property<T: FromValue>(
    properties: &mut HashMap<String, Value>,
    key: &str,
) -> CallResult<Option<T>> {
    properties
        .remove(key)
        .map(T::from_value)
        .transpose()
        .map_err(invalid_args)
}

/// Simulated secret service reachable through [`Connection`]
#[derive(Default)]
pub struct MemoryBus {
    state: Mutex<State>,
    router: SignalRouter,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_prompt_policy(&self, policy: PromptPolicy) {
        self.lock().policy = policy;
    }

    /// Add a collection directly, optionally under `alias`
    pub fn add_collection(&self, label: &str, alias: Option<&str>) -> CallResult<ObjectPath> {
        let mut signals = Vec::new();
        let path = self
            .lock()
            .create_collection(label, alias.unwrap_or(""), &mut signals)?;
        self.deliver(signals);
        Ok(path)
    }

    /// Add an item directly
    pub fn add_item(
        &self,
        collection: &ObjectPath,
        label: &str,
        attributes: &[(&str, &str)],
        value: &[u8],
        content_type: &str,
    ) -> CallResult<ObjectPath> {
        let mut state = self.lock();
        let now = state.tick();
        let collection = state.resolve(collection);
        let path = child(&collection, &state.next_id().to_string())?;
        state
            .collections
            .get_mut(&collection)
            .ok_or_else(|| unknown_object(&collection))?
            .items
            .push(path.clone());
        state.items.insert(
            path.clone(),
            ItemRecord {
                collection,
                label: label.to_string(),
                attributes: attributes
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                value: value.to_vec(),
                content_type: content_type.to_string(),
                locked: false,
                created: now,
                modified: now,
            },
        );
        Ok(path)
    }

    /// List `path` as an item of `collection` without creating it
    pub fn add_dangling_item(&self, collection: &ObjectPath, path: ObjectPath) {
        let mut state = self.lock();
        let collection = state.resolve(collection);
        if let Some(record) = state.collections.get_mut(&collection) {
            record.items.push(path);
        }
    }

    pub fn set_locked(&self, path: &ObjectPath, locked: bool) {
        let mut signals = Vec::new();
        self.lock()
            .set_locked(std::slice::from_ref(path), locked, &mut signals);
        self.deliver(signals);
    }

    /// Register a prompt that completes with `result`
    pub fn stage_prompt(&self, result: Value) -> CallResult<ObjectPath> {
        let mut state = self.lock();
        let path = state.object_path("prompt", "p")?;
        state.prompts.insert(path.clone(), Deferred::Fixed(result));
        Ok(path)
    }

    pub fn has_object(&self, path: &ObjectPath) -> bool {
        let state = self.lock();
        let resolved = state.resolve(path);
        state.collections.contains_key(&resolved) || state.items.contains_key(path)
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.router.len()
    }

    /// Inspect the recorded operations
    pub fn with_events<R>(&self, f: impl FnOnce(&[BusEvent]) -> R) -> R {
        f(&self.lock().events)
    }

    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    /// Inject a signal as if the service had emitted it
    pub fn emit(&self, signal: &Signal) -> usize {
        self.router.emit(signal)
    }

    /// Drop the connection: end every subscription and fail further calls
    pub fn close(&self) {
        self.lock().closed = true;
        self.router.close();
    }

    fn deliver(&self, signals: Vec<Signal>) {
        for signal in &signals {
            self.router.emit(signal);
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_open(state: &State) -> CallResult<()> {
        if state.closed {
            return Err(TransportError::named(ERR_DISCONNECTED, "connection closed"));
        }
        Ok(())
    }
}

impl Connection for MemoryBus {
    fn call(
        &self,
        path: &ObjectPath,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> CallResult<Vec<Value>> {
        let mut signals = Vec::new();
        let reply = {
            let mut state = self.lock();
            state.events.push(BusEvent::Call {
                path: path.clone(),
                interface: interface.to_string(),
                method: method.to_string(),
                args: args.iter().map(duplicate).collect::<CallResult<_>>()?,
            });
            Self::ensure_open(&state)?;
            state.dispatch(path, interface, method, args, &mut signals)
        };
        self.deliver(signals);
        reply
    }

    fn get_property(&self, path: &ObjectPath, interface: &str, name: &str) -> CallResult<Value> {
        let mut state = self.lock();
        state.events.push(BusEvent::GetProperty {
            path: path.clone(),
            interface: interface.to_string(),
            name: name.to_string(),
        });
        Self::ensure_open(&state)?;
        state.property(path, interface, name)
    }

    fn set_property(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
        value: Value,
    ) -> CallResult<()> {
        let mut signals = Vec::new();
        {
            let mut state = self.lock();
            state.events.push(BusEvent::SetProperty {
                path: path.clone(),
                interface: interface.to_string(),
                name: name.to_string(),
                value: duplicate(&value)?,
            });
            Self::ensure_open(&state)?;
            state.set_property(path, interface, name, value, &mut signals)?;
        }
        self.deliver(signals);
        Ok(())
    }

    fn subscribe(&self, rule: MatchRule) -> CallResult<Subscription> {
        let mut state = self.lock();
        state.events.push(BusEvent::Subscribe {
            interface: rule.interface.clone(),
            member: rule.member.clone(),
        });
        Self::ensure_open(&state)?;
        Ok(self.router.subscribe(rule))
    }

    fn unsubscribe(&self, id: SubscriptionId) -> CallResult<()> {
        self.router.release(id);
        let mut state = self.lock();
        state.events.push(BusEvent::Unsubscribe);
        Self::ensure_open(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> ObjectPath {
        ObjectPath::try_from(s).unwrap()
    }

    #[test]
    fn test_alias_resolution() {
        let bus = MemoryBus::new();
        let login = bus.add_collection("Login", Some("default")).unwrap();
        assert_eq!(login.as_str(), "/org/freedesktop/secrets/collection/login");
        assert!(bus.has_object(&path("/org/freedesktop/secrets/aliases/default")));
        assert!(!bus.has_object(&path("/org/freedesktop/secrets/aliases/other")));
    }

    #[test]
    fn test_duplicate_labels_get_distinct_paths() {
        let bus = MemoryBus::new();
        let a = bus.add_collection("work", None).unwrap();
        let b = bus.add_collection("work", None).unwrap();
        let c = bus.add_collection("", None).unwrap();
        assert_ne!(a, b);
        assert!(c.as_str().starts_with("/org/freedesktop/secrets/collection/c"));
    }

    #[test]
    fn test_add_item_to_unknown_collection() {
        let bus = MemoryBus::new();
        let err = bus
            .add_item(&path("/nowhere"), "x", &[], b"", "text/plain")
            .unwrap_err();
        assert_eq!(err.name(), Some(ERR_UNKNOWN_OBJECT));
    }

    #[test]
    fn test_closed_bus_rejects_calls() {
        let bus = MemoryBus::new();
        bus.close();
        let err = bus
            .call(&root(), SERVICE_INTERFACE, service::READ_ALIAS, vec![Value::from("default")])
            .unwrap_err();
        assert_eq!(err.name(), Some(ERR_DISCONNECTED));
        assert_eq!(bus.with_events(|events| events.len()), 1);
    }

    #[test]
    fn test_prompt_signals_reach_subscribers() {
        let bus = MemoryBus::new();
        let prompt_path = bus.stage_prompt(Value::from(true)).unwrap();
        let mut events = bus
            .subscribe(MatchRule::signal(PROMPT_INTERFACE, prompt::SIGNAL_COMPLETED))
            .unwrap()
            .into_events();

        bus.call(&prompt_path, PROMPT_INTERFACE, prompt::PROMPT, vec![Value::from("")])
            .unwrap();
        let signal = events.try_recv().unwrap();
        assert_eq!(signal.path, prompt_path);
        assert_eq!(signal.body, vec![Value::from(false), value::variant(true)]);

        // Prompts are single use
        assert!(bus
            .call(&prompt_path, PROMPT_INTERFACE, prompt::PROMPT, vec![Value::from("")])
            .is_err());
    }

    #[test]
    fn test_changes_emit_changed_signals() {
        let bus = MemoryBus::new();
        let login = bus.add_collection("login", None).unwrap();
        let item_path = bus.add_item(&login, "a", &[], b"1", "text/plain").unwrap();
        let mut collections = bus
            .subscribe(MatchRule::signal(SERVICE_INTERFACE, service::SIGNAL_COLLECTION_CHANGED))
            .unwrap()
            .into_events();
        let mut items = bus
            .subscribe(MatchRule::signal(COLLECTION_INTERFACE, collection::SIGNAL_ITEM_CHANGED))
            .unwrap()
            .into_events();

        bus.set_property(&login, COLLECTION_INTERFACE, collection::PROP_LABEL, Value::from("x"))
            .unwrap();
        bus.set_locked(&login, true);
        bus.set_property(&item_path, ITEM_INTERFACE, item::PROP_LABEL, Value::from("b"))
            .unwrap();

        for _ in 0..2 {
            let signal = collections.try_recv().unwrap();
            assert_eq!(signal.path, root());
            assert_eq!(signal.body, vec![Value::from(&login)]);
        }
        let signal = items.try_recv().unwrap();
        assert_eq!(signal.path, login);
        assert_eq!(signal.body, vec![Value::from(&item_path)]);
        assert!(collections.try_recv().is_err());
        assert!(items.try_recv().is_err());
    }

    #[test]
    fn test_get_secrets_reply_is_typed() {
        let bus = MemoryBus::new();
        let login = bus.add_collection("login", None).unwrap();
        let item_path = bus.add_item(&login, "a", &[], b"1", "text/plain").unwrap();
        let reply = bus
            .call(
                &root(),
                SERVICE_INTERFACE,
                service::OPEN_SESSION,
                vec![Value::from(ALGORITHM_PLAIN), value::variant("")],
            )
            .unwrap();
        let session = ObjectPath::from_value(reply.into_iter().nth(1).unwrap()).unwrap();

        let reply = bus
            .call(
                &root(),
                SERVICE_INTERFACE,
                service::GET_SECRETS,
                vec![value::array(vec![item_path.clone()]), Value::from(session)],
            )
            .unwrap();
        assert_eq!(reply[0].value_signature(), "a{o(oayays)}");

        let secrets = HashMap::<ObjectPath, Secret>::from_value(reply.into_iter().next().unwrap())
            .unwrap();
        assert_eq!(secrets[&item_path].value, b"1");
    }
}

//! Wire values
//!
//! Replies, properties and signal bodies arrive as zvariant [`Value`]s. Every
//! field is decoded through [`FromValue`], which goes through zvariant's
//! `TryFrom` conversions and fails with [`Error::Decode`] on a type mismatch
//! instead of falling back to a default.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use zbus::zvariant::{self, Array, Dict, OwnedObjectPath, Signature, Type};

use crate::constants::NO_PROMPT;
use crate::error::{Error, Result};

/// A dynamically typed bus value
pub type Value = zvariant::Value<'static>;

/// Hierarchical identifier of a remote object
///
/// Always a valid D-Bus object path: construction rejects empty strings,
/// relative paths, empty segments and characters outside `[A-Za-z0-9_]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectPath(OwnedObjectPath);

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        match OwnedObjectPath::try_from(path.as_str()) {
            Ok(owned) => Ok(Self(owned)),
            Err(_) => Err(Error::InvalidPath(path)),
        }
    }

    /// The `/` path, used by the service as "no object" and "no prompt"
    pub fn root() -> Self {
        Self::from_static(NO_PROMPT)
    }

    /// Wrap a path literal known to be valid
    pub(crate) fn from_static(path: &'static str) -> Self {
        Self(zvariant::ObjectPath::from_static_str_unchecked(path).into())
    }

    pub fn is_root(&self) -> bool {
        self.as_str() == NO_PROMPT
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Append a path segment
    pub fn join(&self, segment: &str) -> Result<Self> {
        if self.is_root() {
            Self::new(format!("/{}", segment))
        } else {
            Self::new(format!("{}/{}", self.as_str(), segment))
        }
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialOrd for ObjectPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl TryFrom<&str> for ObjectPath {
    type Error = Error;

    fn try_from(path: &str) -> Result<Self> {
        Self::new(path)
    }
}

impl TryFrom<String> for ObjectPath {
    type Error = Error;

    fn try_from(path: String) -> Result<Self> {
        Self::new(path)
    }
}

impl From<zvariant::ObjectPath<'_>> for ObjectPath {
    fn from(path: zvariant::ObjectPath<'_>) -> Self {
        Self(path.into())
    }
}

impl TryFrom<Value> for ObjectPath {
    type Error = zvariant::Error;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        OwnedObjectPath::try_from(value).map(Self)
    }
}

impl From<ObjectPath> for Value {
    fn from(path: ObjectPath) -> Self {
        Value::from(path.0)
    }
}

impl From<&ObjectPath> for Value {
    fn from(path: &ObjectPath) -> Self {
        Value::from(path.0.clone())
    }
}

impl Type for ObjectPath {
    fn signature() -> Signature<'static> {
        OwnedObjectPath::signature()
    }
}

impl AsRef<str> for ObjectPath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Wrap `inner` in a variant
pub fn variant(inner: impl Into<Value>) -> Value {
    Value::Value(Box::new(inner.into()))
}

/// Build a typed array; the element signature survives an empty input
pub fn array<T>(items: impl IntoIterator<Item = T>) -> Value
where
    T: Type + Into<Value>,
{
    Value::Array(Array::from(items.into_iter().collect::<Vec<T>>()))
}

/// Build an `a{ss}` dictionary
pub fn string_map(map: &HashMap<String, String>) -> Value {
    Value::Dict(Dict::from(map.clone()))
}

/// Build an `a{sv}` property dictionary
pub fn properties<I>(entries: I) -> Value
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    let entries: HashMap<String, Value> = entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();
    Value::Dict(Dict::from(entries))
}

/// Strip any number of variant wrappers
pub fn into_inner(value: Value) -> Value {
    let mut value = value;
    while let Value::Value(inner) = value {
        value = *inner;
    }
    value
}

/// Typed decoding of a [`Value`]
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

fn downcast<T>(value: Value) -> Result<T>
where
    T: Type + TryFrom<Value>,
    T::Error: Into<zvariant::Error>,
{
    let value = into_inner(value);
    let found = value.value_signature().to_string();
    T::try_from(value).map_err(|_| Error::unexpected(T::signature(), found))
}

macro_rules! from_value_by_downcast {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self> {
                    downcast(value)
                }
            }
        )*
    };
}

from_value_by_downcast!(bool, u8, u32, u64, String, ObjectPath);

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self> {
        match into_inner(value) {
            Value::Array(array) => Vec::<Value>::try_from(array)
                .map_err(|e| Error::Decode(e.to_string()))?
                .into_iter()
                .map(T::from_value)
                .collect(),
            other => Err(Error::unexpected("array", other.value_signature())),
        }
    }
}

impl<K, V> FromValue for HashMap<K, V>
where
    K: FromValue + Eq + Hash,
    V: FromValue,
{
    fn from_value(value: Value) -> Result<Self> {
        match into_inner(value) {
            Value::Dict(dict) => dict
                .into_iter()
                .map(|(k, v)| -> Result<(K, V)> { Ok((K::from_value(k)?, V::from_value(v)?)) })
                .collect(),
            other => Err(Error::unexpected("dict", other.value_signature())),
        }
    }
}

/// Field-by-field decoder over a method reply or signal body of fixed arity
#[derive(Debug)]
pub struct Reply {
    values: std::vec::IntoIter<Value>,
}

impl Reply {
    pub fn new(values: Vec<Value>, arity: usize) -> Result<Self> {
        if values.len() != arity {
            return Err(Error::arity(arity, values.len()));
        }
        Ok(Self {
            values: values.into_iter(),
        })
    }

    /// Decode the next field
    pub fn next<T: FromValue>(&mut self) -> Result<T> {
        let value = self
            .values
            .next()
            .ok_or_else(|| Error::Decode("reply exhausted".to_string()))?;
        T::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> ObjectPath {
        ObjectPath::try_from(s).unwrap()
    }

    #[test]
    fn test_object_path_root() {
        assert!(ObjectPath::root().is_root());
        assert!(!path("/org/freedesktop/secrets").is_root());
        assert_eq!(ObjectPath::root().join("a").unwrap().as_str(), "/a");
        assert_eq!(
            path("/org/freedesktop/secrets").join("session").unwrap().as_str(),
            "/org/freedesktop/secrets/session"
        );
    }

    #[test]
    fn test_object_path_validation() {
        for bad in ["", "no-slash", "relative/path", "/trailing/", "/double//slash", "/dash-ed"] {
            let err = ObjectPath::try_from(bad).unwrap_err();
            assert!(matches!(err, Error::InvalidPath(ref p) if p == bad), "{:?}", bad);
        }
        assert!(path("/org").join("has space").is_err());
        assert!(serde_json::from_str::<ObjectPath>(r#""nope""#).is_err());
        assert_eq!(
            serde_json::from_str::<ObjectPath>(r#""/a/b_1""#).unwrap(),
            path("/a/b_1")
        );
    }

    #[test]
    fn test_object_path_order() {
        let mut paths = vec![path("/b"), path("/a/z"), path("/a")];
        paths.sort();
        assert_eq!(paths, vec![path("/a"), path("/a/z"), path("/b")]);
    }

    #[test]
    fn test_variant_is_transparent() {
        let wrapped = variant(variant(true));
        assert!(bool::from_value(wrapped).unwrap());

        let value = variant(path("/x"));
        assert_eq!(ObjectPath::from_value(value).unwrap().as_str(), "/x");
    }

    #[test]
    fn test_type_mismatch_is_decode_error() {
        let err = bool::from_value(Value::from("true")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Decode error: invalid type: expected 'b' but got 's'"
        );

        let err = u64::from_value(Value::from(1u32)).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));

        let mixed = Value::Array(Array::from(vec![variant(path("/a")), variant("/b")]));
        let err = Vec::<ObjectPath>::from_value(mixed).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));

        let err = Vec::<ObjectPath>::from_value(Value::from("/a")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Decode error: invalid type: expected 'array' but got 's'"
        );
    }

    #[test]
    fn test_array_keeps_element_type() {
        let empty = array(Vec::<ObjectPath>::new());
        assert_eq!(empty.value_signature(), "ao");
        assert!(Vec::<ObjectPath>::from_value(empty).unwrap().is_empty());

        let paths = array(vec![path("/a"), path("/b")]);
        assert_eq!(
            Vec::<ObjectPath>::from_value(paths).unwrap(),
            vec![path("/a"), path("/b")]
        );
    }

    #[test]
    fn test_string_map() {
        let mut attrs = HashMap::new();
        attrs.insert("b".to_string(), "2".to_string());
        attrs.insert("a".to_string(), "1".to_string());

        let value = string_map(&attrs);
        assert_eq!(value.value_signature(), "a{ss}");

        let decoded = HashMap::<String, String>::from_value(value).unwrap();
        assert_eq!(decoded, attrs);
    }

    #[test]
    fn test_properties_are_variants() {
        let value = properties([("org.example.Label", Value::from("work"))]);
        assert_eq!(value.value_signature(), "a{sv}");

        let decoded = HashMap::<String, String>::from_value(value).unwrap();
        assert_eq!(decoded["org.example.Label"], "work");
    }

    #[test]
    fn test_reply_arity() {
        let err = Reply::new(vec![Value::from(true)], 2).unwrap_err();
        assert_eq!(err.to_string(), "Decode error: expected 2 results but got 1");

        let mut reply = Reply::new(vec![Value::from(true), Value::from(7u64)], 2).unwrap();
        assert!(reply.next::<bool>().unwrap());
        assert_eq!(reply.next::<u64>().unwrap(), 7);
    }
}

//! Protocol constants
//!
//! Names and paths of the org.freedesktop.Secret API. These must match the
//! remote service exactly.

/// Well-known bus name of the service
pub const SERVICE_NAME: &str = "org.freedesktop.secrets";
/// Root service object
pub const SERVICE_PATH: &str = "/org/freedesktop/secrets";
/// Collection behind the `default` alias
pub const DEFAULT_COLLECTION: &str = "/org/freedesktop/secrets/aliases/default";
/// Returned in place of a prompt when none is required
pub const NO_PROMPT: &str = "/";

pub const SERVICE_INTERFACE: &str = "org.freedesktop.Secret.Service";
pub const COLLECTION_INTERFACE: &str = "org.freedesktop.Secret.Collection";
pub const ITEM_INTERFACE: &str = "org.freedesktop.Secret.Item";
pub const SESSION_INTERFACE: &str = "org.freedesktop.Secret.Session";
pub const PROMPT_INTERFACE: &str = "org.freedesktop.Secret.Prompt";

pub const ALGORITHM_PLAIN: &str = "plain";
/// Recognized but not implemented
pub const ALGORITHM_DH: &str = "dh-ietf1024-sha256-aes128-cbc-pkcs7";

pub mod service {
    pub const OPEN_SESSION: &str = "OpenSession";
    pub const CREATE_COLLECTION: &str = "CreateCollection";
    pub const SEARCH_ITEMS: &str = "SearchItems";
    pub const UNLOCK: &str = "Unlock";
    pub const LOCK: &str = "Lock";
    pub const GET_SECRETS: &str = "GetSecrets";
    pub const READ_ALIAS: &str = "ReadAlias";
    pub const SET_ALIAS: &str = "SetAlias";

    pub const PROP_COLLECTIONS: &str = "Collections";

    pub const SIGNAL_COLLECTION_CREATED: &str = "CollectionCreated";
    pub const SIGNAL_COLLECTION_DELETED: &str = "CollectionDeleted";
    pub const SIGNAL_COLLECTION_CHANGED: &str = "CollectionChanged";
}

pub mod collection {
    pub const DELETE: &str = "Delete";
    pub const SEARCH_ITEMS: &str = "SearchItems";
    pub const CREATE_ITEM: &str = "CreateItem";

    pub const PROP_LABEL: &str = "Label";
    pub const PROP_LOCKED: &str = "Locked";
    pub const PROP_ITEMS: &str = "Items";
    pub const PROP_CREATED: &str = "Created";
    pub const PROP_MODIFIED: &str = "Modified";

    /// Qualified key used in the CreateCollection properties dictionary
    pub const LABEL_KEY: &str = "org.freedesktop.Secret.Collection.Label";

    pub const SIGNAL_ITEM_CREATED: &str = "ItemCreated";
    pub const SIGNAL_ITEM_DELETED: &str = "ItemDeleted";
    pub const SIGNAL_ITEM_CHANGED: &str = "ItemChanged";
}

pub mod item {
    pub const DELETE: &str = "Delete";
    pub const GET_SECRET: &str = "GetSecret";
    pub const SET_SECRET: &str = "SetSecret";

    pub const PROP_LOCKED: &str = "Locked";
    pub const PROP_ATTRIBUTES: &str = "Attributes";
    pub const PROP_LABEL: &str = "Label";
    pub const PROP_CREATED: &str = "Created";
    pub const PROP_MODIFIED: &str = "Modified";

    /// Qualified keys used in the CreateItem properties dictionary
    pub const LABEL_KEY: &str = "org.freedesktop.Secret.Item.Label";
    pub const ATTRIBUTES_KEY: &str = "org.freedesktop.Secret.Item.Attributes";
}

pub mod session {
    pub const CLOSE: &str = "Close";
}

pub mod prompt {
    pub const PROMPT: &str = "Prompt";
    pub const DISMISS: &str = "Dismiss";
    pub const SIGNAL_COMPLETED: &str = "Completed";
}

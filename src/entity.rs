//! Entity typing for replicated collections.
//!
//! A collection is described once by implementing [`Entity`]; the merge logic
//! in [`crate::sync`] is shared by every record type.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Shape of a collection's key space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpace {
    /// `{collection}/{key}`
    Flat,
    /// `{collection}/{owner}/{key}`
    Nested,
}

/// A record type kept in a replica
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Remote collection (node) name
    const COLLECTION: &'static str;

    /// How records are addressed inside the collection
    const KEY_SPACE: KeySpace = KeySpace::Flat;

    /// The record's own id, `None` when unset
    fn id(&self) -> Option<String>;

    /// Fill the id from the path key when the record does not carry one
    fn set_id_if_missing(&mut self, key: &str);

    /// Owner key for nested collections
    fn owner(&self) -> Option<String> {
        None
    }

    fn set_owner(&mut self, _owner: &str) {}

    /// Id assigned by `create` when the record has none
    fn generate_id() -> String {
        chrono::Utc::now().timestamp_millis().to_string()
    }
}

//! Merge-patch rules: how a scoped payload changes a replica.
//!
//! | key space | scope            | null payload               | value payload                     |
//! |-----------|------------------|----------------------------|-----------------------------------|
//! | any       | root             | ignored unless empty       | replace everything                |
//! | Flat      | `/key`           | remove key                 | upsert, id defaults to key        |
//! | Flat      | `/key/field..`   | remove field               | set field                         |
//! | Nested    | `/owner`         | remove owner's records     | upsert each child, owner stamped  |
//! | Nested    | `/owner/key`     | remove `owner/key`         | upsert, owner stamped             |
//! | Nested    | `/owner/key/f..` | remove field               | set field                         |
//!
//! Nested records live under the replica key `owner/key`.
//!
//! A record that fails to decode is logged and skipped; the rest of the
//! payload is still applied.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::entity::{Entity, KeySpace};
use crate::error::{ReplicaError, Result};
use crate::replica::Replica;
use crate::stream::ScopePath;

/// What one event did to the replica
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Size of the replica after a whole-replica replacement
    pub replaced: Option<usize>,
    pub upserted: usize,
    pub removed: usize,
    /// Records or payloads rejected as malformed
    pub skipped: usize,
    /// A root null arrived while the replica held data
    pub ignored_root_null: bool,
}

impl MergeReport {
    fn absorb(&mut self, other: MergeReport) {
        if other.replaced.is_some() {
            self.replaced = other.replaced;
        }
        self.upserted += other.upserted;
        self.removed += other.removed;
        self.skipped += other.skipped;
        self.ignored_root_null |= other.ignored_root_null;
    }
}

/// Children of a collection node; arrays are keyed by index. `None` when the
/// value is not a collection.
pub(crate) fn children(value: &Value) -> Option<Vec<(String, &Value)>> {
    match value {
        Value::Object(map) => Some(map.iter().map(|(k, v)| (k.clone(), v)).collect()),
        Value::Array(items) => Some(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
        ),
        _ => None,
    }
}

/// Decode one record stored at `key`, defaulting its id from the key
pub(crate) fn decode<T: Entity>(key: &str, value: &Value) -> Result<T> {
    let mut entity: T = serde_json::from_value(value.clone())
        .map_err(|e| ReplicaError::malformed(T::COLLECTION, key, e))?;
    entity.set_id_if_missing(key);
    Ok(entity)
}

/// Decode the records of one owner (or of a flat collection when `owner` is
/// `None`). Null children are skipped; undecodable ones are logged.
fn decode_children<T: Entity>(
    node: &Value,
    owner: Option<&str>,
    index_keys_by_id: bool,
    report: &mut MergeReport,
) -> Vec<(String, T)> {
    let Some(entries) = children(node) else {
        return Vec::new();
    };

    let mut out = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        if value.is_null() {
            continue;
        }
        match decode::<T>(&key, value) {
            Ok(mut entity) => {
                if let Some(owner) = owner {
                    entity.set_owner(owner);
                }
                let key = match (index_keys_by_id, entity.id()) {
                    (true, Some(id)) => id,
                    _ => key,
                };
                out.push((Replica::<T>::record_key(owner, &key), entity));
            }
            Err(e) => {
                debug!(collection = T::COLLECTION, key = %key, error = %e, "skipping malformed record");
                report.skipped += 1;
            }
        }
    }
    out
}

/// Decode a whole collection body. `None` when the body is not a collection.
pub(crate) fn decode_collection<T: Entity>(
    payload: &Value,
    report: &mut MergeReport,
) -> Option<Vec<(String, T)>> {
    let is_array = payload.is_array();
    let nodes = children(payload)?;

    match T::KEY_SPACE {
        KeySpace::Flat => Some(decode_children(payload, None, is_array, report)),
        KeySpace::Nested => {
            let mut out = Vec::new();
            for (owner, node) in nodes {
                if children(node).is_none() {
                    if !node.is_null() {
                        debug!(collection = T::COLLECTION, owner = %owner, "skipping non-collection owner node");
                        report.skipped += 1;
                    }
                    continue;
                }
                out.extend(decode_children(node, Some(owner.as_str()), node.is_array(), report));
            }
            Some(out)
        }
    }
}

/// Swap the whole replica for a fetched or pushed body, honouring the null
/// guard: a null body only applies to an empty replica.
pub(crate) fn replace_root<T: Entity>(replica: &Replica<T>, payload: &Value) -> MergeReport {
    let mut report = MergeReport::default();

    if payload.is_null() {
        if !replica.is_empty() {
            warn!(
                collection = T::COLLECTION,
                entries = replica.len(),
                "root is null but replica holds data; ignoring transient null"
            );
            report.ignored_root_null = true;
        } else {
            replica.replace_all(Vec::new());
            report.replaced = Some(0);
        }
        return report;
    }

    match decode_collection::<T>(payload, &mut report) {
        Some(entries) => {
            replica.replace_all(entries);
            report.replaced = Some(replica.len());
        }
        None => {
            warn!(collection = T::COLLECTION, "root payload is not a collection; ignored");
            report.skipped += 1;
        }
    }
    report
}

/// Apply a `put` of `payload` at `scope`
pub fn apply_put<T: Entity>(replica: &Replica<T>, scope: &ScopePath, payload: &Value) -> MergeReport {
    let segments = scope.segments();
    if segments.is_empty() {
        return replace_root(replica, payload);
    }

    match T::KEY_SPACE {
        KeySpace::Flat => {
            let key = &segments[0];
            if segments.len() == 1 {
                put_record(replica, key, None, payload)
            } else {
                patch_field(replica, key, None, &segments[1..], payload)
            }
        }
        KeySpace::Nested => {
            let owner = &segments[0];
            match segments.len() {
                1 => put_owner(replica, owner, payload),
                2 => put_record(replica, &segments[1], Some(owner.as_str()), payload),
                _ => patch_field(
                    replica,
                    &segments[1],
                    Some(owner.as_str()),
                    &segments[2..],
                    payload,
                ),
            }
        }
    }
}

/// Apply a `patch`: every child path of `payload` is put relative to `scope`
pub fn apply_patch<T: Entity>(
    replica: &Replica<T>,
    scope: &ScopePath,
    payload: &Value,
) -> MergeReport {
    let mut report = MergeReport::default();
    let Value::Object(changes) = payload else {
        warn!(collection = T::COLLECTION, scope = %scope, "patch payload is not an object; ignored");
        report.skipped += 1;
        return report;
    };

    for (child, value) in changes {
        let target = scope.join(&ScopePath::parse(child));
        if target.is_root() {
            continue;
        }
        report.absorb(apply_put(replica, &target, value));
    }
    report
}

fn put_record<T: Entity>(
    replica: &Replica<T>,
    key: &str,
    owner: Option<&str>,
    payload: &Value,
) -> MergeReport {
    let mut report = MergeReport::default();
    let replica_key = Replica::<T>::record_key(owner, key);

    if payload.is_null() {
        report.removed = usize::from(replica.remove(&replica_key).is_some());
        return report;
    }

    match decode::<T>(key, payload) {
        Ok(mut entity) => {
            if let Some(owner) = owner {
                entity.set_owner(owner);
            }
            replica.upsert(replica_key, entity);
            report.upserted = 1;
        }
        Err(e) => {
            debug!(collection = T::COLLECTION, key = %key, error = %e, "skipping malformed record");
            report.skipped = 1;
        }
    }
    report
}

fn put_owner<T: Entity>(replica: &Replica<T>, owner: &str, payload: &Value) -> MergeReport {
    let mut report = MergeReport::default();

    if payload.is_null() {
        report.removed = replica.remove_owned_by(owner);
        return report;
    }

    let Some(entries) = children(payload) else {
        debug!(collection = T::COLLECTION, owner = %owner, "owner payload is not a collection; skipped");
        report.skipped = 1;
        return report;
    };

    for (key, value) in entries {
        report.absorb(put_record(replica, &key, Some(owner), value));
    }
    report
}

fn patch_field<T: Entity>(
    replica: &Replica<T>,
    key: &str,
    owner: Option<&str>,
    field_path: &[String],
    payload: &Value,
) -> MergeReport {
    let mut report = MergeReport::default();
    let replica_key = Replica::<T>::record_key(owner, key);

    let existing = replica.get(&replica_key);
    if existing.is_none() && payload.is_null() {
        return report;
    }

    let mut document = match existing.map(|e| serde_json::to_value(e)) {
        Some(Ok(doc @ Value::Object(_))) => doc,
        Some(Err(e)) => {
            debug!(collection = T::COLLECTION, key = %key, error = %e, "cannot re-encode record");
            report.skipped = 1;
            return report;
        }
        _ => Value::Object(Map::new()),
    };
    set_at(&mut document, field_path, payload.clone());

    match decode::<T>(key, &document) {
        Ok(mut entity) => {
            if let Some(owner) = owner {
                entity.set_owner(owner);
            }
            replica.upsert(replica_key, entity);
            report.upserted = 1;
        }
        Err(e) => {
            debug!(collection = T::COLLECTION, key = %key, error = %e, "field patch produced an invalid record");
            report.skipped = 1;
        }
    }
    report
}

/// Set (or with `Value::Null`, remove) the value at `path` inside `target`
fn set_at(target: &mut Value, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *target = value;
        return;
    };

    if let Value::Array(items) = target {
        if let Ok(index) = head.parse::<usize>() {
            if rest.is_empty() {
                match index.cmp(&items.len()) {
                    std::cmp::Ordering::Less => items[index] = value,
                    std::cmp::Ordering::Equal if !value.is_null() => items.push(value),
                    _ => {}
                }
            } else if let Some(item) = items.get_mut(index) {
                set_at(item, rest, value);
            }
            return;
        }
    }

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(map) = target else {
        return;
    };

    if rest.is_empty() {
        if value.is_null() {
            map.remove(head);
        } else {
            map.insert(head.clone(), value);
        }
        return;
    }

    let child = map.entry(head.clone()).or_insert(Value::Null);
    set_at(child, rest, value);
}

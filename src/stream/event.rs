use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Hierarchical location a change applies to; empty means the collection root
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ScopePath(Vec<String>);

impl ScopePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Split on `/`, dropping empty segments; `""` and `"/"` are the root
    pub fn parse(path: &str) -> Self {
        Self(
            path.split('/')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// This path with `child` appended
    pub fn join(&self, child: &ScopePath) -> ScopePath {
        let mut segments = self.0.clone();
        segments.extend(child.0.iter().cloned());
        ScopePath(segments)
    }
}

impl fmt::Display for ScopePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// Kind of a stream block, from its `event:` line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EventKind {
    /// Replace the value at the scope (also used when no name is given)
    Put,
    /// Merge each child of the payload into the scope
    Patch,
    /// Heartbeat, carries no data
    KeepAlive,
    /// The store closed the stream on its side
    Cancel,
    /// The credential expired; a new connection is required
    AuthRevoked,
    Other(String),
}

impl EventKind {
    pub fn from_name(name: Option<&str>) -> Self {
        match name.map(str::trim) {
            None | Some("") | Some("put") | Some("message") => EventKind::Put,
            Some("patch") => EventKind::Patch,
            Some("keep-alive") => EventKind::KeepAlive,
            Some("cancel") => EventKind::Cancel,
            Some("auth_revoked") => EventKind::AuthRevoked,
            Some(other) => EventKind::Other(other.to_string()),
        }
    }
}

/// A structured change decoded from one stream block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub kind: EventKind,
    pub scope: ScopePath,
    /// `Value::Null` removes everything at the scope
    pub payload: Value,
}

impl ChangeEvent {
    pub fn new(kind: EventKind, scope: ScopePath, payload: Value) -> Self {
        Self {
            kind,
            scope,
            payload,
        }
    }

    /// A `put` of `payload` at `path`
    pub fn put(path: &str, payload: Value) -> Self {
        Self::new(EventKind::Put, ScopePath::parse(path), payload)
    }

    /// A `patch` merging the children of `payload` into `path`
    pub fn patch(path: &str, payload: Value) -> Self {
        Self::new(EventKind::Patch, ScopePath::parse(path), payload)
    }

    /// Decode a completed block. Data shaped as `{"path": .., "data": ..}`
    /// is scoped to that path; anything else is a root payload. Text that is
    /// not JSON is kept as a string so the merge step can reject it.
    pub fn from_block(event: Option<&str>, data: &str) -> Self {
        let kind = EventKind::from_name(event);

        let value = match serde_json::from_str::<Value>(data) {
            Ok(value) => value,
            Err(_) => return Self::new(kind, ScopePath::root(), Value::String(data.to_string())),
        };

        if let Value::Object(mut envelope) = value {
            if envelope.contains_key("path") && envelope.contains_key("data") {
                let scope = envelope
                    .get("path")
                    .and_then(Value::as_str)
                    .map(ScopePath::parse)
                    .unwrap_or_default();
                let payload = envelope.remove("data").unwrap_or(Value::Null);
                return Self::new(kind, scope, payload);
            }
            return Self::new(kind, ScopePath::root(), Value::Object(envelope));
        }

        Self::new(kind, ScopePath::root(), value)
    }
}

//! Parsed SSE events and event-name filtering.

use std::{collections::HashSet, fmt, time::SystemTime};

use bytes::Bytes;

use crate::parse::Record;

/// Where and when an [`Event`] was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMetadata {
    /// Time the record was parsed.
    pub received_at: SystemTime,
    /// Endpoint the event arrived from, captured at construction time.
    pub origin_uri: String,
}

/// An immutable event parsed from one record of the stream.
///
/// An event always has a non-empty identifier; [`Event::new`] refuses to
/// build one otherwise.
#[derive(Clone, PartialEq)]
pub struct Event {
    identifier: String,
    name: Option<String>,
    raw_payload: Option<Bytes>,
    decoded_payload: Option<serde_json::Value>,
    metadata: EventMetadata,
}

impl Event {
    /// Build an event, decoding the payload as JSON on a best-effort basis.
    ///
    /// Returns `None` if `identifier` is empty.
    pub fn new(
        identifier: impl Into<String>,
        name: Option<String>,
        raw_payload: Option<Bytes>,
        origin_uri: impl Into<String>,
    ) -> Option<Self> {
        let identifier = identifier.into();
        if identifier.is_empty() {
            return None;
        }

        let decoded_payload = raw_payload
            .as_deref()
            .and_then(|bytes| serde_json::from_slice(bytes).ok());

        Some(Self {
            identifier,
            name,
            raw_payload,
            decoded_payload,
            metadata: EventMetadata {
                received_at: SystemTime::now(),
                origin_uri: origin_uri.into(),
            },
        })
    }

    /// Build an event from a parsed record.
    pub fn from_record(record: Record, origin_uri: impl Into<String>) -> Option<Self> {
        Self::new(record.id, record.name, Some(record.data), origin_uri)
    }

    /// Copy of this event carrying another origin.
    pub fn restamped(&self, origin_uri: &str) -> Self {
        let mut event = self.clone();
        if event.metadata.origin_uri != origin_uri {
            event.metadata.origin_uri = origin_uri.to_string();
        }
        event
    }

    /// The event identifier (never empty).
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The event name, `None` for the default channel.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The verbatim `data:` payload.
    pub fn raw_payload(&self) -> Option<&Bytes> {
        self.raw_payload.as_ref()
    }

    /// The payload as UTF-8 text, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        self.raw_payload
            .as_deref()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    /// The payload decoded as JSON, if it was valid JSON.
    pub fn decoded_payload(&self) -> Option<&serde_json::Value> {
        self.decoded_payload.as_ref()
    }

    /// When the event was received.
    pub fn received_at(&self) -> SystemTime {
        self.metadata.received_at
    }

    /// The endpoint the event arrived from.
    pub fn origin_uri(&self) -> &str {
        &self.metadata.origin_uri
    }

    /// Full metadata.
    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("identifier", &self.identifier)
            .field("name", &self.name)
            .field(
                "payload_len",
                &self.raw_payload.as_ref().map_or(0, Bytes::len),
            )
            .field("origin_uri", &self.metadata.origin_uri)
            .finish()
    }
}

/// Set of event names an event source accepts.
///
/// An empty filter accepts every event, named or not. A non-empty filter
/// accepts only events whose name is in the set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    names: HashSet<String>,
}

impl EventFilter {
    /// A filter accepting every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Accept only the given names (an empty list accepts everything).
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns `true` if this filter accepts every event.
    pub fn accepts_all(&self) -> bool {
        self.names.is_empty()
    }

    /// Whether an event with the given name passes the filter.
    pub fn accepts(&self, name: Option<&str>) -> bool {
        self.accepts_all() || name.is_some_and(|n| self.names.contains(n))
    }

    /// The accepted names.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl From<Option<Vec<String>>> for EventFilter {
    fn from(names: Option<Vec<String>>) -> Self {
        names.map(Self::names).unwrap_or_default()
    }
}

impl<S: Into<String>> From<Vec<S>> for EventFilter {
    fn from(names: Vec<S>) -> Self {
        Self::names(names)
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for EventFilter {
    fn from(names: [S; N]) -> Self {
        Self::names(names)
    }
}

impl<S: Into<String>> FromIterator<S> for EventFilter {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::names(iter)
    }
}

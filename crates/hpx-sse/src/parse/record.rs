//! Records produced by the [`RecordParser`](super::RecordParser).

use bytes::Bytes;

/// One complete `id:`/`event:`/`data:` field group, in wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Value of the `id:` field.
    pub id: String,
    /// Value of the `event:` field, if the record had one.
    pub name: Option<String>,
    /// Verbatim value of the `data:` field.
    pub data: Bytes,
}

/// A record that started with `id:` but never reached a `data:` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    /// Identifier of the dropped record.
    pub id: String,
    /// Event name, if one was seen before the record was abandoned.
    pub name: Option<String>,
}

/// Everything one call to the parser produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutput {
    /// Complete records, in arrival order.
    pub records: Vec<Record>,
    /// Records dropped because they had no `data:` line.
    pub malformed: Vec<MalformedRecord>,
}

impl ParseOutput {
    /// Returns `true` if nothing was produced.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.malformed.is_empty()
    }
}

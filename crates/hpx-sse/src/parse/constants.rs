//! Common constants used across the record parser.

/// Newline byte
pub(crate) const LF: u8 = b'\n';
/// Carriage return byte
pub(crate) const CR: u8 = b'\r';

/// UTF-8 encoding of U+FEFF, skipped at the start of a stream.
pub(crate) const BOM: &[u8] = "\u{FEFF}".as_bytes();

/// Field prefix that starts a record.
pub(crate) const ID_FIELD: &[u8] = b"id:";
/// Optional event name field prefix.
pub(crate) const EVENT_FIELD: &[u8] = b"event:";
/// Payload field prefix, completes a record.
pub(crate) const DATA_FIELD: &[u8] = b"data:";

//! Line-oriented record parser.

use bytes::{Buf, Bytes, BytesMut};
use tracing::debug;

use super::{
    constants::{BOM, CR, DATA_FIELD, EVENT_FIELD, ID_FIELD, LF},
    record::{MalformedRecord, ParseOutput, Record},
};

#[derive(Debug, Clone, Copy)]
enum StreamState {
    NotStarted,
    Started,
}

impl StreamState {
    fn is_not_started(self) -> bool {
        matches!(self, Self::NotStarted)
    }
}

/// A record whose `id:` line has been read but whose `data:` line has not.
#[derive(Debug, Clone)]
struct PendingRecord {
    id: String,
    name: Option<String>,
}

impl PendingRecord {
    fn into_malformed(self) -> MalformedRecord {
        MalformedRecord {
            id: self.id,
            name: self.name,
        }
    }
}

/// Incremental parser turning arbitrarily chunked bytes into [`Record`]s.
///
/// Complete lines are consumed as soon as they arrive; the unterminated tail
/// of a chunk and a record still waiting for its `data:` line are kept until
/// the next call to [`feed`](Self::feed), [`finish`](Self::finish) or
/// [`reset`](Self::reset).
#[derive(Debug)]
pub struct RecordParser {
    buffer: BytesMut,
    record: Option<PendingRecord>,
    state: StreamState,
}

impl Default for RecordParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordParser {
    /// Create a parser for a fresh stream.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            record: None,
            state: StreamState::NotStarted,
        }
    }

    /// Parse a complete input in one go (feed followed by finish).
    pub fn parse_complete(input: &[u8]) -> ParseOutput {
        let mut parser = Self::new();
        let mut output = parser.feed(input);
        let tail = parser.finish();
        output.records.extend(tail.records);
        output.malformed.extend(tail.malformed);
        output
    }

    /// Consume one chunk and return every record it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> ParseOutput {
        let mut output = ParseOutput::default();
        if chunk.is_empty() {
            return output;
        }

        self.buffer.extend_from_slice(chunk);

        // BOM detection on the very first chunk(s).
        if self.state.is_not_started() {
            match starts_with_bom(&self.buffer) {
                Some(true) => {
                    self.state = StreamState::Started;
                    self.buffer.advance(BOM.len());
                }
                Some(false) => self.state = StreamState::Started,
                None => return output,
            }
        }

        while let Some(line) = next_line(&mut self.buffer) {
            self.process_line(&line, &mut output);
        }

        output
    }

    /// Flush the stream: the unterminated last line is treated as complete
    /// and a record still missing its `data:` line is reported as malformed.
    ///
    /// The parser is reset afterwards.
    pub fn finish(&mut self) -> ParseOutput {
        let mut output = ParseOutput::default();

        if !self.buffer.is_empty() {
            let mut line = self.buffer.split().freeze();
            if line.last() == Some(&CR) {
                line.truncate(line.len() - 1);
            }
            self.process_line(&line, &mut output);
        }

        if let Some(record) = self.record.take() {
            debug!(id = %record.id, "SSE record without data at end of stream");
            output.malformed.push(record.into_malformed());
        }

        self.reset();
        output
    }

    /// Discard all retained state; the next chunk starts a new stream.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.record = None;
        self.state = StreamState::NotStarted;
    }

    /// Number of bytes held back waiting for a line terminator.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `true` if a record has started but is not complete yet.
    pub fn has_partial_record(&self) -> bool {
        self.record.is_some()
    }

    fn process_line(&mut self, line: &Bytes, output: &mut ParseOutput) {
        let trimmed = trim_start(line);

        if let Some(value) = trimmed.strip_prefix(ID_FIELD) {
            let record = PendingRecord {
                id: lossy(trim(value)),
                name: None,
            };
            if let Some(abandoned) = self.record.replace(record) {
                debug!(id = %abandoned.id, "SSE record without data superseded by next id");
                output.malformed.push(abandoned.into_malformed());
            }
        } else if let Some(value) = trimmed.strip_prefix(EVENT_FIELD) {
            if let Some(record) = self.record.as_mut()
                && record.name.is_none()
            {
                let name = trim(value);
                if !name.is_empty() {
                    record.name = Some(lossy(name));
                }
            }
        } else if let Some(value) = trimmed.strip_prefix(DATA_FIELD) {
            if let Some(PendingRecord { id, name }) = self.record.take() {
                output.records.push(Record {
                    id,
                    name,
                    data: line.slice_ref(trim_start(value)),
                });
            }
        }
        // Blank lines, comments, unknown fields and fields outside a record
        // are noise.
    }
}

/// Split the next LF-terminated line off `buffer`, without its terminator
/// (a preceding CR is removed too).
fn next_line(buffer: &mut BytesMut) -> Option<Bytes> {
    let line_end = memchr::memchr(LF, buffer)?;
    let mut line = buffer.split_to(line_end).freeze();
    buffer.advance(1);
    if line.last() == Some(&CR) {
        line.truncate(line.len() - 1);
    }
    Some(line)
}

fn trim_start(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !matches!(b, b' ' | b'\t'))
        .unwrap_or(bytes.len());
    &bytes[start..]
}

fn trim(bytes: &[u8]) -> &[u8] {
    bytes.trim_ascii()
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// `Some(true)` if `buf` starts with a BOM, `Some(false)` if it cannot,
/// `None` while it is still too short to tell.
fn starts_with_bom(buf: &[u8]) -> Option<bool> {
    let len = buf.len().min(BOM.len());
    if buf[..len] != BOM[..len] {
        Some(false)
    } else if len < BOM.len() {
        None
    } else {
        Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHEESE: &[u8] = b"id:11713\nevent:cheese\ndata:{\"a\":1}";

    fn record(id: &str, name: Option<&str>, data: &str) -> Record {
        Record {
            id: id.to_string(),
            name: name.map(str::to_string),
            data: Bytes::copy_from_slice(data.as_bytes()),
        }
    }

    #[test]
    fn parses_single_record_without_trailing_newline() {
        let output = RecordParser::parse_complete(CHEESE);
        assert_eq!(
            output.records,
            vec![record("11713", Some("cheese"), "{\"a\":1}")]
        );
        assert!(output.malformed.is_empty());
    }

    #[test]
    fn unterminated_data_waits_for_newline() {
        let mut parser = RecordParser::new();
        assert!(parser.feed(CHEESE).records.is_empty());
        assert!(parser.has_partial_record());
        assert_eq!(parser.pending_len(), "data:{\"a\":1}".len());

        let output = parser.feed(b"\n");
        assert_eq!(
            output.records,
            vec![record("11713", Some("cheese"), "{\"a\":1}")]
        );
        assert_eq!(parser.pending_len(), 0);
    }

    #[test]
    fn parses_many_records_in_order() {
        let input = b"id:1\nevent:add\ndata:73857293\n\nid:2\ndata:2153\n\n: keepalive\n\nid:3\nevent:add\ndata:113411\n\n";
        let output = RecordParser::new().feed(input);
        assert_eq!(
            output.records,
            vec![
                record("1", Some("add"), "73857293"),
                record("2", None, "2153"),
                record("3", Some("add"), "113411"),
            ]
        );
    }

    #[test]
    fn split_at_every_offset_matches_whole_input() {
        let input: &[u8] =
            b"id:1\nevent:cheese\ndata:{\"a\":1}\n\nid: 2 \r\ndata: hello world\r\n\nid:3\nevent:wine\ndata:\n";
        let whole = RecordParser::parse_complete(input);
        assert_eq!(whole.records.len(), 3);

        for offset in 0..=input.len() {
            let mut parser = RecordParser::new();
            let mut records = parser.feed(&input[..offset]).records;
            records.extend(parser.feed(&input[offset..]).records);
            records.extend(parser.finish().records);
            assert_eq!(records, whole.records, "split at offset {offset}");
        }
    }

    #[test]
    fn record_without_data_is_dropped() {
        let input = b"id:1\nevent:cheese\n\nid:2\nevent:wine\ndata:red\n";
        let output = RecordParser::new().feed(input);
        assert_eq!(output.records, vec![record("2", Some("wine"), "red")]);
        assert_eq!(
            output.malformed,
            vec![MalformedRecord {
                id: "1".to_string(),
                name: Some("cheese".to_string()),
            }]
        );
    }

    #[test]
    fn record_without_data_at_end_is_malformed_on_finish() {
        let mut parser = RecordParser::new();
        let output = parser.feed(b"id:1\nevent:cheese\n");
        assert!(output.is_empty());

        let output = parser.finish();
        assert!(output.records.is_empty());
        assert_eq!(output.malformed.len(), 1);
        assert!(!parser.has_partial_record());
    }

    #[test]
    fn noise_before_first_id_is_skipped() {
        let input = b": comment\nretry: 1000\ndata: orphan\nevent: orphan\n\nid:7\ndata:x\n";
        let output = RecordParser::new().feed(input);
        assert_eq!(output.records, vec![record("7", None, "x")]);
        assert!(output.malformed.is_empty());
    }

    #[test]
    fn field_prefix_inside_payload_does_not_start_record() {
        let input = b"id:1\ndata:{\"uid:2\":\"id:3\"}\n";
        let output = RecordParser::new().feed(input);
        assert_eq!(
            output.records,
            vec![record("1", None, "{\"uid:2\":\"id:3\"}")]
        );
    }

    #[test]
    fn first_event_name_wins_and_empty_name_is_none() {
        let output = RecordParser::new().feed(b"id:1\nevent:\nevent:late\ndata:x\n");
        assert_eq!(output.records, vec![record("1", Some("late"), "x")]);

        let output = RecordParser::new().feed(b"id:1\nevent:a\nevent:b\ndata:x\n");
        assert_eq!(output.records, vec![record("1", Some("a"), "x")]);
    }

    #[test]
    fn empty_id_is_passed_through_for_validation() {
        let output = RecordParser::new().feed(b"id:\ndata:x\n");
        assert_eq!(output.records, vec![record("", None, "x")]);
    }

    #[test]
    fn bom_is_stripped_even_when_split() {
        let mut parser = RecordParser::new();
        assert!(parser.feed(b"\xEF\xBB").is_empty());
        let output = parser.feed(b"\xBFid:1\ndata:x\n");
        assert_eq!(output.records, vec![record("1", None, "x")]);
    }

    #[test]
    fn reset_discards_partial_record() {
        let mut parser = RecordParser::new();
        parser.feed(b"id:1\nevent:cheese\nda");
        assert!(parser.has_partial_record());
        assert_eq!(parser.pending_len(), 2);

        parser.reset();
        assert!(!parser.has_partial_record());
        assert_eq!(parser.pending_len(), 0);

        let output = parser.feed(b"ta:x\n");
        assert!(output.is_empty());
    }
}

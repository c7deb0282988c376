//! Incremental `text/event-stream` record parsing.
//!
//! The parser understands the pragmatic subset used by the endpoints this
//! crate talks to: a record starts at an `id:` line, may carry one `event:`
//! line and is complete at its `data:` line. Blank lines, comments and
//! unknown fields between records are skipped. Partial lines are retained
//! across chunks, so a record split over several network reads is parsed
//! exactly as if it had arrived whole.

pub(crate) mod constants;
mod parser;
mod record;

pub use parser::RecordParser;
pub use record::{MalformedRecord, ParseOutput, Record};

//! # hpx-sse
//!
//! Server-Sent Events consumer with primary/secondary event source fan-out.
//!
//! A [`SseManager`] holds one long-lived `text/event-stream` connection and
//! turns the records it carries into immutable [`Event`]s. Consumers attach
//! [`EventSource`]s, each with its own event-name filter:
//!
//! - **Primary election**: the first source owns the connection, later ones
//!   ride on it and are disconnected together with it
//! - **Incremental parsing**: records split across network reads are
//!   reassembled before dispatch
//! - **Bounded retries**: transport failures are retried up to
//!   `max_retries` times, with optional exponential backoff
//! - **Notifications**: connect, disconnect, event and error notifications
//!   on a bus owned by the manager, delivered on a host callback context
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hpx_sse::{ListenerFilter, SseConfig, SseManager, Topic};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SseConfig::new("192.168.0.20", "/notify")
//!         .port(15081)
//!         .name("living room");
//!     let manager = SseManager::new(config)?;
//!
//!     let mut disconnects =
//!         manager.notifications(ListenerFilter::all().topic(Topic::Disconnected));
//!     let mut cheese = manager.add_source(["cheese"])?;
//!
//!     while let Some(event) = cheese.recv().await {
//!         println!("{}: {:?}", event.identifier(), event.decoded_payload());
//!     }
//!     let _ = disconnects.recv().await;
//!     Ok(())
//! }
//! ```

pub mod callback;
pub mod config;
mod dispatch;
pub mod error;
pub mod event;
pub mod manager;
pub mod notify;
pub mod parse;
mod reconnect;
pub mod source;
pub mod transport;

// Re-export commonly used types
pub use callback::{Callback, CallbackContext, SerialCallbackContext};
pub use config::SseConfig;
pub use error::{SseError, SseResult};
pub use event::{Event, EventFilter, EventMetadata};
pub use manager::{ConnectionState, SseManager};
pub use notify::{
    ListenerFilter, Notification, NotificationBus, NotificationListener, Subject, Topic,
};
pub use parse::{MalformedRecord, ParseOutput, Record, RecordParser};
pub use source::{EventSource, SourceId, SourceRole, SourceState};
pub use transport::{HttpTransport, StreamRequest, Transport, TransportResponse};

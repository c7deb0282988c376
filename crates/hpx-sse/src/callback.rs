//! Host callback context.
//!
//! Completion callbacks and notification publishing never run on the
//! manager's own task. They are handed to a [`CallbackContext`] chosen by the
//! host, which runs them in submission order.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::sync::mpsc;
use tracing::{error, trace};

/// A unit of work for the host callback context.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Executes callbacks on behalf of the host.
///
/// Implementations must run callbacks one at a time, in the order they were
/// submitted, and must not run them on the caller's stack.
pub trait CallbackContext: Send + Sync + 'static {
    /// Schedule `callback`.
    fn execute(&self, callback: Callback);
}

/// Default [`CallbackContext`]: a dedicated tokio task draining a queue.
///
/// A panicking callback is logged and does not stop the queue.
#[derive(Clone, Debug)]
pub struct SerialCallbackContext {
    tx: mpsc::UnboundedSender<Callback>,
}

impl SerialCallbackContext {
    /// Spawn the callback task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Callback>();
        tokio::spawn(async move {
            while let Some(callback) = rx.recv().await {
                if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                    error!("SSE callback panicked");
                }
            }
            trace!("SSE callback context stopped");
        });
        Self { tx }
    }
}

impl CallbackContext for SerialCallbackContext {
    fn execute(&self, callback: Callback) {
        if self.tx.send(callback).is_err() {
            error!("SSE callback context is gone, dropping callback");
        }
    }
}

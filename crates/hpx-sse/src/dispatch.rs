//! Fan-out of parsed events to registered sources.

use tracing::debug;

use crate::{
    callback::CallbackContext,
    event::Event,
    notify::{Notification, NotificationBus, Subject},
    source::{SourceSlot, SourceState},
};

/// Deliver `event` to every open source whose filter accepts its name.
///
/// Each source gets its own copy stamped with `origin_uri`, and an
/// [`Topic::Event`](crate::Topic::Event) notification is queued on the
/// callback context. A source whose handle is gone gets neither, without
/// affecting the others. Returns the number of sources the event was
/// queued for.
pub(crate) fn dispatch(
    event: &Event,
    sources: &[SourceSlot],
    origin_uri: &str,
    bus: &NotificationBus,
    callbacks: &dyn CallbackContext,
) -> usize {
    let mut delivered = 0;

    for slot in sources {
        if slot.state() != SourceState::Open || !slot.accepts(event.name()) {
            continue;
        }

        let copy = event.restamped(origin_uri);
        if slot.is_detached() || !slot.deliver(copy.clone()) {
            debug!(
                source = %slot.id,
                id = %event.identifier(),
                "SSE source handle dropped, skipping delivery"
            );
            continue;
        }
        delivered += 1;

        let bus = bus.clone();
        let notification = Notification::event(Subject::Source(slot.id), copy);
        callbacks.execute(Box::new(move || {
            bus.publish(notification);
        }));
    }

    delivered
}

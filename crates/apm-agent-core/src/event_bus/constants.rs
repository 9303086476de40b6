//! Constants for the event bus.

/// Capacity of the event bus channel.
///
/// Producers use `try_send`, so once the channel holds this many unread
/// events further events are dropped instead of blocking the producer.
pub(crate) const MAX_EVENTS: usize = 100;

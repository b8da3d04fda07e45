//! Namespace watch / event pipeline constants.

/// Capacity of the channel between the watch task and the controller.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Server-side timeout requested for each watch call, in seconds.
/// The API server closes the stream after this and the watch is resumed.
pub const WATCH_TIMEOUT_SECS: u32 = 290;

/// First delay before resubscribing after a watch error, in milliseconds.
pub const RESUBSCRIBE_BACKOFF_INITIAL_MS: u64 = 1_000;

/// Upper bound for the resubscribe delay, in milliseconds.
pub const RESUBSCRIBE_BACKOFF_MAX_MS: u64 = 60_000;

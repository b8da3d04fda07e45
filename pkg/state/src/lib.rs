//! Access to the cluster object store: LimitRange reads and writes, and the
//! namespace list/watch feed.

pub mod client;
pub mod memory;
pub mod watch;

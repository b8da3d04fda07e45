//! Namespace controller: exclusion filtering, LimitRange reconciliation and
//! the single-consumer event loop that ties them together.

pub mod exclusion;
pub mod limitrange;
pub mod namespace;

#[cfg(test)]
mod testing;

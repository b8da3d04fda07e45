//! Shared types: the limit policy, resource quantities, namespace
//! lifecycle events and the controller config file.

pub mod config;
pub mod limits;
pub mod namespace;
pub mod quantity;

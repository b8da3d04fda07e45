//! Centralized constants for the limitwarden project.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod limits;
pub mod namespaces;
pub mod paths;
pub mod watch;

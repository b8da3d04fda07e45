//! Filesystem path constants.

/// Default config file path for the controller.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/limitwarden/config.yaml";

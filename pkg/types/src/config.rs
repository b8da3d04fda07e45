use serde::{Deserialize, Serialize};

/// Controller configuration file (YAML).
///
/// Every field is optional; CLI flags and environment variables take
/// precedence over the file.
///
/// Example `config.yaml`:
/// ```yaml
/// cpu-limit-min: 100m
/// cpu-limit-max: "2"
/// mem-limit-min: 128Mi
/// mem-limit-max: 4Gi
/// ephemeral-storage-min: 1Gi
/// ephemeral-storage-max: 10Gi
/// excluded-namespaces:
///   - monitoring
///   - cert-manager
/// resubscribe: true
/// event-buffer: 256
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfigFile {
    #[serde(default, alias = "cpu-limit-min")]
    pub cpu_limit_min: Option<String>,
    #[serde(default, alias = "cpu-limit-max")]
    pub cpu_limit_max: Option<String>,
    #[serde(default, alias = "mem-limit-min")]
    pub mem_limit_min: Option<String>,
    #[serde(default, alias = "mem-limit-max")]
    pub mem_limit_max: Option<String>,
    #[serde(default, alias = "ephemeral-storage-min")]
    pub ephemeral_storage_min: Option<String>,
    #[serde(default, alias = "ephemeral-storage-max")]
    pub ephemeral_storage_max: Option<String>,
    #[serde(default, alias = "excluded-namespaces")]
    pub excluded_namespaces: Vec<String>,
    #[serde(default)]
    pub resubscribe: Option<bool>,
    #[serde(default, alias = "event-buffer")]
    pub event_buffer: Option<usize>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}

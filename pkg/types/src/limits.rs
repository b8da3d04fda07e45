use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{LimitRange, LimitRangeItem, LimitRangeSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as ApiQuantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use pkg_constants::limits::{
    CPU_LIMIT_MAX, CPU_LIMIT_MIN, EPHEMERAL_STORAGE_MAX, EPHEMERAL_STORAGE_MIN, LIMIT_RANGE_NAME,
    LIMIT_TYPE_POD, MANAGED_BY_LABEL, MANAGED_BY_VALUE, MEM_LIMIT_MAX, MEM_LIMIT_MIN,
    RESOURCE_CPU, RESOURCE_EPHEMERAL_STORAGE, RESOURCE_MEMORY,
};
use thiserror::Error;
use tracing::info;

use crate::quantity::{Quantity, QuantityError};

/// Why a limit value was rejected at startup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{key} is not set")]
    Missing { key: &'static str },
    #[error("{key} is empty")]
    Empty { key: &'static str },
    #[error("{key}={value:?} is not a valid quantity: {source}")]
    Invalid {
        key: &'static str,
        value: String,
        #[source]
        source: QuantityError,
    },
    #[error("{key} must not be zero")]
    Zero { key: &'static str },
    #[error("{min_key} ({min}) is greater than {max_key} ({max})")]
    MinExceedsMax {
        min_key: &'static str,
        min: String,
        max_key: &'static str,
        max: String,
    },
}

/// Pod-scope floor and ceiling for CPU, memory and ephemeral storage.
///
/// Loaded once at startup and shared read-only by every reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitPolicy {
    pub cpu_min: Quantity,
    pub cpu_max: Quantity,
    pub memory_min: Quantity,
    pub memory_max: Quantity,
    pub ephemeral_storage_min: Quantity,
    pub ephemeral_storage_max: Quantity,
}

impl LimitPolicy {
    /// Build the policy from the six limit keys, resolving each through `lookup`.
    pub fn load<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &'static str| required_quantity(key, lookup(key));
        let policy = Self {
            cpu_min: read(CPU_LIMIT_MIN)?,
            cpu_max: read(CPU_LIMIT_MAX)?,
            memory_min: read(MEM_LIMIT_MIN)?,
            memory_max: read(MEM_LIMIT_MAX)?,
            ephemeral_storage_min: read(EPHEMERAL_STORAGE_MIN)?,
            ephemeral_storage_max: read(EPHEMERAL_STORAGE_MAX)?,
        };
        policy.check_bounds()?;

        info!("Limit policy loaded: {}", policy);
        Ok(policy)
    }

    /// Load the policy straight from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(|key| std::env::var(key).ok())
    }

    fn check_bounds(&self) -> Result<(), ConfigError> {
        let pairs = [
            (CPU_LIMIT_MIN, &self.cpu_min, CPU_LIMIT_MAX, &self.cpu_max),
            (MEM_LIMIT_MIN, &self.memory_min, MEM_LIMIT_MAX, &self.memory_max),
            (
                EPHEMERAL_STORAGE_MIN,
                &self.ephemeral_storage_min,
                EPHEMERAL_STORAGE_MAX,
                &self.ephemeral_storage_max,
            ),
        ];
        for (min_key, min, max_key, max) in pairs {
            if min.value() > max.value() {
                return Err(ConfigError::MinExceedsMax {
                    min_key,
                    min: min.to_string(),
                    max_key,
                    max: max.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Ceiling resource map (`cpu`, `memory`, `ephemeral-storage`).
    pub fn max(&self) -> BTreeMap<String, ApiQuantity> {
        resource_list(&self.cpu_max, &self.memory_max, &self.ephemeral_storage_max)
    }

    /// Floor resource map (`cpu`, `memory`, `ephemeral-storage`).
    pub fn min(&self) -> BTreeMap<String, ApiQuantity> {
        resource_list(&self.cpu_min, &self.memory_min, &self.ephemeral_storage_min)
    }

    /// The LimitRange body: a single pod-scoped item carrying max and min.
    pub fn limit_range_spec(&self) -> LimitRangeSpec {
        LimitRangeSpec {
            limits: vec![LimitRangeItem {
                type_: LIMIT_TYPE_POD.to_string(),
                max: Some(self.max()),
                min: Some(self.min()),
                ..Default::default()
            }],
        }
    }

    /// A fresh LimitRange for `namespace`, ready to be created.
    pub fn limit_range(&self, namespace: &str) -> LimitRange {
        LimitRange {
            metadata: ObjectMeta {
                name: Some(LIMIT_RANGE_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    MANAGED_BY_LABEL.to_string(),
                    MANAGED_BY_VALUE.to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(self.limit_range_spec()),
        }
    }
}

impl fmt::Display for LimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={}..{} memory={}..{} ephemeral-storage={}..{}",
            self.cpu_min,
            self.cpu_max,
            self.memory_min,
            self.memory_max,
            self.ephemeral_storage_min,
            self.ephemeral_storage_max
        )
    }
}

fn required_quantity(key: &'static str, value: Option<String>) -> Result<Quantity, ConfigError> {
    let value = value.ok_or(ConfigError::Missing { key })?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Empty { key });
    }
    let quantity: Quantity = trimmed.parse().map_err(|source| ConfigError::Invalid {
        key,
        value: trimmed.to_string(),
        source,
    })?;
    if quantity.is_zero() {
        return Err(ConfigError::Zero { key });
    }
    Ok(quantity)
}

fn resource_list(
    cpu: &Quantity,
    memory: &Quantity,
    ephemeral_storage: &Quantity,
) -> BTreeMap<String, ApiQuantity> {
    BTreeMap::from([
        (RESOURCE_CPU.to_string(), cpu.into()),
        (RESOURCE_MEMORY.to_string(), memory.into()),
        (RESOURCE_EPHEMERAL_STORAGE.to_string(), ephemeral_storage.into()),
    ])
}

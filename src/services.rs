//! Service and chain definitions.
//!
//! A chain names the ordered services a job's workflow runs through. The
//! registry is loaded from YAML; a built-in registry backs tests and local
//! development.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// A logical backend service (name plus optional version tag).
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    /// Hard cap on granules any single job may pull through this service.
    #[serde(default)]
    pub granule_limit: Option<i32>,
}

/// One stage of a chain.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainStep {
    pub service: String,
    /// When true, the step consumes all prior-step outputs as one catalog.
    #[serde(default)]
    pub aggregating: bool,
}

/// An ordered list of services a job runs through.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceChain {
    pub name: String,
    /// Whether the first step pages granules out of an external source.
    #[serde(default = "default_true")]
    pub producer: bool,
    pub steps: Vec<ChainStep>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    services: Vec<ServiceDefinition>,
    #[serde(default)]
    chains: Vec<ServiceChain>,
}

#[derive(Debug, Error)]
pub enum ServiceConfigError {
    #[error("failed to read service config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse service config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("chain {0} has no steps")]
    EmptyChain(String),
    #[error("chain {chain} step 1 ({service}) cannot be aggregating")]
    AggregatingFirstStep { chain: String, service: String },
}

/// Lookup for services and chains.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: HashMap<String, ServiceDefinition>,
    chains: HashMap<String, ServiceChain>,
}

impl ServiceRegistry {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ServiceConfigError> {
        let file: RegistryFile = serde_yaml::from_str(raw)?;
        Self::from_parts(file.services, file.chains)
    }

    pub fn load(path: &Path) -> Result<Self, ServiceConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    fn from_parts(
        services: Vec<ServiceDefinition>,
        chains: Vec<ServiceChain>,
    ) -> Result<Self, ServiceConfigError> {
        for chain in &chains {
            if chain.steps.is_empty() {
                return Err(ServiceConfigError::EmptyChain(chain.name.clone()));
            }
            if chain.steps[0].aggregating {
                return Err(ServiceConfigError::AggregatingFirstStep {
                    chain: chain.name.clone(),
                    service: chain.steps[0].service.clone(),
                });
            }
        }
        Ok(Self {
            services: services.into_iter().map(|s| (s.name.clone(), s)).collect(),
            chains: chains.into_iter().map(|c| (c.name.clone(), c)).collect(),
        })
    }

    /// Registry used when no YAML file is configured.
    pub fn builtin() -> Self {
        Self::from_yaml_str(BUILTIN_REGISTRY).unwrap_or_else(|_| Self {
            services: HashMap::new(),
            chains: HashMap::new(),
        })
    }

    pub fn chain(&self, name: &str) -> Option<&ServiceChain> {
        self.chains.get(name)
    }

    pub fn chain_names(&self) -> Vec<&str> {
        self.chains.keys().map(String::as_str).collect()
    }

    /// Granule cap for a service, if one is configured.
    pub fn granule_limit(&self, service: &str) -> Option<i32> {
        self.services.get(service).and_then(|s| s.granule_limit)
    }
}

const BUILTIN_REGISTRY: &str = r#"
services:
  - name: harmony/query-cmr
    granule_limit: 2000
  - name: harmony/swath-projector
  - name: harmony/zarr-formatter
  - name: harmony/concise
chains:
  - name: reproject-zarr
    steps:
      - service: harmony/query-cmr
      - service: harmony/swath-projector
      - service: harmony/zarr-formatter
  - name: concatenate
    steps:
      - service: harmony/query-cmr
      - service: harmony/concise
        aggregating: true
"#;

//! Cluster descriptor loading.
//!
//! The descriptor is the declarative input of the whole engine: node
//! counts, sizing, network layout, k3s options. It is passed explicitly
//! into the topology builder at construction time; there is no global
//! config singleton.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{Error, Result};
use crate::vm::driver::StatusSymbols;

/// Static network layout for a cluster.
///
/// `start_offset` is 1-based into the subnet's usable host range: the
/// master takes the host at the offset, agents follow contiguously.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkDescriptor {
    /// Subnet in CIDR notation, e.g. `192.168.0.0/24`.
    pub subnet: String,
    pub start_offset: u64,
    /// Host adapter the instances attach to.
    pub adapter: String,
}

/// Declarative description of one cluster.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterDescriptor {
    /// Namespace prefix for instance names and the on-disk data directory.
    pub cluster_name: String,

    // Sizing; None lets the manager pick its defaults.
    pub master_cpus: Option<u32>,
    pub master_memory: Option<String>,
    pub master_disk: Option<String>,
    pub agent_cpus: Option<u32>,
    pub agent_memory: Option<String>,
    pub agent_disk: Option<String>,

    #[serde(default = "default_agent_count")]
    pub agent_count: u64,

    /// Base image passed through to `multipass launch`.
    pub image: Option<String>,

    /// Overrides `~/.flotilla/<cluster_name>` as the data directory.
    pub data_dir: Option<PathBuf>,

    /// Overrides the default templates directory.
    pub templates_dir: Option<PathBuf>,

    pub network: Option<NetworkDescriptor>,

    /// Extra guest packages installed by the userdata scripts.
    #[serde(default)]
    pub extra_packages: Vec<String>,

    // K3s install options.
    pub k3s_version: Option<String>,
    /// Shared secret between master and agents. Generated and persisted on
    /// first build when absent.
    pub token: Option<String>,

    // Feature toggles for the bootstrap tool.
    #[serde(default)]
    pub disable_traefik_ingress: bool,
    #[serde(default)]
    pub disable_local_storage: bool,
    #[serde(default)]
    pub disable_metrics_server: bool,

    /// Node taints applied to the master, e.g.
    /// `CriticalAddonsOnly=true:NoExecute`.
    #[serde(default)]
    pub taints: Vec<String>,

    #[serde(default)]
    pub symbols: StatusSymbols,

    /// Manager binary name, overridable for tests and exotic installs.
    #[serde(default = "default_manager_program")]
    pub manager_program: String,
}

fn default_agent_count() -> u64 {
    1
}

fn default_manager_program() -> String {
    "multipass".to_string()
}

impl ClusterDescriptor {
    /// Minimal descriptor with defaults matching the TOML `#[serde(default)]`s.
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            master_cpus: None,
            master_memory: None,
            master_disk: None,
            agent_cpus: None,
            agent_memory: None,
            agent_disk: None,
            agent_count: default_agent_count(),
            image: None,
            data_dir: None,
            templates_dir: None,
            network: None,
            extra_packages: Vec::new(),
            k3s_version: None,
            token: None,
            disable_traefik_ingress: false,
            disable_local_storage: false,
            disable_metrics_server: false,
            taints: Vec::new(),
            symbols: StatusSymbols::default(),
            manager_program: default_manager_program(),
        }
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("read descriptor {}", path.display()), e))?;
        toml::from_str(&text).map_err(|source| Error::Descriptor {
            path: path.to_path_buf(),
            source,
        })
    }
}

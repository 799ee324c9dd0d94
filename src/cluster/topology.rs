//! Cluster topology building.
//!
//! `build()` turns a [`ClusterDescriptor`] into one master [`NodeSpec`]
//! and `agent_count` agent specs: it lays out the per-cluster data
//! directory (`master/`, `worker/`, `common/`), derives static addresses
//! when a network is configured, resolves the shared join token, and
//! renders the bootstrap and hook scripts into the data directory.
//!
//! The build is fail-fast: any template, address, or I/O error aborts it
//! before node specs are produced. Rendered scripts are overwritten on
//! every build, so re-building with a different descriptor replaces the
//! prior script set at the same paths.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use uuid::Uuid;

use crate::cluster::address::{self, Subnet};
use crate::cluster::template::TemplateRenderer;
use crate::config::ClusterDescriptor;
use crate::errors::{Error, Result};
use crate::vm::command::Multipass;
use crate::vm::driver::VmDriver;
use crate::vm::{HookSet, NetworkBinding, NodeSpec, ScriptBinding, SharedVolume};

/// Instance-name prefix; keeps flotilla-managed instances recognizable in
/// a shared multipass install.
const NAME_PREFIX: &str = "flo";

/// The flags every master install gets, before any toggle-derived ones.
const BASE_INSTALL_FLAGS: &str = "--write-kubeconfig-mode 644";

/// The concrete topology derived from one descriptor.
#[derive(Debug, Clone)]
pub struct Topology {
    pub master: NodeSpec,
    pub agents: Vec<NodeSpec>,
    pub data_dir: PathBuf,
    /// Rendered master bootstrap text, exposed so callers can inspect the
    /// composed install flags without re-reading the file.
    pub master_bootstrap: String,
}

impl Topology {
    /// One driver per node, master first.
    pub fn drivers(&self, descriptor: &ClusterDescriptor) -> Vec<std::sync::Arc<VmDriver>> {
        let manager = Multipass::new(&descriptor.manager_program);
        std::iter::once(&self.master)
            .chain(self.agents.iter())
            .map(|spec| {
                std::sync::Arc::new(VmDriver::new(
                    spec.clone(),
                    manager.clone(),
                    descriptor.symbols.clone(),
                ))
            })
            .collect()
    }
}

/// Builds [`Topology`] values from a descriptor.
pub struct TopologyBuilder {
    descriptor: ClusterDescriptor,
    base_dir: PathBuf,
    renderer: TemplateRenderer,
}

impl TopologyBuilder {
    pub fn new(descriptor: ClusterDescriptor) -> Self {
        let base_dir = default_base_dir();
        let templates_dir = descriptor
            .templates_dir
            .clone()
            .unwrap_or_else(default_templates_dir);
        Self {
            renderer: TemplateRenderer::new(templates_dir),
            descriptor,
            base_dir,
        }
    }

    /// Override the `~/.flotilla` base directory (used by tests).
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn build(&self) -> Result<Topology> {
        let descriptor = &self.descriptor;

        let data_dir = descriptor
            .data_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join(&descriptor.cluster_name));
        let master_dir = data_dir.join("master");
        let worker_dir = data_dir.join("worker");
        let common_dir = data_dir.join("common");
        for dir in [&master_dir, &worker_dir, &common_dir] {
            std::fs::create_dir_all(dir)
                .map_err(|e| Error::io(format!("create data directory {}", dir.display()), e))?;
        }

        // Addresses first: an exhausted range must fail the build before
        // any script is re-rendered.
        let (master_address, agent_addresses, adapter) = match &descriptor.network {
            Some(network) => {
                let subnet = Subnet::parse(&network.subnet)?;
                (
                    Some(address::master_address(&subnet, network.start_offset)?),
                    address::agent_addresses(
                        &subnet,
                        network.start_offset,
                        descriptor.agent_count,
                    )?,
                    Some(network.adapter.clone()),
                )
            }
            None => (None, Vec::new(), None),
        };

        let token = self.resolve_token(&data_dir)?;
        let scripts = self.render_scripts(&data_dir, &token)?;

        let master = self.master_spec(&master_dir, &common_dir, master_address, &adapter, &scripts)?;
        let agents = (0..descriptor.agent_count)
            .map(|i| {
                self.agent_spec(
                    i,
                    &worker_dir,
                    &common_dir,
                    agent_addresses.get(i as usize).cloned(),
                    &adapter,
                    &scripts,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            cluster = %descriptor.cluster_name,
            agents = descriptor.agent_count,
            data_dir = %data_dir.display(),
            "topology built"
        );

        Ok(Topology {
            master,
            agents,
            data_dir,
            master_bootstrap: scripts.master_text,
        })
    }

    // -----------------------------------------------------------------------
    // Token
    // -----------------------------------------------------------------------

    /// The shared join secret. An explicit descriptor token wins; otherwise
    /// one is generated on the first build and persisted at
    /// `<data_dir>/token` so agents can always rejoin with the same token.
    fn resolve_token(&self, data_dir: &Path) -> Result<String> {
        if let Some(token) = &self.descriptor.token {
            return Ok(token.clone());
        }

        let token_path = data_dir.join("token");
        if token_path.exists() {
            let persisted = std::fs::read_to_string(&token_path)
                .map_err(|e| Error::io(format!("read token {}", token_path.display()), e))?;
            let persisted = persisted.trim();
            if !persisted.is_empty() {
                debug!(path = %token_path.display(), "reusing persisted cluster token");
                return Ok(persisted.to_string());
            }
        }

        let token = Uuid::new_v4().simple().to_string();
        std::fs::write(&token_path, &token)
            .map_err(|e| Error::io(format!("persist token {}", token_path.display()), e))?;
        Ok(token)
    }

    // -----------------------------------------------------------------------
    // Script rendering
    // -----------------------------------------------------------------------

    fn render_scripts(&self, data_dir: &Path, token: &str) -> Result<RenderedScripts> {
        let descriptor = &self.descriptor;
        let extra_packages = descriptor.extra_packages.join(" ");
        let k3s_version = descriptor.k3s_version.clone().unwrap_or_default();

        let mut master_vars = BTreeMap::new();
        master_vars.insert("install_flags".to_string(), self.install_flags());
        master_vars.insert("k3s_version".to_string(), k3s_version.clone());
        master_vars.insert("k3s_token".to_string(), token.to_string());
        master_vars.insert("cluster_name".to_string(), descriptor.cluster_name.clone());
        master_vars.insert("extra_packages".to_string(), extra_packages.clone());

        let mut agent_vars = BTreeMap::new();
        agent_vars.insert("k3s_version".to_string(), k3s_version);
        agent_vars.insert("extra_packages".to_string(), extra_packages);

        let (master_text, master_userdata) = self.renderer.render(
            "master_userdata.sh",
            &master_vars,
            // Lenient: the master template may reference variables an older
            // descriptor does not carry.
            false,
            Some(&data_dir.join("master_userdata.sh")),
        )?;
        let (_, agent_userdata) = self.renderer.render(
            "agent_userdata.sh",
            &agent_vars,
            true,
            Some(&data_dir.join("agent_userdata.sh")),
        )?;
        let (_, agent_post_start) = self.renderer.render(
            "agent_post_start.sh",
            &BTreeMap::new(),
            true,
            Some(&data_dir.join("agent_post_start.sh")),
        )?;
        let (_, agent_pre_remove) = self.renderer.render(
            "agent_pre_remove.sh",
            &BTreeMap::new(),
            true,
            Some(&data_dir.join("agent_pre_remove.sh")),
        )?;

        Ok(RenderedScripts {
            master_text,
            master_userdata,
            agent_userdata,
            agent_post_start,
            agent_pre_remove,
        })
    }

    /// The install-flags string handed to the k3s installer: the mandatory
    /// kubeconfig-mode flag, one disable token per toggle, then taints.
    fn install_flags(&self) -> String {
        let descriptor = &self.descriptor;
        let mut flags = String::from(BASE_INSTALL_FLAGS);
        if descriptor.disable_local_storage {
            flags.push_str(" --disable local-storage");
        }
        if descriptor.disable_traefik_ingress {
            flags.push_str(" --disable traefik");
        }
        if descriptor.disable_metrics_server {
            flags.push_str(" --disable metrics-server");
        }
        for taint in &descriptor.taints {
            flags.push_str(" --node-taint ");
            flags.push_str(taint);
        }
        flags
    }

    // -----------------------------------------------------------------------
    // Node specs
    // -----------------------------------------------------------------------

    fn master_spec(
        &self,
        master_dir: &Path,
        common_dir: &Path,
        address: Option<String>,
        adapter: &Option<String>,
        scripts: &RenderedScripts,
    ) -> Result<NodeSpec> {
        let descriptor = &self.descriptor;
        Ok(NodeSpec {
            name: format!("{NAME_PREFIX}-{}-master", descriptor.cluster_name),
            label: "M".to_string(),
            cpus: descriptor.master_cpus,
            memory: descriptor.master_memory.clone(),
            disk: descriptor.master_disk.clone(),
            image: descriptor.image.clone(),
            cloud_init: None,
            network: network_binding(adapter, address),
            shared_volumes: vec![
                volume(master_dir, "/data"),
                volume(common_dir, "/common"),
            ],
            bootstrap: Some(ScriptBinding::guest(&scripts.master_userdata)?),
            hooks: HookSet::default(),
        })
    }

    fn agent_spec(
        &self,
        index: u64,
        worker_dir: &Path,
        common_dir: &Path,
        address: Option<String>,
        adapter: &Option<String>,
        scripts: &RenderedScripts,
    ) -> Result<NodeSpec> {
        let descriptor = &self.descriptor;

        // The same rendered script bodies are reused across all agents;
        // only the instance name and network binding differ per node.
        let post_start = ScriptBinding::guest(&scripts.agent_post_start)?;
        let pre_remove = ScriptBinding::guest(&scripts.agent_pre_remove)?.ignoring_errors();

        Ok(NodeSpec {
            name: format!("{NAME_PREFIX}-{}-agent-{index}", descriptor.cluster_name),
            label: format!("W{index}"),
            cpus: descriptor.agent_cpus,
            memory: descriptor.agent_memory.clone(),
            disk: descriptor.agent_disk.clone(),
            image: descriptor.image.clone(),
            cloud_init: None,
            network: network_binding(adapter, address),
            shared_volumes: vec![
                volume(worker_dir, "/data"),
                volume(common_dir, "/common"),
            ],
            bootstrap: Some(ScriptBinding::guest(&scripts.agent_userdata)?),
            hooks: HookSet {
                post_launch: Some(post_start.clone()),
                post_start: Some(post_start),
                pre_stop: Some(pre_remove.clone()),
                pre_delete: Some(pre_remove),
                ..Default::default()
            },
        })
    }
}

/// Paths of the rendered per-cluster scripts, plus the master text for
/// callers that want to inspect the install flags.
#[derive(Debug, Clone)]
struct RenderedScripts {
    master_text: String,
    master_userdata: PathBuf,
    agent_userdata: PathBuf,
    agent_post_start: PathBuf,
    agent_pre_remove: PathBuf,
}

fn network_binding(adapter: &Option<String>, address: Option<String>) -> Option<NetworkBinding> {
    adapter.as_ref().map(|adapter| NetworkBinding {
        adapter: adapter.clone(),
        address,
    })
}

fn volume(host_path: &Path, guest_path: &str) -> SharedVolume {
    SharedVolume {
        host_path: host_path.to_path_buf(),
        guest_path: PathBuf::from(guest_path),
    }
}

fn default_base_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".flotilla"),
        Err(_) => PathBuf::from(".flotilla"),
    }
}

/// Templates ship next to the binary's project by default; `FLOTILLA_TEMPLATES`
/// overrides for installed setups.
fn default_templates_dir() -> PathBuf {
    match std::env::var("FLOTILLA_TEMPLATES") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => PathBuf::from("templates"),
    }
}

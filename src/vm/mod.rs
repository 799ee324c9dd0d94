//! VM node descriptions and lifecycle driving.
//!
//! [`NodeSpec`] is the immutable declarative description of one multipass
//! instance (sizing, network binding, shared volumes, hook scripts);
//! [`driver::VmDriver`] owns one spec and drives it through its lifecycle
//! by composing [`command::CommandChain`]s of manager calls and hooks.

use std::path::PathBuf;

use crate::errors::{Error, Result};

pub mod command;
pub mod driver;

// ---------------------------------------------------------------------------
// Script bindings
// ---------------------------------------------------------------------------

/// Where a hook script runs: on the host, or inside the guest instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptTarget {
    Host,
    Guest,
}

/// Which side of a lifecycle event a hook is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Pre,
    Post,
}

/// The lifecycle events hooks can bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Launch,
    Start,
    Stop,
    Delete,
}

/// One hook script: path, arguments, execution target, error tolerance.
///
/// Validated at construction and read-only thereafter. A binding whose
/// path does not exist on disk at *execution* time is skipped with a
/// warning rather than failing the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptBinding {
    path: PathBuf,
    args: Vec<String>,
    target: ScriptTarget,
    ignore_errors: bool,
}

impl ScriptBinding {
    pub fn new(path: impl Into<PathBuf>, target: ScriptTarget) -> Result<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(Error::EmptyScriptPath);
        }
        Ok(Self {
            path,
            args: Vec::new(),
            target,
            ignore_errors: false,
        })
    }

    /// Shorthand for a guest-targeted binding.
    pub fn guest(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(path, ScriptTarget::Guest)
    }

    /// Shorthand for a host-targeted binding.
    pub fn host(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(path, ScriptTarget::Host)
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Mark this hook as tolerated: its failure is logged but never aborts
    /// the surrounding command chain.
    pub fn ignoring_errors(mut self) -> Self {
        self.ignore_errors = true;
        self
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn target(&self) -> ScriptTarget {
        self.target
    }

    pub fn ignores_errors(&self) -> bool {
        self.ignore_errors
    }
}

/// The optional hook scripts of one node, keyed by (phase, event).
#[derive(Debug, Clone, Default)]
pub struct HookSet {
    pub pre_launch: Option<ScriptBinding>,
    pub post_launch: Option<ScriptBinding>,
    pub pre_start: Option<ScriptBinding>,
    pub post_start: Option<ScriptBinding>,
    pub pre_stop: Option<ScriptBinding>,
    pub post_stop: Option<ScriptBinding>,
    pub pre_delete: Option<ScriptBinding>,
    pub post_delete: Option<ScriptBinding>,
}

impl HookSet {
    pub fn get(&self, phase: HookPhase, event: HookEvent) -> Option<&ScriptBinding> {
        match (phase, event) {
            (HookPhase::Pre, HookEvent::Launch) => self.pre_launch.as_ref(),
            (HookPhase::Post, HookEvent::Launch) => self.post_launch.as_ref(),
            (HookPhase::Pre, HookEvent::Start) => self.pre_start.as_ref(),
            (HookPhase::Post, HookEvent::Start) => self.post_start.as_ref(),
            (HookPhase::Pre, HookEvent::Stop) => self.pre_stop.as_ref(),
            (HookPhase::Post, HookEvent::Stop) => self.post_stop.as_ref(),
            (HookPhase::Pre, HookEvent::Delete) => self.pre_delete.as_ref(),
            (HookPhase::Post, HookEvent::Delete) => self.post_delete.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Node description
// ---------------------------------------------------------------------------

/// One host directory exposed inside the guest.
///
/// The host directory is created (parents included) before the mount, so
/// repeated launches are safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedVolume {
    pub host_path: PathBuf,
    pub guest_path: PathBuf,
}

/// Network binding of one node. `address: None` means DHCP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkBinding {
    pub adapter: String,
    pub address: Option<String>,
}

/// Declarative description of one VM instance, immutable once built.
///
/// Sizing fields left as `None` fall back to the manager's defaults. The
/// bootstrap script always runs inside the guest on first creation.
#[derive(Debug, Clone, Default)]
pub struct NodeSpec {
    pub name: String,
    /// Short display label (e.g. `M`, `W0`); falls back to `name` if empty.
    pub label: String,
    pub cpus: Option<u32>,
    pub memory: Option<String>,
    pub disk: Option<String>,
    pub image: Option<String>,
    pub cloud_init: Option<PathBuf>,
    pub network: Option<NetworkBinding>,
    pub shared_volumes: Vec<SharedVolume>,
    /// Guest bootstrap script, executed between volume mounts and the
    /// post-launch hook.
    pub bootstrap: Option<ScriptBinding>,
    pub hooks: HookSet,
}

impl NodeSpec {
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.name
        } else {
            &self.label
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_script_path_is_rejected() {
        assert!(matches!(
            ScriptBinding::host(""),
            Err(Error::EmptyScriptPath)
        ));
    }

    #[test]
    fn binding_builders_set_target_and_tolerance() {
        let binding = ScriptBinding::guest("/tmp/hook.sh")
            .unwrap()
            .with_args(["--fast"])
            .ignoring_errors();
        assert_eq!(binding.target(), ScriptTarget::Guest);
        assert_eq!(binding.args(), ["--fast"]);
        assert!(binding.ignores_errors());
    }

    #[test]
    fn hookset_lookup_matches_fields() {
        let hooks = HookSet {
            pre_stop: Some(ScriptBinding::host("/tmp/a.sh").unwrap()),
            ..Default::default()
        };
        assert!(hooks.get(HookPhase::Pre, HookEvent::Stop).is_some());
        assert!(hooks.get(HookPhase::Post, HookEvent::Stop).is_none());
        assert!(hooks.get(HookPhase::Pre, HookEvent::Launch).is_none());
    }

    #[test]
    fn display_label_falls_back_to_name() {
        let spec = NodeSpec {
            name: "flo-demo-master".to_string(),
            ..Default::default()
        };
        assert_eq!(spec.display_label(), "flo-demo-master");
    }
}

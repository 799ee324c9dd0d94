//! Per-node lifecycle driver.
//!
//! One [`VmDriver`] owns one [`NodeSpec`] and drives it through
//! create/start/stop/delete by composing [`CommandChain`]s. The observed
//! state is *derived*, never authoritative: the manager's inventory is the
//! source of truth and the driver re-derives it on every poll and after
//! every completed action, caching the last-known value for the display
//! collaborator.
//!
//! ```text
//! ClusterTopologyBuilder ─► NodeSpec ─► VmDriver
//!                                          ├─► spawn_status_poller  (refresh every N s)
//!                                          └─► dispatch(Action)     (worker task per action)
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::Result;
use crate::vm::command::{CommandChain, Multipass, Step};
use crate::vm::{HookEvent, HookPhase, NodeSpec, ScriptBinding, ScriptTarget};

// ---------------------------------------------------------------------------
// Observed state
// ---------------------------------------------------------------------------

/// Observed lifecycle state of one instance.
///
/// `Unknown` covers both "no inventory entry" and "inventory unavailable";
/// `Error` covers "entry present but its state string is unrecognized".
/// The manager does not let us tell a transient failure from a broken
/// instance, so the two states are kept apart rather than collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Initial value before the first poll.
    NotCreated,
    Starting,
    Running,
    Restarting,
    DelayedShutdown,
    Stopped,
    Suspending,
    Suspended,
    Deleted,
    Unknown,
    Error,
}

impl VmState {
    /// Map the manager's free-text state by case-insensitive substring.
    ///
    /// "restarting" must be checked before "starting" (and would itself be
    /// shadowed by a bare "running" check done too early). Unrecognized
    /// non-empty text maps to `Error`, empty text to `Unknown`.
    pub fn from_manager(raw: &str) -> VmState {
        let s = raw.trim().to_lowercase();
        if s.is_empty() {
            VmState::Unknown
        } else if s.contains("delayed") {
            VmState::DelayedShutdown
        } else if s.contains("restarting") {
            VmState::Restarting
        } else if s.contains("starting") {
            VmState::Starting
        } else if s.contains("running") {
            VmState::Running
        } else if s.contains("stopped") {
            VmState::Stopped
        } else if s.contains("suspending") {
            VmState::Suspending
        } else if s.contains("suspended") {
            VmState::Suspended
        } else if s.contains("deleted") {
            VmState::Deleted
        } else if s.contains("unknown") {
            VmState::Unknown
        } else {
            VmState::Error
        }
    }
}

/// Display symbols per state class, overridable in the descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusSymbols {
    #[serde(default = "default_running")]
    pub running: String,
    #[serde(default = "default_stopped")]
    pub stopped: String,
    #[serde(default = "default_unknown")]
    pub unknown: String,
    #[serde(default = "default_error")]
    pub error: String,
}

fn default_running() -> String {
    "🟢".to_string()
}
fn default_stopped() -> String {
    "🔴".to_string()
}
fn default_unknown() -> String {
    "❓".to_string()
}
fn default_error() -> String {
    "❌".to_string()
}

impl Default for StatusSymbols {
    fn default() -> Self {
        Self {
            running: default_running(),
            stopped: default_stopped(),
            unknown: default_unknown(),
            error: default_error(),
        }
    }
}

impl StatusSymbols {
    pub fn for_state(&self, state: VmState) -> &str {
        match state {
            VmState::Running => &self.running,
            VmState::Stopped
            | VmState::Suspended
            | VmState::Deleted
            | VmState::NotCreated => &self.stopped,
            VmState::Error => &self.error,
            // Transitional and unknown states share the unknown symbol.
            _ => &self.unknown,
        }
    }
}

// ---------------------------------------------------------------------------
// Inventory parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Inventory {
    #[serde(default)]
    list: Vec<InventoryEntry>,
}

#[derive(Debug, Deserialize)]
struct InventoryEntry {
    name: String,
    #[serde(default)]
    state: String,
}

/// Locate `instance` in the manager's JSON inventory and derive its state.
///
/// No entry means `Unknown`; unparsable JSON is an error the caller turns
/// into `Unknown` as well.
fn state_from_inventory(json: &[u8], instance: &str) -> Result<VmState> {
    let inventory: Inventory = serde_json::from_slice(json)?;
    Ok(inventory
        .list
        .iter()
        .find(|entry| entry.name == instance)
        .map(|entry| VmState::from_manager(&entry.state))
        .unwrap_or(VmState::Unknown))
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// User-triggerable lifecycle actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Launch,
    Start,
    Stop,
    Delete,
}

/// How a `start` request resolves given the observed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartPath {
    /// Instance not created (or not visible): redirect to launch.
    Launch,
    /// Already running: drop into an interactive shell instead.
    Shell,
    /// Regular pre-start / start / post-start chain.
    StartChain,
}

fn resolve_start(state: VmState) -> StartPath {
    match state {
        VmState::NotCreated | VmState::Unknown => StartPath::Launch,
        VmState::Running => StartPath::Shell,
        _ => StartPath::StartChain,
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Drives one instance through its lifecycle and caches its observed state.
pub struct VmDriver {
    spec: NodeSpec,
    manager: Multipass,
    symbols: StatusSymbols,
    state: RwLock<VmState>,
}

impl VmDriver {
    pub fn new(spec: NodeSpec, manager: Multipass, symbols: StatusSymbols) -> Self {
        Self {
            spec,
            manager,
            symbols,
            state: RwLock::new(VmState::NotCreated),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    /// Last-known state without touching the manager.
    pub async fn cached_state(&self) -> VmState {
        *self.state.read().await
    }

    /// Query the inventory and refresh the cache.
    ///
    /// Never fails: an unavailable or unparsable inventory resolves to
    /// `Unknown` so the polling loop keeps running.
    pub async fn refresh_state(&self) -> VmState {
        let state = match self.query_inventory().await {
            Ok(state) => state,
            Err(e) => {
                warn!(instance = %self.spec.name, error = %e, "inventory query failed");
                VmState::Unknown
            }
        };
        *self.state.write().await = state;
        state
    }

    async fn query_inventory(&self) -> Result<VmState> {
        let args = vec![
            "list".to_string(),
            "--format".to_string(),
            "json".to_string(),
        ];
        let output = self.manager.run(&args, "inventory query").await?;
        state_from_inventory(&output.stdout, &self.spec.name)
    }

    /// One poll tick for the display collaborator: refresh, then render
    /// `"<symbol> <label>"`.
    pub async fn poll(&self) -> String {
        let state = self.refresh_state().await;
        self.status_line(state)
    }

    pub fn status_line(&self, state: VmState) -> String {
        format!("{} {}", self.symbols.for_state(state), self.spec.display_label())
    }

    // -----------------------------------------------------------------------
    // Lifecycle actions
    // -----------------------------------------------------------------------

    /// Create the instance: pre-launch hook, shared-volume host
    /// directories, `multipass launch` with sizing/network/cloud-init
    /// flags, volume mounts, guest bootstrap, post-launch hook.
    pub async fn launch(&self) -> Result<()> {
        info!(instance = %self.spec.name, "launching");
        let result = self.launch_chain().execute(&self.manager).await;
        self.refresh_state().await;
        result
    }

    /// Start the instance. On a not-created or unknown instance this
    /// transparently redirects to [`VmDriver::launch`]; on a running one it
    /// opens an interactive shell.
    pub async fn start(&self) -> Result<()> {
        let state = self.refresh_state().await;
        match resolve_start(state) {
            StartPath::Launch => {
                debug!(instance = %self.spec.name, ?state, "start redirected to launch");
                self.launch().await
            }
            StartPath::Shell => self.shell_chain().execute(&self.manager).await,
            StartPath::StartChain => {
                info!(instance = %self.spec.name, "starting");
                let result = self.start_chain().execute(&self.manager).await;
                self.refresh_state().await;
                result
            }
        }
    }

    pub async fn stop(&self) -> Result<()> {
        info!(instance = %self.spec.name, "stopping");
        let result = self.stop_chain().execute(&self.manager).await;
        self.refresh_state().await;
        result
    }

    /// Delete and purge the instance.
    pub async fn delete(&self) -> Result<()> {
        info!(instance = %self.spec.name, "deleting");
        let result = self.delete_chain().execute(&self.manager).await;
        self.refresh_state().await;
        result
    }

    /// Dispatch an action on a worker task so the caller (poll timer, UI
    /// event source) is never blocked by the external commands. Failures
    /// are logged; the next poll re-derives the state.
    pub fn dispatch(self: Arc<Self>, action: Action) -> JoinHandle<()> {
        let driver = self;
        tokio::spawn(async move {
            let result = match action {
                Action::Launch => driver.launch().await,
                Action::Start => driver.start().await,
                Action::Stop => driver.stop().await,
                Action::Delete => driver.delete().await,
            };
            if let Err(e) = result {
                error!(instance = %driver.spec.name, ?action, error = %e, "action failed");
            }
        })
    }

    // -----------------------------------------------------------------------
    // Chain composition
    // -----------------------------------------------------------------------

    fn launch_chain(&self) -> CommandChain {
        let mut chain = CommandChain::new(&self.spec.name);
        self.push_hook(&mut chain, HookPhase::Pre, HookEvent::Launch);

        // Host directories are in place before the instance exists.
        for volume in &self.spec.shared_volumes {
            chain.push(Step::EnsureDir(volume.host_path.clone()));
        }

        chain.push(Step::Manager {
            args: build_launch_args(&self.spec),
            label: "launch".to_string(),
        });

        for volume in &self.spec.shared_volumes {
            chain.push(Step::Manager {
                args: build_mount_args(&self.spec.name, volume),
                label: format!("mount {}", volume.guest_path.display()),
            });
        }

        if let Some(bootstrap) = &self.spec.bootstrap {
            chain.push(Step::Hook {
                binding: as_guest(bootstrap),
                label: "guest bootstrap".to_string(),
            });
        }

        self.push_hook(&mut chain, HookPhase::Post, HookEvent::Launch);
        chain
    }

    fn start_chain(&self) -> CommandChain {
        let mut chain = CommandChain::new(&self.spec.name);
        self.push_hook(&mut chain, HookPhase::Pre, HookEvent::Start);
        chain.push(Step::Manager {
            args: vec!["start".to_string(), self.spec.name.clone()],
            label: "start".to_string(),
        });
        self.push_hook(&mut chain, HookPhase::Post, HookEvent::Start);
        chain
    }

    fn stop_chain(&self) -> CommandChain {
        let mut chain = CommandChain::new(&self.spec.name);
        self.push_hook(&mut chain, HookPhase::Pre, HookEvent::Stop);
        chain.push(Step::Manager {
            args: vec!["stop".to_string(), self.spec.name.clone()],
            label: "stop".to_string(),
        });
        self.push_hook(&mut chain, HookPhase::Post, HookEvent::Stop);
        chain
    }

    fn delete_chain(&self) -> CommandChain {
        let mut chain = CommandChain::new(&self.spec.name);
        self.push_hook(&mut chain, HookPhase::Pre, HookEvent::Delete);
        chain.push(Step::Manager {
            args: vec!["delete".to_string(), self.spec.name.clone()],
            label: "delete".to_string(),
        });
        chain.push(Step::Manager {
            args: vec!["purge".to_string()],
            label: "purge".to_string(),
        });
        self.push_hook(&mut chain, HookPhase::Post, HookEvent::Delete);
        chain
    }

    /// Append the `(phase, event)` hook if the spec binds one.
    fn push_hook(&self, chain: &mut CommandChain, phase: HookPhase, event: HookEvent) {
        chain.push_hook(self.spec.hooks.get(phase, event), hook_label(phase, event));
    }

    fn shell_chain(&self) -> CommandChain {
        let mut chain = CommandChain::new(&self.spec.name);
        chain.push(Step::Shell);
        chain
    }
}

fn hook_label(phase: HookPhase, event: HookEvent) -> &'static str {
    match (phase, event) {
        (HookPhase::Pre, HookEvent::Launch) => "pre-launch hook",
        (HookPhase::Post, HookEvent::Launch) => "post-launch hook",
        (HookPhase::Pre, HookEvent::Start) => "pre-start hook",
        (HookPhase::Post, HookEvent::Start) => "post-start hook",
        (HookPhase::Pre, HookEvent::Stop) => "pre-stop hook",
        (HookPhase::Post, HookEvent::Stop) => "post-stop hook",
        (HookPhase::Pre, HookEvent::Delete) => "pre-delete hook",
        (HookPhase::Post, HookEvent::Delete) => "post-delete hook",
    }
}

/// The bootstrap script always runs inside the guest, whatever its binding
/// says.
fn as_guest(binding: &ScriptBinding) -> ScriptBinding {
    if binding.target() == ScriptTarget::Guest {
        return binding.clone();
    }
    warn!(path = %binding.path().display(), "bootstrap binding was host-targeted, forcing guest");
    let mut guest = ScriptBinding::guest(binding.path().clone())
        .expect("binding path already validated non-empty")
        .with_args(binding.args().iter().cloned());
    if binding.ignores_errors() {
        guest = guest.ignoring_errors();
    }
    guest
}

/// Build `launch --name <n> [--cpus ..] [--memory ..] [--disk ..]
/// [--network ..] [--cloud-init ..] [image]` from a spec.
fn build_launch_args(spec: &NodeSpec) -> Vec<String> {
    let mut args = vec![
        "launch".to_string(),
        "--name".to_string(),
        spec.name.clone(),
    ];
    if let Some(cpus) = spec.cpus {
        args.push("--cpus".to_string());
        args.push(cpus.to_string());
    }
    if let Some(memory) = &spec.memory {
        args.push("--memory".to_string());
        args.push(memory.clone());
    }
    if let Some(disk) = &spec.disk {
        args.push("--disk".to_string());
        args.push(disk.clone());
    }
    if let Some(network) = &spec.network {
        // A static address requires manual mode; the address itself is
        // applied by the bootstrap via the rendered scripts.
        let value = match &network.address {
            Some(_) => format!("name={},mode=manual", network.adapter),
            None => format!("name={}", network.adapter),
        };
        args.push("--network".to_string());
        args.push(value);
    }
    if let Some(cloud_init) = &spec.cloud_init {
        args.push("--cloud-init".to_string());
        args.push(cloud_init.to_string_lossy().into_owned());
    }
    if let Some(image) = &spec.image {
        args.push(image.clone());
    }
    args
}

fn build_mount_args(instance: &str, volume: &crate::vm::SharedVolume) -> Vec<String> {
    vec![
        "mount".to_string(),
        volume.host_path.to_string_lossy().into_owned(),
        format!("{instance}:{}", volume.guest_path.display()),
    ]
}

/// Spawn an independent polling timer for one driver.
///
/// Each tick is a fresh inventory query; failures resolve to `Unknown`
/// inside [`VmDriver::refresh_state`], so the loop never dies.
pub fn spawn_status_poller(driver: Arc<VmDriver>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let state = driver.refresh_state().await;
            debug!(instance = %driver.name(), ?state, "poll tick");
            tokio::time::sleep(interval).await;
        }
    })
}

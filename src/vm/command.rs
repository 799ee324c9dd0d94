//! Typed command steps and the chain executor.
//!
//! A lifecycle action is an ordered list of [`Step`]s executed strictly
//! left-to-right with short-circuiting: the first failing step aborts the
//! remainder, except hooks flagged `ignore_errors`, whose failure is
//! logged and skipped. This replaces hand-built `a && b && c` shell
//! strings with a single execution primitive.
//!
//! Guest hooks are never piped into a remote shell. The script file is
//! transferred into the guest under a fresh unique temp path, executed
//! with its arguments, and the temp copy removed. That sidesteps
//! argument-escaping and collisions when several drivers run their guest
//! hooks concurrently.

use std::io;
use std::path::PathBuf;
use std::process::Output;

use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::vm::{ScriptBinding, ScriptTarget};

// ---------------------------------------------------------------------------
// Manager handle
// ---------------------------------------------------------------------------

/// Handle on the external VM manager binary (multipass).
#[derive(Debug, Clone)]
pub struct Multipass {
    program: String,
}

impl Default for Multipass {
    fn default() -> Self {
        Self::new("multipass")
    }
}

impl Multipass {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run one manager invocation with captured output.
    pub async fn run(&self, args: &[String], label: &str) -> Result<Output> {
        run_captured(&self.program, args, label).await
    }
}

/// Spawn `program args...`, capture its output, and map the two failure
/// modes apart: a spawn `NotFound` is [`Error::ToolNotFound`], a non-zero
/// exit is [`Error::CommandFailed`] with the captured stderr.
pub async fn run_captured(program: &str, args: &[String], label: &str) -> Result<Output> {
    debug!(%program, ?args, label, "running command");

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::ToolNotFound {
                    program: program.to_string(),
                }
            } else {
                Error::io(format!("spawn `{program}` for {label}"), e)
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(Error::CommandFailed {
            program: program.to_string(),
            label: label.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr,
        });
    }

    Ok(output)
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// One unit of a lifecycle action.
#[derive(Debug, Clone)]
pub enum Step {
    /// A manager invocation, e.g. `multipass launch ...`.
    Manager { args: Vec<String>, label: String },

    /// A hook script, host- or guest-targeted per its binding.
    Hook { binding: ScriptBinding, label: String },

    /// Idempotent `create_dir_all` for a shared-volume host directory.
    /// Failure is logged, not fatal; the subsequent mount will report it.
    EnsureDir(PathBuf),

    /// Interactive `multipass shell` with inherited stdio.
    Shell,
}

/// An ordered command chain against one instance.
#[derive(Debug, Clone)]
pub struct CommandChain {
    instance: String,
    steps: Vec<Step>,
}

impl CommandChain {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            steps: Vec::new(),
        }
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// Append a hook step if the binding is configured.
    pub fn push_hook(&mut self, binding: Option<&ScriptBinding>, label: &str) {
        if let Some(binding) = binding {
            self.steps.push(Step::Hook {
                binding: binding.clone(),
                label: label.to_string(),
            });
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Execute the chain left-to-right with short-circuit semantics.
    pub async fn execute(&self, manager: &Multipass) -> Result<()> {
        for step in &self.steps {
            match step {
                Step::Manager { args, label } => {
                    manager.run(args, label).await?;
                }
                Step::EnsureDir(dir) => {
                    if let Err(e) = std::fs::create_dir_all(dir) {
                        warn!(dir = %dir.display(), error = %e, "could not create shared-volume directory");
                    }
                }
                Step::Shell => {
                    open_shell(manager, &self.instance).await?;
                }
                Step::Hook { binding, label } => {
                    if !binding.path().exists() {
                        warn!(
                            instance = %self.instance,
                            hook = label,
                            path = %binding.path().display(),
                            "hook script not found, skipping"
                        );
                        continue;
                    }
                    match run_hook(manager, &self.instance, binding, label).await {
                        Ok(()) => {}
                        Err(e) if binding.ignores_errors() => {
                            warn!(
                                instance = %self.instance,
                                hook = label,
                                error = %e,
                                "tolerated hook failed, continuing chain"
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Step implementations
// ---------------------------------------------------------------------------

async fn run_hook(
    manager: &Multipass,
    instance: &str,
    binding: &ScriptBinding,
    label: &str,
) -> Result<()> {
    match binding.target() {
        ScriptTarget::Host => run_host_hook(binding, label).await,
        ScriptTarget::Guest => run_guest_hook(manager, instance, binding, label).await,
    }
}

/// Host hooks run as `bash <path> <args...>` on the host.
async fn run_host_hook(binding: &ScriptBinding, label: &str) -> Result<()> {
    let mut args = vec![binding.path().to_string_lossy().into_owned()];
    args.extend(binding.args().iter().cloned());
    run_captured("bash", &args, label).await?;
    Ok(())
}

/// Guest hooks: transfer to a unique guest temp path, execute there with
/// the bound arguments, then best-effort remove the temp copy.
async fn run_guest_hook(
    manager: &Multipass,
    instance: &str,
    binding: &ScriptBinding,
    label: &str,
) -> Result<()> {
    let remote_path = guest_temp_path(binding);

    let transfer_args = vec![
        "transfer".to_string(),
        binding.path().to_string_lossy().into_owned(),
        format!("{instance}:{remote_path}"),
    ];
    manager
        .run(&transfer_args, &format!("{label} (transfer)"))
        .await?;

    let mut exec_args = vec![
        "exec".to_string(),
        instance.to_string(),
        "--".to_string(),
        "bash".to_string(),
        remote_path.clone(),
    ];
    exec_args.extend(binding.args().iter().cloned());
    let exec_result = manager.run(&exec_args, label).await;

    // Remove the temp copy even when the script failed.
    let cleanup_args = vec![
        "exec".to_string(),
        instance.to_string(),
        "--".to_string(),
        "rm".to_string(),
        "-f".to_string(),
        remote_path,
    ];
    if let Err(e) = manager
        .run(&cleanup_args, &format!("{label} (cleanup)"))
        .await
    {
        debug!(instance, hook = label, error = %e, "guest hook cleanup failed");
    }

    exec_result.map(|_| ())
}

/// Unique guest-side path for one hook invocation.
fn guest_temp_path(binding: &ScriptBinding) -> String {
    let file_name = binding
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "hook.sh".to_string());
    format!("/tmp/flotilla-{}-{}", Uuid::new_v4().simple(), file_name)
}

/// `multipass shell <instance>` with inherited stdio, so the operator lands
/// in an interactive guest session.
async fn open_shell(manager: &Multipass, instance: &str) -> Result<()> {
    let status = Command::new(manager.program())
        .args(["shell", instance])
        .status()
        .await
        .map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::ToolNotFound {
                    program: manager.program().to_string(),
                }
            } else {
                Error::io(format!("spawn `{}` shell", manager.program()), e)
            }
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(Error::CommandFailed {
            program: manager.program().to_string(),
            label: "interactive shell".to_string(),
            code: status.code().unwrap_or(-1),
            stderr: String::new(),
        })
    }
}

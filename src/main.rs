//! flotilla CLI: render, inspect, and drive a multipass + k3s cluster
//! described by a TOML descriptor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use flotilla::cluster::topology::{Topology, TopologyBuilder};
use flotilla::config::ClusterDescriptor;
use flotilla::vm::driver::{Action, VmDriver, spawn_status_poller};

/// Declarative multipass + k3s cluster orchestration
#[derive(Parser, Debug)]
#[command(name = "flotilla", version, about = "Declarative multipass + k3s cluster orchestration")]
struct Args {
    /// Path to the cluster descriptor (TOML)
    #[arg(short, long, default_value = "cluster.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Build the topology and print the node plan without touching any VM
    Render,
    /// Poll every node once and print its status line
    Status,
    /// Poll all nodes continuously
    Watch {
        /// Seconds between polls
        #[arg(long, default_value_t = 10)]
        interval: u64,
    },
    /// Create and bootstrap nodes (all nodes, or one by name/label)
    Launch { node: Option<String> },
    /// Start nodes; not-created nodes are launched, running ones get a shell
    Start { node: Option<String> },
    /// Stop nodes
    Stop { node: Option<String> },
    /// Delete and purge nodes
    Delete { node: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = flotilla::logging::init();
    let args = Args::parse();

    let descriptor = ClusterDescriptor::from_toml_file(&args.config)
        .with_context(|| format!("loading descriptor {}", args.config.display()))?;
    let topology = TopologyBuilder::new(descriptor.clone())
        .build()
        .context("building cluster topology")?;
    let drivers = topology.drivers(&descriptor);

    match args.command {
        Cmd::Render => render_plan(&topology),
        Cmd::Status => {
            for driver in &drivers {
                println!("{}", driver.poll().await);
            }
        }
        Cmd::Watch { interval } => watch(&drivers, Duration::from_secs(interval)).await,
        Cmd::Launch { node } => run_action(&drivers, node.as_deref(), Action::Launch).await?,
        Cmd::Start { node } => run_action(&drivers, node.as_deref(), Action::Start).await?,
        Cmd::Stop { node } => run_action(&drivers, node.as_deref(), Action::Stop).await?,
        Cmd::Delete { node } => run_action(&drivers, node.as_deref(), Action::Delete).await?,
    }

    Ok(())
}

fn render_plan(topology: &Topology) {
    println!("data dir: {}", topology.data_dir.display());
    for spec in std::iter::once(&topology.master).chain(topology.agents.iter()) {
        let address = spec
            .network
            .as_ref()
            .and_then(|n| n.address.clone())
            .unwrap_or_else(|| "dhcp".to_string());
        println!("{:<4} {:<32} {}", spec.display_label(), spec.name, address);
        for volume in &spec.shared_volumes {
            println!(
                "     {} -> {}",
                volume.host_path.display(),
                volume.guest_path.display()
            );
        }
    }
}

/// One independent poll timer per driver; the display loop only reads the
/// cached state so a slow inventory query never stalls the output.
async fn watch(drivers: &[Arc<VmDriver>], interval: Duration) {
    for driver in drivers {
        spawn_status_poller(Arc::clone(driver), interval);
    }

    loop {
        tokio::time::sleep(interval).await;
        let mut line = String::new();
        for driver in drivers {
            let state = driver.cached_state().await;
            line.push_str(&driver.status_line(state));
            line.push_str("  ");
        }
        println!("{}", line.trim_end());
    }
}

/// Dispatch `action` to the selected nodes on worker tasks and wait for
/// them. Nodes provision independently and concurrently; ordering is only
/// guaranteed within each node's own command chain.
async fn run_action(
    drivers: &[Arc<VmDriver>],
    node: Option<&str>,
    action: Action,
) -> Result<()> {
    let selected: Vec<&Arc<VmDriver>> = match node {
        Some(wanted) => {
            let matched: Vec<_> = drivers
                .iter()
                .filter(|d| d.name() == wanted || d.spec().display_label() == wanted)
                .collect();
            if matched.is_empty() {
                bail!("no node named `{wanted}` in this cluster");
            }
            matched
        }
        None => drivers.iter().collect(),
    };

    let handles: Vec<_> = selected
        .iter()
        .map(|d| Arc::clone(d).dispatch(action))
        .collect();
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

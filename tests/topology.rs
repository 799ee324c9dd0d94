//! End-to-end topology builds against the shipped templates, using
//! temporary directories for per-test cluster state.

use std::path::PathBuf;

use flotilla::Error;
use flotilla::cluster::topology::TopologyBuilder;
use flotilla::config::{ClusterDescriptor, NetworkDescriptor};
use flotilla::vm::ScriptTarget;

fn descriptor(name: &str) -> ClusterDescriptor {
    let mut descriptor = ClusterDescriptor::new(name);
    descriptor.templates_dir = Some(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("templates"));
    descriptor
}

fn network(subnet: &str, start_offset: u64) -> NetworkDescriptor {
    NetworkDescriptor {
        subnet: subnet.to_string(),
        start_offset,
        adapter: "en0".to_string(),
    }
}

#[test]
fn builds_master_and_contiguously_addressed_agents() {
    let tmp = tempfile::tempdir().unwrap();
    let mut d = descriptor("demo");
    d.agent_count = 3;
    d.network = Some(network("192.168.0.0/24", 30));

    let topology = TopologyBuilder::new(d).with_base_dir(tmp.path()).build().unwrap();

    assert_eq!(topology.master.name, "flo-demo-master");
    assert_eq!(topology.master.label, "M");
    assert_eq!(
        topology.master.network.as_ref().unwrap().address.as_deref(),
        Some("192.168.0.30/24")
    );

    let agent_names: Vec<_> = topology.agents.iter().map(|a| a.name.clone()).collect();
    assert_eq!(
        agent_names,
        vec!["flo-demo-agent-0", "flo-demo-agent-1", "flo-demo-agent-2"]
    );
    let agent_addresses: Vec<_> = topology
        .agents
        .iter()
        .map(|a| a.network.as_ref().unwrap().address.clone().unwrap())
        .collect();
    assert_eq!(
        agent_addresses,
        vec!["192.168.0.31/24", "192.168.0.32/24", "192.168.0.33/24"]
    );

    // Master mounts its own data dir plus the shared common dir.
    let data_dir = &topology.data_dir;
    assert_eq!(topology.master.shared_volumes[0].host_path, data_dir.join("master"));
    assert_eq!(topology.master.shared_volumes[0].guest_path, PathBuf::from("/data"));
    assert_eq!(topology.master.shared_volumes[1].host_path, data_dir.join("common"));
    // Agents share the worker dir and the same common dir.
    assert_eq!(topology.agents[0].shared_volumes[0].host_path, data_dir.join("worker"));
    assert_eq!(topology.agents[0].shared_volumes[1].host_path, data_dir.join("common"));

    // Rendered scripts are on disk in the data dir.
    for file in [
        "master_userdata.sh",
        "agent_userdata.sh",
        "agent_post_start.sh",
        "agent_pre_remove.sh",
    ] {
        assert!(data_dir.join(file).exists(), "{file} must be rendered");
    }
}

#[test]
fn agent_hooks_are_guest_targeted_and_removal_is_tolerated() {
    let tmp = tempfile::tempdir().unwrap();
    let topology = TopologyBuilder::new(descriptor("hooks"))
        .with_base_dir(tmp.path())
        .build()
        .unwrap();

    let agent = &topology.agents[0];
    let post_start = agent.hooks.post_start.as_ref().unwrap();
    let post_launch = agent.hooks.post_launch.as_ref().unwrap();
    let pre_stop = agent.hooks.pre_stop.as_ref().unwrap();
    let pre_delete = agent.hooks.pre_delete.as_ref().unwrap();

    // The same rendered script is reused across events.
    assert_eq!(post_start.path(), post_launch.path());
    assert_eq!(pre_stop.path(), pre_delete.path());

    for binding in [post_start, post_launch, pre_stop, pre_delete] {
        assert_eq!(binding.target(), ScriptTarget::Guest);
    }
    assert!(pre_stop.ignores_errors());
    assert!(pre_delete.ignores_errors());
    assert!(!post_start.ignores_errors());

    // The master carries no hooks, only its guest bootstrap.
    assert!(topology.master.hooks.post_start.is_none());
    assert_eq!(
        topology.master.bootstrap.as_ref().unwrap().target(),
        ScriptTarget::Guest
    );
}

#[test]
fn metrics_toggle_renders_exactly_one_disable_after_kubeconfig_mode() {
    let tmp = tempfile::tempdir().unwrap();
    let mut d = descriptor("toggles");
    d.disable_metrics_server = true;

    let topology = TopologyBuilder::new(d).with_base_dir(tmp.path()).build().unwrap();

    assert!(
        topology
            .master_bootstrap
            .contains("--write-kubeconfig-mode 644 --disable metrics-server"),
        "flags must follow kubeconfig-mode, got:\n{}",
        topology.master_bootstrap
    );
    assert_eq!(topology.master_bootstrap.matches("--disable").count(), 1);

    // The on-disk script matches the returned text.
    let on_disk =
        std::fs::read_to_string(topology.data_dir.join("master_userdata.sh")).unwrap();
    assert_eq!(on_disk, topology.master_bootstrap);
}

#[test]
fn exhausted_address_range_fails_before_rendering() {
    let tmp = tempfile::tempdir().unwrap();
    let mut d = descriptor("crowded");
    // /29 has 6 usable hosts; offset 5 + 3 agents does not fit.
    d.agent_count = 3;
    d.network = Some(network("192.168.0.0/29", 5));

    let err = TopologyBuilder::new(d)
        .with_base_dir(tmp.path())
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::AddressRange { .. }), "got: {err}");
    assert!(
        !tmp.path().join("crowded/master_userdata.sh").exists(),
        "a failed build must not leave freshly rendered scripts behind"
    );
}

#[test]
fn generated_token_is_stable_across_builds() {
    let tmp = tempfile::tempdir().unwrap();

    let first = TopologyBuilder::new(descriptor("tok"))
        .with_base_dir(tmp.path())
        .build()
        .unwrap();
    let token = std::fs::read_to_string(first.data_dir.join("token")).unwrap();
    assert!(first.master_bootstrap.contains(token.trim()));

    let second = TopologyBuilder::new(descriptor("tok"))
        .with_base_dir(tmp.path())
        .build()
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(second.data_dir.join("token")).unwrap(),
        token,
        "a rebuilt topology must reuse the persisted token"
    );
}

#[test]
fn rebuilding_overwrites_the_rendered_scripts() {
    let tmp = tempfile::tempdir().unwrap();

    let mut with_toggle = descriptor("rebuild");
    with_toggle.disable_traefik_ingress = true;
    let first = TopologyBuilder::new(with_toggle)
        .with_base_dir(tmp.path())
        .build()
        .unwrap();
    assert!(first.master_bootstrap.contains("--disable traefik"));

    let second = TopologyBuilder::new(descriptor("rebuild"))
        .with_base_dir(tmp.path())
        .build()
        .unwrap();
    assert!(!second.master_bootstrap.contains("--disable traefik"));
    let on_disk =
        std::fs::read_to_string(second.data_dir.join("master_userdata.sh")).unwrap();
    assert!(!on_disk.contains("--disable traefik"));
}

#[test]
fn cluster_without_network_descriptor_uses_dhcp() {
    let tmp = tempfile::tempdir().unwrap();
    let topology = TopologyBuilder::new(descriptor("dhcp"))
        .with_base_dir(tmp.path())
        .build()
        .unwrap();
    assert!(topology.master.network.is_none());
    assert!(topology.agents.iter().all(|a| a.network.is_none()));
}

#[test]
fn zero_agents_is_a_valid_cluster() {
    let tmp = tempfile::tempdir().unwrap();
    let mut d = descriptor("solo");
    d.agent_count = 0;
    let topology = TopologyBuilder::new(d).with_base_dir(tmp.path()).build().unwrap();
    assert!(topology.agents.is_empty());
    assert_eq!(topology.master.name, "flo-solo-master");
}

//! End-to-end exercises of `SohOrchestrator::post_start` against the
//! in-memory fakes, covering the acceptance scenarios from spec §8.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use soh_core::core::SohOrchestrator;
use soh_core::model::{
    Drive, Experiment, Hardware, Interface, InterfaceType, Node, NodeType, ScenarioApp,
};
use soh_core::testing::{InMemoryStore, InMemoryTopologyLoader, ScriptedC2Client};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn iface(name: &str, vlan: &str, address: &str, mask: u8, gateway: &str) -> Interface {
    Interface {
        name: name.to_string(),
        kind: InterfaceType::Ethernet,
        vlan: vlan.to_string(),
        address: address.to_string(),
        mask,
        gateway: gateway.to_string(),
    }
}

fn vm(hostname: &str, interfaces: Vec<Interface>) -> Node {
    Node {
        hostname: hostname.to_string(),
        node_type: NodeType::VirtualMachine,
        do_not_boot: false,
        hardware: Hardware::default(),
        interfaces,
        injections: Vec::new(),
        labels: HashMap::new(),
    }
}

fn soh_app(metadata: serde_json::Value) -> ScenarioApp {
    let metadata = match metadata {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => HashMap::new(),
    };
    ScenarioApp {
        name: "soh".to_string(),
        metadata,
        hosts: Vec::new(),
    }
}

fn wire_network_ready(client: &ScriptedC2Client, vm: &str, address: &str, gateway: &str) {
    client.set_command_response(vm, "ip addr show", format!("inet {address}/24 scope global eth0"));
    client.set_command_response(vm, "ip route", format!("default via {gateway} dev eth0"));
    client.set_command_response(vm, &format!("ping -c 1 {gateway}"), "1 packets transmitted, 1 received");
}

/// S1 — happy path: two VMs on one VLAN, full reachability, everything
/// healthy. AppStatus["soh"] ends up absent.
#[test]
fn s1_happy_path_produces_no_status() {
    init_logging();
    let a = vm("a", vec![iface("eth0", "EXP", "10.0.0.1", 24, "10.0.0.254")]);
    let b = vm("b", vec![iface("eth0", "EXP", "10.0.0.2", 24, "10.0.0.254")]);

    let experiment = Experiment {
        name: "exp1".to_string(),
        nodes: vec![a, b],
        apps: vec![soh_app(json!({ "testReachability": "full" }))],
        running: true,
    };

    let store = Arc::new(InMemoryStore::new());
    store.put_experiment(experiment);

    let client = Arc::new(ScriptedC2Client::new());
    wire_network_ready(&client, "a", "10.0.0.1", "10.0.0.254");
    wire_network_ready(&client, "b", "10.0.0.2", "10.0.0.254");
    client.set_command_response("a", "ping -c 1 10.0.0.2", "1 packets transmitted, 1 received");
    client.set_command_response("b", "ping -c 1 10.0.0.1", "1 packets transmitted, 1 received");

    let loader = Arc::new(InMemoryTopologyLoader::new());
    let orchestrator = SohOrchestrator::new(store.clone(), client, loader);

    orchestrator.post_start("exp1").expect("post_start succeeds");

    let status = store.get_app_status("exp1", "soh").unwrap();
    assert!(status.is_none(), "healthy experiment should leave AppStatus[\"soh\"] absent");
}

/// S2 — one C2 client never activates. The host is dropped from `c2Hosts`
/// and recorded with the "C2 not active on host" reachability message; the
/// other host still attempts (and fails) to reach it.
#[test]
fn s2_dead_c2_client_is_recorded_and_excluded() {
    init_logging();
    let a = vm("a", vec![iface("eth0", "EXP", "10.0.0.1", 24, "10.0.0.254")]);
    let b = vm("b", vec![iface("eth0", "EXP", "10.0.0.2", 24, "10.0.0.254")]);

    let experiment = Experiment {
        name: "exp1".to_string(),
        nodes: vec![a, b],
        apps: vec![soh_app(json!({
            "testReachability": "full",
            "c2Timeout": 1,
        }))],
        running: true,
    };

    let store = Arc::new(InMemoryStore::new());
    store.put_experiment(experiment);

    let client = Arc::new(ScriptedC2Client::new());
    // `a` never activates: every submission fails with ClientNotActive.
    client.set_not_active_for("a", u32::MAX);
    wire_network_ready(&client, "b", "10.0.0.2", "10.0.0.254");
    client.set_command_response("b", "ping -c 1 10.0.0.1", "1 packets transmitted, 0 received");

    let loader = Arc::new(InMemoryTopologyLoader::new());
    let orchestrator = SohOrchestrator::new(store.clone(), client, loader);

    orchestrator.post_start("exp1").expect("post_start succeeds");

    let status = store
        .get_app_status("exp1", "soh")
        .unwrap()
        .expect("a failing host produces a status entry");
    let states: Vec<soh_core::model::HostState> = serde_json::from_value(status).unwrap();

    let a_state = states.iter().find(|s| s.hostname == "a").expect("a has a HostState");
    assert!(a_state
        .reachability
        .iter()
        .any(|e| e.error.contains("C2 not active on host")));

    let b_state = states.iter().find(|s| s.hostname == "b");
    assert!(
        b_state.is_some(),
        "b should have attempted and failed to reach a"
    );
}

/// S3 — skip by image basename: a host whose drive image matches a
/// `skipHosts` entry never enters any orchestrator table and is never
/// contacted over C2.
#[test]
fn s3_skip_by_image_basename_excludes_host_entirely() {
    init_logging();
    let mut a = vm("a", vec![iface("eth0", "EXP", "10.0.0.1", 24, "10.0.0.254")]);
    a.hardware.drives.push(Drive {
        image: "/images/ubuntu.qc2".to_string(),
    });
    let b = vm("b", vec![iface("eth0", "EXP", "10.0.0.2", 24, "10.0.0.254")]);

    let experiment = Experiment {
        name: "exp1".to_string(),
        nodes: vec![a, b],
        apps: vec![soh_app(json!({
            "testReachability": "full",
            "skipHosts": ["ubuntu.qc2"],
        }))],
        running: true,
    };

    let store = Arc::new(InMemoryStore::new());
    store.put_experiment(experiment);

    let client = Arc::new(ScriptedC2Client::new());
    wire_network_ready(&client, "b", "10.0.0.2", "10.0.0.254");
    // `b`'s only VLAN peer (`a`) is skipped, so no targets remain — no ping
    // is scheduled and no error recorded for `b` either.

    let loader = Arc::new(InMemoryTopologyLoader::new());
    let orchestrator = SohOrchestrator::new(store.clone(), client.clone(), loader);

    orchestrator.post_start("exp1").expect("post_start succeeds");

    assert_eq!(client.call_count("a"), 0, "skipped host must never be contacted over C2");

    let status = store.get_app_status("exp1", "soh").unwrap();
    assert!(status.is_none());
}

/// Invariant 2 — interfaces on the MGMT VLAN or of type `serial` never
/// participate in probing: a host with only such interfaces is contacted
/// zero times.
#[test]
fn mgmt_and_serial_interfaces_are_never_probed() {
    init_logging();
    let mut node = vm("mgmt-only", Vec::new());
    node.interfaces = vec![
        iface("eth0", "MGMT", "10.0.0.9", 24, "10.0.0.254"),
        Interface {
            name: "ttyS0".to_string(),
            kind: InterfaceType::Serial,
            vlan: "EXP".to_string(),
            address: "10.0.0.10".to_string(),
            mask: 24,
            gateway: "10.0.0.254".to_string(),
        },
    ];

    let experiment = Experiment {
        name: "exp1".to_string(),
        nodes: vec![node],
        apps: vec![soh_app(json!({ "testReachability": "full" }))],
        running: true,
    };

    let store = Arc::new(InMemoryStore::new());
    store.put_experiment(experiment);

    let client = Arc::new(ScriptedC2Client::new());
    let loader = Arc::new(InMemoryTopologyLoader::new());
    let orchestrator = SohOrchestrator::new(store.clone(), client.clone(), loader);

    orchestrator.post_start("exp1").expect("post_start succeeds");

    assert_eq!(client.call_count("mgmt-only"), 0);
    assert!(store.get_app_status("exp1", "soh").unwrap().is_none());
}

/// Process and listener checks run against `c2Hosts` members independent of
/// reachability mode: a missing process is recorded as a Probe-Negative
/// without aborting the phase.
#[test]
fn process_and_listener_checks_record_probe_negatives() {
    init_logging();
    let a = vm("a", vec![iface("eth0", "EXP", "10.0.0.1", 24, "10.0.0.254")]);

    let experiment = Experiment {
        name: "exp1".to_string(),
        nodes: vec![a],
        apps: vec![soh_app(json!({
            "skipInitialNetworkConfigTests": true,
            "hostProcesses": { "a": { "processes": ["redis"] } },
            "hostListeners": { "a": { "listeners": ["6379"] } },
        }))],
        running: true,
    };

    let store = Arc::new(InMemoryStore::new());
    store.put_experiment(experiment);

    let client = Arc::new(ScriptedC2Client::new());
    client.set_response("a", "");

    let loader = Arc::new(InMemoryTopologyLoader::new());
    let orchestrator = SohOrchestrator::new(store.clone(), client, loader);

    orchestrator.post_start("exp1").expect("post_start succeeds");

    let status = store
        .get_app_status("exp1", "soh")
        .unwrap()
        .expect("missing process/listener produces a status entry");
    let states: Vec<soh_core::model::HostState> = serde_json::from_value(status).unwrap();
    let a_state = states.iter().find(|s| s.hostname == "a").unwrap();

    assert!(a_state
        .processes
        .iter()
        .any(|p| p.process == "redis" && p.error.contains("process not running")));
    assert!(a_state
        .listeners
        .iter()
        .any(|l| l.listener == "6379" && l.error.contains("not listening on port")));
}

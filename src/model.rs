//! Read-only data model for experiments, topology, and scenarios.
//!
//! These types are the shape the external topology/scenario store (spec §1,
//! "out of scope, contract-only") hands to the orchestrator. Nothing here
//! mutates a store; [`crate::store::ExperimentStore`] owns persistence.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// VLAN label reserved for management interfaces; excluded from all probes.
pub const MGMT_VLAN: &str = "MGMT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeType {
    VirtualMachine,
    Other(String),
}

impl NodeType {
    pub fn is_virtual_machine(&self) -> bool {
        matches!(self, NodeType::VirtualMachine)
    }
}

impl<S: AsRef<str>> From<S> for NodeType {
    fn from(value: S) -> Self {
        if value.as_ref().eq_ignore_ascii_case("VirtualMachine") {
            NodeType::VirtualMachine
        } else {
            NodeType::Other(value.as_ref().to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceType {
    Ethernet,
    Serial,
    Other(String),
}

impl InterfaceType {
    pub fn is_serial(&self) -> bool {
        matches!(self, InterfaceType::Serial)
    }
}

impl<S: AsRef<str>> From<S> for InterfaceType {
    fn from(value: S) -> Self {
        match value.as_ref() {
            "ethernet" => InterfaceType::Ethernet,
            "serial" => InterfaceType::Serial,
            other => InterfaceType::Other(other.to_string()),
        }
    }
}

/// A single network interface on a [`Node`].
#[derive(Debug, Clone)]
pub struct Interface {
    pub name: String,
    pub kind: InterfaceType,
    pub vlan: String,
    pub address: String,
    pub mask: u8,
    pub gateway: String,
}

impl Interface {
    /// Interfaces on the MGMT VLAN or of type `serial` never participate in
    /// reachability probing (spec §3 invariant).
    pub fn is_probeable(&self) -> bool {
        !self.vlan.eq_ignore_ascii_case(MGMT_VLAN) && !self.kind.is_serial()
    }

    pub fn cidr(&self) -> String {
        format!("{}/{}", self.address, self.mask)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Hardware {
    pub vcpus: u32,
    pub memory_mb: u64,
    pub os_type: String,
    pub drives: Vec<Drive>,
}

#[derive(Debug, Clone)]
pub struct Drive {
    pub image: String,
}

impl Drive {
    /// The basename used when matching `skipHosts` entries that end in
    /// `.qc2`/`.qcow2` (spec §4.4 step 1).
    pub fn image_basename(&self) -> &str {
        self.image.rsplit('/').next().unwrap_or(&self.image)
    }
}

#[derive(Debug, Clone)]
pub struct Injection {
    pub src: String,
    pub dst: String,
}

/// A node in the experiment topology.
#[derive(Debug, Clone)]
pub struct Node {
    pub hostname: String,
    pub node_type: NodeType,
    pub do_not_boot: bool,
    pub hardware: Hardware,
    pub interfaces: Vec<Interface>,
    pub injections: Vec<Injection>,
    pub labels: HashMap<String, String>,
}

impl Node {
    /// Nodes not of type VM or flagged `doNotBoot` are ignored by every
    /// probe (spec §3 invariant).
    pub fn is_boot_candidate(&self) -> bool {
        self.node_type.is_virtual_machine() && !self.do_not_boot
    }

    pub fn probeable_interfaces(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter().filter(|iface| iface.is_probeable())
    }
}

/// A single host entry under a scenario app's host list, carrying its own
/// free-form metadata (spec §4.4 step 4/5: `appMetadataProfileKey`).
#[derive(Debug, Clone)]
pub struct AppHost {
    pub hostname: String,
    pub metadata: HashMap<String, Value>,
}

/// A scenario-scoped application entry (spec §1: "Scenario-driven app
/// pipeline").
#[derive(Debug, Clone)]
pub struct ScenarioApp {
    pub name: String,
    pub metadata: HashMap<String, Value>,
    pub hosts: Vec<AppHost>,
}

/// Immutable view of an experiment handed to the orchestrator by the
/// (external, contract-only) topology/scenario store.
#[derive(Debug, Clone)]
pub struct Experiment {
    pub name: String,
    pub nodes: Vec<Node>,
    pub apps: Vec<ScenarioApp>,
    pub running: bool,
}

impl Experiment {
    pub fn node(&self, hostname: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.hostname == hostname)
    }

    pub fn nodes_by_label(&self, key: &str, value: &str) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| n.labels.get(key).map(String::as_str) == Some(value))
            .collect()
    }

    pub fn app(&self, name: &str) -> Option<&ScenarioApp> {
        self.apps.iter().find(|a| a.name == name)
    }
}

/// A reachability probe result row (spec §6: `reachability[].{hostname,
/// timestamp, error}` — `hostname` here names the peer that was probed).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReachabilityEntry {
    pub hostname: String,
    pub timestamp: String,
    pub error: String,
}

/// A process-presence probe result row (spec §6: `processes[].{process,
/// timestamp, error}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessEntry {
    pub process: String,
    pub timestamp: String,
    pub error: String,
}

/// A listener probe result row (spec §6: `listeners[].{listener, timestamp,
/// error}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenerEntry {
    pub listener: String,
    pub timestamp: String,
    pub error: String,
}

/// Structured per-host probe output (spec §3 `HostState`).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct HostState {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reachability: Vec<ReachabilityEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<ProcessEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listeners: Vec<ListenerEntry>,
}

impl HostState {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reachability.is_empty() && self.processes.is_empty() && self.listeners.is_empty()
    }
}

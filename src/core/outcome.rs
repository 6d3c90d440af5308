//! Read-side shapes produced by Status Projection (component F, spec §4.6,
//! §6 `getNetwork`/`getFlows`).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmStatus {
    Running,
    NotRunning,
    NotBoot,
    NotDeploy,
}

impl VmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmStatus::Running => "running",
            VmStatus::NotRunning => "notrunning",
            VmStatus::NotBoot => "notboot",
            VmStatus::NotDeploy => "notdeploy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkNodeKind {
    Vm { status: VmStatus },
    Switch,
}

/// One graph node: either a VM (carrying its derived [`VmStatus`]) or a
/// switch pseudo-node synthesized once per unique VLAN label (spec §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkNode {
    pub id: String,
    pub kind: NetworkNodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEdge {
    pub from: String,
    pub to: String,
}

/// `getNetwork` result (spec §6): the VM/switch graph plus per-category
/// counts. `hosts`/`host_flows` are populated only when the caller also
/// merges in a [`crate::core::projection::get_flows`] result — Status
/// Projection itself never issues the flows round-trip.
#[derive(Debug, Clone, Default)]
pub struct Network {
    pub started: bool,
    pub nodes: Vec<NetworkNode>,
    pub edges: Vec<NetworkEdge>,
    pub running_count: usize,
    pub not_running_count: usize,
    pub not_boot_count: usize,
    pub not_deploy_count: usize,
    pub total_count: usize,
    pub hosts: Option<Vec<String>>,
    pub host_flows: Option<Vec<Vec<u64>>>,
}

/// `getFlows` result (spec §6): hosts in column/row order plus a byte-count
/// matrix between them.
#[derive(Debug, Clone, Default)]
pub struct Flows {
    pub hosts: Vec<String>,
    pub flows: Vec<Vec<u64>>,
}

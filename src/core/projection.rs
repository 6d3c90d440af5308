//! Status Projection (component F, spec §4.6): the read side. Builds the
//! VM/switch graph from hypervisor VM info plus topology, and answers
//! `getFlows` by round-tripping the Elastic aggregator synthesized by
//! Capture Deployment (§4.5).

use std::collections::BTreeSet;

use regex::Regex;

use crate::core::outcome::{Flows, Network, NetworkEdge, NetworkNode, NetworkNodeKind, VmStatus};
use crate::core::scheduler::C2Client;
use crate::error::Error;
use crate::model::{Experiment, MGMT_VLAN};

/// One hypervisor-reported VM record (spec §6 `getVMInfo`). `networks` is in
/// interface order as display strings `LABEL (NN)`.
#[derive(Debug, Clone)]
pub struct VmInfo {
    pub name: String,
    pub host: String,
    pub running: bool,
    pub networks: Vec<String>,
    pub taps: Vec<String>,
    pub uptime_secs: u64,
}

/// Hypervisor control surface consumed only by Status Projection (spec §6,
/// §1 "out of scope, contract-only"). Production implementations live
/// outside this crate.
pub trait HypervisorClient: Send + Sync {
    fn get_vm_info(&self, namespace: &str, vm: Option<&str>) -> Result<Vec<VmInfo>, Error>;
}

fn vlan_alias_regex() -> Regex {
    Regex::new(r"(.*) \(\d+\)").expect("static regex is valid")
}

/// Strip the hypervisor's `LABEL (NN)` VLAN alias suffix down to `LABEL`
/// (spec §6, GLOSSARY "VLAN alias").
fn strip_vlan_alias(display: &str) -> String {
    let re = vlan_alias_regex();
    match re.captures(display) {
        Some(caps) => caps.get(1).map_or(display.to_string(), |m| m.as_str().to_string()),
        None => display.to_string(),
    }
}

fn classify(vm: Option<&VmInfo>, do_not_boot: bool) -> VmStatus {
    match vm {
        Some(info) if info.running => VmStatus::Running,
        Some(_) => VmStatus::NotRunning,
        None if do_not_boot => VmStatus::NotBoot,
        None => VmStatus::NotDeploy,
    }
}

/// `getNetwork` (spec §4.6, §6): node/edge graph plus per-category counts,
/// optionally filtered down to a single status.
pub fn get_network(
    experiment: &Experiment,
    hypervisor: &dyn HypervisorClient,
    status_filter: Option<VmStatus>,
) -> Result<Network, Error> {
    let vm_infos = hypervisor.get_vm_info(&experiment.name, None)?;

    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    let mut switches = BTreeSet::new();

    let mut running_count = 0;
    let mut not_running_count = 0;
    let mut not_boot_count = 0;
    let mut not_deploy_count = 0;

    for node in &experiment.nodes {
        if !node.node_type.is_virtual_machine() {
            continue;
        }

        let vm_info = vm_infos.iter().find(|v| v.name == node.hostname);
        let status = classify(vm_info, node.do_not_boot);

        match status {
            VmStatus::Running => running_count += 1,
            VmStatus::NotRunning => not_running_count += 1,
            VmStatus::NotBoot => not_boot_count += 1,
            VmStatus::NotDeploy => not_deploy_count += 1,
        }

        if let Some(filter) = status_filter {
            if filter != status {
                continue;
            }
        }

        nodes.push(NetworkNode {
            id: node.hostname.clone(),
            kind: NetworkNodeKind::Vm { status },
        });

        let displays = vm_info.map(|v| v.networks.as_slice()).unwrap_or(&[]);
        for display in displays {
            let vlan = strip_vlan_alias(display);
            if vlan.eq_ignore_ascii_case(MGMT_VLAN) {
                continue;
            }
            if switches.insert(vlan.clone()) {
                nodes.push(NetworkNode {
                    id: vlan.clone(),
                    kind: NetworkNodeKind::Switch,
                });
            }
            edges.push(NetworkEdge {
                from: node.hostname.clone(),
                to: vlan,
            });
        }
    }

    let total_count = running_count + not_running_count + not_boot_count + not_deploy_count;

    Ok(Network {
        started: experiment.running,
        nodes,
        edges,
        running_count,
        not_running_count,
        not_boot_count,
        not_deploy_count,
        total_count,
        hosts: None,
        host_flows: None,
    })
}

const FLOWS_COMMAND: &str = "query-flows.sh";

/// `getFlows` (spec §6): round-trips `query-flows.sh` against the Elastic
/// aggregator and parses a deliberately narrow `host,host,bytes` CSV-style
/// response — the original leaves this parse almost entirely unimplemented,
/// so there is no richer format to match.
pub fn get_flows(
    client: &dyn C2Client,
    namespace: &str,
    aggregator_vm: &str,
) -> Result<Flows, Error> {
    let id = client.submit(namespace, aggregator_vm, FLOWS_COMMAND)?;
    let response = client.await_response(namespace, &id)?;

    let mut hosts: Vec<String> = Vec::new();
    let mut counts: std::collections::HashMap<(String, String), u64> = std::collections::HashMap::new();

    for line in response.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 3 {
            continue;
        }
        let (src, dst, bytes) = (fields[0], fields[1], fields[2]);
        let bytes: u64 = match bytes.parse() {
            Ok(b) => b,
            Err(_) => continue,
        };
        if !hosts.iter().any(|h| h == src) {
            hosts.push(src.to_string());
        }
        if !hosts.iter().any(|h| h == dst) {
            hosts.push(dst.to_string());
        }
        counts.insert((src.to_string(), dst.to_string()), bytes);
    }

    let mut flows = vec![vec![0u64; hosts.len()]; hosts.len()];
    for (row, src) in hosts.iter().enumerate() {
        for (col, dst) in hosts.iter().enumerate() {
            if let Some(bytes) = counts.get(&(src.clone(), dst.clone())) {
                flows[row][col] = *bytes;
            }
        }
    }

    Ok(Flows { hosts, flows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_vlan_alias_suffix() {
        assert_eq!(strip_vlan_alias("EXP (12)"), "EXP");
        assert_eq!(strip_vlan_alias("MGMT (0)"), "MGMT");
        assert_eq!(strip_vlan_alias("no-suffix"), "no-suffix");
    }

    #[test]
    fn classify_matches_spec_table() {
        let running = VmInfo {
            name: "a".to_string(),
            host: "phys0".to_string(),
            running: true,
            networks: Vec::new(),
            taps: Vec::new(),
            uptime_secs: 10,
        };
        assert_eq!(classify(Some(&running), false), VmStatus::Running);

        let stopped = VmInfo {
            running: false,
            ..running.clone()
        };
        assert_eq!(classify(Some(&stopped), false), VmStatus::NotRunning);
        assert_eq!(classify(None, true), VmStatus::NotBoot);
        assert_eq!(classify(None, false), VmStatus::NotDeploy);
    }
}

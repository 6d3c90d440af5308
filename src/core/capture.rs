//! Capture Deployment (component E, spec §4.5): synthesizes the Elastic
//! aggregator node during `Configure` and the per-host PacketBeat monitor
//! nodes during `PostStart`, handing both to [`crate::store::TopologyLoader`].
//!
//! Template rendering of the guest startup files that actually configure
//! PacketBeat/Elastic inside those VMs is out of scope; this module stops at
//! producing the synthesized [`Node`] specs plus their target placement.

use std::net::Ipv4Addr;

use crate::config::{ElasticServerSpec, PacketCaptureConfig};
use crate::error::Error;
use crate::model::{Experiment, Hardware, Interface, InterfaceType, Node, NodeType};

const MONITOR_VLAN_PREFIX: &str = "MONITOR";

/// One synthesized PacketBeat monitor plus the hostname it watches, so the
/// loader can place it alongside its target (spec §4.5: "Schedules (host
/// placement) inherit from the target").
#[derive(Debug, Clone)]
pub struct MonitorPlacement {
    pub node: Node,
    pub target_hostname: String,
}

/// The full synthesized capture topology for one experiment: the monitor
/// nodes from `PostStart.deployCapture`, keyed so the loader can place each
/// next to the host it watches.
#[derive(Debug, Clone, Default)]
pub struct CaptureDeployment {
    pub monitors: Vec<MonitorPlacement>,
}

fn parse_cidr(value: &str) -> Result<(Ipv4Addr, u8), Error> {
    let (addr, mask) = value.split_once('/').ok_or_else(|| Error::InvalidAddress {
        value: value.to_string(),
        message: "expected address/mask".to_string(),
    })?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| Error::InvalidAddress {
        value: value.to_string(),
        message: "not a valid IPv4 address".to_string(),
    })?;
    let mask: u8 = mask.parse().map_err(|_| Error::InvalidAddress {
        value: value.to_string(),
        message: "not a valid mask".to_string(),
    })?;
    Ok((addr, mask))
}

/// Sequential 32-bit increment with wraparound; overflow into the
/// network/broadcast address is the caller's responsibility (spec §4.5).
fn next_ip(addr: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(addr).wrapping_add(1))
}

/// Build the Elastic aggregator node for `Configure` (spec §4.5).
pub fn build_elastic_aggregator(spec: &ElasticServerSpec, image: &str) -> Result<Node, Error> {
    let (addr, mask) = parse_cidr(&spec.ip_address)?;

    Ok(Node {
        hostname: spec.hostname.clone(),
        node_type: NodeType::VirtualMachine,
        do_not_boot: false,
        hardware: Hardware {
            vcpus: 2,
            memory_mb: 2048,
            os_type: "linux".to_string(),
            drives: vec![crate::model::Drive {
                image: image.to_string(),
            }],
        },
        interfaces: vec![Interface {
            name: "eth0".to_string(),
            kind: InterfaceType::Ethernet,
            vlan: crate::model::MGMT_VLAN.to_string(),
            address: addr.to_string(),
            mask,
            gateway: String::new(),
        }],
        injections: Vec::new(),
        labels: Default::default(),
    })
}

/// Build the PacketBeat monitor nodes for `PostStart.deployCapture` (spec
/// §4.5): one per entry in `captureHosts`, with a MGMT interface allocated by
/// sequential increment from the aggregator's address plus one MONITOR
/// interface per requested capture interface, attached to the same VLAN as
/// the target interface it watches.
pub fn build_packetbeat_monitors(
    experiment: &Experiment,
    config: &PacketCaptureConfig,
    image: &str,
) -> Result<CaptureDeployment, Error> {
    let (aggregator_addr, aggregator_mask) = parse_cidr(&config.elastic_server.ip_address)?;
    let mut next_addr = next_ip(aggregator_addr);

    let mut monitors = Vec::new();

    for (target_hostname, interface_names) in &config.capture_hosts {
        let target = experiment
            .node(target_hostname)
            .ok_or_else(|| Error::InvalidSohMetadata {
                message: format!("captureHosts references unknown host `{target_hostname}`"),
            })?;

        let mgmt_addr = next_addr;
        next_addr = next_ip(next_addr);

        let mut interfaces = vec![Interface {
            name: "eth0".to_string(),
            kind: InterfaceType::Ethernet,
            vlan: crate::model::MGMT_VLAN.to_string(),
            address: mgmt_addr.to_string(),
            mask: aggregator_mask,
            gateway: String::new(),
        }];

        for (idx, iface_name) in interface_names.iter().enumerate() {
            let watched = target
                .interfaces
                .iter()
                .find(|iface| &iface.name == iface_name)
                .ok_or_else(|| Error::InvalidSohMetadata {
                    message: format!(
                        "captureHosts[{target_hostname}] references unknown interface `{iface_name}`"
                    ),
                })?;

            interfaces.push(Interface {
                name: format!("mon{idx}"),
                kind: InterfaceType::Other(MONITOR_VLAN_PREFIX.to_lowercase()),
                vlan: watched.vlan.clone(),
                address: String::new(),
                mask: 0,
                gateway: String::new(),
            });
        }

        let node = Node {
            hostname: format!("{target_hostname}-packetbeat"),
            node_type: NodeType::VirtualMachine,
            do_not_boot: false,
            hardware: Hardware {
                vcpus: 1,
                memory_mb: 1024,
                os_type: "linux".to_string(),
                drives: vec![crate::model::Drive {
                    image: image.to_string(),
                }],
            },
            interfaces,
            injections: Vec::new(),
            labels: Default::default(),
        };

        monitors.push(MonitorPlacement {
            node,
            target_hostname: target_hostname.clone(),
        });
    }

    Ok(CaptureDeployment { monitors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn node(hostname: &str, iface: &str, vlan: &str) -> Node {
        Node {
            hostname: hostname.to_string(),
            node_type: NodeType::VirtualMachine,
            do_not_boot: false,
            hardware: Hardware::default(),
            interfaces: vec![Interface {
                name: iface.to_string(),
                kind: InterfaceType::Ethernet,
                vlan: vlan.to_string(),
                address: "10.0.0.1".to_string(),
                mask: 24,
                gateway: "10.0.0.254".to_string(),
            }],
            injections: Vec::new(),
            labels: Default::default(),
        }
    }

    #[test]
    fn monitors_inherit_target_vlan_and_sequential_ips() {
        let experiment = Experiment {
            name: "exp1".to_string(),
            nodes: vec![node("a", "eth0", "EXP"), node("b", "eth0", "EXP")],
            apps: Vec::new(),
            running: true,
        };

        let mut capture_hosts = HashMap::new();
        capture_hosts.insert("a".to_string(), vec!["eth0".to_string()]);
        capture_hosts.insert("b".to_string(), vec!["eth0".to_string()]);

        let config = PacketCaptureConfig {
            elastic_server: ElasticServerSpec {
                hostname: "elastic".to_string(),
                ip_address: "10.0.1.1/24".to_string(),
            },
            elastic_image: "elastic.qc2".to_string(),
            packetbeat_image: "packetbeat.qc2".to_string(),
            capture_hosts,
        };

        let deployment = build_packetbeat_monitors(&experiment, &config, "packetbeat.qc2").unwrap();
        assert_eq!(deployment.monitors.len(), 2);
        for monitor in &deployment.monitors {
            let monitor_iface = &monitor.node.interfaces[1];
            assert_eq!(monitor_iface.vlan, "EXP");
        }

        // `capture_hosts` is a HashMap, so monitors may be built in either
        // order; only the set of allocated addresses (sequential from the
        // aggregator, never repeated) is guaranteed.
        let mut addrs: Vec<_> = deployment
            .monitors
            .iter()
            .map(|m| m.node.interfaces[0].address.clone())
            .collect();
        addrs.sort();
        assert_eq!(addrs, vec!["10.0.1.2", "10.0.1.3"]);
    }

    #[test]
    fn aggregator_parses_cidr() {
        let spec = ElasticServerSpec {
            hostname: "elastic".to_string(),
            ip_address: "10.0.1.1/24".to_string(),
        };
        let node = build_elastic_aggregator(&spec, "elastic.qc2").unwrap();
        assert_eq!(node.interfaces[0].address, "10.0.1.1");
        assert_eq!(node.interfaces[0].mask, 24);
    }
}

//! SoH Orchestrator (component D, spec §4.4) — the central lifecycle
//! dispatcher. `post_start` builds the probe graph from topology + scenario
//! metadata, runs the three check phases, and aggregates results back into
//! the experiment's `AppStatus["soh"]`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::config::{self, ReachabilityMode, SohMetadata};
use crate::core::capture;
use crate::core::diagnostics::{Diagnostic, Severity};
use crate::core::errgroup::{meta, ErrorGroup, GroupError, MetaValue};
use crate::core::probes;
use crate::core::reporter::ProgressNotifier;
use crate::core::scheduler::{C2Client, Scheduler};
use crate::error::Error;
use crate::model::{Experiment, HostState, ListenerEntry, ProcessEntry, ReachabilityEntry};
use crate::store::{ExperimentStore, TopologyLoader};

const SOH_APP_NAME: &str = "soh";
const STATUS_KEY: &str = "soh";
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

fn meta_text(value: impl Into<String>) -> MetaValue {
    MetaValue::Text(value.into())
}

fn meta_host(group_error: &GroupError) -> String {
    match group_error.get("host") {
        Some(MetaValue::Text(s)) => s.clone(),
        _ => String::new(),
    }
}

/// Ephemeral orchestrator tables (spec §3); lifetime is one `post_start`
/// invocation, owned and mutated only from this function's thread.
#[derive(Default)]
struct Tables {
    c2_hosts: HashSet<String>,
    reachability_hosts: HashSet<String>,
    addr_hosts: HashMap<String, String>,
    vlans: HashMap<String, Vec<String>>,
    failed_network: HashSet<String>,
}

pub struct SohOrchestrator {
    store: Arc<dyn ExperimentStore>,
    c2: Arc<dyn C2Client>,
    loader: Arc<dyn TopologyLoader>,
}

impl SohOrchestrator {
    pub fn new(
        store: Arc<dyn ExperimentStore>,
        c2: Arc<dyn C2Client>,
        loader: Arc<dyn TopologyLoader>,
    ) -> Self {
        Self { store, c2, loader }
    }

    fn soh_metadata(&self, experiment: &Experiment) -> Result<(SohMetadata, Vec<Diagnostic>), Error> {
        let app = experiment
            .app(SOH_APP_NAME)
            .ok_or(Error::MissingSohMetadata)?;
        let mut warnings = Vec::new();
        let decoded = config::decode_soh_metadata(&app.metadata, &mut warnings)?;
        let diagnostics = warnings
            .into_iter()
            .map(|w| Diagnostic::new(Severity::Info, w))
            .collect();
        Ok((decoded, diagnostics))
    }

    /// `Configure` (spec §4.5): synthesize and inject the Elastic aggregator
    /// node when packet capture is configured. Does not touch the SoH
    /// probe tables — those exist only for `PostStart`.
    pub fn configure(&self, experiment_name: &str) -> Result<Vec<Diagnostic>, Error> {
        let experiment = self.store.get_experiment(experiment_name)?;
        let (metadata, diagnostics) = self.soh_metadata(&experiment)?;

        if let Some(capture_cfg) = &metadata.packet_capture {
            if !capture_cfg.capture_hosts.is_empty() {
                let aggregator =
                    capture::build_elastic_aggregator(&capture_cfg.elastic_server, &capture_cfg.elastic_image)?;
                self.loader.inject_node(experiment_name, aggregator)?;
            }
        }

        Ok(diagnostics)
    }

    /// `PreStart`: validates the decoded metadata exists and is well-formed.
    /// The surrounding scenario-app lifecycle loop (spec §1, out of scope)
    /// owns any actual pre-boot fan-out; there is nothing else for the SoH
    /// core to do at this entry point.
    pub fn pre_start(&self, experiment_name: &str) -> Result<Vec<Diagnostic>, Error> {
        let experiment = self.store.get_experiment(experiment_name)?;
        let (_, diagnostics) = self.soh_metadata(&experiment)?;
        Ok(diagnostics)
    }

    /// `Cleanup`: discard any buffered C2 responses for the namespace.
    pub fn cleanup(&self, experiment_name: &str) -> Result<(), Error> {
        self.c2.clear(experiment_name)
    }

    /// `PostStart` (spec §4.4): the significant logic. Deploys PacketBeat
    /// monitors first (spec §9's resolved Open Question: Configure builds
    /// the aggregator, PostStart builds the per-host monitors), then runs
    /// the five numbered steps.
    pub fn post_start(&self, experiment_name: &str) -> Result<Vec<Diagnostic>, Error> {
        let experiment = self.store.get_experiment(experiment_name)?;
        let (metadata, mut diagnostics) = self.soh_metadata(&experiment)?;

        if metadata.skip_initial_network_config_tests {
            diagnostics.push(Diagnostic::new(
                Severity::Info,
                "skipping initial network configuration tests per config",
            ));
        }

        if let Some(capture_cfg) = &metadata.packet_capture {
            if !capture_cfg.capture_hosts.is_empty() {
                let deployment = capture::build_packetbeat_monitors(
                    &experiment,
                    capture_cfg,
                    &capture_cfg.packetbeat_image,
                )?;
                self.loader
                    .load_capture_deployment(experiment_name, &deployment)?;
            }
        }

        let mut tables = Tables::default();
        let mut host_states: HashMap<String, HostState> = HashMap::new();

        self.partition_and_schedule_preflight(
            experiment_name,
            &experiment,
            &metadata,
            &mut tables,
            &mut host_states,
        )?;

        self.run_reachability_phase(experiment_name, &metadata, &mut tables, &mut host_states)?;
        self.run_process_phase(experiment_name, &experiment, &metadata, &tables, &mut host_states)?;
        self.run_listener_phase(experiment_name, &experiment, &metadata, &tables, &mut host_states, &mut diagnostics)?;

        self.write_status(experiment_name, host_states)?;

        Ok(diagnostics)
    }

    /// Step 1 + step 2 (spec §4.4): partition nodes into the ephemeral
    /// tables, schedule `isNetworkingConfigured` for each probeable
    /// interface, wait, then drain classification errors.
    fn partition_and_schedule_preflight(
        &self,
        namespace: &str,
        experiment: &Experiment,
        metadata: &SohMetadata,
        tables: &mut Tables,
        host_states: &mut HashMap<String, HostState>,
    ) -> Result<(), Error> {
        let (group, waiter) = ErrorGroup::new();
        let scheduler = Scheduler::new(self.c2.clone(), group.clone(), metadata.c2_timeout);

        for node in &experiment.nodes {
            if !node.is_boot_candidate() {
                continue;
            }
            if config::is_skipped(&node.hostname, &node.hardware.drives, &metadata.skip_hosts) {
                continue;
            }

            tables.c2_hosts.insert(node.hostname.clone());

            for iface in node.probeable_interfaces() {
                tables.reachability_hosts.insert(node.hostname.clone());
                tables
                    .addr_hosts
                    .insert(iface.address.clone(), node.hostname.clone());
                tables
                    .vlans
                    .entry(iface.vlan.clone())
                    .or_default()
                    .push(iface.address.clone());

                if !metadata.skip_initial_network_config_tests {
                    probes::is_networking_configured(
                        &scheduler,
                        namespace,
                        &node.hostname,
                        &iface.cidr(),
                        &iface.address,
                        &iface.gateway,
                        meta([("host", meta_text(node.hostname.clone()))]),
                    );
                }
            }
        }
        drop(scheduler);
        drop(group);

        let notifier = ProgressNotifier::start(
            "post_start: waiting for network preflight commands",
            PROGRESS_INTERVAL,
        );
        let errors = waiter.wait();
        notifier.stop();

        for err in errors {
            let host = meta_host(&err);
            if host.is_empty() {
                continue;
            }
            match &err.error {
                Error::C2ClientNotActive { .. } => {
                    tables.c2_hosts.remove(&host);
                    record_reachability(host_states, &host, &host, "C2 not active on host".to_string());
                }
                other => {
                    tables.failed_network.insert(host.clone());
                    record_reachability(host_states, &host, &host, other.to_string());
                }
            }
        }

        Ok(())
    }

    /// Step 3 (spec §4.4): reachability, gated by `testReachability`.
    fn run_reachability_phase(
        &self,
        namespace: &str,
        metadata: &SohMetadata,
        tables: &mut Tables,
        host_states: &mut HashMap<String, HostState>,
    ) -> Result<(), Error> {
        if metadata.test_reachability == ReachabilityMode::Off {
            return Ok(());
        }

        let (group, waiter) = ErrorGroup::new();
        let scheduler = Scheduler::new(self.c2.clone(), group.clone(), metadata.c2_timeout);
        let mut rng = rand::thread_rng();

        let mut hosts: Vec<String> = tables.reachability_hosts.iter().cloned().collect();
        hosts.sort();

        for host in &hosts {
            let skip_reason = if !tables.c2_hosts.contains(host) {
                Some("C2 not active on host".to_string())
            } else if tables.failed_network.contains(host) {
                Some("networking not configured on host".to_string())
            } else {
                None
            };

            let self_addresses: Vec<&String> = tables
                .addr_hosts
                .iter()
                .filter(|(_, h)| *h == host)
                .map(|(addr, _)| addr)
                .collect();

            let mut vlans: Vec<String> = tables
                .vlans
                .iter()
                .filter(|(_, addrs)| addrs.iter().any(|a| self_addresses.contains(&a)))
                .map(|(vlan, _)| vlan.clone())
                .collect();
            vlans.sort();

            for vlan in &vlans {
                let targets: Vec<String> = tables.vlans[vlan]
                    .iter()
                    .filter(|addr| !self_addresses.contains(addr))
                    .cloned()
                    .collect();
                if targets.is_empty() {
                    continue;
                }

                match metadata.test_reachability {
                    ReachabilityMode::Sample => {
                        self.schedule_sample_ping(
                            &scheduler,
                            namespace,
                            host,
                            &targets,
                            tables,
                            skip_reason.as_deref(),
                            &mut rng,
                        );
                    }
                    ReachabilityMode::Full => {
                        for target in &targets {
                            self.schedule_or_record_ping(
                                &scheduler,
                                namespace,
                                host,
                                target,
                                tables,
                                skip_reason.as_deref(),
                            );
                        }
                    }
                    ReachabilityMode::Off => unreachable!("handled above"),
                }
            }
        }
        drop(scheduler);
        drop(group);

        let notifier =
            ProgressNotifier::start("post_start: waiting for reachability commands", PROGRESS_INTERVAL);
        let errors = waiter.wait();
        notifier.stop();

        for err in errors {
            let host = meta_host(&err);
            if host.is_empty() {
                continue;
            }
            let target = match err.get("target") {
                Some(MetaValue::Text(s)) => s.clone(),
                _ => host.clone(),
            };
            record_reachability(host_states, &host, &target, err.error.to_string());
        }

        Ok(())
    }

    fn schedule_sample_ping(
        &self,
        scheduler: &Scheduler,
        namespace: &str,
        host: &str,
        targets: &[String],
        tables: &Tables,
        skip_reason: Option<&str>,
        rng: &mut impl Rng,
    ) {
        let n = targets.len();
        let start = rng.gen_range(0..n);

        for offset in 0..n {
            let addr = &targets[(start + offset) % n];
            let target_host = tables.addr_hosts.get(addr);
            let target_failed = target_host.map(|h| tables.failed_network.contains(h)).unwrap_or(false);
            if !target_failed {
                self.schedule_or_record_ping(scheduler, namespace, host, addr, tables, skip_reason);
                return;
            }
        }

        let addr = &targets[start];
        let target_hostname = tables
            .addr_hosts
            .get(addr)
            .cloned()
            .unwrap_or_else(|| addr.clone());
        scheduler.group().add_error(
            Error::ProbeNegative {
                message: "networking not configured on target".to_string(),
            },
            meta([
                ("host", meta_text(host)),
                ("target", meta_text(target_hostname)),
            ]),
        );
    }

    fn schedule_or_record_ping(
        &self,
        scheduler: &Scheduler,
        namespace: &str,
        host: &str,
        target_addr: &str,
        tables: &Tables,
        skip_reason: Option<&str>,
    ) {
        let target_hostname = tables
            .addr_hosts
            .get(target_addr)
            .cloned()
            .unwrap_or_else(|| target_addr.to_string());
        let target_failed = tables.failed_network.contains(&target_hostname);

        let error_message = if target_failed {
            Some("networking not configured on target".to_string())
        } else {
            skip_reason.map(|s| s.to_string())
        };

        if let Some(message) = error_message {
            scheduler.group().add_error(
                Error::ProbeNegative { message },
                meta([
                    ("host", meta_text(host)),
                    ("target", meta_text(target_hostname)),
                ]),
            );
            return;
        }

        probes::ping_test(
            scheduler,
            namespace,
            host,
            target_addr,
            meta([
                ("host", meta_text(host)),
                ("target", meta_text(target_hostname)),
            ]),
        );
    }

    /// Step 4 (spec §4.4): process presence, from both `hostProcesses` and
    /// each scenario app host's decoded profile.
    fn run_process_phase(
        &self,
        namespace: &str,
        experiment: &Experiment,
        metadata: &SohMetadata,
        tables: &Tables,
        host_states: &mut HashMap<String, HostState>,
    ) -> Result<(), Error> {
        let (group, waiter) = ErrorGroup::new();
        let scheduler = Scheduler::new(self.c2.clone(), group.clone(), metadata.c2_timeout);

        for (host, processes) in &metadata.host_processes {
            if !tables.c2_hosts.contains(host) {
                continue;
            }
            for process in processes {
                probes::proc_test(
                    &scheduler,
                    namespace,
                    host,
                    process,
                    meta([("host", meta_text(host.clone())), ("process", meta_text(process.clone()))]),
                );
            }
        }

        for app in &experiment.apps {
            for app_host in &app.hosts {
                if !tables.c2_hosts.contains(&app_host.hostname) {
                    continue;
                }
                if let Some(value) = app_host.metadata.get(&metadata.app_metadata_profile_key) {
                    let profile = config::decode_app_host_profile(value)?;
                    let host_scheduler = match profile.c2_timeout_secs {
                        Some(secs) => scheduler.with_c2_timeout(Duration::from_secs(secs)),
                        None => scheduler.clone(),
                    };
                    for process in &profile.processes {
                        probes::proc_test(
                            &host_scheduler,
                            namespace,
                            &app_host.hostname,
                            process,
                            meta([
                                ("host", meta_text(app_host.hostname.clone())),
                                ("process", meta_text(process.clone())),
                            ]),
                        );
                    }
                }
            }
        }
        drop(scheduler);
        drop(group);

        let notifier =
            ProgressNotifier::start("post_start: waiting for process commands", PROGRESS_INTERVAL);
        let errors = waiter.wait();
        notifier.stop();

        for err in errors {
            let host = meta_host(&err);
            if host.is_empty() {
                continue;
            }
            let process = match err.get("process") {
                Some(MetaValue::Text(s)) => s.clone(),
                _ => String::new(),
            };
            record_process(host_states, &host, &process, err.error.to_string());
        }

        Ok(())
    }

    /// Step 5 (spec §4.4): listeners, mirroring step 4 for ports.
    fn run_listener_phase(
        &self,
        namespace: &str,
        experiment: &Experiment,
        metadata: &SohMetadata,
        tables: &Tables,
        host_states: &mut HashMap<String, HostState>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<(), Error> {
        let (group, waiter) = ErrorGroup::new();
        let scheduler = Scheduler::new(self.c2.clone(), group.clone(), metadata.c2_timeout);

        for (host, listeners) in &metadata.host_listeners {
            if !tables.c2_hosts.contains(host) {
                continue;
            }
            for listener in listeners {
                schedule_listener(&scheduler, namespace, host, listener, diagnostics);
            }
        }

        for app in &experiment.apps {
            for app_host in &app.hosts {
                if !tables.c2_hosts.contains(&app_host.hostname) {
                    continue;
                }
                if let Some(value) = app_host.metadata.get(&metadata.app_metadata_profile_key) {
                    let profile = config::decode_app_host_profile(value)?;
                    let host_scheduler = match profile.c2_timeout_secs {
                        Some(secs) => scheduler.with_c2_timeout(Duration::from_secs(secs)),
                        None => scheduler.clone(),
                    };
                    for listener in &profile.listeners {
                        schedule_listener(&host_scheduler, namespace, &app_host.hostname, listener, diagnostics);
                    }
                }
            }
        }
        drop(scheduler);
        drop(group);

        let notifier =
            ProgressNotifier::start("post_start: waiting for listener commands", PROGRESS_INTERVAL);
        let errors = waiter.wait();
        notifier.stop();

        for err in errors {
            let host = meta_host(&err);
            if host.is_empty() {
                continue;
            }
            let listener = match err.get("port") {
                Some(port) => port.to_string(),
                None => String::new(),
            };
            record_listener(host_states, &host, &listener, err.error.to_string());
        }

        Ok(())
    }

    fn write_status(
        &self,
        experiment_name: &str,
        host_states: HashMap<String, HostState>,
    ) -> Result<(), Error> {
        let mut states: Vec<HostState> = host_states.into_values().filter(|s| !s.is_empty()).collect();
        states.sort_by(|a, b| a.hostname.cmp(&b.hostname));

        if states.is_empty() {
            return Ok(());
        }

        let value = serde_json::to_value(&states).map_err(|source| Error::StatusWriteFailed {
            key: STATUS_KEY.to_string(),
            message: source.to_string(),
        })?;

        self.store.set_app_status(experiment_name, STATUS_KEY, value)
    }
}

fn schedule_listener(
    scheduler: &Scheduler,
    namespace: &str,
    host: &str,
    listener: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match listener.parse::<u16>() {
        Ok(port) => probes::port_test(
            scheduler,
            namespace,
            host,
            port,
            meta([("host", meta_text(host)), ("port", MetaValue::Port(port))]),
        ),
        Err(_) => diagnostics.push(Diagnostic::new(
            Severity::Warning,
            format!("host `{host}`: ignoring non-numeric listener `{listener}`"),
        )),
    }
}

fn record_reachability(
    states: &mut HashMap<String, HostState>,
    host: &str,
    target_hostname: &str,
    error: String,
) {
    let entry = states
        .entry(host.to_string())
        .or_insert_with(|| HostState::new(host));
    entry.reachability.push(ReachabilityEntry {
        hostname: target_hostname.to_string(),
        timestamp: now_rfc3339(),
        error,
    });
}

fn record_process(states: &mut HashMap<String, HostState>, host: &str, process: &str, error: String) {
    let entry = states
        .entry(host.to_string())
        .or_insert_with(|| HostState::new(host));
    entry.processes.push(ProcessEntry {
        process: process.to_string(),
        timestamp: now_rfc3339(),
        error,
    });
}

fn record_listener(states: &mut HashMap<String, HostState>, host: &str, listener: &str, error: String) {
    let entry = states
        .entry(host.to_string())
        .or_insert_with(|| HostState::new(host));
    entry.listeners.push(ListenerEntry {
        listener: listener.to_string(),
        timestamp: now_rfc3339(),
        error,
    });
}

//! In-memory fakes of the three external collaborator traits (spec §1
//! "out of scope, contract-only"), so the orchestrator is exercisable
//! without a running store, C2 transport, or hypervisor.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::core::capture::CaptureDeployment;
use crate::core::projection::{HypervisorClient, VmInfo};
use crate::core::scheduler::{C2Client, CommandId};
use crate::error::Error;
use crate::model::{Experiment, Node};
use crate::store::{ExperimentStore, TopologyLoader};

/// A fixed experiment plus a mutable `AppStatus` map, standing in for the
/// real topology/scenario store.
#[derive(Default)]
pub struct InMemoryStore {
    experiments: Mutex<HashMap<String, Experiment>>,
    app_status: Mutex<HashMap<(String, String), Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_experiment(&self, experiment: Experiment) {
        self.experiments
            .lock()
            .expect("store mutex poisoned")
            .insert(experiment.name.clone(), experiment);
    }
}

impl ExperimentStore for InMemoryStore {
    fn get_experiment(&self, name: &str) -> Result<Experiment, Error> {
        self.experiments
            .lock()
            .expect("store mutex poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| Error::StoreUnavailable {
                message: format!("no such experiment `{name}`"),
            })
    }

    fn set_app_status(&self, experiment: &str, key: &str, value: Value) -> Result<(), Error> {
        self.app_status
            .lock()
            .expect("store mutex poisoned")
            .insert((experiment.to_string(), key.to_string()), value);
        Ok(())
    }

    fn get_app_status(&self, experiment: &str, key: &str) -> Result<Option<Value>, Error> {
        Ok(self
            .app_status
            .lock()
            .expect("store mutex poisoned")
            .get(&(experiment.to_string(), key.to_string()))
            .cloned())
    }
}

/// Records injected nodes and loaded capture deployments for test assertion.
#[derive(Default)]
pub struct InMemoryTopologyLoader {
    pub injected_nodes: Mutex<Vec<Node>>,
    pub deployments: Mutex<Vec<CaptureDeployment>>,
}

impl InMemoryTopologyLoader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TopologyLoader for InMemoryTopologyLoader {
    fn inject_node(&self, _experiment: &str, node: Node) -> Result<(), Error> {
        self.injected_nodes
            .lock()
            .expect("loader mutex poisoned")
            .push(node);
        Ok(())
    }

    fn load_capture_deployment(
        &self,
        _experiment: &str,
        deployment: &CaptureDeployment,
    ) -> Result<(), Error> {
        self.deployments
            .lock()
            .expect("loader mutex poisoned")
            .push(deployment.clone());
        Ok(())
    }
}

/// A scripted guest agent. Commands are matched against per-vm substring
/// rules first (for multi-command chains like `isNetworkingConfigured`),
/// falling back to a per-vm default response, optionally flipping to a
/// different response after a configured number of submissions (for
/// retry-then-succeed scenarios).
#[derive(Default)]
pub struct ScriptedC2Client {
    inner: Mutex<ScriptState>,
}

#[derive(Default)]
struct ScriptState {
    next_id: u64,
    pending: HashMap<String, (String, String)>,
    rules: HashMap<String, Vec<(String, String)>>,
    defaults: HashMap<String, String>,
    flips: HashMap<String, (u32, String)>,
    call_counts: HashMap<String, u32>,
    not_active_until: HashMap<String, u32>,
}

impl ScriptedC2Client {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default response returned for any command against `vm` not matched
    /// by a [`Self::set_command_response`] rule.
    pub fn set_response(&self, vm: &str, response: impl Into<String>) {
        self.inner
            .lock()
            .expect("script mutex poisoned")
            .defaults
            .insert(vm.to_string(), response.into());
    }

    /// After `count` submissions against `vm`, the default response flips
    /// to `response` (command-rule matches still take precedence).
    pub fn set_flip_after(&self, vm: &str, count: u32, response: impl Into<String>) {
        self.inner
            .lock()
            .expect("script mutex poisoned")
            .flips
            .insert(vm.to_string(), (count, response.into()));
    }

    /// Any command against `vm` containing `command_substring` returns
    /// `response`, evaluated before the default/flip rules.
    pub fn set_command_response(
        &self,
        vm: &str,
        command_substring: impl Into<String>,
        response: impl Into<String>,
    ) {
        self.inner
            .lock()
            .expect("script mutex poisoned")
            .rules
            .entry(vm.to_string())
            .or_default()
            .push((command_substring.into(), response.into()));
    }

    /// The first `calls` submissions against `vm` fail with
    /// [`Error::C2ClientNotActive`]; subsequent ones succeed normally.
    pub fn set_not_active_for(&self, vm: &str, calls: u32) {
        self.inner
            .lock()
            .expect("script mutex poisoned")
            .not_active_until
            .insert(vm.to_string(), calls);
    }

    /// Total submissions observed against `vm` so far, for test assertions
    /// that a skipped host was never contacted.
    pub fn call_count(&self, vm: &str) -> u32 {
        *self
            .inner
            .lock()
            .expect("script mutex poisoned")
            .call_counts
            .get(vm)
            .unwrap_or(&0)
    }
}

impl C2Client for ScriptedC2Client {
    fn submit(&self, _namespace: &str, vm: &str, command: &str) -> Result<CommandId, Error> {
        let mut state = self.inner.lock().expect("script mutex poisoned");

        let count = state.call_counts.entry(vm.to_string()).or_insert(0);
        *count += 1;
        let current = *count;

        if let Some(until) = state.not_active_until.get(vm) {
            if current <= *until {
                return Err(Error::C2ClientNotActive { vm: vm.to_string() });
            }
        }

        let id = format!("cmd-{}", state.next_id);
        state.next_id += 1;
        state
            .pending
            .insert(id.clone(), (vm.to_string(), command.to_string()));
        Ok(id)
    }

    fn await_response(&self, _namespace: &str, id: &CommandId) -> Result<String, Error> {
        let mut state = self.inner.lock().expect("script mutex poisoned");
        let (vm, command) = state.pending.remove(id).ok_or_else(|| Error::C2Transport {
            vm: "unknown".to_string(),
            message: format!("no such pending command `{id}`"),
        })?;

        if let Some(rules) = state.rules.get(&vm) {
            for (substring, response) in rules {
                if command.contains(substring.as_str()) {
                    return Ok(response.clone());
                }
            }
        }

        if let Some((after, response)) = state.flips.get(&vm) {
            let count = *state.call_counts.get(&vm).unwrap_or(&0);
            if count > *after {
                return Ok(response.clone());
            }
        }

        Ok(state.defaults.get(&vm).cloned().unwrap_or_default())
    }

    fn clear(&self, _namespace: &str) -> Result<(), Error> {
        let mut state = self.inner.lock().expect("script mutex poisoned");
        state.pending.clear();
        Ok(())
    }
}

/// A fixed hypervisor VM inventory.
#[derive(Default)]
pub struct FakeHypervisorClient {
    vms: Mutex<Vec<VmInfo>>,
}

impl FakeHypervisorClient {
    pub fn new(vms: Vec<VmInfo>) -> Self {
        Self {
            vms: Mutex::new(vms),
        }
    }
}

impl HypervisorClient for FakeHypervisorClient {
    fn get_vm_info(&self, _namespace: &str, vm: Option<&str>) -> Result<Vec<VmInfo>, Error> {
        let vms = self.vms.lock().expect("hypervisor mutex poisoned");
        Ok(match vm {
            Some(name) => vms.iter().filter(|v| v.name == name).cloned().collect(),
            None => vms.clone(),
        })
    }
}

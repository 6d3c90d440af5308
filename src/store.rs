//! Contract for the external topology/scenario store (spec §1, §6).
//!
//! `soh-core` never owns persistence. It is handed a `&dyn ExperimentStore`
//! and reads the experiment through it; `AppStatus` writes go back through
//! the same trait. Production implementations live outside this crate (a
//! YAML-backed config store, a database, whatever the surrounding framework
//! uses); [`crate::testing::InMemoryStore`] is a fake for tests.

use serde_json::Value;

use crate::error::Error;
use crate::model::Experiment;

/// Read/write access to one experiment's topology, scenario, and status.
pub trait ExperimentStore: Send + Sync {
    /// Fetch the immutable experiment view (spec §3).
    fn get_experiment(&self, name: &str) -> Result<Experiment, Error>;

    /// Persist a value under `AppStatus[key]` (spec §6). Called once per
    /// lifecycle phase with the full accumulated value, never incrementally.
    fn set_app_status(&self, experiment: &str, key: &str, value: Value) -> Result<(), Error>;

    /// Read back a previously written `AppStatus[key]`, if any (used by
    /// Status Projection, spec §4.6).
    fn get_app_status(&self, experiment: &str, key: &str) -> Result<Option<Value>, Error>;
}

/// Contract for injecting synthesized nodes into a topology before boot
/// (spec §4.5, Capture Deployment) and for loading a rendered deployment
/// script into the hypervisor. Template rendering itself is out of scope
/// (spec §1 Non-goals); this trait only carries the synthesized specs.
pub trait TopologyLoader: Send + Sync {
    /// Insert `node` into `experiment`'s topology (used by `Configure` to
    /// add the Elastic aggregator, and by `PostStart` to add PacketBeat
    /// monitors).
    fn inject_node(&self, experiment: &str, node: crate::model::Node) -> Result<(), Error>;

    /// Hand a synthesized deployment (the monitor nodes plus their
    /// host-index placement) to the hypervisor loader.
    fn load_capture_deployment(
        &self,
        experiment: &str,
        deployment: &crate::core::capture::CaptureDeployment,
    ) -> Result<(), Error>;
}

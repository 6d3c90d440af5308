//! Lifecycle dispatch (spec §1: "Scenario-driven app pipeline
//! (Configure/PreStart/PostStart/Cleanup) ... the surrounding lifecycle loop
//! is trivial fan-out"). This trait is the seam that loop would call into;
//! `soh-core` itself never implements the fan-out.

use crate::core::{Diagnostic, SohOrchestrator};
use crate::error::Error;

/// The four lifecycle entry points a scenario app exposes to the (excluded)
/// experiment lifecycle runner.
pub trait ScenarioApp {
    fn configure(&self, experiment: &str) -> Result<Vec<Diagnostic>, Error>;
    fn pre_start(&self, experiment: &str) -> Result<Vec<Diagnostic>, Error>;
    fn post_start(&self, experiment: &str) -> Result<Vec<Diagnostic>, Error>;
    fn cleanup(&self, experiment: &str) -> Result<(), Error>;
}

impl ScenarioApp for SohOrchestrator {
    fn configure(&self, experiment: &str) -> Result<Vec<Diagnostic>, Error> {
        SohOrchestrator::configure(self, experiment)
    }

    fn pre_start(&self, experiment: &str) -> Result<Vec<Diagnostic>, Error> {
        SohOrchestrator::pre_start(self, experiment)
    }

    fn post_start(&self, experiment: &str) -> Result<Vec<Diagnostic>, Error> {
        SohOrchestrator::post_start(self, experiment)
    }

    fn cleanup(&self, experiment: &str) -> Result<(), Error> {
        SohOrchestrator::cleanup(self, experiment)
    }
}

//! Components A–F of the SoH orchestration core, leaf-first: error
//! collection, the C2 scheduler built on it, the probe library built on
//! that, the orchestrator that drives all three, and the two auxiliary
//! components (capture deployment, status projection) that sit beside it.

pub mod capture;
pub mod diagnostics;
pub mod errgroup;
pub mod orchestrator;
pub mod outcome;
pub mod probes;
pub mod projection;
pub mod reporter;
pub mod scheduler;

pub use diagnostics::{Diagnostic, Severity};
pub use errgroup::{ErrorGroup, ErrorGroupWaiter, GroupError, MetaValue, Metadata};
pub use orchestrator::SohOrchestrator;
pub use outcome::{Flows, Network, NetworkEdge, NetworkNode, NetworkNodeKind, VmStatus};
pub use projection::{HypervisorClient, VmInfo};
pub use scheduler::{C2Client, CommandId, CommandOptions, Predicate, PredicateOutcome, Scheduler};

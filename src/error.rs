use thiserror::Error;

/// Convenient result alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// `soh-core` error type.
///
/// Probe-level failures (ping/process/listener negatives, C2 unavailability)
/// are never surfaced through this type — they are collected into an
/// [`crate::core::errgroup::ErrorGroup`] and end up in a
/// [`crate::model::HostState`] instead. This enum carries only the
/// failures that abort the enclosing lifecycle action: store/transport
/// errors and malformed metadata.
#[derive(Debug, Error)]
pub enum Error {
    #[error("soh app metadata is missing from the experiment's scenario")]
    MissingSohMetadata,
    #[error("decoding soh metadata: {message}")]
    InvalidSohMetadata { message: String },
    #[error("reading experiment topology/scenario: {message}")]
    StoreUnavailable { message: String },
    #[error("writing app status `{key}`: {message}")]
    StatusWriteFailed { key: String, message: String },
    /// A probe's predicate found the guest in the wrong state (ping with no
    /// replies, process not running, port not listening, a preflight chain
    /// that never converges) or the orchestrator synthesized an equivalent
    /// skip reason. Always collected into a [`crate::core::errgroup::ErrorGroup`]
    /// and folded into a [`crate::model::HostState`] — never the reason a
    /// lifecycle action itself returns `Err` (spec §7 "Probe-Negative" /
    /// "Network-Preflight").
    #[error("{message}")]
    ProbeNegative { message: String },
    #[error("C2 transport error for vm `{vm}`: {message}")]
    C2Transport { vm: String, message: String },
    #[error("C2 client took too long to activate for vm `{vm}`")]
    C2ClientNotActive { vm: String },
    #[error("hypervisor control error: {message}")]
    HypervisorUnavailable { message: String },
    #[error("invalid CIDR/address `{value}`: {message}")]
    InvalidAddress { value: String, message: String },
}

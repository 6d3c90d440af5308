//! Error Group (component A, spec §4.1): a rendezvous that tracks
//! outstanding tasks and collects `{error, metadata}` records under a mutex.
//! The group never propagates errors as exceptions — collecting is the
//! point (spec §4.1).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::sync::mpsc;

use crate::error::Error;

/// Small, serde-free value carried in error metadata (spec §4.1: "hostname,
/// target address, process name, port, vm").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaValue {
    Text(String),
    Port(u16),
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Text(value)
    }
}

impl From<u16> for MetaValue {
    fn from(value: u16) -> Self {
        MetaValue::Port(value)
    }
}

impl std::fmt::Display for MetaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetaValue::Text(s) => write!(f, "{s}"),
            MetaValue::Port(p) => write!(f, "{p}"),
        }
    }
}

/// Ordered string-keyed mapping propagated verbatim from the scheduler call
/// site to the collected error record (spec §4.1, §9: "Prefer the mapping
/// variant; it is the only one that round-trips through the status
/// writer").
pub type Metadata = BTreeMap<String, MetaValue>;

pub fn meta(pairs: impl IntoIterator<Item = (&'static str, MetaValue)>) -> Metadata {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// One collected failure.
#[derive(Debug, Clone)]
pub struct GroupError {
    pub error: Error,
    pub meta: Metadata,
}

impl GroupError {
    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.meta.get(key)
    }
}

/// Shared state behind an [`ErrorGroup`] handle: the mutex-guarded error
/// list plus a completion channel standing in for a wait-group. Each
/// enrolled task holds a clone of `done_tx`; the group's [`ErrorGroup::wait`]
/// blocks on `done_rx` until every sender has been dropped.
struct Shared {
    errors: Mutex<Vec<GroupError>>,
}

/// Handle enrolled tasks use to report a collected failure. Dropping the
/// last outstanding `TaskHandle` for a group unblocks its `wait()`.
#[derive(Clone)]
pub struct ErrorGroup {
    shared: Arc<Shared>,
    done_tx: mpsc::Sender<()>,
}

/// A token representing one outstanding task; dropping it (or calling
/// [`TaskHandle::finish`] explicitly) marks the task complete.
pub struct TaskHandle {
    _done_tx: mpsc::Sender<()>,
}

impl ErrorGroup {
    /// Create a new group together with the receiver its `wait()` consumes.
    pub fn new() -> (Self, ErrorGroupWaiter) {
        let (done_tx, done_rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            errors: Mutex::new(Vec::new()),
        });
        (
            Self {
                shared: shared.clone(),
                done_tx,
            },
            ErrorGroupWaiter { done_rx, shared },
        )
    }

    /// Enroll one outstanding task. The returned handle must be kept alive
    /// until the task completes — dropping it signals completion to `wait`.
    pub fn enroll(&self) -> TaskHandle {
        TaskHandle {
            _done_tx: self.done_tx.clone(),
        }
    }

    /// Append a collected failure under the shared mutex (spec §4.1b).
    pub fn add_error(&self, error: Error, meta: Metadata) {
        self.shared
            .errors
            .lock()
            .expect("error group mutex poisoned")
            .push(GroupError { error, meta });
    }
}

/// The waiting side of an [`ErrorGroup`]; consumed once by `wait()`.
pub struct ErrorGroupWaiter {
    done_rx: mpsc::Receiver<()>,
    shared: Arc<Shared>,
}

impl ErrorGroupWaiter {
    /// Block until every [`TaskHandle`] enrolled against this group's
    /// [`ErrorGroup`] has been dropped, then return the collected errors.
    pub fn wait(self) -> Vec<GroupError> {
        // The owning `ErrorGroup`'s `done_tx` plus every `TaskHandle` clone
        // hold a sender; `recv` returns `Err` only once all of them (and the
        // original group) are gone. We keep our own `ErrorGroup`-side sender
        // alive for the duration the caller holds `self`, so the caller is
        // expected to have already dropped its `ErrorGroup` handle (or be
        // about to) before calling `wait`.
        while self.done_rx.recv().is_ok() {}
        Arc::try_unwrap(self.shared)
            .map(|shared| shared.errors.into_inner().expect("error group mutex poisoned"))
            .unwrap_or_else(|shared| shared.errors.lock().expect("error group mutex poisoned").clone())
    }
}

//! C2 Command Scheduler (component B, spec §4.2) — the recursive primitive
//! every health probe (component C) and the orchestrator (component D) is
//! built on.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::errgroup::{ErrorGroup, Metadata};
use crate::error::Error;

/// Correlation id returned by [`C2Client::submit`].
pub type CommandId = String;

/// The guest-agent control channel (spec §1 "C2 transport", §6). Contract
/// only — `soh-core` never implements transport reliability itself (spec
/// §9: prefer an explicit client value over a global singleton).
pub trait C2Client: Send + Sync {
    /// Submit `command` for execution on `vm` within `namespace`. Returns
    /// [`Error::C2ClientNotActive`] when the guest agent hasn't checked in
    /// yet — the scheduler retries that specific error on a 5s cadence
    /// (spec §4.2).
    fn submit(&self, namespace: &str, vm: &str, command: &str) -> Result<CommandId, Error>;

    /// Block for the response to a previously submitted command.
    fn await_response(&self, namespace: &str, id: &CommandId) -> Result<String, Error>;

    /// Discard any buffered responses for `namespace` (used by `Cleanup`,
    /// spec §4.4 entry points).
    fn clear(&self, namespace: &str) -> Result<(), Error>;
}

/// Outcome a predicate returns after inspecting a command's response.
pub enum PredicateOutcome {
    /// The command succeeded; the task completes silently.
    Ok,
    /// Re-submit the same command after `delay` (spec §4.2 state machine).
    Retry(Duration),
    /// Terminal failure; recorded into the group with the call's metadata.
    Fail(Error),
}

/// A predicate inspects a guest response and decides the task's fate. It
/// receives the owning [`Scheduler`] so it may recursively `schedule` new,
/// dependent commands before returning (spec §4.2: "predicates may
/// recursively enqueue new tasks before returning Retry").
///
/// A `Retry` outcome re-submits and re-awaits the *same* command and then
/// invokes this same predicate again against the fresh response (spec
/// §4.2's "reschedules the same task"), so the predicate must be callable
/// more than once — it is only ever expected to perform its side effect
/// (nested `schedule` calls) once, on the terminal `Ok` response.
pub type Predicate = Box<dyn Fn(&Scheduler, &str) -> PredicateOutcome + Send>;

const SUBMIT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Options identifying the target of a scheduled command (spec §4.2:
/// "options name the namespace, the target VM, and the guest command
/// string").
#[derive(Debug, Clone)]
pub struct CommandOptions {
    pub namespace: String,
    pub vm: String,
    pub command: String,
}

/// Shared context every scheduled task needs: the C2 client, the error
/// group it reports into, and the wall-clock deadline for C2 activation
/// retries (spec §3 `c2Timeout`).
#[derive(Clone)]
pub struct Scheduler {
    client: Arc<dyn C2Client>,
    group: ErrorGroup,
    c2_timeout: Duration,
}

impl Scheduler {
    pub fn new(client: Arc<dyn C2Client>, group: ErrorGroup, c2_timeout: Duration) -> Self {
        Self {
            client,
            group,
            c2_timeout,
        }
    }

    pub fn group(&self) -> &ErrorGroup {
        &self.group
    }

    /// A scheduler sharing this one's client and error group but using a
    /// different C2 activation timeout (spec §3: per-host `c2Timeout`
    /// overrides carried in a scenario app's host profile, §4.4 steps 4/5).
    /// Reuses the same `ErrorGroup` handle rather than minting an unrelated
    /// one, so callers that only need a one-off timeout override for a
    /// single host don't have to thread a fresh `group.clone()` through by
    /// hand.
    pub fn with_c2_timeout(&self, c2_timeout: Duration) -> Self {
        Self {
            client: self.client.clone(),
            group: self.group.clone(),
            c2_timeout,
        }
    }

    /// Schedule one C2 command (spec §4.2 `schedule(group, options, meta,
    /// predicate)`). Spawns an independent worker thread; the caller does
    /// not block.
    pub fn schedule(&self, options: CommandOptions, meta: Metadata, predicate: Predicate) {
        let scheduler = self.clone();
        let handle = self.group.enroll();

        thread::spawn(move || {
            let _handle = handle;
            scheduler.run_task(options, meta, predicate);
        });
    }

    /// Drive one task through submit → await → predicate, looping back to a
    /// fresh submit/await on `Retry` (spec §4.2 state machine). The C2
    /// activation deadline is recomputed on every resubmission, matching
    /// the original's per-call `retryUntil = now + 5 min`.
    fn run_task(&self, options: CommandOptions, meta: Metadata, predicate: Predicate) {
        loop {
            let retry_until = Instant::now() + self.c2_timeout;

            let id = loop {
                match self
                    .client
                    .submit(&options.namespace, &options.vm, &options.command)
                {
                    Ok(id) => break id,
                    Err(Error::C2ClientNotActive { vm }) => {
                        if Instant::now() >= retry_until {
                            self.group.add_error(Error::C2ClientNotActive { vm }, meta);
                            return;
                        }
                        thread::sleep(SUBMIT_RETRY_DELAY);
                        continue;
                    }
                    Err(err) => {
                        self.group.add_error(err, meta);
                        return;
                    }
                }
            };

            let response = match self.client.await_response(&options.namespace, &id) {
                Ok(resp) => resp,
                Err(err) => {
                    self.group.add_error(err, meta);
                    return;
                }
            };

            match predicate(self, &response) {
                PredicateOutcome::Ok => return,
                PredicateOutcome::Retry(delay) => {
                    thread::sleep(delay);
                    continue;
                }
                PredicateOutcome::Fail(err) => {
                    self.group.add_error(err, meta);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errgroup::meta;
    use crate::testing::ScriptedC2Client;
    use std::sync::mpsc;

    /// `ErrorGroup::wait` only unblocks once every sender — the group's own
    /// plus every enrolled task's `TaskHandle` plus any `Scheduler` clone a
    /// caller is still holding — has been dropped (spec §4.1's wait-group
    /// semantics). A caller that schedules work and then waits must drop
    /// both its `Scheduler` and its `ErrorGroup` handle first, or the wait
    /// blocks forever even after every scheduled task has finished.
    #[test]
    fn wait_completes_once_scheduler_and_group_handles_are_dropped() {
        let client = Arc::new(ScriptedC2Client::new());
        client.set_response("a", "1 packets transmitted, 1 received");

        let (group, waiter) = ErrorGroup::new();
        let scheduler = Scheduler::new(client, group.clone(), Duration::from_secs(5));
        scheduler.schedule(
            CommandOptions {
                namespace: "exp1".to_string(),
                vm: "a".to_string(),
                command: "ping -c 1 10.0.0.2".to_string(),
            },
            meta([("host", "a".into())]),
            Box::new(|_, resp| {
                if resp.contains("0 received") {
                    PredicateOutcome::Fail(Error::ProbeNegative {
                        message: "no successful pings".to_string(),
                    })
                } else {
                    PredicateOutcome::Ok
                }
            }),
        );
        drop(scheduler);
        drop(group);

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let errors = waiter.wait();
            tx.send(errors).unwrap();
        });

        let errors = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("wait() should return once the scheduled task finishes, not block forever");
        assert!(errors.is_empty());
    }
}

//! Health Probe Library (component C, spec §4.3). Each probe builds a guest
//! command string and a predicate; all probes share the scheduler (§4.2).
//! Output is plain text — predicates use substring/line matching, never a
//! structured parse (spec §4.3).

use std::cell::Cell;
use std::time::{Duration, Instant};

use crate::core::errgroup::Metadata;
use crate::core::scheduler::{CommandOptions, PredicateOutcome, Scheduler};
use crate::error::Error;

const RETRY_DELAY: Duration = Duration::from_secs(5);
const COUNTED_RETRY_LIMIT: u32 = 5;
const GATEWAY_UP_DEADLINE: Duration = Duration::from_secs(5 * 60);

fn options(namespace: &str, vm: &str, command: impl Into<String>) -> CommandOptions {
    CommandOptions {
        namespace: namespace.to_string(),
        vm: vm.to_string(),
        command: command.into(),
    }
}

/// `isNetworkingConfigured` (spec §4.3): a three-stage chain — wait for the
/// IP, then the default route, then for the gateway to answer pings —
/// entirely driven by nested `schedule` calls inside predicates.
pub fn is_networking_configured(
    scheduler: &Scheduler,
    namespace: &str,
    host: &str,
    cidr: &str,
    address: &str,
    gateway: &str,
    meta: Metadata,
) {
    is_networking_configured_with_deadline(
        scheduler,
        namespace,
        host,
        cidr,
        address,
        gateway,
        meta,
        GATEWAY_UP_DEADLINE,
    )
}

/// As [`is_networking_configured`], but with the gateway-up wall-clock
/// deadline injectable — the public entry point always passes
/// [`GATEWAY_UP_DEADLINE`]; tests use a short deadline to exercise the
/// timeout path without a real 5-minute wait.
fn is_networking_configured_with_deadline(
    scheduler: &Scheduler,
    namespace: &str,
    host: &str,
    cidr: &str,
    address: &str,
    gateway: &str,
    meta: Metadata,
    deadline: Duration,
) {
    log::debug!("{host}: waiting for {address} ({cidr}) to come up");
    let chain_deadline = Instant::now() + deadline;
    let address = address.to_string();
    let gateway = gateway.to_string();
    let namespace_owned = namespace.to_string();
    let host_owned = host.to_string();

    let meta_for_ip = meta.clone();
    let predicate = move |scheduler: &Scheduler, resp: &str| -> PredicateOutcome {
        if !resp.contains(&address) {
            return PredicateOutcome::Retry(RETRY_DELAY);
        }

        if !gateway.is_empty() {
            let gateway = gateway.clone();
            let namespace_inner = namespace_owned.clone();
            let host_inner = host_owned.clone();
            let meta_for_route = meta_for_ip.clone();

            let gw_predicate = move |scheduler: &Scheduler, resp: &str| -> PredicateOutcome {
                let expected = format!("default via {gateway}");
                if !resp.contains(&expected) {
                    return PredicateOutcome::Retry(RETRY_DELAY);
                }

                let gateway = gateway.clone();
                let namespace_ping = namespace_inner.clone();
                let host_ping = host_inner.clone();
                let meta_for_ping = meta_for_route.clone();

                let gw_ping_predicate = move |_: &Scheduler, resp: &str| -> PredicateOutcome {
                    if resp.contains("0 received") {
                        if Instant::now() >= chain_deadline {
                            return PredicateOutcome::Fail(Error::ProbeNegative {
                                message: "retry time expired waiting for gateway to be up"
                                    .to_string(),
                            });
                        }
                        return PredicateOutcome::Retry(RETRY_DELAY);
                    }
                    PredicateOutcome::Ok
                };

                scheduler.schedule(
                    options(&namespace_ping, &host_ping, format!("ping -c 1 {gateway}")),
                    meta_for_ping,
                    Box::new(gw_ping_predicate),
                );

                PredicateOutcome::Ok
            };

            scheduler.schedule(
                options(&namespace_inner, &host_inner, "ip route"),
                meta_for_route,
                Box::new(gw_predicate),
            );
        }

        PredicateOutcome::Ok
    };

    scheduler.schedule(
        options(namespace, host, "ip addr show"),
        meta,
        Box::new(predicate),
    );
}

/// `pingTest` (spec §4.3): one shot, Fail on `0 received`.
pub fn ping_test(scheduler: &Scheduler, namespace: &str, host: &str, target: &str, meta: Metadata) {
    let predicate = move |_: &Scheduler, resp: &str| -> PredicateOutcome {
        if resp.contains("0 received") {
            PredicateOutcome::Fail(Error::ProbeNegative {
                message: "no successful pings".to_string(),
            })
        } else {
            PredicateOutcome::Ok
        }
    };

    scheduler.schedule(
        options(namespace, host, format!("ping -c 1 {target}")),
        meta,
        Box::new(predicate),
    );
}

/// `procTest` (spec §4.3): `pgrep <proc>`; empty response retries up to 5
/// times at 5s, then fails.
pub fn proc_test(scheduler: &Scheduler, namespace: &str, host: &str, process: &str, meta: Metadata) {
    let attempts = Cell::new(0u32);

    let predicate = move |_: &Scheduler, resp: &str| -> PredicateOutcome {
        if resp.trim().is_empty() {
            let count = attempts.get() + 1;
            attempts.set(count);
            if count >= COUNTED_RETRY_LIMIT {
                return PredicateOutcome::Fail(Error::ProbeNegative {
                    message: "process not running".to_string(),
                });
            }
            return PredicateOutcome::Retry(RETRY_DELAY);
        }
        PredicateOutcome::Ok
    };

    scheduler.schedule(
        options(namespace, host, format!("pgrep {process}")),
        meta,
        Box::new(predicate),
    );
}

/// `portTest` (spec §4.3): `ss -lntu state all 'sport = <port>'`; at most
/// one non-empty line retries up to 5 times at 5s, then fails.
pub fn port_test(scheduler: &Scheduler, namespace: &str, host: &str, port: u16, meta: Metadata) {
    let attempts = Cell::new(0u32);

    let predicate = move |_: &Scheduler, resp: &str| -> PredicateOutcome {
        let lines = trimmed_lines(resp);
        if lines.len() <= 1 {
            let count = attempts.get() + 1;
            attempts.set(count);
            if count >= COUNTED_RETRY_LIMIT {
                return PredicateOutcome::Fail(Error::ProbeNegative {
                    message: "not listening on port".to_string(),
                });
            }
            return PredicateOutcome::Retry(RETRY_DELAY);
        }
        PredicateOutcome::Ok
    };

    scheduler.schedule(
        options(namespace, host, format!("ss -lntu state all 'sport = {port}'")),
        meta,
        Box::new(predicate),
    );
}

fn trimmed_lines(resp: &str) -> Vec<&str> {
    resp.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errgroup::ErrorGroup;
    use crate::testing::ScriptedC2Client;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    #[test]
    fn proc_test_retries_then_fails() {
        let client = Arc::new(ScriptedC2Client::new());
        client.set_response("devbox", "");

        let (group, waiter) = ErrorGroup::new();
        let scheduler = Scheduler::new(client, group.clone(), StdDuration::from_secs(1));
        proc_test(
            &scheduler,
            "exp1",
            "devbox",
            "redis",
            crate::core::errgroup::meta([("host", "devbox".into())]),
        );
        drop(scheduler);
        drop(group);

        let errors = waiter.wait();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn proc_test_succeeds_once_process_appears() {
        let client = Arc::new(ScriptedC2Client::new());
        client.set_response("devbox", "");
        client.set_flip_after("devbox", 4, "1234");

        let (group, waiter) = ErrorGroup::new();
        let scheduler = Scheduler::new(client, group.clone(), StdDuration::from_secs(1));
        proc_test(
            &scheduler,
            "exp1",
            "devbox",
            "redis",
            crate::core::errgroup::meta([("host", "devbox".into())]),
        );
        drop(scheduler);
        drop(group);

        let errors = waiter.wait();
        assert!(errors.is_empty());
    }

    #[test]
    fn ping_test_fails_on_zero_received() {
        let client = Arc::new(ScriptedC2Client::new());
        client.set_response("a", "1 packets transmitted, 0 received");

        let (group, waiter) = ErrorGroup::new();
        let scheduler = Scheduler::new(client, group.clone(), StdDuration::from_secs(1));
        ping_test(
            &scheduler,
            "exp1",
            "a",
            "10.0.0.2",
            crate::core::errgroup::meta([("host", "a".into()), ("target", "10.0.0.2".into())]),
        );
        drop(scheduler);
        drop(group);

        assert_eq!(waiter.wait().len(), 1);
    }

    #[test]
    fn gateway_deadline_expires_when_gateway_never_comes_up() {
        let client = Arc::new(ScriptedC2Client::new());
        client.set_command_response("devbox", "ip addr show", "inet 10.0.0.5/24 scope global");
        client.set_command_response("devbox", "ip route", "default via 10.0.0.1 dev eth0");
        client.set_command_response(
            "devbox",
            "ping -c 1 10.0.0.1",
            "1 packets transmitted, 0 received",
        );

        let (group, waiter) = ErrorGroup::new();
        let scheduler = Scheduler::new(client, group.clone(), StdDuration::from_secs(1));
        is_networking_configured_with_deadline(
            &scheduler,
            "exp1",
            "devbox",
            "10.0.0.0/24",
            "10.0.0.5",
            "10.0.0.1",
            crate::core::errgroup::meta([("host", "devbox".into())]),
            StdDuration::from_millis(1),
        );
        drop(scheduler);
        drop(group);

        let errors = waiter.wait();
        assert_eq!(errors.len(), 1);
        assert!(errors[0]
            .error
            .to_string()
            .contains("retry time expired waiting for gateway to be up"));
    }
}

//! Decoding of the `soh` scenario app's metadata (spec §3 "SoH Metadata").
//!
//! The metadata arrives as a generic `hostname -> serde_json::Value`
//! mapping (the store's "YAML-compatible generic mapping", spec §6) and is
//! decoded here as a defaults-plus-warnings pass rather than a strict
//! reject-on-anything-unknown decode: defaults are filled in, and unknown
//! fields are reported as warnings rather than hard failures.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::Error;

pub const DEFAULT_C2_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_APP_METADATA_PROFILE_KEY: &str = "sohProfile";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReachabilityMode {
    Off,
    Sample,
    Full,
}

impl ReachabilityMode {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "off" | "" => Some(Self::Off),
            "sample" => Some(Self::Sample),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

impl Default for ReachabilityMode {
    fn default() -> Self {
        ReachabilityMode::Off
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ElasticServerSpec {
    pub hostname: String,
    #[serde(rename = "ipAddress")]
    pub ip_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PacketCaptureConfig {
    #[serde(rename = "elasticServer")]
    pub elastic_server: ElasticServerSpec,
    #[serde(rename = "elasticImage")]
    pub elastic_image: String,
    #[serde(rename = "packetBeatImage")]
    pub packetbeat_image: String,
    /// target hostname -> interface names to monitor on that host.
    #[serde(rename = "captureHosts")]
    pub capture_hosts: HashMap<String, Vec<String>>,
}

/// Per-host profile decoded from a scenario app host's metadata under the
/// `appMetadataProfileKey` entry (spec §4.4 step 4/5).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppHostProfile {
    #[serde(default, rename = "c2Timeout")]
    pub c2_timeout_secs: Option<u64>,
    #[serde(default)]
    pub processes: Vec<String>,
    #[serde(default)]
    pub listeners: Vec<String>,
    #[serde(default, rename = "captureInterfaces")]
    pub capture_interfaces: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawHostProcesses {
    #[serde(default)]
    processes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawHostListeners {
    #[serde(default)]
    listeners: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawSohMetadata {
    #[serde(default, rename = "c2Timeout")]
    c2_timeout_secs: Option<u64>,
    #[serde(default, rename = "testReachability")]
    test_reachability: Option<String>,
    #[serde(default, rename = "skipInitialNetworkConfigTests")]
    skip_initial_network_config_tests: bool,
    #[serde(default, rename = "skipHosts")]
    skip_hosts: Vec<String>,
    #[serde(default, rename = "hostProcesses")]
    host_processes: HashMap<String, RawHostProcesses>,
    #[serde(default, rename = "hostListeners")]
    host_listeners: HashMap<String, RawHostListeners>,
    #[serde(default, rename = "appMetadataProfileKey")]
    app_metadata_profile_key: Option<String>,
    #[serde(default, rename = "packetCapture")]
    packet_capture: Option<PacketCaptureConfig>,
}

/// Validated `soh` app metadata (spec §3 "SoH Metadata").
#[derive(Debug, Clone)]
pub struct SohMetadata {
    pub c2_timeout: Duration,
    pub test_reachability: ReachabilityMode,
    pub skip_initial_network_config_tests: bool,
    pub skip_hosts: Vec<String>,
    pub host_processes: HashMap<String, Vec<String>>,
    pub host_listeners: HashMap<String, Vec<String>>,
    pub app_metadata_profile_key: String,
    pub packet_capture: Option<PacketCaptureConfig>,
}

/// Decode the `soh` app's metadata mapping into [`SohMetadata`].
///
/// Mirrors the original `mapstructure.Decode(ms, &md)` call: unknown fields
/// are ignored (captured as `warnings` rather than rejected), defaults fill
/// in absent ones, and `skipInitialNetworkConfigTests` forces
/// `testReachability` to `off` regardless of what was configured (spec §3).
pub fn decode_soh_metadata(
    metadata: &HashMap<String, Value>,
    warnings: &mut Vec<String>,
) -> Result<SohMetadata, Error> {
    let value = Value::Object(metadata.clone().into_iter().collect());

    let raw: RawSohMetadata =
        serde_json::from_value(value).map_err(|source| Error::InvalidSohMetadata {
            message: source.to_string(),
        })?;

    let mut test_reachability = match &raw.test_reachability {
        Some(s) => ReachabilityMode::parse(s).ok_or_else(|| Error::InvalidSohMetadata {
            message: format!(
                "unrecognized testReachability value `{s}`; expected off, sample, or full"
            ),
        })?,
        None => ReachabilityMode::Off,
    };

    if raw.skip_initial_network_config_tests && test_reachability != ReachabilityMode::Off {
        warnings.push(
            "skipInitialNetworkConfigTests forces testReachability to off".to_string(),
        );
        test_reachability = ReachabilityMode::Off;
    }

    let host_processes = raw
        .host_processes
        .into_iter()
        .map(|(host, v)| (host, v.processes))
        .collect();
    let host_listeners = raw
        .host_listeners
        .into_iter()
        .map(|(host, v)| (host, v.listeners))
        .collect();

    Ok(SohMetadata {
        c2_timeout: raw
            .c2_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_C2_TIMEOUT),
        test_reachability,
        skip_initial_network_config_tests: raw.skip_initial_network_config_tests,
        skip_hosts: raw.skip_hosts,
        host_processes,
        host_listeners,
        app_metadata_profile_key: raw
            .app_metadata_profile_key
            .unwrap_or_else(|| DEFAULT_APP_METADATA_PROFILE_KEY.to_string()),
        packet_capture: raw.packet_capture,
    })
}

/// Decode a per-host SoH profile (spec §3, `appMetadataProfileKey`).
pub fn decode_app_host_profile(value: &Value) -> Result<AppHostProfile, Error> {
    serde_json::from_value(value.clone()).map_err(|source| Error::InvalidSohMetadata {
        message: source.to_string(),
    })
}

/// True if `host` is matched by a `skipHosts` entry — either an exact
/// hostname match, or (when the entry ends in `.qc2`/`.qcow2`) an image
/// basename match against any of the node's drives (spec §4.4 step 1).
pub fn is_skipped(host: &str, drives: &[crate::model::Drive], skip_hosts: &[String]) -> bool {
    skip_hosts.iter().any(|entry| {
        if entry == host {
            return true;
        }
        if entry.ends_with(".qc2") || entry.ends_with(".qcow2") {
            return drives.iter().any(|drive| drive.image_basename() == entry);
        }
        false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn defaults_are_off_and_five_minutes() {
        let mut warnings = Vec::new();
        let md = decode_soh_metadata(&HashMap::new(), &mut warnings).unwrap();
        assert_eq!(md.test_reachability, ReachabilityMode::Off);
        assert_eq!(md.c2_timeout, DEFAULT_C2_TIMEOUT);
        assert_eq!(md.app_metadata_profile_key, "sohProfile");
        assert!(warnings.is_empty());
    }

    #[test]
    fn skip_initial_network_config_tests_forces_reachability_off() {
        let mut warnings = Vec::new();
        let m = meta(&[
            ("testReachability", json!("full")),
            ("skipInitialNetworkConfigTests", json!(true)),
        ]);
        let md = decode_soh_metadata(&m, &mut warnings).unwrap();
        assert_eq!(md.test_reachability, ReachabilityMode::Off);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn rejects_unknown_reachability_value() {
        let mut warnings = Vec::new();
        let m = meta(&[("testReachability", json!("bogus"))]);
        assert!(decode_soh_metadata(&m, &mut warnings).is_err());
    }

    #[test]
    fn skip_hosts_matches_hostname_or_image_basename() {
        let drives = vec![crate::model::Drive {
            image: "/images/ubuntu.qc2".to_string(),
        }];
        assert!(is_skipped(
            "whatever",
            &drives,
            &["ubuntu.qc2".to_string()]
        ));
        assert!(is_skipped("a", &[], &["a".to_string()]));
        assert!(!is_skipped("b", &[], &["a".to_string()]));
    }
}

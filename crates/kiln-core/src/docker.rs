//! Container daemon configuration probe.
//!
//! Detects whether the hardened gVisor runtime (`runsc`) is registered with
//! the local Docker daemon. The probe inspects the daemon configuration
//! file directly rather than the API so it can run before any connection is
//! established; the result is cached for the process lifetime.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use serde::Deserialize;

/// Runtime name gVisor registers with the daemon.
pub const GVISOR_RUNTIME: &str = "runsc";

const DAEMON_CONFIG_PATH: &str = "/etc/docker/daemon.json";

#[derive(Debug, Deserialize, Default)]
struct DaemonConfig {
    #[serde(default)]
    runtimes: HashMap<String, RuntimeEntry>,
}

#[derive(Debug, Deserialize)]
struct RuntimeEntry {
    #[allow(dead_code)]
    path: Option<String>,
}

static GVISOR_INSTALLED: Lazy<bool> = Lazy::new(|| probe_daemon_config(Path::new(DAEMON_CONFIG_PATH)));

/// Whether the daemon on this host has the gVisor runtime registered.
pub fn is_gvisor_installed() -> bool {
    *GVISOR_INSTALLED
}

fn probe_daemon_config(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }

    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            log::error!("failed to read daemon configuration that exists: {}", err);
            return false;
        }
    };

    let config: DaemonConfig = serde_json::from_slice(&bytes).unwrap_or_default();
    config.runtimes.contains_key(GVISOR_RUNTIME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_configuration_means_no_gvisor() {
        assert!(!probe_daemon_config(Path::new("/definitely/not/daemon.json")));
    }

    #[test]
    fn registered_runsc_runtime_is_detected() {
        let file = write_config(r#"{"runtimes": {"runsc": {"path": "/usr/local/bin/runsc"}}}"#);
        assert!(probe_daemon_config(file.path()));
    }

    #[test]
    fn other_runtimes_are_not_gvisor() {
        let file = write_config(r#"{"runtimes": {"kata": {"path": "/usr/bin/kata"}}}"#);
        assert!(!probe_daemon_config(file.path()));
    }

    #[test]
    fn malformed_configuration_is_treated_as_absent() {
        let file = write_config("not json at all");
        assert!(!probe_daemon_config(file.path()));
    }
}

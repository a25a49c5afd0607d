//! Execution profiles: the resource-and-timeout envelope for one sandbox.
//!
//! Profiles are keyed by `{environment}_{os}` with plain `{environment}`
//! entries for deployments that run on a single platform. Selection for the
//! running host goes through [`profile_for_machine`], which also rewrites
//! the container runtime to the Docker default when the hardened gVisor
//! runtime is not registered with the daemon.

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;

use crate::config;
use crate::docker;
use crate::mem::MemSize;

/// Container runtime the daemon is asked to execute the sandbox with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContainerRuntime {
    /// The daemon's configured default runtime (runc on a stock install).
    #[default]
    Default,
    /// The gVisor user-mode-kernel runtime.
    Gvisor,
}

impl ContainerRuntime {
    /// Runtime name as the daemon knows it; empty selects the default.
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerRuntime::Default => "",
            ContainerRuntime::Gvisor => docker::GVISOR_RUNTIME,
        }
    }

    /// Value for the container host configuration, where the default
    /// runtime is expressed by omission.
    pub fn for_host_config(self) -> Option<String> {
        match self {
            ContainerRuntime::Default => None,
            ContainerRuntime::Gvisor => Some(docker::GVISOR_RUNTIME.to_string()),
        }
    }
}

/// Immutable resource-and-timeout envelope for one sandbox execution.
#[derive(Debug, Clone, Copy)]
pub struct Profile {
    pub runtime: ContainerRuntime,
    /// Remove the container automatically once it exits.
    pub auto_remove: bool,
    /// Upper bound on the run phase, enforced by the in-container runner.
    pub code_timeout: Duration,
    /// Upper bound on the compile phase, enforced by the in-container runner.
    pub compile_timeout: Duration,
    /// Memory cap applied to the container itself by the runtime.
    pub memory: MemSize,
    /// Memory cap applied to the supervised process by the runner. Must not
    /// exceed the container cap, which backstops it.
    pub execution_memory: MemSize,
    /// Swap allowance for the container; zero leaves the daemon default.
    pub memory_swap: MemSize,
}

pub static PROFILES: Lazy<HashMap<&'static str, Profile>> = Lazy::new(|| {
    HashMap::from([
        (
            "development_linux",
            Profile {
                runtime: ContainerRuntime::Gvisor,
                auto_remove: true,
                code_timeout: Duration::from_secs(20),
                compile_timeout: Duration::from_secs(60),
                memory: MemSize::from_gibibytes(10),
                execution_memory: MemSize::from_gibibytes(2),
                memory_swap: MemSize::from_bytes(0),
            },
        ),
        (
            "development_windows",
            Profile {
                runtime: ContainerRuntime::Default,
                auto_remove: true,
                code_timeout: Duration::from_secs(20),
                compile_timeout: Duration::from_secs(60),
                memory: MemSize::from_gibibytes(10),
                execution_memory: MemSize::from_gibibytes(2),
                memory_swap: MemSize::from_bytes(0),
            },
        ),
        (
            "staging",
            Profile {
                runtime: ContainerRuntime::Gvisor,
                auto_remove: true,
                code_timeout: Duration::from_secs(10),
                compile_timeout: Duration::from_secs(45),
                memory: MemSize::from_gibibytes(2),
                execution_memory: MemSize::from_gibibytes(1),
                memory_swap: MemSize::from_gibibytes(2),
            },
        ),
        (
            "production",
            Profile {
                runtime: ContainerRuntime::Gvisor,
                auto_remove: true,
                code_timeout: Duration::from_secs(5),
                compile_timeout: Duration::from_secs(30),
                memory: MemSize::from_gibibytes(1),
                execution_memory: MemSize::from_mebibytes(512),
                memory_swap: MemSize::from_gibibytes(1),
            },
        ),
    ])
});

/// Profile for the running host: `{env}_{os}`, falling back to `{env}`,
/// falling back to development. When the hardened runtime is not installed
/// the selected profile is rewritten to the default runtime before use.
pub fn profile_for_machine() -> Profile {
    let mut profile = lookup(config::current_environment(), config::current_os());

    if profile.runtime == ContainerRuntime::Gvisor && !docker::is_gvisor_installed() {
        profile.runtime = ContainerRuntime::Default;
    }

    profile
}

fn lookup(environment: &str, os: &str) -> Profile {
    let keyed = format!("{environment}_{os}");

    if let Some(profile) = PROFILES.get(keyed.as_str()) {
        return *profile;
    }

    if let Some(profile) = PROFILES.get(environment) {
        return *profile;
    }

    let fallback = format!("{}_{os}", config::DEFAULT_ENVIRONMENT);
    PROFILES[fallback.as_str()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_and_os_key_wins() {
        let profile = lookup("development", "windows");
        assert_eq!(profile.runtime, ContainerRuntime::Default);
    }

    #[test]
    fn plain_environment_key_is_the_first_fallback() {
        let profile = lookup("production", "linux");
        assert_eq!(profile.memory, MemSize::from_gibibytes(1));
        assert_eq!(profile.code_timeout, Duration::from_secs(5));
    }

    #[test]
    fn unknown_environments_land_on_development() {
        let profile = lookup("benchmarking", "linux");
        assert_eq!(profile.memory, MemSize::from_gibibytes(10));
        assert_eq!(profile.runtime, ContainerRuntime::Gvisor);
    }

    #[test]
    fn execution_memory_never_exceeds_the_container_cap() {
        for (key, profile) in PROFILES.iter() {
            assert!(
                profile.execution_memory <= profile.memory,
                "profile {key} allows the runner more memory than its container"
            );
        }
    }

    #[test]
    fn runtime_names_match_the_daemon() {
        assert_eq!(ContainerRuntime::Default.as_str(), "");
        assert_eq!(ContainerRuntime::Gvisor.as_str(), "runsc");
        assert_eq!(ContainerRuntime::Default.for_host_config(), None);
        assert_eq!(
            ContainerRuntime::Gvisor.for_host_config(),
            Some("runsc".to_string())
        );
    }
}

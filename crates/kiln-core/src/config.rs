//! Deployment environment selection.
//!
//! The running environment is chosen once per process from the
//! `environment` environment variable and used to pick the execution
//! profile for the host. Invalid or absent values fall back to
//! `development`.

use std::env;
use std::sync::OnceLock;

pub const DEFAULT_ENVIRONMENT: &str = "development";

const KNOWN_ENVIRONMENTS: [&str; 3] = ["development", "staging", "production"];

static CURRENT_ENVIRONMENT: OnceLock<String> = OnceLock::new();

/// The environment the process is running in. Read once from the
/// `environment` variable and cached for the process lifetime so that
/// concurrent readers always observe the same value.
pub fn current_environment() -> &'static str {
    CURRENT_ENVIRONMENT.get_or_init(|| {
        let value = env::var("environment").unwrap_or_default();
        resolve_environment(&value).to_string()
    })
}

fn resolve_environment(value: &str) -> &str {
    KNOWN_ENVIRONMENTS
        .iter()
        .find(|known| **known == value)
        .copied()
        .unwrap_or(DEFAULT_ENVIRONMENT)
}

/// The operating system family used for profile selection. Anything that is
/// not windows is treated as linux, which also covers development on mac.
pub fn current_os() -> &'static str {
    if cfg!(windows) {
        "windows"
    } else {
        "linux"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_environments_resolve_to_themselves() {
        assert_eq!(resolve_environment("production"), "production");
        assert_eq!(resolve_environment("staging"), "staging");
        assert_eq!(resolve_environment("development"), "development");
    }

    #[test]
    fn unknown_environments_fall_back_to_development() {
        assert_eq!(resolve_environment(""), DEFAULT_ENVIRONMENT);
        assert_eq!(resolve_environment("prod"), DEFAULT_ENVIRONMENT);
        assert_eq!(resolve_environment("Production"), DEFAULT_ENVIRONMENT);
    }
}

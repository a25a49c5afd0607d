//! Bind-mount path translation for Windows hosts.
//!
//! Docker on Windows accepts bind-mount sources only in a forward-slash
//! absolute form with a lowercase drive-letter root (`C:\a\b` becomes
//! `/c/a/b`). Only the host side of the bind needs translating; the
//! container interior path is always `/input`.

use std::path::Path;

/// Translate a host path into the form the daemon accepts as a bind-mount
/// source. Already-unix paths pass through unchanged.
pub fn to_unix_bind_path(path: &Path) -> String {
    let raw = path.to_string_lossy();

    match raw.split_once(':') {
        Some((drive, rest)) => {
            format!("/{}{}", drive.to_lowercase(), rest.replace('\\', "/"))
        }
        None => raw.replace('\\', "/"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_paths_get_a_lowercase_drive_root() {
        assert_eq!(to_unix_bind_path(Path::new(r"C:\a\b")), "/c/a/b");
        assert_eq!(
            to_unix_bind_path(Path::new(r"D:\Temp\executions\raw\42")),
            "/d/Temp/executions/raw/42"
        );
    }

    #[test]
    fn unix_paths_are_untouched() {
        assert_eq!(to_unix_bind_path(Path::new("/tmp/executions/raw/42")), "/tmp/executions/raw/42");
    }

    #[test]
    fn translation_is_idempotent() {
        let once = to_unix_bind_path(Path::new(r"C:\a\b"));
        let twice = to_unix_bind_path(Path::new(&once));
        assert_eq!(once, twice);
    }

    #[test]
    fn produces_only_forward_slashes() {
        let translated = to_unix_bind_path(Path::new(r"E:\one\two\three"));
        assert!(!translated.contains('\\'));
        assert!(translated.starts_with("/e/"));
    }
}

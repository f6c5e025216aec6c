//! Locates the Riot Client binary on disk, the way
//! `deceive_launcher::launch` needs to find the process it relaunches.

use std::path::PathBuf;

/// Executable names to look for in `PATH` as a last resort.
const CLIENT_EXECUTABLES: &[&str] = &["RiotClientServices", "RiotClientServices.exe"];

/// macOS app bundle paths.
#[cfg(target_os = "macos")]
const MACOS_CLIENT_PATHS: &[&str] = &["/Applications/Riot Client.app/Contents/MacOS/RiotClientServices"];

/// Windows installation paths.
#[cfg(target_os = "windows")]
const WINDOWS_CLIENT_PATHS: &[&str] = &[r"C:\Riot Games\Riot Client\RiotClientServices.exe"];

/// Finds the Riot Client binary.
///
/// Checks, in order: an explicit `custom_path`, the `RIOT_CLIENT_PATH`
/// environment variable, well-known per-platform install locations, then
/// `PATH` lookups of known executable names.
#[must_use]
pub fn detect_client_binary(custom_path: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = custom_path {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    if let Ok(path) = std::env::var("RIOT_CLIENT_PATH") {
        let p = PathBuf::from(&path);
        if p.exists() {
            return Some(p);
        }
    }

    #[cfg(target_os = "macos")]
    for path in MACOS_CLIENT_PATHS {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    #[cfg(target_os = "windows")]
    for path in WINDOWS_CLIENT_PATHS {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    for name in CLIENT_EXECUTABLES {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    None
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_path_wins_when_it_exists() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let found = detect_client_binary(Some(tmp.path().to_str().unwrap()));
        assert_eq!(found.as_deref(), Some(tmp.path()));
    }

    #[test]
    fn nonexistent_custom_path_is_ignored() {
        let found = detect_client_binary(Some("/definitely/not/a/real/path/riotclient"));
        assert_ne!(found.as_deref(), Some(std::path::Path::new("/definitely/not/a/real/path/riotclient")));
    }
}

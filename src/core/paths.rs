use crate::error::{Error, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Settings file looked up in the working copy when none is named explicitly.
pub const LOCAL_SETTINGS_FILE: &str = "redeploy.json";

/// Base redeploy config directory (~/.config/redeploy/ on all platforms)
pub fn redeploy() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected("APPDATA environment variable not set on Windows")
        })?;
        Ok(PathBuf::from(appdata).join("redeploy"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected("HOME environment variable not set on Unix-like system")
        })?;
        Ok(PathBuf::from(home).join(".config").join("redeploy"))
    }
}

/// Default directory holding instance records and application logs
pub fn instances() -> Result<PathBuf> {
    Ok(redeploy()?.join("instances"))
}

/// Instance record file for a slot
pub fn instance_record(state_dir: &Path, name: &str) -> PathBuf {
    state_dir.join(format!("{}.json", name))
}

/// Application log file for a slot
pub fn instance_log(state_dir: &Path, name: &str) -> PathBuf {
    state_dir.join(format!("{}.log", name))
}

/// Local settings file inside a working copy
pub fn local_settings(workdir: &Path) -> PathBuf {
    workdir.join(LOCAL_SETTINGS_FILE)
}

/// Expand a leading `~` in a configured path.
pub fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_log_live_side_by_side() {
        let dir = Path::new("/var/lib/redeploy");
        assert_eq!(
            instance_record(dir, "api"),
            PathBuf::from("/var/lib/redeploy/api.json")
        );
        assert_eq!(
            instance_log(dir, "api"),
            PathBuf::from("/var/lib/redeploy/api.log")
        );
    }

    #[test]
    fn expand_leaves_absolute_paths_alone() {
        assert_eq!(expand("/srv/app"), PathBuf::from("/srv/app"));
    }

    #[test]
    fn local_settings_is_in_workdir() {
        assert_eq!(
            local_settings(Path::new("/srv/app")),
            PathBuf::from("/srv/app/redeploy.json")
        );
    }
}

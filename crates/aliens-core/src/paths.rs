//! File system paths for client runtime files.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Persisted session token filename under the base directory.
const SESSION_FILE_NAME: &str = "session.json";

/// Manages file system paths for the client.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for runtime files (~/.talk-to-aliens)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.talk-to-aliens`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".talk-to-aliens"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory.
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (`<base>/config.json`).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the persisted session token path (`<base>/session.json`).
    pub fn session_file(&self) -> PathBuf {
        self.base_dir.join(SESSION_FILE_NAME)
    }

    /// Get the logs directory (`<base>/logs`).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Ensure the base and logs directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_with_base_dir() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        assert_eq!(paths.base_dir(), &dir.path().to_path_buf());
        assert_eq!(paths.config_file(), dir.path().join("config.json"));
        assert_eq!(paths.session_file(), dir.path().join("session.json"));
        assert_eq!(paths.logs_dir(), dir.path().join("logs"));
    }

    #[test]
    fn test_ensure_dirs_creates_tree() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("nested").join("runtime");
        let paths = Paths::with_base_dir(base.clone());

        paths.ensure_dirs().unwrap();
        assert!(base.is_dir());
        assert!(base.join("logs").is_dir());
    }

    #[test]
    fn test_paths_new_under_home() {
        if dirs::home_dir().is_none() {
            return;
        }
        let paths = Paths::new().unwrap();
        assert!(paths.base_dir().ends_with(".talk-to-aliens"));
    }
}

use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;

/// Locates the per-user directory holding persisted tokens and pending authorization state.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    root: PathBuf,
}

impl ConfigLocator {
    /// Attempt to discover the persistent configuration directory, creating it if needed.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs =
            ProjectDirs::from("dev", "bearer", "bearer").ok_or(ConfigError::MissingProjectDirs)?;
        Self::at(dirs.config_dir().to_path_buf())
    }

    /// Use an explicit directory instead of the platform default.
    pub fn at(root: PathBuf) -> Result<Self, ConfigError> {
        fs::create_dir_all(&root).map_err(|source| ConfigError::CreateDir {
            path: root.clone(),
            source,
        })?;
        restrict_to_owner(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the token file for the given profile.
    pub fn tokens_file(&self, profile: &str) -> PathBuf {
        self.root.join(format!("tokens-{profile}.json"))
    }

    /// Path to the file holding the unconsumed authorization nonce for the given profile.
    pub fn pending_state_file(&self, profile: &str) -> PathBuf {
        self.root.join(format!("pending-state-{profile}"))
    }
}

#[cfg(unix)]
fn restrict_to_owner(dir: &Path) -> Result<(), ConfigError> {
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(|source| {
        ConfigError::Permissions {
            path: dir.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn restrict_to_owner(_dir: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no home directory found for the bearer config directory")]
    MissingProjectDirs,
    #[error("cannot create config directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot restrict permissions on {}: {source}", path.display())]
    Permissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn files_are_named_per_profile() {
        let temp_dir = TempDir::new().unwrap();
        let locator = ConfigLocator::at(temp_dir.path().to_path_buf()).unwrap();
        assert!(locator.tokens_file("default").ends_with("tokens-default.json"));
        assert!(locator
            .pending_state_file("work")
            .ends_with("pending-state-work"));
    }

    #[test]
    fn at_creates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");
        let locator = ConfigLocator::at(nested.clone()).unwrap();
        assert!(nested.is_dir());
        assert_eq!(locator.root(), nested.as_path());
    }

    #[test]
    fn create_failure_names_the_path() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("occupied");
        fs::write(&file, b"").unwrap();
        let err = ConfigLocator::at(file.join("cfg")).unwrap_err();
        assert!(matches!(err, ConfigError::CreateDir { .. }));
        assert!(err.to_string().contains("occupied"));
    }

    #[cfg(unix)]
    #[test]
    fn directory_is_user_only() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("cfg");
        ConfigLocator::at(root.clone()).unwrap();
        let mode = fs::metadata(&root).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}

//! Where the config file and cache database live by default.

use std::path::{Path, PathBuf};

use directories::{BaseDirs, ProjectDirs};

const CONFIG_FILE: &str = "config.toml";
const CACHE_FILE: &str = "cache.sqlite";

/// Platform directories for sigmahub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config: PathBuf,
    pub data: PathBuf,
}

impl AppPaths {
    /// Platform config and data dirs, or XDG-style dirs under `$HOME` when
    /// the platform lookup fails.
    #[must_use]
    pub fn new() -> Self {
        if let Some(dirs) = ProjectDirs::from("com", "rbsigma", "sigmahub") {
            return Self::rooted(dirs.config_dir(), dirs.data_dir());
        }
        let home = BaseDirs::new().map_or_else(|| PathBuf::from("."), |d| d.home_dir().to_path_buf());
        Self::under_home(&home)
    }

    #[must_use]
    pub fn rooted(config: &Path, data: &Path) -> Self {
        Self {
            config: config.to_path_buf(),
            data: data.to_path_buf(),
        }
    }

    fn under_home(home: &Path) -> Self {
        Self::rooted(
            &home.join(".config").join("sigmahub"),
            &home.join(".local").join("share").join("sigmahub"),
        )
    }

    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config.join(CONFIG_FILE)
    }

    /// Default cache database; the parent is created when the cache opens.
    #[must_use]
    pub fn cache_db_file(&self) -> PathBuf {
        self.data.join(CACHE_FILE)
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

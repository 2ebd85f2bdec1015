//! Configuration loading for bibsearch.

use std::path::{Path, PathBuf};

use directories::{BaseDirs, ProjectDirs};
use serde::Deserialize;

use crate::query::{EmptyQueryPolicy, SearchFlag, SearchFlags};
use crate::search::UnavailableIndexPolicy;

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "BIBSEARCH_CONFIG";

/// Top-level configuration loaded from config.toml.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the library file lives.
#[derive(Debug, Deserialize)]
pub struct LibraryConfig {
    #[serde(default = "default_library_path")]
    pub path: String,
}

fn default_library_path() -> String {
    "./library.json".to_string()
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            path: default_library_path(),
        }
    }
}

/// Where the full-text index lives.
#[derive(Debug, Default, Deserialize)]
pub struct IndexConfig {
    /// Index directory; defaults to a per-library directory under the user
    /// data dir.
    pub dir: Option<String>,
    /// Metadata fields copied into the index, so that queries mixing them
    /// with content run as one index query. Changing the list rebuilds the
    /// index.
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Defaults for searches run from the command line.
#[derive(Debug, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct SearchConfig {
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub fulltext: bool,
    /// Reload the index before searching so recent writes are visible.
    #[serde(default = "default_refresh")]
    pub refresh: bool,
    #[serde(default)]
    pub empty_query: EmptyQueryPolicy,
    #[serde(default)]
    pub unavailable_index: UnavailableIndexPolicy,
}

fn default_refresh() -> bool {
    true
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            regex: false,
            fulltext: false,
            refresh: default_refresh(),
            empty_query: EmptyQueryPolicy::default(),
            unavailable_index: UnavailableIndexPolicy::default(),
        }
    }
}

impl SearchConfig {
    /// Flags enabled by default.
    #[must_use]
    pub fn flags(&self) -> SearchFlags {
        let mut flags = SearchFlags::new();
        flags.set(SearchFlag::CaseSensitive, self.case_sensitive);
        flags.set(SearchFlag::RegularExpression, self.regex);
        flags.set(SearchFlag::Fulltext, self.fulltext);
        flags
    }
}

/// Log verbosity; `RUST_LOG` overrides it.
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load config from `$BIBSEARCH_CONFIG` or ~/.config/bibsearch/config.toml,
    /// or return defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> anyhow::Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Config::default()),
        }
    }

    /// Load config from `path`, or return defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {e}", path.display()))?;
        Ok(config)
    }

    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        ProjectDirs::from("", "", "bibsearch").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    #[must_use]
    pub fn library_path(&self) -> PathBuf {
        expand_tilde(&self.library.path)
    }

    /// Index directory for a library with the given name.
    ///
    /// # Errors
    ///
    /// Returns an error if no directory is configured and the user data
    /// directory cannot be determined.
    pub fn index_dir(&self, library_name: &str) -> anyhow::Result<PathBuf> {
        if let Some(dir) = &self.index.dir {
            return Ok(expand_tilde(dir));
        }
        ProjectDirs::from("", "", "bibsearch")
            .map(|dirs| dirs.data_dir().join("index").join(library_name))
            .ok_or_else(|| anyhow::anyhow!("Cannot determine data directory; set [index] dir"))
    }
}

/// Expand ~ to the user's home directory.
#[must_use]
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(base_dirs) = BaseDirs::new()
    {
        return base_dirs.home_dir().join(rest);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.library.path, "./library.json");
        assert!(config.index.dir.is_none());
        assert!(config.index.fields.is_empty());
        assert!(config.search.refresh);
        assert_eq!(config.search.empty_query, EmptyQueryPolicy::MatchAll);
        assert_eq!(config.search.unavailable_index, UnavailableIndexPolicy::Degrade);
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.search.flags(), SearchFlags::new());
    }

    #[test]
    fn load_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[library]
path = "/data/refs.json"

[index]
dir = "/data/index"
fields = ["title", "journal"]

[search]
fulltext = true
empty_query = "invalid"
unavailable_index = "error"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.library_path(), PathBuf::from("/data/refs.json"));
        assert_eq!(config.index_dir("refs").unwrap(), PathBuf::from("/data/index"));
        assert_eq!(config.index.fields, ["title", "journal"]);
        assert!(config.search.flags().fulltext());
        assert!(!config.search.flags().case_sensitive());
        assert_eq!(config.search.empty_query, EmptyQueryPolicy::Invalid);
        assert_eq!(config.search.unavailable_index, UnavailableIndexPolicy::Error);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.library.path, "./library.json");
    }

    #[test]
    fn invalid_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[search]\nfulltext = \"maybe\"").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn expand_tilde_leaves_other_paths() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_tilde("rel/path"), PathBuf::from("rel/path"));
    }
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "termdex";
const CONFIG_FILE: &str = "config.json";
const DEFAULT_INDEX_NAME: &str = "textindex.dat";

/// Engine configuration stored in the app data directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cluster size of the blob store in bytes
    #[serde(default = "default_cluster_size")]
    pub cluster_size: u32,

    /// Extension of the term directory file placed next to the blob store
    #[serde(default = "default_header_extension")]
    pub header_extension: String,

    /// Capacity of the directory lookup and record caches
    #[serde(default = "default_directory_cache_pages")]
    pub directory_cache_pages: usize,

    /// Maximum token distance inside one sentence for `near`
    #[serde(default = "default_near_distance")]
    pub near_distance: u16,

    /// Maximum snippet length produced by the context extractor (bytes)
    #[serde(default = "default_context_length")]
    pub context_length: usize,

    /// Delay before the single retry of a failed file removal during discard
    #[serde(default = "default_discard_retry_delay_ms")]
    pub discard_retry_delay_ms: u64,
}

fn default_cluster_size() -> u32 {
    64
}

fn default_header_extension() -> String {
    "hdr".to_string()
}

fn default_directory_cache_pages() -> usize {
    256
}

fn default_near_distance() -> u16 {
    10
}

fn default_context_length() -> usize {
    160
}

fn default_discard_retry_delay_ms() -> u64 {
    500
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cluster_size: default_cluster_size(),
            header_extension: default_header_extension(),
            directory_cache_pages: default_directory_cache_pages(),
            near_distance: default_near_distance(),
            context_length: default_context_length(),
            discard_retry_delay_ms: default_discard_retry_delay_ms(),
        }
    }
}

impl EngineConfig {
    /// Load config from the app data directory, or return default if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&get_config_path()?)
    }

    /// Load config from an explicit file, or return default if not found
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)
                .context("Failed to read config file")?;
            let config: EngineConfig = serde_json::from_str(&content)
                .context("Failed to parse config file")?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to an explicit file
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        fs::write(config_path, content)
            .context("Failed to write config file")?;
        Ok(())
    }

    pub fn discard_retry_delay(&self) -> Duration {
        Duration::from_millis(self.discard_retry_delay_ms)
    }
}

/// Get the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    let app_dir = get_app_data_dir()?;
    Ok(app_dir.join(CONFIG_FILE))
}

/// Get the application data directory
pub fn get_app_data_dir() -> Result<PathBuf> {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir()
            .map(|h| h.join("Library").join("Application Support"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
    } else {
        // Linux/Unix: use XDG_DATA_HOME or ~/.local/share
        dirs::data_dir()
    };

    let base = base.context("Could not determine app data directory")?;
    let app_dir = base.join(APP_NAME);

    fs::create_dir_all(&app_dir)?;
    Ok(app_dir)
}

/// Default location of the blob store file of the text index
pub fn default_index_path() -> Result<PathBuf> {
    let indexes_dir = get_app_data_dir()?.join("indexes");
    fs::create_dir_all(&indexes_dir)?;
    Ok(indexes_dir.join(DEFAULT_INDEX_NAME))
}

/// Path of a side file: `<index>.<extension>`
pub fn side_file(index_path: &Path, extension: &str) -> PathBuf {
    let mut name = index_path.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.cluster_size, 64);
        assert_eq!(config.header_extension, "hdr");
        assert_eq!(config.discard_retry_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_engine_config_partial_json() {
        // Should use defaults for missing fields
        let json = r#"{"near_distance": 3}"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.near_distance, 3);
        assert_eq!(config.cluster_size, 64);
        assert_eq!(config.context_length, 160);
    }

    #[test]
    fn test_engine_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let missing = EngineConfig::load_from(&path).unwrap();
        assert_eq!(missing.directory_cache_pages, 256);

        let config = EngineConfig {
            directory_cache_pages: 16,
            ..EngineConfig::default()
        };
        config.save_to(&path).unwrap();
        let loaded = EngineConfig::load_from(&path).unwrap();
        assert_eq!(loaded.directory_cache_pages, 16);
    }

    #[test]
    fn test_side_file() {
        let path = side_file(Path::new("/tmp/text.dat"), "hdr");
        assert_eq!(path, PathBuf::from("/tmp/text.dat.hdr"));
    }
}

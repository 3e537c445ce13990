//! Optional `qforge.toml` next to the working directory: defaults the CLI
//! flags fall back to.

use std::path::{Path, PathBuf};

use serde::Deserialize;

pub static CONFIG_FILE_NAME: &str = "qforge.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QforgeConfig {
    #[serde(default)]
    pub wad_paths: Vec<PathBuf>,
    pub threads: Option<usize>,
    /// "v29", "bsp2", "2psb", "hl", "q2"
    pub format: Option<String>,
}

impl QforgeConfig {
    pub fn load() -> Self {
        Self::from_path(Path::new(CONFIG_FILE_NAME)).unwrap_or_default()
    }

    fn from_path(path: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;

        match toml::from_str(&text) {
            Ok(config) => Some(config),
            Err(err) => {
                eprintln!("WARNING: Cannot parse {}: {}", path.display(), err);
                None
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_full_config() {
        let config: QforgeConfig = toml::from_str(
            "wad_paths = [\"/maps/wads\"]\nthreads = 8\nformat = \"bsp2\"\n",
        )
        .unwrap();

        assert_eq!(config.wad_paths.len(), 1);
        assert_eq!(config.threads, Some(8));
        assert_eq!(config.format.as_deref(), Some("bsp2"));
    }

    #[test]
    fn empty_config_defaults() {
        let config: QforgeConfig = toml::from_str("").unwrap();
        assert!(config.wad_paths.is_empty());
        assert!(config.threads.is_none());
    }
}

//! Client configuration: where the shelf and the image cache live and
//! whether the orientation attribute is honored when generating
//! derivatives. Stored as JSON in the user's photoshelf directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShelfError};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub shelf_location: PathBuf,
    pub cache_location: PathBuf,
    pub use_orientation: bool,
}

impl Default for Config {
    fn default() -> Self {
        let base = base_dir();
        Config {
            shelf_location: base.join("shelf"),
            cache_location: base.join("imagecache"),
            use_orientation: false,
        }
    }
}

impl Config {
    /// Load the configuration from `path`, or the defaults if no file
    /// exists there yet.
    pub fn load(path: &Path) -> Result<Config> {
        match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).map_err(|err| {
                ShelfError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("bad config file {}: {err}", path.display()),
                ))
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|err| {
            ShelfError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
        })?;
        fs::write(path, text)?;
        Ok(())
    }
}

/// The default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    base_dir().join("config.json")
}

fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".photoshelf")
}

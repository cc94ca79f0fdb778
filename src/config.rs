use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use anyhow::{Result, anyhow};

/// Local development backend, used by debug builds when nothing else is set.
pub const DEV_API_URL: &str = "http://127.0.0.1:8001";
/// Production backend, used by release builds when nothing else is set.
pub const PROD_API_URL: &str = "https://api.ragbook.dev";

/// Number of sources requested from the backend per query.
pub const DEFAULT_TOP_K: u32 = 5;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub api_url: Option<String>,
    pub book_dir: Option<PathBuf>,
    pub top_k: Option<u32>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            api_url: None,
            book_dir: None,
            top_k: None,
        }
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;

        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(&config_path, config_content)?;
        Ok(())
    }

    /// Backend URL resolution: config file, then RAGBOOK_API_URL, then the
    /// compile-time default (local dev endpoint in debug builds).
    pub fn effective_api_url(&self) -> String {
        if let Some(url) = &self.api_url {
            return url.clone();
        }
        if let Ok(url) = std::env::var("RAGBOOK_API_URL") {
            if !url.is_empty() {
                return url;
            }
        }
        default_api_url().to_string()
    }

    /// Book directory resolution: config file, then RAGBOOK_BOOK_DIR,
    /// then ./docs. A CLI flag overrides all of these (handled by the caller).
    pub fn effective_book_dir(&self) -> PathBuf {
        if let Some(dir) = &self.book_dir {
            return dir.clone();
        }
        if let Ok(dir) = std::env::var("RAGBOOK_BOOK_DIR") {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        PathBuf::from("docs")
    }

    pub fn effective_top_k(&self) -> u32 {
        self.top_k.unwrap_or(DEFAULT_TOP_K)
    }

    pub fn log_dir() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("logs"))
    }

    fn get_config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("ragbook"))
    }
}

fn default_api_url() -> &'static str {
    if cfg!(debug_assertions) {
        DEV_API_URL
    } else {
        PROD_API_URL
    }
}

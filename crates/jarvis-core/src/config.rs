use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Result, anyhow};

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
const API_PREFIX: &str = "/api/v1";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api_url: String,
    pub health_interval_ms: u64,
    pub metrics_interval_ms: u64,
    pub conversation_cap: usize,
    pub audio_enabled: bool,
    pub voice_enabled: bool,
    pub skip_boot: bool,
    pub tts_voice: Option<String>,
    pub microphone: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            health_interval_ms: 5000,
            metrics_interval_ms: 3000,
            conversation_cap: 100,
            audio_enabled: true,
            voice_enabled: true,
            skip_boot: false,
            tts_voice: None,
            microphone: None,
        }
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &std::path::Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &std::path::Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    /// Apply `JARVIS_API_URL`, falling back to the web build's `VITE_API_URL`
    pub fn apply_env(&mut self) {
        let jarvis = std::env::var("JARVIS_API_URL").ok();
        let vite = std::env::var("VITE_API_URL").ok();
        if let Some(url) = pick_override(jarvis, vite) {
            self.api_url = url;
        }
    }

    /// Base for REST endpoints, e.g. `http://localhost:8000/api/v1`
    pub fn api_base(&self) -> String {
        let root = self.api_url.trim_end_matches('/');
        if root.ends_with(API_PREFIX) {
            root.to_string()
        } else {
            format!("{root}{API_PREFIX}")
        }
    }

    /// Push channel URL derived by protocol substitution (`http` -> `ws`, `https` -> `wss`)
    pub fn ws_url(&self) -> String {
        let base = self.api_base();
        let swapped = match base.strip_prefix("http") {
            Some(rest) => format!("ws{rest}"),
            None => base,
        };
        format!("{swapped}/ws")
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms.max(250))
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms.max(250))
    }

    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?;

        Ok(data_dir.join("jarvis"))
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("jarvis").join("config.json"))
    }
}

fn pick_override(primary: Option<String>, fallback: Option<String>) -> Option<String> {
    primary
        .into_iter()
        .chain(fallback)
        .map(|url| url.trim().to_string())
        .find(|url| !url.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_urls() {
        let config = Config::new();
        assert_eq!(config.api_base(), "http://localhost:8000/api/v1");
        assert_eq!(config.ws_url(), "ws://localhost:8000/api/v1/ws");
    }

    #[test]
    fn test_https_becomes_wss() {
        let mut config = Config::new();
        config.api_url = "https://jarvis.example.com/".to_string();
        assert_eq!(config.ws_url(), "wss://jarvis.example.com/api/v1/ws");
    }

    #[test]
    fn test_api_prefix_not_doubled() {
        let mut config = Config::new();
        config.api_url = "http://10.0.0.5:9000/api/v1".to_string();
        assert_eq!(config.api_base(), "http://10.0.0.5:9000/api/v1");
    }

    #[test]
    fn test_env_override_order() {
        assert_eq!(
            pick_override(Some("http://a".into()), Some("http://b".into())),
            Some("http://a".to_string())
        );
        assert_eq!(
            pick_override(Some("  ".into()), Some("http://b".into())),
            Some("http://b".to_string())
        );
        assert_eq!(pick_override(None, None), None);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"api_url": "http://backend:8000", "audio_enabled": false}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.api_url, "http://backend:8000");
        assert!(!config.audio_enabled);
        assert_eq!(config.health_interval_ms, 5000);
        assert_eq!(config.conversation_cap, 100);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::new();
        config.skip_boot = true;
        config.tts_voice = Some("en-gb".to_string());
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::new());
    }
}

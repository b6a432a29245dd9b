use serde::Deserialize;
use std::{env, fs, path::Path};
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = ".config/invoice_audit.toml";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the service-agreement workbook.
    pub registry_path: String,
    pub amplify: AmplifySection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_path: "Service Agreement Table (Rolling).xlsx".to_string(),
            amplify: AmplifySection::default(),
        }
    }
}

/// Endpoint settings for the Amplify text-understanding API.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AmplifySection {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for AmplifySection {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            model: "gpt-4o".to_string(),
            timeout_secs: 30,
        }
    }
}

impl AmplifySection {
    /// Whether enough is present to attempt API calls. An unconfigured
    /// endpoint is reported before any PDF work starts, so operators can
    /// tell "not configured" from "tried and failed".
    pub fn is_configured(&self) -> bool {
        !self.api_url.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let mut cfg: Config = toml::from_str(&content)?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Load the config file if present, otherwise start from defaults.
    /// Environment variables win over the file in both cases.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Config not loaded, using defaults");
                let mut cfg = Config::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("AMPLIFY_API_URL") {
            self.amplify.api_url = url;
        }
        if let Ok(key) = env::var("AMPLIFY_API_KEY") {
            self.amplify.api_key = key;
        }
    }
}

//! Configuration loading and management

use super::schema::Config;
use super::validate::validate_config;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";
const ENV_PREFIX: &str = "SKIFF__";

/// Environment variables that map onto a config path
const ENV_ALIASES: &[(&str, &str)] = &[
    ("OPENAI_API_KEY", "provider.api_key"),
    ("OPENROUTER_API_KEY", "provider.api_key"),
    ("OPENAI_API_BASE", "provider.api_base"),
];

/// Configuration loader
///
/// Precedence, lowest first: built-in defaults, `config.json`, alias
/// environment variables, `SKIFF__SECTION__FIELD` path overrides.
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Create a new config loader with the default config directory
    pub fn new() -> Self {
        let config_dir = dirs::home_dir()
            .map(|h| h.join(".skiff"))
            .unwrap_or_else(|| PathBuf::from(".skiff"));

        Self { config_dir }
    }

    /// Create a new config loader with a custom config directory
    pub fn with_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            config_dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Load configuration from file and environment
    pub fn load(&self) -> crate::Result<Config> {
        let mut merged = serde_json::to_value(Config::default())?;

        let config_path = self.config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let file_value: Value = serde_json::from_str(&content)?;
            merge_values(&mut merged, file_value);
        }

        for (env_key, target) in ENV_ALIASES {
            if let Ok(value) = std::env::var(env_key) {
                set_path_value(&mut merged, &split_path(target, "."), Value::String(value));
            }
        }
        apply_path_overrides(&mut merged, std::env::vars());

        let config: Config = serde_json::from_value(merged)?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config: &Config) -> crate::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(self.config_path(), content)?;
        Ok(())
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_value, overlay_value) => *base_value = overlay_value,
    }
}

fn split_path(path: &str, sep: &str) -> Vec<String> {
    path.split(sep)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_lowercase())
        .collect()
}

/// Interpret an environment value as JSON when possible, else as a string
fn parse_env_value(raw: &str) -> Value {
    serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn set_path_value(root: &mut Value, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        *root = value;
        return;
    };

    let mut current = root;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Some(map) = current.as_object_mut() else {
            return;
        };
        current = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Some(map) = current.as_object_mut() {
        map.insert(last.clone(), value);
    }
}

fn apply_path_overrides(config: &mut Value, vars: impl Iterator<Item = (String, String)>) {
    for (key, value) in vars {
        let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let segments = split_path(suffix, "__");
        if segments.is_empty() {
            continue;
        }
        set_path_value(config, &segments, parse_env_value(&value));
    }
}

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs, path::Path};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Upper bound on registry lookups in flight across the whole run.
    pub concurrency: usize,
    pub request_timeout_seconds: u64,
    pub max_attempts: u32,
    pub initial_backoff_millis: u64,
    /// Hostname glob patterns of registries that are queried over plain HTTP.
    pub insecure_registries: Vec<String>,
    pub tls: Tls,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Tls {
    pub ca_certificate_paths: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: 16,
            request_timeout_seconds: 30,
            max_attempts: 3,
            initial_backoff_millis: 200,
            insecure_registries: Vec::new(),
            tls: Tls::default(),
        }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_millis)
    }

    fn validate(self) -> Result<Self> {
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("maxAttempts must be at least 1");
        }
        Ok(self)
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config: Config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    config.validate()
}

/// Loads the file named by `env_var` if it is set, the defaults otherwise.
pub fn load_config_from_env(env_var: &str) -> Result<Config> {
    match env::var(env_var) {
        Ok(path) => load_config(path),
        Err(_) => {
            info!("{} is not set, using default config", env_var);
            Ok(Config::default())
        }
    }
}

/// Reads the config from a KRM `functionConfig` ConfigMap. Each `data` value is
/// parsed as YAML, so `concurrency: "4"` becomes a number and list values can be
/// written as block sequences. Returns `None` when there is no `data` map.
pub fn config_from_function_config(function_config: &Value) -> Result<Option<Config>> {
    let Some(data) = function_config.get("data").and_then(Value::as_object) else {
        return Ok(None);
    };

    let mut fields = serde_json::Map::new();
    for (key, value) in data {
        let parsed = match value.as_str() {
            Some(raw) => serde_yaml_ng::from_str(raw)
                .with_context(|| format!("Failed to parse functionConfig data key {}", key))?,
            None => value.clone(),
        };
        fields.insert(key.clone(), parsed);
    }

    info!("Loading config from functionConfig");
    let config: Config =
        serde_json::from_value(Value::Object(fields)).context("Failed to parse functionConfig")?;
    config.validate().map(Some)
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error if any env var is missing or regex fails.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let mut result = String::with_capacity(input.len());
    let mut last = 0;
    for caps in re.captures_iter(input) {
        let (Some(placeholder), Some(var_name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = env::var(var_name.as_str())
            .with_context(|| format!("Missing environment variable: {}", var_name.as_str()))?;
        result.push_str(&input[last..placeholder.start()]);
        result.push_str(&value);
        last = placeholder.end();
    }
    result.push_str(&input[last..]);

    Ok(result)
}

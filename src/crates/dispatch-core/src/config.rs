//! Runtime configuration
//!
//! [`DispatchConfig`] describes how a [`DispatchRuntime`](crate::DispatchRuntime)
//! sets up its contexts. It can be loaded from a YAML or JSON file (chosen by
//! extension), with `${VAR}` / `${VAR:default}` references in string values
//! expanded from the environment, and then overridden by prefixed environment
//! variables.
//!
//! # Example
//!
//! ```yaml
//! name: blackjack
//! worker_threads: 4
//! thread_name: "${DISPATCH_THREAD:table-worker}"
//! error_policy: escalate
//! drain_timeout_ms: 2000
//! ```
//!
//! ```rust,no_run
//! use dispatch_core::config::load_config_file;
//!
//! let config = load_config_file("dispatch.yaml")?
//!     .with_env_overrides("DISPATCH")?;
//! config.validate()?;
//! # Ok::<(), dispatch_core::DispatchError>(())
//! ```
//!
//! # Environment variables
//!
//! With prefix `DISPATCH`: `DISPATCH_NAME`, `DISPATCH_WORKER_THREADS`,
//! `DISPATCH_THREAD_NAME`, `DISPATCH_ERROR_POLICY`, `DISPATCH_DRAIN_TIMEOUT_MS`.

use crate::error::{DispatchError, Result};
use crate::handler::ErrorPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Settings for a dispatch runtime and the machines it creates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Machine name, used as the synchronization thread name and on log events
    pub name: String,
    /// Number of tokio worker threads resolving follow-ups
    pub worker_threads: usize,
    /// Name of the worker threads
    pub thread_name: String,
    /// What the default error handler does (escalate unless set to `log`)
    pub error_policy: ErrorPolicy,
    /// Bound on the backlog wait of `start_with`, in milliseconds
    pub drain_timeout_ms: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            name: "dispatch".to_string(),
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            thread_name: "dispatch-worker".to_string(),
            error_policy: ErrorPolicy::default(),
            drain_timeout_ms: None,
        }
    }
}

impl DispatchConfig {
    /// Defaults overridden by environment variables starting with `prefix`
    pub fn from_env(prefix: &str) -> Result<Self> {
        Self::default().with_env_overrides(prefix)
    }

    /// Override fields from environment variables starting with `prefix`
    ///
    /// Unset variables leave the field alone; unparsable ones are errors.
    pub fn with_env_overrides(mut self, prefix: &str) -> Result<Self> {
        if let Some(name) = env_var(prefix, "NAME") {
            self.name = name;
        }
        if let Some(threads) = env_parse(prefix, "WORKER_THREADS")? {
            self.worker_threads = threads;
        }
        if let Some(thread_name) = env_var(prefix, "THREAD_NAME") {
            self.thread_name = thread_name;
        }
        if let Some(policy) = env_parse::<ErrorPolicy>(prefix, "ERROR_POLICY")? {
            self.error_policy = policy;
        }
        if let Some(timeout) = env_parse(prefix, "DRAIN_TIMEOUT_MS")? {
            self.drain_timeout_ms = Some(timeout);
        }
        Ok(self)
    }

    /// Reject settings a runtime cannot be built from
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DispatchError::Configuration(
                "name must not be empty".to_string(),
            ));
        }
        if self.worker_threads == 0 {
            return Err(DispatchError::Configuration(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.thread_name.trim().is_empty() {
            return Err(DispatchError::Configuration(
                "thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// `drain_timeout_ms` as a duration
    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }
}

fn env_key(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{}_{}", prefix, field)
    }
}

fn env_var(prefix: &str, field: &str) -> Option<String> {
    env::var(env_key(prefix, field)).ok()
}

fn env_parse<T: FromStr>(prefix: &str, field: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    let key = env_key(prefix, field);
    match env::var(&key) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|e: T::Err| {
            DispatchError::Configuration(format!("Failed to parse {}='{}': {}", key, raw, e))
        }),
        Err(_) => Ok(None),
    }
}

/// Load a [`DispatchConfig`] from a `.yaml`, `.yml` or `.json` file
pub fn load_config_file(path: impl AsRef<Path>) -> Result<DispatchConfig> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| {
            DispatchError::Configuration(format!(
                "Unable to determine file extension for {:?}",
                path
            ))
        })?;
    let content = std::fs::read_to_string(path)?;

    let config = match extension.to_lowercase().as_str() {
        "yaml" | "yml" => parse_yaml(&content),
        "json" => parse_json(&content),
        other => Err(DispatchError::Configuration(format!(
            "Unsupported config file extension: {}",
            other
        ))),
    }?;

    tracing::debug!(path = ?path, name = %config.name, "Loaded dispatch configuration");
    Ok(config)
}

/// Parse YAML configuration text, expanding environment references
pub fn parse_yaml(content: &str) -> Result<DispatchConfig> {
    let mut value: YamlValue = serde_yaml::from_str(content)?;
    expand_yaml(&mut value);
    Ok(serde_yaml::from_value(value)?)
}

/// Parse JSON configuration text, expanding environment references
pub fn parse_json(content: &str) -> Result<DispatchConfig> {
    let mut value: JsonValue = serde_json::from_str(content)?;
    expand_json(&mut value);
    Ok(serde_json::from_value(value)?)
}

fn expand_yaml(value: &mut YamlValue) {
    match value {
        YamlValue::String(s) => {
            if let Some(expanded) = expand_env_in_string(s) {
                *s = expanded;
            }
        }
        YamlValue::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                expand_yaml(v);
            }
        }
        YamlValue::Sequence(seq) => seq.iter_mut().for_each(expand_yaml),
        _ => {}
    }
}

fn expand_json(value: &mut JsonValue) {
    match value {
        JsonValue::String(s) => {
            if let Some(expanded) = expand_env_in_string(s) {
                *s = expanded;
            }
        }
        JsonValue::Object(map) => map.values_mut().for_each(expand_json),
        JsonValue::Array(items) => items.iter_mut().for_each(expand_json),
        _ => {}
    }
}

/// Expand `${VAR}` and `${VAR:default}` references
///
/// Returns `None` when `s` holds no reference. Unset variables without a
/// default expand to the empty string.
fn expand_env_in_string(s: &str) -> Option<String> {
    if !s.contains("${") {
        return None;
    }

    let re = regex::Regex::new(r"\$\{([^:}]+)(?::([^}]*))?\}").ok()?;
    let expanded = re.replace_all(s, |cap: &regex::Captures<'_>| {
        let default = cap.get(2).map(|m| m.as_str()).unwrap_or("");
        env::var(&cap[1]).unwrap_or_else(|_| default.to_string())
    });
    Some(expanded.into_owned())
}

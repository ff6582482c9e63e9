//! Defaults and environment/config-file loading shared by the splinter CLI
//! and utility binaries. The core crate never reads environment variables
//! or config files — this is strictly a boundary-layer concern.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

/// Settings shared by `splinter_cli`/`splinterctl` and the send/recv/logtee
/// utilities. Every field has a compiled-in default; a config file supplies
/// file-based overrides, and `SPLINTER_HISTORY_FILE`/`SPLINTER_HISTORY_LEN`/
/// `SPLINTER_NS_PREFIX` supply environment overrides on top of that.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    #[serde(default = "defaults::bus")]
    pub bus: String,
    #[serde(default = "defaults::key")]
    pub key: String,
    #[serde(default = "defaults::slots")]
    pub slots: u32,
    #[serde(default = "defaults::max_val_sz")]
    pub max_val_sz: u32,
    #[serde(default = "defaults::history_file")]
    pub history_file: String,
    #[serde(default = "defaults::history_len")]
    pub history_len: usize,
    #[serde(default = "defaults::ns_prefix")]
    pub ns_prefix: String,
}

mod defaults {
    pub fn bus() -> String {
        "splinter_debug".into()
    }

    pub fn key() -> String {
        "__debug".into()
    }

    pub fn slots() -> u32 {
        1024
    }

    pub fn max_val_sz() -> u32 {
        4096
    }

    pub fn history_file() -> String {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        format!("{home}/.splinter_history")
    }

    pub fn history_len() -> usize {
        1000
    }

    pub fn ns_prefix() -> String {
        String::new()
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        // Every field carries a `#[serde(default = ...)]`, so parsing an
        // empty table reproduces the compiled-in defaults exactly.
        toml::from_str("").expect("empty table always parses")
    }
}

impl CliConfig {
    /// Loads config from an optional TOML file, then applies environment
    /// overrides. `path == None` yields the compiled-in defaults plus
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|source| ConfigError::Read {
                    path: p.display().to_string(),
                    source,
                })?;
                toml::from_str(&text)?
            }
            None => CliConfig::default(),
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SPLINTER_HISTORY_FILE") {
            self.history_file = v;
        }
        if let Ok(v) = std::env::var("SPLINTER_HISTORY_LEN") {
            if let Ok(n) = v.parse() {
                self.history_len = n;
            }
        }
        if let Ok(v) = std::env::var("SPLINTER_NS_PREFIX") {
            self.ns_prefix = v;
        }
    }

    /// Prefixes `key` with the configured namespace prefix, matching how
    /// `SPLINTER_NS_PREFIX` is applied to key names (not bus names) by the
    /// original CLI's `set`/`get`/`unset`/`watch`/`head` commands.
    pub fn namespaced_key(&self, key: &str) -> String {
        if self.ns_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.ns_prefix, key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_compiled_in_values() {
        let cfg = CliConfig::default();
        assert_eq!(cfg.bus, "splinter_debug");
        assert_eq!(cfg.key, "__debug");
        assert_eq!(cfg.slots, 1024);
        assert_eq!(cfg.max_val_sz, 4096);
        assert_eq!(cfg.history_len, 1000);
        assert_eq!(cfg.ns_prefix, "");
    }

    #[test]
    fn file_overrides_some_fields_defaults_fill_rest() {
        let toml_text = r#"
            bus = "custom_bus"
            slots = 256
        "#;
        let cfg: CliConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(cfg.bus, "custom_bus");
        assert_eq!(cfg.slots, 256);
        assert_eq!(cfg.max_val_sz, 4096);
    }

    #[test]
    fn namespaced_key_prefixes_when_set() {
        let mut cfg = CliConfig::default();
        assert_eq!(cfg.namespaced_key("mykey"), "mykey");
        cfg.ns_prefix = "team1_".into();
        assert_eq!(cfg.namespaced_key("mykey"), "team1_mykey");
    }
}

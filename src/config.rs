use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;
use serde_inline_default::serde_inline_default;
use thiserror::Error;

use crate::ingress::MonitoringConfig;

const DEFAULT_CONFIG: &str = include_str!("../default.toml");

#[derive(Error, Debug)]
pub enum Error {
    #[error("read {path}: {err}")]
    ReadFile { err: std::io::Error, path: String },

    #[error("parse: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A lbd.toml file.
#[derive(Deserialize, Debug)]
pub struct File {
    pub description: Option<String>,
    #[serde(default)]
    pub monitoring: Monitoring,
    #[serde(default)]
    pub tasks: Tasks,
}

impl Default for File {
    fn default() -> Self {
        // The default config is compiled into the program, so
        // make sure to test default() to catch panics compile-time.
        toml::from_str(DEFAULT_CONFIG).unwrap()
    }
}

impl File {
    /// Parse a user configuration, layered on top of the built-in defaults.
    /// Keys the user leaves out keep their default value.
    pub fn default_with_user_config(user_config: &str) -> Result<Self, Error> {
        let mut merged: toml::Table = toml::from_str(DEFAULT_CONFIG)?;
        let user: toml::Table = toml::from_str(user_config)?;
        merge_tables(&mut merged, user);
        Ok(toml::Value::Table(merged).try_into()?)
    }

    pub fn default_with_user_config_file(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|err| Error::ReadFile {
            err,
            path: path.display().to_string(),
        })?;
        Self::default_with_user_config(&contents)
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                merge_tables(base_table, overlay_table)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[serde_inline_default]
#[derive(Deserialize, Debug, Default, Clone)]
pub struct Monitoring {
    #[serde_inline_default(false)]
    pub enabled: bool,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub status_page_id: String,
}

impl From<&Monitoring> for MonitoringConfig {
    fn from(monitoring: &Monitoring) -> Self {
        Self {
            enabled: monitoring.enabled,
            contact: monitoring.contact.clone(),
            status_page_id: monitoring.status_page_id.clone(),
        }
    }
}

#[serde_inline_default]
#[derive(Deserialize, Debug, Clone)]
pub struct Tasks {
    #[serde_inline_default(true)]
    pub allow_missing_service_pre_rollout: bool,
    pub services: Option<BTreeSet<String>>,
}

impl Default for Tasks {
    fn default() -> Self {
        Self {
            allow_missing_service_pre_rollout: true,
            services: None,
        }
    }
}

#[cfg(test)]
pub mod test {
    #[test]
    pub fn load_default_configuration() {
        let cfg = super::File::default();
        assert_eq!(cfg.description, Some("Default configuration file".into()));
        assert!(!cfg.monitoring.enabled);
        assert!(cfg.tasks.allow_missing_service_pre_rollout);
        assert_eq!(cfg.tasks.services, None);
    }

    #[test]
    pub fn user_configuration_overlays_defaults() {
        let cfg = super::File::default_with_user_config(
            r#"
[monitoring]
enabled = true
contact = "alertcontact"

[tasks]
services = ["cli", "nginx"]
"#,
        )
        .unwrap();
        assert_eq!(cfg.description, Some("Default configuration file".into()));
        assert!(cfg.monitoring.enabled);
        assert_eq!(cfg.monitoring.contact, "alertcontact");
        assert_eq!(cfg.monitoring.status_page_id, "");
        assert!(cfg.tasks.allow_missing_service_pre_rollout);
        assert_eq!(
            cfg.tasks.services,
            Some(["cli".to_string(), "nginx".to_string()].into())
        );
    }

    #[test]
    pub fn invalid_configuration() {
        assert!(super::File::default_with_user_config("[monitoring]\nenabled = \"yes\"").is_err());
    }
}

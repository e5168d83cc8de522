//! Persisted user settings.
//!
//! A JSON document at a fixed relative path; a missing or malformed file
//! falls back to the defaults below. The per-backend sections feed default
//! values into `create()` when the command line does not override them.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default location of the settings file, relative to the working directory.
pub const DEFAULT_SETTINGS_PATH: &str = "configs/settings.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub theme: String,
    pub language: String,
    pub auto_refresh: bool,
    /// Auto-refresh period in seconds.
    pub refresh_interval: u64,
    pub docker: DockerSettings,
    pub virtualbox: VmSettings,
    pub hyperv: VmSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: "light".to_string(),
            language: "en".to_string(),
            auto_refresh: true,
            refresh_interval: 30,
            docker: DockerSettings::default(),
            virtualbox: VmSettings::default(),
            hyperv: VmSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSettings {
    pub auto_connect: bool,
    /// Default port mapping, `host:container`.
    pub default_ports: String,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            auto_connect: true,
            default_ports: "8080:80".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VmSettings {
    pub auto_connect: bool,
    pub default_memory: u64,
    pub default_cpus: u32,
}

impl Default for VmSettings {
    fn default() -> Self {
        Self {
            auto_connect: true,
            default_memory: 1024,
            default_cpus: 1,
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to defaults when the file is
    /// missing or malformed.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Malformed settings file; using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read settings file; using defaults");
                Self::default()
            }
        }
    }

    /// Write settings to `path`, creating the parent directory if needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Split a `host:container` port mapping into `(container, host)`.
pub fn parse_port_binding(binding: &str) -> Option<(String, String)> {
    let (host, container) = binding.split_once(':')?;
    if host.is_empty() || container.is_empty() {
        return None;
    }
    Some((container.to_string(), host.to_string()))
}

/// Split a `KEY=VALUE` environment assignment.
pub fn parse_env_assignment(assignment: &str) -> Option<(String, String)> {
    let (key, value) = assignment.split_once('=')?;
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_schema() {
        let settings = Settings::default();
        assert_eq!(settings.theme, "light");
        assert!(settings.auto_refresh);
        assert_eq!(settings.refresh_interval, 30);
        assert_eq!(settings.docker.default_ports, "8080:80");
        assert_eq!(settings.virtualbox.default_memory, 1024);
        assert_eq!(settings.hyperv.default_cpus, 1);
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path().join("nope.json"));
        assert_eq!(settings.refresh_interval, 30);
    }

    #[test]
    fn load_malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let settings = Settings::load(&path);
        assert_eq!(settings.theme, "light");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("configs").join("settings.json");

        let mut settings = Settings::default();
        settings.refresh_interval = 60;
        settings.virtualbox.default_memory = 4096;
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path);
        assert_eq!(loaded.refresh_interval, 60);
        assert_eq!(loaded.virtualbox.default_memory, 4096);
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"refresh_interval": 10}"#).unwrap();

        let settings = Settings::load(&path);
        assert_eq!(settings.refresh_interval, 10);
        assert_eq!(settings.docker.default_ports, "8080:80");
    }

    #[test]
    fn port_bindings_swap_into_container_host_order() {
        assert_eq!(
            parse_port_binding("8080:80"),
            Some(("80".to_string(), "8080".to_string()))
        );
        assert_eq!(parse_port_binding("8080"), None);
        assert_eq!(parse_port_binding(":80"), None);
    }

    #[test]
    fn env_assignments_split_on_the_first_equals() {
        assert_eq!(
            parse_env_assignment("MODE=a=b"),
            Some(("MODE".to_string(), "a=b".to_string()))
        );
        assert_eq!(parse_env_assignment("NOVALUE"), None);
    }
}

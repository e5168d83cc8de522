//! Type definitions for the normalized instance inventory.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// BACKENDS
// =============================================================================

/// The virtualization backend an instance belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Docker,
    VirtualBox,
    HyperV,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Docker => write!(f, "Docker"),
            BackendKind::VirtualBox => write!(f, "VirtualBox"),
            BackendKind::HyperV => write!(f, "Hyper-V"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(BackendKind::Docker),
            "virtualbox" | "vbox" => Ok(BackendKind::VirtualBox),
            "hyperv" | "hyper-v" => Ok(BackendKind::HyperV),
            other => Err(format!("unknown backend: {}", other)),
        }
    }
}

// =============================================================================
// INSTANCES
// =============================================================================

/// Power state shared across backends.
///
/// Backend-native state strings are mapped into this vocabulary; anything
/// unrecognized becomes [`InstanceState::Unknown`] rather than passing
/// arbitrary text through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Running,
    Stopped,
    Paused,
    Suspended,
    Unknown,
}

impl Default for InstanceState {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Running => "Running",
            InstanceState::Stopped => "Stopped",
            InstanceState::Paused => "Paused",
            InstanceState::Suspended => "Suspended",
            InstanceState::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// Normalized representation of a VM or container.
///
/// Built fresh on every query; never cached, never persisted. The `id` is the
/// backend's own identifier kept verbatim (container short id, VirtualBox
/// UUID, Hyper-V name/GUID) so it round-trips into later commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    /// Human-readable name, unique within its backend only.
    pub name: String,
    pub kind: BackendKind,
    pub state: InstanceState,
    /// Configured memory in MiB; 0 when the backend did not report it.
    pub memory_mb: u64,
    /// Virtual CPU count; 0 when the backend did not report it.
    pub cpu_count: u32,
    /// Backend-native creation timestamp, display-only.
    pub created_at: Option<String>,
    /// Image reference for container instances, `None` for VMs.
    pub image: Option<String>,
}

// =============================================================================
// DISKS
// =============================================================================

/// Backend-specific addressing triple for an attached disk.
///
/// The three parts are only meaningful together; they identify a disk for
/// resize and removal within one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSlot {
    pub controller: String,
    pub port: u32,
    pub device: u32,
}

/// Attached storage for a hypervisor-backed instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disk {
    pub slot: DiskSlot,
    /// Absolute path to the backing file.
    pub path: String,
    /// Size in MiB; 0 when the backend did not report it.
    pub size_mb: u64,
    /// Backend-specific image format (VDI, VHDX, VHD, ...).
    pub format: String,
}

// =============================================================================
// CREATION
// =============================================================================

/// Parameters for creating a new instance.
///
/// Absent fields mean backend defaults apply. Container creation reads
/// `image`/`ports`/`env`/`volumes`; VM creation reads `memory_mb`, `cpus`,
/// `os_type` and the disk/ISO fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSpec {
    /// Instance name; optional for containers (engine picks one).
    pub name: Option<String>,
    /// Container image reference.
    pub image: Option<String>,
    pub memory_mb: u64,
    pub cpus: u32,
    /// VirtualBox OS type hint (e.g. "Ubuntu_64").
    pub os_type: String,
    /// ISO to attach after creation, if it exists locally at call time.
    pub iso_path: Option<PathBuf>,
    /// Backing file for the primary disk; derived per backend when absent.
    pub disk_path: Option<PathBuf>,
    pub disk_size_mb: u64,
    /// Container port map, container port -> host port.
    pub ports: BTreeMap<String, String>,
    /// Container environment variables.
    pub env: BTreeMap<String, String>,
    /// Container volume binds, host path -> container path.
    pub volumes: BTreeMap<String, String>,
}

impl Default for CreateSpec {
    fn default() -> Self {
        Self {
            name: None,
            image: None,
            memory_mb: 1024,
            cpus: 1,
            os_type: "Ubuntu_64".to_string(),
            iso_path: None,
            disk_path: None,
            disk_size_mb: 20480,
            ports: BTreeMap::new(),
            env: BTreeMap::new(),
            volumes: BTreeMap::new(),
        }
    }
}

impl CreateSpec {
    /// Create a spec for a named instance with default sizing.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Create a spec for a container from an image reference.
    pub fn from_image(image: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
            ..Default::default()
        }
    }

    pub fn with_memory(mut self, memory_mb: u64) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    pub fn with_cpus(mut self, cpus: u32) -> Self {
        self.cpus = cpus;
        self
    }

    pub fn with_os_type(mut self, os_type: impl Into<String>) -> Self {
        self.os_type = os_type.into();
        self
    }

    pub fn with_iso(mut self, iso_path: impl Into<PathBuf>) -> Self {
        self.iso_path = Some(iso_path.into());
        self
    }

    pub fn with_disk(mut self, disk_path: impl Into<PathBuf>, size_mb: u64) -> Self {
        self.disk_path = Some(disk_path.into());
        self.disk_size_mb = size_mb;
        self
    }

    pub fn with_port(mut self, container: impl Into<String>, host: impl Into<String>) -> Self {
        self.ports.insert(container.into(), host.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_volume(mut self, host: impl Into<String>, container: impl Into<String>) -> Self {
        self.volumes.insert(host.into(), container.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("vbox".parse::<BackendKind>().unwrap(), BackendKind::VirtualBox);
        assert_eq!("Hyper-V".parse::<BackendKind>().unwrap(), BackendKind::HyperV);
        assert_eq!("docker".parse::<BackendKind>().unwrap(), BackendKind::Docker);
        assert!("xen".parse::<BackendKind>().is_err());
    }

    #[test]
    fn create_spec_builder() {
        let spec = CreateSpec::new("web")
            .with_memory(2048)
            .with_cpus(2)
            .with_port("80", "8080");

        assert_eq!(spec.name.as_deref(), Some("web"));
        assert_eq!(spec.memory_mb, 2048);
        assert_eq!(spec.ports.get("80").map(String::as_str), Some("8080"));
    }
}

//! In-memory backend for testing and development.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{AdapterError, Result};
use crate::traits::VirtBackend;
use crate::types::*;

/// Simulates a backend in memory, without any engine installed.
///
/// Used by the CLI's dev mode and by the facade tests; the call log lets
/// tests assert exactly which operations reached which backend.
pub struct MockBackend {
    kind: BackendKind,
    available: bool,
    instances: RwLock<HashMap<String, Instance>>,
    disks: RwLock<HashMap<String, Vec<Disk>>>,
    media: RwLock<HashMap<String, PathBuf>>,
    calls: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            available: true,
            instances: RwLock::new(HashMap::new()),
            disks: RwLock::new(HashMap::new()),
            media: RwLock::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A backend whose probe failed.
    pub fn unavailable(kind: BackendKind) -> Self {
        Self {
            available: false,
            ..Self::new(kind)
        }
    }

    /// Seed an instance before handing the backend out.
    pub fn with_instance(self, id: &str, name: &str, state: InstanceState) -> Self {
        self.instances.write().unwrap().insert(
            id.to_string(),
            Instance {
                id: id.to_string(),
                name: name.to_string(),
                kind: self.kind,
                state,
                memory_mb: 1024,
                cpu_count: 1,
                created_at: None,
                image: None,
            },
        );
        self
    }

    /// Seed a disk for an instance.
    pub fn with_disk(self, id: &str, disk: Disk) -> Self {
        self.disks
            .write()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push(disk);
        self
    }

    /// Every operation invoked so far, in order.
    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn ensure(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(AdapterError::Unavailable(self.kind))
        }
    }

    fn set_state(&self, id: &str, state: InstanceState) -> Result<()> {
        let mut instances = self.instances.write().unwrap();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| AdapterError::NotFound(id.to_string()))?;
        instance.state = state;
        Ok(())
    }
}

#[async_trait]
impl VirtBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn list(&self, include_stopped: bool) -> Result<Vec<Instance>> {
        self.ensure()?;
        self.record("list".to_string());

        let instances = self.instances.read().unwrap();
        let mut result: Vec<Instance> = instances
            .values()
            .filter(|i| include_stopped || i.state == InstanceState::Running)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(count = result.len(), "Listed mock instances");
        Ok(result)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.ensure()?;
        self.record(format!("start:{}", id));
        self.set_state(id, InstanceState::Running)
    }

    /// Stopping an already-stopped instance succeeds, mirroring the
    /// pass-through idempotence of the real adapters.
    async fn stop(&self, id: &str) -> Result<()> {
        self.ensure()?;
        self.record(format!("stop:{}", id));
        self.set_state(id, InstanceState::Stopped)
    }

    async fn pause(&self, id: &str) -> Result<()> {
        self.ensure()?;
        self.record(format!("pause:{}", id));
        self.set_state(id, InstanceState::Paused)
    }

    async fn resume(&self, id: &str) -> Result<()> {
        self.ensure()?;
        self.record(format!("resume:{}", id));
        self.set_state(id, InstanceState::Running)
    }

    async fn reset(&self, id: &str) -> Result<()> {
        self.ensure()?;
        self.record(format!("reset:{}", id));
        self.set_state(id, InstanceState::Running)
    }

    async fn create(&self, spec: &CreateSpec) -> Result<()> {
        self.ensure()?;

        let name = spec
            .name
            .as_deref()
            .ok_or_else(|| AdapterError::InvalidSpec("a name is required".to_string()))?;
        self.record(format!("create:{}", name));

        let id = format!("mock-{}", name);
        let state = if spec.image.is_some() {
            InstanceState::Running
        } else {
            InstanceState::Stopped
        };

        self.instances.write().unwrap().insert(
            id.clone(),
            Instance {
                id,
                name: name.to_string(),
                kind: self.kind,
                state,
                memory_mb: spec.memory_mb,
                cpu_count: spec.cpus,
                created_at: None,
                image: spec.image.clone(),
            },
        );

        info!(name, "Mock instance created");
        Ok(())
    }

    async fn attach_media(&self, id: &str, iso_path: &Path) -> Result<()> {
        self.ensure()?;
        self.record(format!("attach_media:{}", id));

        if !self.instances.read().unwrap().contains_key(id) {
            return Err(AdapterError::NotFound(id.to_string()));
        }
        self.media
            .write()
            .unwrap()
            .insert(id.to_string(), iso_path.to_path_buf());
        Ok(())
    }

    async fn detach_media(&self, id: &str) -> Result<()> {
        self.ensure()?;
        self.record(format!("detach_media:{}", id));
        self.media.write().unwrap().remove(id);
        Ok(())
    }

    async fn list_disks(&self, id: &str) -> Result<Vec<Disk>> {
        self.ensure()?;
        self.record(format!("list_disks:{}", id));
        Ok(self.disks.read().unwrap().get(id).cloned().unwrap_or_default())
    }

    async fn add_disk(&self, id: &str, disk_path: &Path, size_mb: u64) -> Result<()> {
        self.ensure()?;
        self.record(format!("add_disk:{}", id));

        let mut disks = self.disks.write().unwrap();
        let attached = disks.entry(id.to_string()).or_default();
        let port = attached.len() as u32 + 1;
        attached.push(Disk {
            slot: DiskSlot {
                controller: "SATA Controller".to_string(),
                port,
                device: 0,
            },
            path: disk_path.to_string_lossy().into_owned(),
            size_mb,
            format: "VDI".to_string(),
        });
        Ok(())
    }

    async fn resize_disk(&self, disk_path: &Path, new_size_mb: u64) -> Result<()> {
        self.ensure()?;
        self.record(format!("resize_disk:{}", disk_path.display()));

        let path = disk_path.to_string_lossy();
        let mut disks = self.disks.write().unwrap();
        for attached in disks.values_mut() {
            for disk in attached.iter_mut() {
                if disk.path == path {
                    disk.size_mb = new_size_mb;
                    return Ok(());
                }
            }
        }
        Err(AdapterError::NotFound(path.into_owned()))
    }

    async fn remove_disk(&self, id: &str, slot: &DiskSlot) -> Result<()> {
        self.ensure()?;
        self.record(format!("remove_disk:{}", id));

        let mut disks = self.disks.write().unwrap();
        let attached = disks
            .get_mut(id)
            .ok_or_else(|| AdapterError::NotFound(id.to_string()))?;
        attached.retain(|d| &d.slot != slot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_list_round_trip() {
        let backend = MockBackend::new(BackendKind::VirtualBox);
        backend
            .create(&CreateSpec::new("test-vm").with_memory(2048))
            .await
            .unwrap();

        let instances = backend.list(true).await.unwrap();
        let matching: Vec<_> = instances.iter().filter(|i| i.name == "test-vm").collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].memory_mb, 2048);
    }

    #[tokio::test]
    async fn a_created_container_lists_as_running() {
        let backend = MockBackend::new(BackendKind::Docker);
        let mut spec = CreateSpec::from_image("nginx:latest").with_memory(2048).with_cpus(2);
        spec.name = Some("web".to_string());

        backend.create(&spec).await.unwrap();

        let instances = backend.list(true).await.unwrap();
        let web: Vec<_> = instances.iter().filter(|i| i.name == "web").collect();
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].state, InstanceState::Running);
        assert_eq!(web[0].image.as_deref(), Some("nginx:latest"));
    }

    #[tokio::test]
    async fn stop_twice_does_not_fault() {
        let backend = MockBackend::new(BackendKind::Docker).with_instance(
            "abc123",
            "web",
            InstanceState::Running,
        );

        backend.stop("abc123").await.unwrap();
        backend.stop("abc123").await.unwrap();

        let instances = backend.list(true).await.unwrap();
        assert_eq!(instances[0].state, InstanceState::Stopped);
    }

    #[tokio::test]
    async fn unavailable_backend_never_lists() {
        let backend = MockBackend::unavailable(BackendKind::HyperV);
        let err = backend.list(true).await.unwrap_err();
        assert!(matches!(err, AdapterError::Unavailable(BackendKind::HyperV)));
        assert!(backend.call_log().is_empty());
    }

    #[tokio::test]
    async fn removing_a_disk_by_slot_empties_the_set() {
        let slot = DiskSlot {
            controller: "SATA Controller".to_string(),
            port: 1,
            device: 0,
        };
        let backend = MockBackend::new(BackendKind::VirtualBox)
            .with_instance("uuid-1", "vm", InstanceState::Stopped)
            .with_disk(
                "uuid-1",
                Disk {
                    slot: slot.clone(),
                    path: "/vms/data.vdi".to_string(),
                    size_mb: 20480,
                    format: "VDI".to_string(),
                },
            );

        backend.remove_disk("uuid-1", &slot).await.unwrap();
        assert!(backend.list_disks("uuid-1").await.unwrap().is_empty());
    }
}

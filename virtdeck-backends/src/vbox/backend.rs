//! VBoxManage-backed adapter.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::error::{AdapterError, Result};
use crate::exec::{expect_success, CommandOutput, CommandRunner, CommandSpec, SystemRunner};
use crate::traits::VirtBackend;
use crate::types::*;

use super::parse;

/// Candidate executable locations, probed in order at construction.
const CANDIDATES: &[&str] = &[
    "VBoxManage",
    r"C:\Program Files\Oracle\VirtualBox\VBoxManage.exe",
    r"C:\Program Files (x86)\Oracle\VirtualBox\VBoxManage.exe",
    "/usr/bin/VBoxManage",
    "/usr/local/bin/VBoxManage",
];

const SATA_CONTROLLER: &str = "SATA Controller";
const IDE_CONTROLLER: &str = "IDE Controller";

const PROBE_TIMEOUT: u64 = 5;
const INFO_TIMEOUT: u64 = 10;
const CONTROL_TIMEOUT: u64 = 30;
const LIGHT_CONTROL_TIMEOUT: u64 = 10;
const DISK_TIMEOUT: u64 = 60;

/// Adapter for the VirtualBox command-line frontend.
pub struct VboxBackend {
    runner: Arc<dyn CommandRunner>,
    /// Resolved executable; `None` means the probe found no working install.
    exe: Option<String>,
}

impl VboxBackend {
    /// Locate VBoxManage and construct the adapter.
    pub async fn detect() -> Self {
        Self::detect_with(Arc::new(SystemRunner::new())).await
    }

    /// An adapter whose probe is skipped, for wiring and tests.
    pub fn unavailable() -> Self {
        Self {
            runner: Arc::new(SystemRunner::new()),
            exe: None,
        }
    }

    /// Construct against an explicit runner (used by the test suites).
    pub async fn detect_with(runner: Arc<dyn CommandRunner>) -> Self {
        let mut exe = None;
        for candidate in CANDIDATES {
            let spec = CommandSpec::new(*candidate, &["--version"], PROBE_TIMEOUT);
            match runner.run(&spec).await {
                Ok(output) if output.success() => {
                    debug!(path = candidate, version = output.stdout.trim(), "Found VBoxManage");
                    exe = Some(candidate.to_string());
                    break;
                }
                _ => continue,
            }
        }

        if exe.is_none() {
            info!("VBoxManage not found; VirtualBox backend unavailable");
        }

        Self { runner, exe }
    }

    fn exe(&self) -> Result<&str> {
        self.exe
            .as_deref()
            .ok_or(AdapterError::Unavailable(BackendKind::VirtualBox))
    }

    async fn vbox(&self, args: &[&str], timeout_secs: u64) -> Result<CommandOutput> {
        let exe = self.exe()?;
        let spec = CommandSpec::new(exe, args, timeout_secs);
        let output = self.runner.run(&spec).await?;
        expect_success(&spec, &output)?;
        Ok(output)
    }

    /// Fetch the `--machinereadable` properties of one VM.
    pub async fn vm_info(&self, id: &str) -> Result<HashMap<String, String>> {
        let output = self
            .vbox(&["showvminfo", id, "--machinereadable"], INFO_TIMEOUT)
            .await?;
        Ok(parse::parse_machine_readable(&output.stdout))
    }

    fn default_disk_path(name: &str) -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("VirtualBox VMs")
            .join(name)
            .join(format!("{}.vdi", name))
    }
}

#[async_trait]
impl VirtBackend for VboxBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::VirtualBox
    }

    fn is_available(&self) -> bool {
        self.exe.is_some()
    }

    #[instrument(skip(self))]
    async fn list(&self, _include_stopped: bool) -> Result<Vec<Instance>> {
        let output = self.vbox(&["list", "vms"], INFO_TIMEOUT).await?;

        // Each VM costs a second showvminfo call; fine at desktop-scale
        // inventories, a scaling limit beyond that.
        let mut instances = Vec::new();
        for line in output.stdout.lines() {
            let Some((name, uuid)) = parse::parse_list_line(line) else {
                continue;
            };

            let info = match self.vm_info(&uuid).await {
                Ok(info) => info,
                Err(e) => {
                    warn!(vm = %name, error = %e, "Could not fetch VM details");
                    HashMap::new()
                }
            };

            instances.push(Instance {
                id: uuid,
                name,
                kind: BackendKind::VirtualBox,
                state: info
                    .get("VMState")
                    .map(|s| parse::map_vm_state(s))
                    .unwrap_or(InstanceState::Unknown),
                memory_mb: info
                    .get("memory")
                    .and_then(|m| m.parse().ok())
                    .unwrap_or(0),
                cpu_count: info.get("cpus").and_then(|c| c.parse().ok()).unwrap_or(0),
                created_at: None,
                image: None,
            });
        }

        debug!(count = instances.len(), "Listed VirtualBox VMs");
        Ok(instances)
    }

    #[instrument(skip(self), fields(vm_id = %id))]
    async fn start(&self, id: &str) -> Result<()> {
        self.vbox(&["startvm", id], CONTROL_TIMEOUT).await?;
        info!("VM started");
        Ok(())
    }

    #[instrument(skip(self), fields(vm_id = %id))]
    async fn stop(&self, id: &str) -> Result<()> {
        self.vbox(&["controlvm", id, "poweroff"], CONTROL_TIMEOUT).await?;
        info!("VM powered off");
        Ok(())
    }

    async fn pause(&self, id: &str) -> Result<()> {
        self.vbox(&["controlvm", id, "pause"], LIGHT_CONTROL_TIMEOUT).await?;
        Ok(())
    }

    async fn resume(&self, id: &str) -> Result<()> {
        self.vbox(&["controlvm", id, "resume"], LIGHT_CONTROL_TIMEOUT).await?;
        Ok(())
    }

    async fn reset(&self, id: &str) -> Result<()> {
        self.vbox(&["controlvm", id, "reset"], LIGHT_CONTROL_TIMEOUT).await?;
        Ok(())
    }

    /// Register, size and wire up a new VM.
    ///
    /// Each step depends on the previous ones; a failure reports the step and
    /// leaves everything already done in place.
    #[instrument(skip(self, spec), fields(vm_name = spec.name.as_deref().unwrap_or("")))]
    async fn create(&self, spec: &CreateSpec) -> Result<()> {
        let name = spec
            .name
            .as_deref()
            .ok_or_else(|| AdapterError::InvalidSpec("a VM name is required".to_string()))?;

        info!("Creating VM");

        self.vbox(&["createvm", "--name", name, "--register"], CONTROL_TIMEOUT)
            .await
            .map_err(|e| e.at_step("register vm"))?;

        // createvm prints the UUID, but the machine-readable query is the
        // stable way to get it.
        let info = self.vm_info(name).await.map_err(|e| e.at_step("query uuid"))?;
        let uuid = info.get("UUID").cloned().ok_or_else(|| {
            AdapterError::ParseFailed {
                what: "showvminfo output",
                detail: "missing UUID property".to_string(),
            }
            .at_step("query uuid")
        })?;

        let memory = spec.memory_mb.to_string();
        self.vbox(&["modifyvm", &uuid, "--memory", &memory], INFO_TIMEOUT)
            .await
            .map_err(|e| e.at_step("set memory"))?;

        let cpus = spec.cpus.to_string();
        self.vbox(&["modifyvm", &uuid, "--cpus", &cpus], INFO_TIMEOUT)
            .await
            .map_err(|e| e.at_step("set cpus"))?;

        self.vbox(&["modifyvm", &uuid, "--ostype", &spec.os_type], INFO_TIMEOUT)
            .await
            .map_err(|e| e.at_step("set os type"))?;

        self.vbox(
            &[
                "storagectl", &uuid, "--name", SATA_CONTROLLER, "--add", "sata",
                "--controller", "IntelAHCI",
            ],
            INFO_TIMEOUT,
        )
        .await
        .map_err(|e| e.at_step("add storage controller"))?;

        let disk_path = spec
            .disk_path
            .clone()
            .unwrap_or_else(|| Self::default_disk_path(name));
        let disk = disk_path.to_string_lossy();
        let disk_size = spec.disk_size_mb.to_string();

        self.vbox(&["createhd", "--filename", &disk, "--size", &disk_size], CONTROL_TIMEOUT)
            .await
            .map_err(|e| e.at_step("create disk"))?;

        self.vbox(
            &[
                "storageattach", &uuid, "--storagectl", SATA_CONTROLLER, "--port", "0",
                "--device", "0", "--type", "hdd", "--medium", &disk,
            ],
            INFO_TIMEOUT,
        )
        .await
        .map_err(|e| e.at_step("attach disk"))?;

        if let Some(iso) = &spec.iso_path {
            if iso.exists() {
                self.attach_media(&uuid, iso)
                    .await
                    .map_err(|e| e.at_step("attach iso"))?;
            }
        }

        info!(vm_id = %uuid, "VM created");
        Ok(())
    }

    #[instrument(skip(self, iso_path), fields(vm_id = %id))]
    async fn attach_media(&self, id: &str, iso_path: &Path) -> Result<()> {
        self.exe()?;

        // The IDE controller may already exist from an earlier attach; the
        // add fails then and the attach below still succeeds.
        let _ = self
            .vbox(&["storagectl", id, "--name", IDE_CONTROLLER, "--add", "ide"], INFO_TIMEOUT)
            .await;

        let iso = iso_path.to_string_lossy();
        self.vbox(
            &[
                "storageattach", id, "--storagectl", IDE_CONTROLLER, "--port", "0",
                "--device", "0", "--type", "dvddrive", "--medium", &iso,
            ],
            INFO_TIMEOUT,
        )
        .await?;

        info!("ISO attached");
        Ok(())
    }

    /// Detach by setting the medium to `none`; the controller stays.
    async fn detach_media(&self, id: &str) -> Result<()> {
        self.vbox(
            &[
                "storageattach", id, "--storagectl", IDE_CONTROLLER, "--port", "0",
                "--device", "0", "--type", "dvddrive", "--medium", "none",
            ],
            INFO_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(vm_id = %id))]
    async fn list_disks(&self, id: &str) -> Result<Vec<Disk>> {
        let output = self
            .vbox(&["showvminfo", id, "--machinereadable"], INFO_TIMEOUT)
            .await?;

        let mut disks = Vec::new();
        for attachment in parse::parse_disk_attachments(&output.stdout) {
            if attachment.drive_type != "hdd" || attachment.medium.is_empty() {
                continue;
            }

            let (size_mb, format) = match self
                .vbox(&["showhdinfo", &attachment.medium], INFO_TIMEOUT)
                .await
            {
                Ok(out) => parse::parse_hdinfo(&out.stdout),
                Err(e) => {
                    warn!(path = %attachment.medium, error = %e, "Could not query disk image");
                    (0, "Unknown".to_string())
                }
            };

            disks.push(Disk {
                slot: DiskSlot {
                    controller: attachment.controller,
                    port: attachment.port,
                    device: attachment.device,
                },
                path: attachment.medium,
                size_mb,
                format,
            });
        }

        Ok(disks)
    }

    #[instrument(skip(self, disk_path), fields(vm_id = %id))]
    async fn add_disk(&self, id: &str, disk_path: &Path, size_mb: u64) -> Result<()> {
        let disk = disk_path.to_string_lossy();
        let size = size_mb.to_string();

        self.vbox(&["createhd", "--filename", &disk, "--size", &size], DISK_TIMEOUT)
            .await?;

        self.vbox(
            &[
                "storageattach", id, "--storagectl", SATA_CONTROLLER, "--port", "1",
                "--device", "0", "--type", "hdd", "--medium", &disk,
            ],
            CONTROL_TIMEOUT,
        )
        .await?;

        info!("Disk added");
        Ok(())
    }

    async fn resize_disk(&self, disk_path: &Path, new_size_mb: u64) -> Result<()> {
        let disk = disk_path.to_string_lossy();
        let size = new_size_mb.to_string();
        self.vbox(&["modifyhd", &disk, "--resize", &size], DISK_TIMEOUT)
            .await?;
        info!(path = %disk, new_size_mb, "Disk resized");
        Ok(())
    }

    #[instrument(skip(self), fields(vm_id = %id, controller = %slot.controller))]
    async fn remove_disk(&self, id: &str, slot: &DiskSlot) -> Result<()> {
        let port = slot.port.to_string();
        let device = slot.device.to_string();
        self.vbox(
            &[
                "storageattach", id, "--storagectl", &slot.controller, "--port", &port,
                "--device", &device, "--type", "hdd", "--medium", "none",
            ],
            CONTROL_TIMEOUT,
        )
        .await?;
        info!("Disk detached");
        Ok(())
    }
}

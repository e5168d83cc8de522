//! PowerShell-backed Hyper-V adapter.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::error::{AdapterError, Result};
use crate::exec::{expect_success, ps_quote, CommandOutput, CommandRunner, CommandSpec, SystemRunner};
use crate::traits::VirtBackend;
use crate::types::*;

use super::query;

const POWERSHELL: &str = "powershell";

const PROBE_TIMEOUT: u64 = 10;
const STATE_TIMEOUT: u64 = 10;
const LIST_TIMEOUT: u64 = 30;
const CONTROL_TIMEOUT: u64 = 30;
const CREATE_TIMEOUT: u64 = 60;
const DISK_TIMEOUT: u64 = 60;
const RESIZE_TIMEOUT: u64 = 120;

#[derive(Debug, Deserialize)]
struct PsVm {
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "State", default)]
    state: Value,
    #[serde(rename = "MemoryStartup")]
    memory_startup: Option<u64>,
    #[serde(rename = "ProcessorCount")]
    processor_count: Option<u32>,
    #[serde(rename = "CreationTime", default)]
    creation_time: Value,
    #[serde(rename = "Id", default)]
    id: Value,
}

#[derive(Debug, Deserialize)]
struct PsDisk {
    #[serde(rename = "ControllerType", default)]
    controller_type: Value,
    #[serde(rename = "ControllerNumber")]
    controller_number: Option<u32>,
    #[serde(rename = "ControllerLocation")]
    controller_location: Option<u32>,
    #[serde(rename = "Path")]
    path: Option<String>,
    #[serde(rename = "Size")]
    size: Option<u64>,
}

/// Adapter for Hyper-V through its PowerShell module.
///
/// Instances are addressed by VM name; Hyper-V cmdlets take `-Name`
/// throughout and the GUID is carried in [`Instance::id`] for display.
pub struct HyperVBackend {
    runner: Arc<dyn CommandRunner>,
    available: bool,
}

impl HyperVBackend {
    /// Probe for the Hyper-V module and construct the adapter.
    pub async fn detect() -> Self {
        Self::detect_with(Arc::new(SystemRunner::new())).await
    }

    /// An adapter whose probe is skipped, for wiring and tests.
    pub fn unavailable() -> Self {
        Self {
            runner: Arc::new(SystemRunner::new()),
            available: false,
        }
    }

    /// Construct against an explicit runner (used by the test suites).
    pub async fn detect_with(runner: Arc<dyn CommandRunner>) -> Self {
        let spec = CommandSpec::new(
            POWERSHELL,
            &["-NoProfile", "-Command", "Get-Module -ListAvailable -Name Hyper-V"],
            PROBE_TIMEOUT,
        );

        let available = match runner.run(&spec).await {
            Ok(output) => output.stdout.contains("Hyper-V"),
            Err(_) => false,
        };

        if !available {
            info!("Hyper-V module not importable; Hyper-V backend unavailable");
        }

        Self { runner, available }
    }

    fn ensure(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(AdapterError::Unavailable(BackendKind::HyperV))
        }
    }

    async fn ps(&self, script: String, timeout_secs: u64) -> Result<CommandOutput> {
        self.ensure()?;
        let spec = CommandSpec {
            program: POWERSHELL.to_string(),
            args: vec!["-NoProfile".to_string(), "-Command".to_string(), script],
            timeout_secs,
        };
        let output = self.runner.run(&spec).await?;
        expect_success(&spec, &output)?;
        Ok(output)
    }

    /// Query the current state of one VM by name.
    pub async fn vm_state(&self, name: &str) -> Result<InstanceState> {
        let output = self
            .ps(
                format!(
                    "Get-VM -Name {} | Select-Object -ExpandProperty State",
                    ps_quote(name)
                ),
                STATE_TIMEOUT,
            )
            .await?;
        Ok(query::map_state_name(&output.stdout))
    }

    fn disk_size_gb(size_mb: u64) -> u64 {
        (size_mb / 1024).max(1)
    }
}

#[async_trait]
impl VirtBackend for HyperVBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::HyperV
    }

    fn is_available(&self) -> bool {
        self.available
    }

    #[instrument(skip(self))]
    async fn list(&self, _include_stopped: bool) -> Result<Vec<Instance>> {
        let output = self
            .ps(
                "Get-VM | Select-Object Name, State, MemoryStartup, ProcessorCount, \
                 CreationTime, Id | ConvertTo-Json"
                    .to_string(),
                LIST_TIMEOUT,
            )
            .await?;

        let records: Vec<PsVm> = match query::parse_one_or_many(&output.stdout, "Get-VM output") {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Could not decode VM list; returning empty inventory");
                return Ok(Vec::new());
            }
        };

        let instances = records
            .into_iter()
            .map(|vm| {
                let name = vm.name.unwrap_or_else(|| "Unknown".to_string());
                let id = query::value_to_display(&vm.id);
                Instance {
                    id: if id.is_empty() { name.clone() } else { id },
                    name,
                    kind: BackendKind::HyperV,
                    state: query::map_ps_state(&vm.state),
                    memory_mb: vm.memory_startup.unwrap_or(0) / (1024 * 1024),
                    cpu_count: vm.processor_count.unwrap_or(0),
                    created_at: {
                        let t = query::value_to_display(&vm.creation_time);
                        (!t.is_empty()).then_some(t)
                    },
                    image: None,
                }
            })
            .collect::<Vec<_>>();

        debug!(count = instances.len(), "Listed Hyper-V VMs");
        Ok(instances)
    }

    #[instrument(skip(self), fields(vm_name = %id))]
    async fn start(&self, id: &str) -> Result<()> {
        self.ps(format!("Start-VM -Name {}", ps_quote(id)), CONTROL_TIMEOUT)
            .await?;
        info!("VM started");
        Ok(())
    }

    #[instrument(skip(self), fields(vm_name = %id))]
    async fn stop(&self, id: &str) -> Result<()> {
        self.ps(format!("Stop-VM -Name {} -Force", ps_quote(id)), CONTROL_TIMEOUT)
            .await?;
        info!("VM stopped");
        Ok(())
    }

    async fn pause(&self, id: &str) -> Result<()> {
        self.ps(format!("Suspend-VM -Name {}", ps_quote(id)), CONTROL_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn resume(&self, id: &str) -> Result<()> {
        self.ps(format!("Resume-VM -Name {}", ps_quote(id)), CONTROL_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn reset(&self, id: &str) -> Result<()> {
        self.ps(format!("Restart-VM -Name {} -Force", ps_quote(id)), CONTROL_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Two-phase creation: instantiate with memory and generation, then set
    /// the processor count. The default VHDX lands next to the VM's own
    /// configuration, at the path the host reports after creation.
    #[instrument(skip(self, spec), fields(vm_name = spec.name.as_deref().unwrap_or("")))]
    async fn create(&self, spec: &CreateSpec) -> Result<()> {
        let name = spec
            .name
            .as_deref()
            .ok_or_else(|| AdapterError::InvalidSpec("a VM name is required".to_string()))?;
        let q_name = ps_quote(name);

        info!("Creating VM");

        self.ps(
            format!(
                "New-VM -Name {} -MemoryStartupBytes {}MB -Generation 2",
                q_name, spec.memory_mb
            ),
            CREATE_TIMEOUT,
        )
        .await
        .map_err(|e| e.at_step("create vm"))?;

        self.ps(
            format!("Set-VM -Name {} -ProcessorCount {}", q_name, spec.cpus),
            CONTROL_TIMEOUT,
        )
        .await
        .map_err(|e| e.at_step("set processor count"))?;

        let size_gb = Self::disk_size_gb(spec.disk_size_mb);
        let disk_script = match &spec.disk_path {
            Some(path) => {
                let q_path = ps_quote(&path.to_string_lossy());
                format!(
                    "New-VHD -Path {q_path} -SizeBytes {size_gb}GB -Dynamic; \
                     Add-VMHardDiskDrive -VMName {q_name} -Path {q_path}"
                )
            }
            // The VM's directory only exists once creation completed, so the
            // default path has to come from the host.
            None => format!(
                "$vmPath = (Get-VM -Name {q_name}).Path; \
                 $vhdPath = Join-Path $vmPath {q_file}; \
                 New-VHD -Path $vhdPath -SizeBytes {size_gb}GB -Dynamic; \
                 Add-VMHardDiskDrive -VMName {q_name} -Path $vhdPath",
                q_file = ps_quote(&format!("{}.vhdx", name)),
            ),
        };

        self.ps(disk_script, DISK_TIMEOUT)
            .await
            .map_err(|e| e.at_step("attach disk"))?;

        if let Some(iso) = &spec.iso_path {
            if iso.exists() {
                self.attach_media(name, iso)
                    .await
                    .map_err(|e| e.at_step("attach iso"))?;
            }
        }

        info!("VM created");
        Ok(())
    }

    #[instrument(skip(self, iso_path), fields(vm_name = %id))]
    async fn attach_media(&self, id: &str, iso_path: &Path) -> Result<()> {
        self.ps(
            format!(
                "Add-VMDvdDrive -VMName {} -Path {}",
                ps_quote(id),
                ps_quote(&iso_path.to_string_lossy())
            ),
            CONTROL_TIMEOUT,
        )
        .await?;
        info!("ISO attached");
        Ok(())
    }

    async fn detach_media(&self, id: &str) -> Result<()> {
        let q_name = ps_quote(id);
        self.ps(
            format!(
                "$dvd = Get-VMDvdDrive -VMName {q_name}; \
                 if ($dvd) {{ Remove-VMDvdDrive -VMName {q_name} \
                 -ControllerNumber $dvd.ControllerNumber \
                 -ControllerLocation $dvd.ControllerLocation }}"
            ),
            CONTROL_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(vm_name = %id))]
    async fn list_disks(&self, id: &str) -> Result<Vec<Disk>> {
        let output = self
            .ps(
                format!(
                    "Get-VMHardDiskDrive -VMName {} | Select-Object ControllerType, \
                     ControllerNumber, ControllerLocation, Path, Size | ConvertTo-Json",
                    ps_quote(id)
                ),
                LIST_TIMEOUT,
            )
            .await?;

        let records: Vec<PsDisk> =
            match query::parse_one_or_many(&output.stdout, "Get-VMHardDiskDrive output") {
                Ok(records) => records,
                Err(e) => {
                    warn!(error = %e, "Could not decode disk list; returning empty set");
                    return Ok(Vec::new());
                }
            };

        let disks = records
            .into_iter()
            .map(|disk| {
                let path = disk.path.unwrap_or_default();
                let controller_number = disk.controller_number.unwrap_or(0);
                let format = if path.to_ascii_lowercase().ends_with(".vhdx") {
                    "VHDX"
                } else {
                    "VHD"
                };

                Disk {
                    slot: DiskSlot {
                        controller: format!(
                            "{} {}",
                            match query::value_to_display(&disk.controller_type).as_str() {
                                "" => "Unknown".to_string(),
                                other => other.to_string(),
                            },
                            controller_number
                        ),
                        port: disk.controller_location.unwrap_or(0),
                        device: controller_number,
                    },
                    path,
                    size_mb: disk.size.unwrap_or(0) / (1024 * 1024),
                    format: format.to_string(),
                }
            })
            .collect();

        Ok(disks)
    }

    #[instrument(skip(self, disk_path), fields(vm_name = %id))]
    async fn add_disk(&self, id: &str, disk_path: &Path, size_mb: u64) -> Result<()> {
        let q_path = ps_quote(&disk_path.to_string_lossy());
        let size_gb = Self::disk_size_gb(size_mb);
        self.ps(
            format!(
                "New-VHD -Path {q_path} -SizeBytes {size_gb}GB -Dynamic; \
                 Add-VMHardDiskDrive -VMName {} -Path {q_path}",
                ps_quote(id)
            ),
            DISK_TIMEOUT,
        )
        .await?;
        info!("Disk added");
        Ok(())
    }

    async fn resize_disk(&self, disk_path: &Path, new_size_mb: u64) -> Result<()> {
        let bytes = new_size_mb * 1024 * 1024;
        self.ps(
            format!(
                "Resize-VHD -Path {} -SizeBytes {}",
                ps_quote(&disk_path.to_string_lossy()),
                bytes
            ),
            RESIZE_TIMEOUT,
        )
        .await?;
        info!(path = %disk_path.display(), new_size_mb, "Disk resized");
        Ok(())
    }

    /// The slot round-trips from [`VirtBackend::list_disks`]: `device`
    /// carries the controller number and `port` the controller location.
    #[instrument(skip(self), fields(vm_name = %id))]
    async fn remove_disk(&self, id: &str, slot: &DiskSlot) -> Result<()> {
        self.ps(
            format!(
                "Remove-VMHardDiskDrive -VMName {} -ControllerNumber {} -ControllerLocation {}",
                ps_quote(id),
                slot.device,
                slot.port
            ),
            CONTROL_TIMEOUT,
        )
        .await?;
        info!("Disk removed");
        Ok(())
    }
}

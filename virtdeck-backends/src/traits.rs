//! Core backend abstraction trait.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::*;

/// Common capability interface over the virtualization backends.
///
/// Each adapter translates this fixed vocabulary into its engine's native
/// calls and parses the native output back into the shared record shapes.
/// Availability is probed once at construction and cached; when the probe
/// failed, every operation short-circuits to
/// [`AdapterError::Unavailable`](crate::AdapterError::Unavailable) without
/// touching the backend.
///
/// Implementations are `Send + Sync` but do not serialize calls; concurrent
/// invocations against the same backend interleave at the discretion of the
/// engine, exactly as when two shells drive it at once.
#[async_trait]
pub trait VirtBackend: Send + Sync {
    /// Which backend this adapter drives.
    fn kind(&self) -> BackendKind;

    /// Cached result of the construction-time availability probe.
    fn is_available(&self) -> bool;

    /// Fetch the live inventory.
    ///
    /// `include_stopped` only filters the container engine; hypervisors
    /// always report stopped machines.
    async fn list(&self, include_stopped: bool) -> Result<Vec<Instance>>;

    // =========================================================================
    // Control verbs
    // =========================================================================

    async fn start(&self, id: &str) -> Result<()>;

    async fn stop(&self, id: &str) -> Result<()>;

    async fn pause(&self, id: &str) -> Result<()>;

    async fn resume(&self, id: &str) -> Result<()>;

    async fn reset(&self, id: &str) -> Result<()>;

    // =========================================================================
    // Creation
    // =========================================================================

    /// Create a new instance.
    ///
    /// Hypervisor creation is a fixed sequence of dependent native calls; a
    /// failing step is reported via
    /// [`AdapterError::CreateStep`](crate::AdapterError::CreateStep) and
    /// earlier steps are not rolled back, so a partially created instance is
    /// a possible observable outcome.
    async fn create(&self, spec: &CreateSpec) -> Result<()>;

    // =========================================================================
    // Removable media
    // =========================================================================

    async fn attach_media(&self, id: &str, iso_path: &Path) -> Result<()>;

    async fn detach_media(&self, id: &str) -> Result<()>;

    // =========================================================================
    // Disks
    // =========================================================================

    /// List disks attached to an instance. Every returned disk carries a
    /// complete addressing slot usable with [`VirtBackend::remove_disk`].
    async fn list_disks(&self, id: &str) -> Result<Vec<Disk>>;

    /// Create a backing file at `disk_path` and attach it.
    async fn add_disk(&self, id: &str, disk_path: &Path, size_mb: u64) -> Result<()>;

    /// Grow a disk's backing file to `new_size_mb`.
    async fn resize_disk(&self, disk_path: &Path, new_size_mb: u64) -> Result<()>;

    /// Detach the disk addressed by `slot`.
    async fn remove_disk(&self, id: &str, slot: &DiskSlot) -> Result<()>;
}

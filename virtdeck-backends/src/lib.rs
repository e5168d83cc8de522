//! # virtdeck Backends
//!
//! Unified abstraction over the local virtualization backends: the container
//! engine (Docker), the VirtualBox command-line frontend and the Hyper-V
//! PowerShell module.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Orchestrator                  │
//! │  refresh_all() fans out, act() fans in      │
//! └─────────────────────┬───────────────────────┘
//!                       │ VirtBackend trait
//!        ┌──────────────┼──────────────┐
//!        ▼              ▼              ▼
//! ┌─────────────┐ ┌─────────────┐ ┌─────────────┐
//! │   Docker    │ │ VirtualBox  │ │   Hyper-V   │
//! │  (bollard)  │ │ (VBoxManage)│ │ (PowerShell)│
//! └─────────────┘ └─────────────┘ └─────────────┘
//! ```
//!
//! Each adapter probes its engine once at construction; an unavailable
//! backend answers every call with `AdapterError::Unavailable` without
//! touching the engine. Inventory objects are built fresh on every query and
//! never cached.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use virtdeck_backends::{DockerBackend, Orchestrator, VboxBackend, VirtBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backends: Vec<Arc<dyn VirtBackend>> = vec![
//!         Arc::new(DockerBackend::connect().await),
//!         Arc::new(VboxBackend::detect().await),
//!     ];
//!
//!     let orchestrator = Orchestrator::new(backends);
//!     let snapshot = orchestrator.refresh_all().await;
//!     for (kind, inventory) in &snapshot {
//!         println!("{}: {} instances", kind, inventory.instances.len());
//!     }
//! }
//! ```

pub mod docker;
pub mod error;
pub mod exec;
pub mod facade;
pub mod hyperv;
pub mod mock;
pub mod traits;
pub mod types;
pub mod vbox;

pub use docker::{DockerBackend, ImageInfo};
pub use error::{AdapterError, Result};
pub use exec::{CommandOutput, CommandRunner, CommandSpec, ScriptedRunner, SystemRunner};
pub use facade::{BackendInventory, InventorySnapshot, Orchestrator, Verb};
pub use hyperv::HyperVBackend;
pub use mock::MockBackend;
pub use traits::VirtBackend;
pub use types::*;
pub use vbox::VboxBackend;

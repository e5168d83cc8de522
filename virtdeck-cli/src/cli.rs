//! Command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// virtdeck - unified inventory and control over local virtualization backends
#[derive(Parser, Debug)]
#[command(name = "virtdeck")]
#[command(about = "Unified inventory and control over Docker, VirtualBox and Hyper-V")]
#[command(version)]
pub struct Args {
    /// Path to the settings file (defaults used when missing)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    pub log_level: String,

    /// Use in-memory mock backends instead of the real engines
    #[arg(long)]
    pub dev: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the combined inventory of every backend
    List {
        /// Restrict to one backend (docker, virtualbox, hyperv)
        #[arg(long)]
        backend: Option<String>,

        /// Only running instances (container engine only)
        #[arg(long)]
        running: bool,
    },

    /// Start an instance
    Start { backend: String, target: String },

    /// Stop an instance
    Stop { backend: String, target: String },

    /// Pause an instance
    Pause { backend: String, target: String },

    /// Resume a paused instance
    Resume { backend: String, target: String },

    /// Reset (hard-restart) an instance
    Reset { backend: String, target: String },

    /// Create a virtual machine
    CreateVm {
        /// Backend to create on (virtualbox, hyperv)
        backend: String,
        name: String,

        /// Memory in MiB (settings default when omitted)
        #[arg(long)]
        memory: Option<u64>,

        /// Virtual CPU count (settings default when omitted)
        #[arg(long)]
        cpus: Option<u32>,

        /// VirtualBox OS type hint
        #[arg(long, default_value = "Ubuntu_64")]
        os_type: String,

        /// ISO to attach when it exists locally
        #[arg(long)]
        iso: Option<PathBuf>,

        /// Backing file for the primary disk
        #[arg(long)]
        disk: Option<PathBuf>,

        /// Primary disk size in MiB
        #[arg(long, default_value_t = 20480)]
        disk_size: u64,
    },

    /// Run a new container, detached
    Run {
        image: String,

        #[arg(long)]
        name: Option<String>,

        /// Port mapping host:container (settings default when omitted)
        #[arg(short = 'p', long = "publish")]
        ports: Vec<String>,

        /// Environment variable KEY=VALUE
        #[arg(short = 'e', long = "env")]
        env: Vec<String>,

        /// Volume bind host:container
        #[arg(short = 'v', long = "volume")]
        volumes: Vec<String>,
    },

    /// Pull a container image
    Pull { image: String },

    /// Remove a container
    Rm { id: String },

    /// List locally stored container images
    Images,

    /// List disks attached to an instance
    Disks { backend: String, target: String },

    /// Create a disk and attach it to an instance
    AddDisk {
        backend: String,
        target: String,
        path: PathBuf,

        #[arg(long, default_value_t = 20480)]
        size: u64,
    },

    /// Grow a disk's backing file
    ResizeDisk {
        backend: String,
        path: PathBuf,
        /// New size in MiB
        size: u64,
    },

    /// Detach a disk by its addressing triple
    RemoveDisk {
        backend: String,
        target: String,
        controller: String,
        port: u32,
        device: u32,
    },

    /// Attach an ISO to an instance
    AttachIso {
        backend: String,
        target: String,
        iso: PathBuf,
    },

    /// Detach the attached ISO from an instance
    DetachIso { backend: String, target: String },

    /// Refresh the inventory periodically and print each snapshot
    Watch,
}

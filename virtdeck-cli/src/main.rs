//! # virtdeck CLI
//!
//! Thin front-end over the backend layer: constructs one adapter per
//! virtualization engine at startup, hands them to the orchestration facade
//! and maps subcommands onto its operations.
//!
//! ## Usage
//! ```bash
//! virtdeck list
//! virtdeck start virtualbox MyVM
//! virtdeck run nginx:latest -p 8080:80
//! virtdeck watch
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use tracing::warn;

mod cli;
mod settings;

use cli::{Args, Command};
use settings::{parse_env_assignment, parse_port_binding, Settings, DEFAULT_SETTINGS_PATH};
use virtdeck_backends::{
    BackendKind, CreateSpec, DiskSlot, DockerBackend, HyperVBackend, Instance, InventorySnapshot,
    MockBackend, Orchestrator, VboxBackend, Verb, VirtBackend,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    virtdeck_common::init_logging(&args.log_level)?;

    let settings = Settings::load(args.config.as_deref().unwrap_or(DEFAULT_SETTINGS_PATH));

    let (backends, docker) = build_backends(args.dev, &settings).await;
    let orchestrator = Arc::new(Orchestrator::new(backends));

    run(args.command, &orchestrator, docker.as_deref(), &settings).await
}

/// Construct every adapter once; the facade and the whole run share them.
async fn build_backends(
    dev: bool,
    settings: &Settings,
) -> (Vec<Arc<dyn VirtBackend>>, Option<Arc<DockerBackend>>) {
    if dev {
        let mocks: Vec<Arc<dyn VirtBackend>> = vec![
            Arc::new(MockBackend::new(BackendKind::Docker)),
            Arc::new(MockBackend::new(BackendKind::VirtualBox)),
            Arc::new(MockBackend::new(BackendKind::HyperV)),
        ];
        return (mocks, None);
    }

    let docker = Arc::new(if settings.docker.auto_connect {
        DockerBackend::connect().await
    } else {
        DockerBackend::unavailable()
    });
    let vbox = Arc::new(if settings.virtualbox.auto_connect {
        VboxBackend::detect().await
    } else {
        VboxBackend::unavailable()
    });
    let hyperv = Arc::new(if settings.hyperv.auto_connect {
        HyperVBackend::detect().await
    } else {
        HyperVBackend::unavailable()
    });

    let backends: Vec<Arc<dyn VirtBackend>> = vec![
        Arc::clone(&docker) as Arc<dyn VirtBackend>,
        vbox,
        hyperv,
    ];

    (backends, Some(docker))
}

async fn run(
    command: Command,
    orchestrator: &Arc<Orchestrator>,
    docker: Option<&DockerBackend>,
    settings: &Settings,
) -> Result<()> {
    match command {
        Command::List { backend, running } => {
            match backend {
                Some(name) => {
                    let backend = lookup(orchestrator, &name)?;
                    let instances = backend.list(!running).await?;
                    print_instances(&instances);
                }
                None => {
                    let snapshot = orchestrator.refresh_all().await;
                    print_snapshot(&snapshot);
                }
            }
            Ok(())
        }

        Command::Start { backend, target } => act(orchestrator, &backend, &target, Verb::Start).await,
        Command::Stop { backend, target } => act(orchestrator, &backend, &target, Verb::Stop).await,
        Command::Pause { backend, target } => act(orchestrator, &backend, &target, Verb::Pause).await,
        Command::Resume { backend, target } => act(orchestrator, &backend, &target, Verb::Resume).await,
        Command::Reset { backend, target } => act(orchestrator, &backend, &target, Verb::Reset).await,

        Command::CreateVm {
            backend,
            name,
            memory,
            cpus,
            os_type,
            iso,
            disk,
            disk_size,
        } => {
            let kind = parse_kind(&backend)?;
            let defaults = match kind {
                BackendKind::VirtualBox => &settings.virtualbox,
                BackendKind::HyperV => &settings.hyperv,
                BackendKind::Docker => bail!("use `run` to create containers"),
            };

            let mut spec = CreateSpec::new(&name)
                .with_memory(memory.unwrap_or(defaults.default_memory))
                .with_cpus(cpus.unwrap_or(defaults.default_cpus))
                .with_os_type(os_type);
            spec.disk_path = disk;
            spec.disk_size_mb = disk_size;
            spec.iso_path = iso;

            lookup(orchestrator, &backend)?.create(&spec).await?;
            println!("Created VM {}", name);
            Ok(())
        }

        Command::Run {
            image,
            name,
            ports,
            env,
            volumes,
        } => {
            let mut spec = CreateSpec::from_image(&image);
            spec.name = name;

            if ports.is_empty() {
                if let Some((container, host)) = parse_port_binding(&settings.docker.default_ports)
                {
                    spec.ports.insert(container, host);
                }
            } else {
                for binding in &ports {
                    let (container, host) = parse_port_binding(binding)
                        .ok_or_else(|| anyhow!("invalid port mapping: {}", binding))?;
                    spec.ports.insert(container, host);
                }
            }

            for assignment in &env {
                let (key, value) = parse_env_assignment(assignment)
                    .ok_or_else(|| anyhow!("invalid environment assignment: {}", assignment))?;
                spec.env.insert(key, value);
            }

            for bind in &volumes {
                let (host, container) = bind
                    .split_once(':')
                    .ok_or_else(|| anyhow!("invalid volume bind: {}", bind))?;
                spec.volumes.insert(host.to_string(), container.to_string());
            }

            lookup(orchestrator, "docker")?.create(&spec).await?;
            println!("Started container from {}", image);
            Ok(())
        }

        Command::Pull { image } => {
            require_docker(docker)?.pull(&image).await?;
            println!("Pulled {}", image);
            Ok(())
        }

        Command::Rm { id } => {
            require_docker(docker)?.remove(&id).await?;
            println!("Removed {}", id);
            Ok(())
        }

        Command::Images => {
            let images = require_docker(docker)?.list_images().await?;
            for image in images {
                println!(
                    "{:<14} {:>10} MB  {}",
                    image.id,
                    image.size_bytes / (1024 * 1024),
                    image.tags.join(", ")
                );
            }
            Ok(())
        }

        Command::Disks { backend, target } => {
            let disks = lookup(orchestrator, &backend)?.list_disks(&target).await?;
            for disk in disks {
                println!(
                    "{:<20} port {} device {}  {:>8} MB  {:<5} {}",
                    disk.slot.controller,
                    disk.slot.port,
                    disk.slot.device,
                    disk.size_mb,
                    disk.format,
                    disk.path
                );
            }
            Ok(())
        }

        Command::AddDisk {
            backend,
            target,
            path,
            size,
        } => {
            lookup(orchestrator, &backend)?
                .add_disk(&target, &path, size)
                .await?;
            println!("Added disk {}", path.display());
            Ok(())
        }

        Command::ResizeDisk { backend, path, size } => {
            lookup(orchestrator, &backend)?
                .resize_disk(&path, size)
                .await
                .with_context(|| format!("failed to resize {}", path.display()))?;
            println!("Resized {} to {} MB", path.display(), size);
            Ok(())
        }

        Command::RemoveDisk {
            backend,
            target,
            controller,
            port,
            device,
        } => {
            let slot = DiskSlot {
                controller,
                port,
                device,
            };
            lookup(orchestrator, &backend)?
                .remove_disk(&target, &slot)
                .await?;
            println!("Removed disk at {}:{}:{}", slot.controller, slot.port, slot.device);
            Ok(())
        }

        Command::AttachIso {
            backend,
            target,
            iso,
        } => {
            lookup(orchestrator, &backend)?
                .attach_media(&target, &iso)
                .await?;
            println!("Attached {}", iso.display());
            Ok(())
        }

        Command::DetachIso { backend, target } => {
            lookup(orchestrator, &backend)?.detach_media(&target).await?;
            println!("Detached media from {}", target);
            Ok(())
        }

        Command::Watch => watch(orchestrator, settings).await,
    }
}

async fn act(
    orchestrator: &Orchestrator,
    backend: &str,
    target: &str,
    verb: Verb,
) -> Result<()> {
    let kind = parse_kind(backend)?;
    orchestrator
        .act(kind, target, verb)
        .await
        .with_context(|| format!("failed to {} {}", verb, target))?;
    println!("{}: {} ok", target, verb);
    Ok(())
}

/// Periodic refresh on the settings interval, printed until interrupted.
async fn watch(orchestrator: &Arc<Orchestrator>, settings: &Settings) -> Result<()> {
    if !settings.auto_refresh {
        warn!("auto_refresh is disabled; printing a single snapshot");
        print_snapshot(&orchestrator.refresh_all().await);
        return Ok(());
    }

    let interval = Duration::from_secs(settings.refresh_interval.max(1));
    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    let worker = orchestrator.spawn_refresh_loop(interval, tx);

    loop {
        tokio::select! {
            snapshot = rx.recv() => match snapshot {
                Some(snapshot) => print_snapshot(&snapshot),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    worker.abort();
    Ok(())
}

fn parse_kind(name: &str) -> Result<BackendKind> {
    name.parse::<BackendKind>().map_err(|e| anyhow!(e))
}

fn lookup(orchestrator: &Orchestrator, name: &str) -> Result<Arc<dyn VirtBackend>> {
    let kind = parse_kind(name)?;
    orchestrator
        .backend(kind)
        .ok_or_else(|| anyhow!("no {} backend registered", kind))
}

fn require_docker(docker: Option<&DockerBackend>) -> Result<&DockerBackend> {
    docker.context("container image commands are not available in dev mode")
}

fn print_snapshot(snapshot: &InventorySnapshot) {
    for (kind, inventory) in snapshot {
        if !inventory.available {
            println!("{}: unavailable", kind);
            continue;
        }
        println!("{}: {} instance(s)", kind, inventory.instances.len());
        print_instances(&inventory.instances);
    }
}

fn print_instances(instances: &[Instance]) {
    for instance in instances {
        println!(
            "  {:<24} {:<38} {:<10} {:>6} MB {:>3} cpu  {}",
            instance.name,
            instance.id,
            instance.state.to_string(),
            instance.memory_mb,
            instance.cpu_count,
            instance.image.as_deref().unwrap_or("-"),
        );
    }
}

//! Container engine adapter backed by bollard.
//!
//! The engine is reached through its local socket / named pipe; calls carry
//! no explicit deadline and rely on the client's own defaults. Media and
//! disk operations have no container counterpart and report `Unsupported`.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::{ContainerSummary, HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info, instrument};

use crate::error::{AdapterError, Result};
use crate::traits::VirtBackend;
use crate::types::*;

/// A locally stored image.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub id: String,
    pub tags: Vec<String>,
    pub size_bytes: i64,
    pub created_at: Option<String>,
}

/// Adapter for the local container engine.
pub struct DockerBackend {
    /// `None` when the construction-time ping failed.
    client: Option<Docker>,
}

impl DockerBackend {
    /// Connect to the local engine and ping it once; a failed ping leaves
    /// the adapter permanently unavailable.
    pub async fn connect() -> Self {
        let client = match Docker::connect_with_local_defaults() {
            Ok(docker) => match docker.ping().await {
                Ok(_) => {
                    info!("Connected to container engine");
                    Some(docker)
                }
                Err(e) => {
                    info!(error = %e, "Container engine not reachable");
                    None
                }
            },
            Err(e) => {
                info!(error = %e, "Container engine client could not be set up");
                None
            }
        };

        Self { client }
    }

    /// An adapter whose probe failed, for wiring and tests.
    pub fn unavailable() -> Self {
        Self { client: None }
    }

    fn client(&self) -> Result<&Docker> {
        self.client
            .as_ref()
            .ok_or(AdapterError::Unavailable(BackendKind::Docker))
    }

    /// Fetch an image by reference, blocking until the pull completes.
    #[instrument(skip(self))]
    pub async fn pull(&self, image: &str) -> Result<()> {
        let client = self.client()?;

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut stream = client.create_image(Some(options), None, None);
        while let Some(item) = stream.next().await {
            item.map_err(client_err)?;
        }

        info!(image, "Image pulled");
        Ok(())
    }

    /// List locally stored images.
    pub async fn list_images(&self) -> Result<Vec<ImageInfo>> {
        let client = self.client()?;

        let images = client
            .list_images(Some(ListImagesOptions::<String>::default()))
            .await
            .map_err(client_err)?;

        Ok(images
            .into_iter()
            .map(|image| ImageInfo {
                id: short_id(&image.id),
                tags: image.repo_tags,
                size_bytes: image.size,
                created_at: format_unix_timestamp(image.created),
            })
            .collect())
    }

    /// Delete a container. The engine's own refusal (e.g. still running)
    /// surfaces as the failure.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> Result<()> {
        let client = self.client()?;
        client
            .remove_container(id, None::<RemoveContainerOptions>)
            .await
            .map_err(client_err)?;
        info!(container = id, "Container removed");
        Ok(())
    }
}

fn client_err(e: bollard::errors::Error) -> AdapterError {
    AdapterError::Client(e.to_string())
}

fn short_id(id: &str) -> String {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    id.chars().take(12).collect()
}

fn format_unix_timestamp(secs: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(secs, 0).map(|t| t.to_rfc3339())
}

/// Map an engine state string into the shared vocabulary.
fn map_container_state(state: &str) -> InstanceState {
    match state {
        "running" | "restarting" => InstanceState::Running,
        "paused" => InstanceState::Paused,
        "created" | "exited" | "dead" | "removing" => InstanceState::Stopped,
        _ => InstanceState::Unknown,
    }
}

fn map_container(summary: ContainerSummary) -> Instance {
    let id = short_id(&summary.id.unwrap_or_default());
    let name = summary
        .names
        .unwrap_or_default()
        .into_iter()
        .next()
        .map(|n| n.trim_start_matches('/').to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| id.clone());

    // The summary's image field is the tag it was started from; untagged
    // containers fall back to the content id.
    let image = summary
        .image
        .filter(|i| !i.is_empty())
        .or_else(|| summary.image_id.map(|i| short_id(&i)));

    Instance {
        id,
        name,
        kind: BackendKind::Docker,
        state: summary
            .state
            .as_deref()
            .map(map_container_state)
            .unwrap_or(InstanceState::Unknown),
        memory_mb: 0,
        cpu_count: 0,
        created_at: summary.created.and_then(format_unix_timestamp),
        image,
    }
}

/// Normalize a port key to the engine's `port/proto` form.
fn port_key(port: &str) -> String {
    if port.contains('/') {
        port.to_string()
    } else {
        format!("{}/tcp", port)
    }
}

fn build_container_config(image: &str, spec: &CreateSpec) -> Config<String> {
    let env: Option<Vec<String>> = (!spec.env.is_empty())
        .then(|| spec.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect());

    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();
    for (container_port, host_port) in &spec.ports {
        let key = port_key(container_port);
        exposed_ports.insert(key.clone(), HashMap::new());
        port_bindings.insert(
            key,
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(host_port.clone()),
            }]),
        );
    }

    let binds: Option<Vec<String>> = (!spec.volumes.is_empty()).then(|| {
        spec.volumes
            .iter()
            .map(|(host, container)| format!("{}:{}", host, container))
            .collect()
    });

    let host_config = (binds.is_some() || !port_bindings.is_empty()).then(|| HostConfig {
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        binds,
        ..Default::default()
    });

    Config {
        image: Some(image.to_string()),
        env,
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config,
        ..Default::default()
    }
}

#[async_trait]
impl VirtBackend for DockerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Docker
    }

    fn is_available(&self) -> bool {
        self.client.is_some()
    }

    #[instrument(skip(self))]
    async fn list(&self, include_stopped: bool) -> Result<Vec<Instance>> {
        let client = self.client()?;

        let options = ListContainersOptions::<String> {
            all: include_stopped,
            ..Default::default()
        };

        let containers = client
            .list_containers(Some(options))
            .await
            .map_err(client_err)?;

        let instances: Vec<Instance> = containers.into_iter().map(map_container).collect();
        debug!(count = instances.len(), "Listed containers");
        Ok(instances)
    }

    async fn start(&self, id: &str) -> Result<()> {
        let client = self.client()?;
        client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(client_err)?;
        Ok(())
    }

    /// Stopping an already-stopped container is the engine's call to make;
    /// its answer passes through unmodified.
    #[instrument(skip(self))]
    async fn stop(&self, id: &str) -> Result<()> {
        let client = self.client()?;
        client
            .stop_container(id, None::<StopContainerOptions>)
            .await
            .map_err(client_err)?;
        info!(container = id, "Container stopped");
        Ok(())
    }

    async fn pause(&self, id: &str) -> Result<()> {
        let client = self.client()?;
        client.pause_container(id).await.map_err(client_err)?;
        Ok(())
    }

    async fn resume(&self, id: &str) -> Result<()> {
        let client = self.client()?;
        client.unpause_container(id).await.map_err(client_err)?;
        Ok(())
    }

    async fn reset(&self, id: &str) -> Result<()> {
        let client = self.client()?;
        client
            .restart_container(id, None::<RestartContainerOptions>)
            .await
            .map_err(client_err)?;
        Ok(())
    }

    /// Create and start a detached container.
    #[instrument(skip(self, spec), fields(image = spec.image.as_deref().unwrap_or("")))]
    async fn create(&self, spec: &CreateSpec) -> Result<()> {
        let client = self.client()?;

        let image = spec
            .image
            .as_deref()
            .ok_or_else(|| AdapterError::InvalidSpec("an image reference is required".to_string()))?;

        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let created = client
            .create_container(options, build_container_config(image, spec))
            .await
            .map_err(client_err)?;

        client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(client_err)?;

        info!(container = %short_id(&created.id), "Container started");
        Ok(())
    }

    async fn attach_media(&self, _id: &str, _iso_path: &Path) -> Result<()> {
        Err(AdapterError::Unsupported {
            backend: BackendKind::Docker,
            operation: "attach media",
        })
    }

    async fn detach_media(&self, _id: &str) -> Result<()> {
        Err(AdapterError::Unsupported {
            backend: BackendKind::Docker,
            operation: "detach media",
        })
    }

    async fn list_disks(&self, _id: &str) -> Result<Vec<Disk>> {
        Err(AdapterError::Unsupported {
            backend: BackendKind::Docker,
            operation: "list disks",
        })
    }

    async fn add_disk(&self, _id: &str, _disk_path: &Path, _size_mb: u64) -> Result<()> {
        Err(AdapterError::Unsupported {
            backend: BackendKind::Docker,
            operation: "add disk",
        })
    }

    async fn resize_disk(&self, _disk_path: &Path, _new_size_mb: u64) -> Result<()> {
        Err(AdapterError::Unsupported {
            backend: BackendKind::Docker,
            operation: "resize disk",
        })
    }

    async fn remove_disk(&self, _id: &str, _slot: &DiskSlot) -> Result<()> {
        Err(AdapterError::Unsupported {
            backend: BackendKind::Docker,
            operation: "remove disk",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_states_map_into_shared_vocabulary() {
        assert_eq!(map_container_state("running"), InstanceState::Running);
        assert_eq!(map_container_state("paused"), InstanceState::Paused);
        assert_eq!(map_container_state("exited"), InstanceState::Stopped);
        assert_eq!(map_container_state("created"), InstanceState::Stopped);
        assert_eq!(map_container_state("dead"), InstanceState::Stopped);
        assert_eq!(map_container_state("weird"), InstanceState::Unknown);
    }

    #[test]
    fn summary_maps_to_instance() {
        let summary = ContainerSummary {
            id: Some("sha256:0123456789abcdef0123".to_string()),
            names: Some(vec!["/web".to_string()]),
            image: Some("nginx:latest".to_string()),
            state: Some("running".to_string()),
            created: Some(1_700_000_000),
            ..Default::default()
        };

        let instance = map_container(summary);
        assert_eq!(instance.id, "0123456789ab");
        assert_eq!(instance.name, "web");
        assert_eq!(instance.kind, BackendKind::Docker);
        assert_eq!(instance.state, InstanceState::Running);
        assert_eq!(instance.image.as_deref(), Some("nginx:latest"));
        assert!(instance.created_at.is_some());
    }

    #[test]
    fn untagged_container_falls_back_to_image_id() {
        let summary = ContainerSummary {
            id: Some("abc".to_string()),
            image: Some(String::new()),
            image_id: Some("sha256:feedfacefeedfacefeed".to_string()),
            ..Default::default()
        };

        let instance = map_container(summary);
        assert_eq!(instance.image.as_deref(), Some("feedfacefeed"));
    }

    #[test]
    fn config_carries_ports_env_and_binds() {
        let spec = CreateSpec::from_image("nginx:latest")
            .with_port("80", "8080")
            .with_env("MODE", "prod")
            .with_volume("/srv/www", "/usr/share/nginx/html");

        let config = build_container_config("nginx:latest", &spec);

        assert_eq!(config.image.as_deref(), Some("nginx:latest"));
        assert_eq!(config.env.as_ref().unwrap(), &vec!["MODE=prod".to_string()]);

        let host_config = config.host_config.unwrap();
        let bindings = host_config.port_bindings.unwrap();
        let binding = bindings.get("80/tcp").unwrap().as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("8080"));
        assert_eq!(
            host_config.binds.unwrap(),
            vec!["/srv/www:/usr/share/nginx/html".to_string()]
        );
    }

    #[test]
    fn port_keys_get_a_default_protocol() {
        assert_eq!(port_key("80"), "80/tcp");
        assert_eq!(port_key("53/udp"), "53/udp");
    }

    #[tokio::test]
    async fn unavailable_adapter_short_circuits() {
        let backend = DockerBackend::unavailable();
        assert!(!backend.is_available());

        let err = backend.list(true).await.unwrap_err();
        assert!(matches!(err, AdapterError::Unavailable(BackendKind::Docker)));

        let err = backend.stop("abc").await.unwrap_err();
        assert!(matches!(err, AdapterError::Unavailable(BackendKind::Docker)));
    }
}

//! Docker client for the containers backing fork networks.

use std::{collections::HashMap, collections::HashSet, mem, path::Path, time::Duration};

use anyhow::{Context, Result};
use bollard::{
    Docker,
    container::{
        Config, CreateContainerOptions, RemoveContainerOptions, StopContainerOptions,
    },
    image::CreateImageOptions,
    secret::{HostConfig, PortBinding},
};
use derive_more::Deref;
use futures::{StreamExt, future::join_all};
use serde::{Deserialize, Serialize};
use tokio::{
    runtime::{Handle, RuntimeFlavor},
    task::block_in_place,
    time::timeout,
};

/// Timeout for removing containers when the client is dropped.
const DOCKER_DROP_TIMEOUT: Duration = Duration::from_secs(60);

/// A TCP port published from a container to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    /// The port inside the container.
    pub container_port: u16,
    /// The port on the host.
    pub host_port: u16,
}

impl PortMapping {
    pub fn tcp(container_port: u16, host_port: u16) -> Self {
        Self {
            container_port,
            host_port,
        }
    }
}

/// Configuration for starting a service container.
#[derive(Clone)]
pub struct ServiceConfig {
    pub image: DockerImage,
    pub entrypoint: Option<Vec<String>>,
    /// The command to run in the container. May carry secrets (fork URLs with
    /// API keys), so it is never logged and `Debug` omits it.
    pub cmd: Option<Vec<String>>,
    pub port_mappings: Vec<PortMapping>,
    /// Volume binds (host:container:mode format).
    pub binds: Vec<String>,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("image", &self.image)
            .field("entrypoint", &self.entrypoint)
            .field("port_mappings", &self.port_mappings)
            .field("binds", &self.binds)
            .finish_non_exhaustive()
    }
}

impl ServiceConfig {
    /// Create a new service config with the given image.
    pub fn new(image: DockerImage) -> Self {
        Self {
            image,
            entrypoint: None,
            cmd: None,
            port_mappings: Vec::new(),
            binds: Vec::new(),
        }
    }

    pub fn entrypoint(mut self, entrypoint: Vec<String>) -> Self {
        self.entrypoint = Some(entrypoint);
        self
    }

    pub fn cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = Some(cmd);
        self
    }

    pub fn port(mut self, mapping: PortMapping) -> Self {
        self.port_mappings.push(mapping);
        self
    }

    /// Add a volume bind.
    pub fn bind(mut self, host_path: &Path, container_path: &Path, mode: &str) -> Self {
        self.binds.push(format!(
            "{}:{}:{}",
            host_path.display(),
            container_path.display(),
            mode
        ));
        self
    }

    fn port_bindings(&self) -> HashMap<String, Option<Vec<PortBinding>>> {
        self.port_mappings
            .iter()
            .map(|pm| {
                (
                    format!("{}/tcp", pm.container_port),
                    Some(vec![PortBinding {
                        host_ip: Some("127.0.0.1".to_string()),
                        host_port: Some(pm.host_port.to_string()),
                    }]),
                )
            })
            .collect()
    }
}

/// Handler returned after starting a service.
#[derive(Debug, Clone)]
pub struct ServiceHandler {
    pub container_id: String,
    pub container_name: String,
}

/// A Docker image reference with image name and tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DockerImage {
    /// The image name (e.g., "ghcr.io/foundry-rs/foundry").
    pub image: String,
    /// The image tag (e.g., "latest" or "v1.0.0").
    pub tag: String,
}

impl DockerImage {
    pub fn new(image: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            tag: tag.into(),
        }
    }

    /// Get the full image reference (image:tag).
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

impl std::fmt::Display for DockerImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.image, self.tag)
    }
}

/// Docker client that removes the containers it started.
#[derive(Deref)]
pub struct ForkDocker {
    #[deref]
    docker: Docker,

    /// Containers that have been started and not yet removed.
    containers: HashSet<String>,

    /// Leave containers running on exit.
    no_cleanup: bool,
}

impl Drop for ForkDocker {
    fn drop(&mut self) {
        if self.no_cleanup {
            tracing::debug!("Cleanup of docker containers on exit is disabled. Exiting.");
            return;
        }

        if self.containers.is_empty() {
            return;
        }

        tracing::debug!("Cleaning up {} container(s)...", self.containers.len());

        let docker = self.docker.clone();
        let containers = mem::take(&mut self.containers);

        let cleanup = async {
            let results = containers
                .into_iter()
                .map(async |container_id| Self::remove_container_static(&docker, &container_id).await)
                .collect::<Vec<_>>();

            timeout(DOCKER_DROP_TIMEOUT, join_all(results))
                .await?
                .into_iter()
                .collect::<Result<Vec<_>>>()?;

            Ok::<_, anyhow::Error>(())
        };

        // Blocking on a current-thread runtime would stall the very worker the
        // removal futures need.
        let handle = match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => handle,
            _ => {
                tracing::warn!(
                    "Cannot remove fork containers from this context, call `close` instead"
                );
                return;
            }
        };

        if let Err(e) = block_in_place(|| handle.block_on(cleanup)) {
            tracing::error!(error = ?e, "Failed to cleanup containers");
            return;
        }

        tracing::info!("Fork containers removed");
    }
}

impl ForkDocker {
    const STOP_CONTAINER_TIMEOUT: Duration = Duration::from_secs(5);

    /// Connect to the local Docker daemon.
    pub fn connect(no_cleanup: bool) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker. Is Docker running?")?;

        Ok(Self {
            docker,
            containers: HashSet::new(),
            no_cleanup,
        })
    }

    /// Pull an image unless it is already available locally.
    pub async fn pull_image(&self, image: &DockerImage) -> Result<()> {
        let full_image = image.full_name();

        if self.docker.inspect_image(&full_image).await.is_ok() {
            tracing::debug!(image = %full_image, "Image already available locally, skipping pull");
            return Ok(());
        }

        tracing::info!(image = %full_image, "Pulling image");

        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image.image.clone(),
                tag: image.tag.clone(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(result) = stream.next().await {
            let info = result.with_context(|| format!("Failed to pull image '{full_image}'"))?;
            if let Some(status) = info.status {
                tracing::trace!(status, "Image pull");
            }
        }

        Ok(())
    }

    /// Pull the image, then create and start a service container.
    pub async fn start_service(
        &mut self,
        container_name: &str,
        config: ServiceConfig,
    ) -> Result<ServiceHandler> {
        self.pull_image(&config.image).await?;

        let host_config = HostConfig {
            port_bindings: Some(config.port_bindings()),
            binds: (!config.binds.is_empty()).then(|| config.binds.clone()),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(config.image.full_name()),
            entrypoint: config.entrypoint,
            cmd: config.cmd,
            host_config: Some(host_config),
            ..Default::default()
        };

        tracing::trace!(container_name, "Creating container");
        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name,
                    ..Default::default()
                }),
                container_config,
            )
            .await
            .context("Failed to create container")?;

        let container_id = container.id;
        // Track before starting so a failed start is still cleaned up.
        self.containers.insert(container_id.clone());

        tracing::trace!(container_id, container_name, "Starting container");
        self.docker
            .start_container::<String>(&container_id, None)
            .await
            .context("Failed to start container")?;

        Ok(ServiceHandler {
            container_id,
            container_name: container_name.to_string(),
        })
    }

    /// Stop and remove every container started by this client, unless cleanup
    /// is disabled. Returns whether containers were removed.
    pub async fn cleanup(&mut self) -> Result<bool> {
        if self.no_cleanup {
            tracing::debug!(containers = self.containers.len(), "Keeping fork containers");
            return Ok(false);
        }

        self.remove_all().await?;
        Ok(true)
    }

    /// Stop and remove every container started by this client, even when
    /// cleanup is disabled.
    pub async fn remove_all(&mut self) -> Result<()> {
        let containers = mem::take(&mut self.containers);
        for container_id in &containers {
            Self::remove_container_static(&self.docker, container_id).await?;
        }

        Ok(())
    }

    async fn remove_container_static(docker: &Docker, container_id: &str) -> Result<()> {
        tracing::trace!(container_id, "Stopping and removing container");

        // Errors are ignored: the container may already be stopped or gone.
        docker
            .stop_container(
                container_id,
                Some(StopContainerOptions {
                    t: Self::STOP_CONTAINER_TIMEOUT.as_secs() as i64,
                }),
            )
            .await
            .ok();

        docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .ok();

        tracing::trace!(container_id, "Container stopped and removed");
        Ok(())
    }
}

//! Container engine: image inspection, instrumented launch and shutdown.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::{HostConfig, PortMap};
use bollard::Docker;
use slim_types::{ExternalStep, ImageInfo, LaunchSpec, LaunchedContainer, Result, SlimError};
use tracing::{debug, error, info};

/// Where the sensor binary is mounted inside the target container.
pub const SENSOR_MOUNT_PATH: &str = "/opt/_slim/bin/sensor";
/// Where the sensor writes its reports inside the target container.
pub const ARTIFACTS_MOUNT_PATH: &str = "/opt/_slim/artifacts";

const SLIM_LABEL: &str = "slim.managed";
const STOP_GRACE_SECS: i64 = 5;

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Metadata of the image to profile.
    async fn inspect_image(&self, image: &str) -> Result<ImageInfo>;

    /// Create and start the instrumented container.
    async fn launch_container(&self, spec: &LaunchSpec) -> Result<LaunchedContainer>;

    /// Stop and remove the container.
    async fn shutdown_container(&self, id: &str) -> Result<()>;
}

/// Docker engine over the bollard client.
pub struct DockerEngine {
    docker: Docker,
    /// Host the published ports are reachable on.
    target_host: String,
}

impl DockerEngine {
    pub fn new(docker: Docker, target_host: impl Into<String>) -> Self {
        Self {
            docker,
            target_host: target_host.into(),
        }
    }

    async fn published_ports(&self, id: &str) -> Result<HashMap<String, u16>> {
        let inspect = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| SlimError::step(ExternalStep::ContainerLaunch, e))?;

        let ports = inspect
            .network_settings
            .and_then(|settings| settings.ports)
            .map(|map| host_ports(&map))
            .unwrap_or_default();
        Ok(ports)
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn inspect_image(&self, image: &str) -> Result<ImageInfo> {
        let inspect = self.docker.inspect_image(image).await.map_err(|e| {
            error!(image = %image, error = %e, "Image inspection failed");
            SlimError::step(ExternalStep::ImageInspection, e)
        })?;

        let config = inspect.config.unwrap_or_default();
        let mut exposed_ports: Vec<String> = config
            .exposed_ports
            .map(|ports| ports.into_keys().collect())
            .unwrap_or_default();
        exposed_ports.sort();

        let info = ImageInfo {
            id: inspect.id.unwrap_or_else(|| image.to_string()),
            repo_tags: inspect.repo_tags.unwrap_or_default(),
            virtual_size: inspect.virtual_size.unwrap_or_default(),
            entrypoint: config.entrypoint.unwrap_or_default(),
            cmd: config.cmd.unwrap_or_default(),
            working_dir: config.working_dir.filter(|w| !w.is_empty()),
            exposed_ports,
        };
        debug!(image = %image, id = %info.id, "Image inspected");
        Ok(info)
    }

    async fn launch_container(&self, spec: &LaunchSpec) -> Result<LaunchedContainer> {
        let config = launch_config(spec);
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| {
                error!(name = %spec.name, error = %e, "Failed to create container");
                SlimError::step(ExternalStep::ContainerLaunch, e)
            })?;

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| {
                error!(id = %created.id, error = %e, "Failed to start container");
                SlimError::step(ExternalStep::ContainerLaunch, e)
            })?;

        let ports = self.published_ports(&created.id).await?;
        let cmd_key = tcp_port_key(spec.cmd_port);
        let evt_key = tcp_port_key(spec.evt_port);
        let (Some(cmd_port), Some(evt_port)) = (ports.get(&cmd_key), ports.get(&evt_key)) else {
            return Err(SlimError::step(
                ExternalStep::ContainerLaunch,
                format!("sensor ports {cmd_key} and {evt_key} were not published"),
            ));
        };

        let launched = LaunchedContainer {
            id: created.id,
            name: spec.name.clone(),
            host: self.target_host.clone(),
            cmd_port: *cmd_port,
            evt_port: *evt_port,
            ports,
        };
        info!(id = %launched.id, name = %launched.name, "Instrumented container started");
        Ok(launched)
    }

    async fn shutdown_container(&self, id: &str) -> Result<()> {
        let stop = StopContainerOptions { t: STOP_GRACE_SECS };
        match self.docker.stop_container(id, Some(stop)).await {
            Ok(()) => {}
            // Already stopped.
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => debug!(id = %id, "Container already stopped"),
            Err(e) => return Err(SlimError::step(ExternalStep::ContainerShutdown, e)),
        }

        let remove = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(remove)).await {
            Ok(()) => {}
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => debug!(id = %id, "Container already removed"),
            Err(e) => return Err(SlimError::step(ExternalStep::ContainerShutdown, e)),
        }

        info!(id = %id, "Container shut down");
        Ok(())
    }
}

fn tcp_port_key(port: u16) -> String {
    format!("{port}/tcp")
}

/// Container config for the instrumented run: the sensor replaces the
/// entrypoint and every exposed port is published.
fn launch_config(spec: &LaunchSpec) -> Config<String> {
    let mut exposed_ports: HashMap<String, HashMap<(), ()>> = spec
        .image
        .exposed_ports
        .iter()
        .map(|p| (p.clone(), HashMap::new()))
        .collect();
    exposed_ports.insert(tcp_port_key(spec.cmd_port), HashMap::new());
    exposed_ports.insert(tcp_port_key(spec.evt_port), HashMap::new());

    let mut binds = vec![
        format!("{}:{SENSOR_MOUNT_PATH}:ro", spec.sensor_path.display()),
        format!("{}:{ARTIFACTS_MOUNT_PATH}:rw", spec.artifact_dir.display()),
    ];
    binds.extend(spec.volume_mounts.iter().map(|m| m.to_bind()));

    let host_config = HostConfig {
        binds: Some(binds),
        publish_all_ports: Some(true),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.id.clone()),
        entrypoint: Some(vec![SENSOR_MOUNT_PATH.to_string()]),
        env: Some(spec.env.clone()),
        working_dir: spec.image.working_dir.clone(),
        exposed_ports: Some(exposed_ports),
        labels: Some(HashMap::from([(SLIM_LABEL.to_string(), "true".to_string())])),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// Container port to first published host port.
fn host_ports(map: &PortMap) -> HashMap<String, u16> {
    map.iter()
        .filter_map(|(container_port, bindings)| {
            let host_port = bindings
                .as_ref()?
                .iter()
                .find_map(|b| b.host_port.as_deref()?.parse::<u16>().ok())?;
            Some((container_port.clone(), host_port))
        })
        .collect()
}

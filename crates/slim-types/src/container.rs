use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SlimError;

/// Metadata of the "fat" image, as reported by the container engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    #[serde(default)]
    pub repo_tags: Vec<String>,
    #[serde(default)]
    pub virtual_size: i64,
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub exposed_ports: Vec<String>,
}

impl ImageInfo {
    /// Program and arguments the image would run by default.
    pub fn app_command(&self) -> Vec<String> {
        self.entrypoint.iter().chain(self.cmd.iter()).cloned().collect()
    }
}

/// Host path bind-mounted into the instrumented container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub source: PathBuf,
    pub destination: String,
    #[serde(default)]
    pub read_only: bool,
}

impl VolumeMount {
    /// Docker bind string (`src:dst[:ro]`).
    pub fn to_bind(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{mode}", self.source.display(), self.destination)
    }
}

impl FromStr for VolumeMount {
    type Err = SlimError;

    /// Parse `src:dst[:ro|rw]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SlimError::Config(format!("invalid volume mount '{s}'"));
        let mut parts = s.trim().split(':');
        let source = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;
        let destination = parts
            .next()
            .filter(|p| p.starts_with('/'))
            .ok_or_else(invalid)?;
        let read_only = match parts.next() {
            None | Some("rw") => false,
            Some("ro") => true,
            Some(_) => return Err(invalid()),
        };
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            source: PathBuf::from(source),
            destination: destination.to_string(),
            read_only,
        })
    }
}

/// Everything the engine needs to start the instrumented container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub image: ImageInfo,
    pub name: String,
    pub sensor_path: PathBuf,
    pub artifact_dir: PathBuf,
    pub cmd_port: u16,
    pub evt_port: u16,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
}

/// A container the engine has started.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchedContainer {
    pub id: String,
    pub name: String,
    /// Host the published ports are reachable on.
    pub host: String,
    pub cmd_port: u16,
    pub evt_port: u16,
    /// Container port (`80/tcp`) to published host port.
    #[serde(default)]
    pub ports: HashMap<String, u16>,
}

impl LaunchedContainer {
    /// Published host ports that belong to the application, not the sensor.
    pub fn app_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .ports
            .values()
            .copied()
            .filter(|p| *p != self.cmd_port && *p != self.evt_port)
            .collect();
        ports.sort_unstable();
        ports
    }
}

/// One HTTP request the probe issues, written `METHOD:/resource` on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpProbeCmd {
    pub method: String,
    pub resource: String,
}

impl Default for HttpProbeCmd {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            resource: "/".to_string(),
        }
    }
}

impl FromStr for HttpProbeCmd {
    type Err = SlimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (method, resource) = match s.split_once(':') {
            Some((m, r)) => (m.trim(), r.trim()),
            None => ("GET", s.trim()),
        };
        if method.is_empty() || !method.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(SlimError::Config(format!("invalid http probe method in '{s}'")));
        }
        let resource = if resource.is_empty() {
            "/".to_string()
        } else if resource.starts_with('/') {
            resource.to_string()
        } else {
            format!("/{resource}")
        };
        Ok(Self {
            method: method.to_uppercase(),
            resource,
        })
    }
}

/// Event received from the sensor, stamped on arrival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorEvent {
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

impl SensorEvent {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

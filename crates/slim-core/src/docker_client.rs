//! Container-engine client construction.

use std::path::{Path, PathBuf};

use bollard::{Docker, API_DEFAULT_VERSION};
use slim_config::DockerClientConfig;
use slim_types::{Result, SlimError};
use tracing::{debug, info};

/// Local engine socket used when nothing else is configured.
pub const DEFAULT_DOCKER_SOCKET: &str = "unix:///var/run/docker.sock";

const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Where and how to reach the container engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerEndpoint {
    /// Explicit host, TLS with server verification.
    TlsVerify { host: String, cert_path: PathBuf },
    /// Explicit host, TLS without server verification.
    TlsNoVerify { host: String, cert_path: PathBuf },
    /// Explicit host, no TLS.
    Plain { host: String },
    /// `DOCKER_HOST` with `DOCKER_TLS_VERIFY` and `DOCKER_CERT_PATH`.
    EnvTls { host: String, cert_path: PathBuf },
    /// `DOCKER_HOST` only.
    Env { host: String },
    /// The local default socket.
    LocalDefault,
}

/// Pick the engine endpoint from explicit settings, then the environment,
/// then the local default.
pub fn resolve_docker_endpoint(cfg: &DockerClientConfig) -> Result<DockerEndpoint> {
    let host = cfg.host.as_deref().filter(|h| !h.is_empty());
    let cert_path = cfg
        .tls_cert_path
        .as_ref()
        .filter(|p| !p.as_os_str().is_empty());
    let env_host = cfg.env_var("DOCKER_HOST");
    let env_tls = cfg.env_var("DOCKER_TLS_VERIFY") == Some("1");
    let env_cert = cfg.env_var("DOCKER_CERT_PATH");

    let endpoint = match (host, cert_path) {
        (Some(host), Some(cert)) if cfg.use_tls && cfg.verify_tls => DockerEndpoint::TlsVerify {
            host: host.to_string(),
            cert_path: cert.clone(),
        },
        (Some(host), Some(cert)) if cfg.use_tls => DockerEndpoint::TlsNoVerify {
            host: host.to_string(),
            cert_path: cert.clone(),
        },
        (Some(host), _) if !cfg.use_tls => DockerEndpoint::Plain {
            host: host.to_string(),
        },
        _ => match (env_host, env_tls, env_cert) {
            // Environment TLS only applies when no host or verification was asked for.
            (Some(env_host), true, Some(env_cert)) if host.is_none() && !cfg.verify_tls => {
                DockerEndpoint::EnvTls {
                    host: env_host.to_string(),
                    cert_path: PathBuf::from(env_cert),
                }
            }
            (Some(env_host), _, _) => DockerEndpoint::Env {
                host: env_host.to_string(),
            },
            (None, _, _) if host.is_none() => DockerEndpoint::LocalDefault,
            _ => {
                return Err(SlimError::Config(
                    "docker TLS requested without a certificate path".to_string(),
                ))
            }
        },
    };

    debug!(?endpoint, "Resolved docker endpoint");
    Ok(endpoint)
}

/// Build a client for a resolved endpoint.
pub fn connect(endpoint: &DockerEndpoint) -> Result<Docker> {
    let docker = match endpoint {
        DockerEndpoint::TlsVerify { host, cert_path }
        | DockerEndpoint::EnvTls { host, cert_path } => connect_tls(host, cert_path),
        DockerEndpoint::TlsNoVerify { host, cert_path } => {
            // The client always verifies against ca.pem; without verification the
            // CA bundle from the same directory is still required.
            info!(host = %host, "Docker TLS verification is not supported, using the CA in the cert path");
            connect_tls(host, cert_path)
        }
        DockerEndpoint::Plain { host } | DockerEndpoint::Env { host } => connect_plain(host),
        DockerEndpoint::LocalDefault => connect_plain(DEFAULT_DOCKER_SOCKET),
    }
    .map_err(|e| SlimError::Config(format!("docker client: {e}")))?;

    Ok(docker)
}

/// Host the engine publishes container ports on.
///
/// Remote TCP engines publish on their own address; local sockets on loopback.
pub fn target_host(endpoint: &DockerEndpoint) -> String {
    let host = match endpoint {
        DockerEndpoint::TlsVerify { host, .. }
        | DockerEndpoint::TlsNoVerify { host, .. }
        | DockerEndpoint::EnvTls { host, .. }
        | DockerEndpoint::Plain { host }
        | DockerEndpoint::Env { host } => host.as_str(),
        DockerEndpoint::LocalDefault => DEFAULT_DOCKER_SOCKET,
    };

    let remote = ["tcp://", "http://", "https://"]
        .iter()
        .find_map(|scheme| host.strip_prefix(scheme));
    match remote {
        Some(addr) => addr
            .rsplit_once(':')
            .map(|(h, _)| h)
            .unwrap_or(addr)
            .to_string(),
        None => "127.0.0.1".to_string(),
    }
}

fn connect_plain(host: &str) -> std::result::Result<Docker, bollard::errors::Error> {
    if host.starts_with("unix://") || host.starts_with('/') {
        Docker::connect_with_socket(host, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
    } else {
        Docker::connect_with_http(host, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
    }
}

fn connect_tls(host: &str, cert_path: &Path) -> std::result::Result<Docker, bollard::errors::Error> {
    Docker::connect_with_ssl(
        host,
        &cert_path.join("key.pem"),
        &cert_path.join("cert.pem"),
        &cert_path.join("ca.pem"),
        CLIENT_TIMEOUT_SECS,
        API_DEFAULT_VERSION,
    )
}

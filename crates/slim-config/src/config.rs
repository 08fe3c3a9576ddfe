use std::collections::HashMap;
use std::path::PathBuf;

use slim_types::{HttpProbeCmd, Result, SlimError, VolumeMount};
use tracing::debug;

/// Well-known port the sensor's command (request/reply) socket listens on.
pub const DEFAULT_CMD_PORT: u16 = 65501;
/// Well-known port the sensor's event (publish) socket listens on.
pub const DEFAULT_EVT_PORT: u16 = 65502;

/// Environment variables captured for container-engine client resolution.
const DOCKER_ENV_KEYS: [&str; 3] = ["DOCKER_HOST", "DOCKER_TLS_VERIFY", "DOCKER_CERT_PATH"];

/// Container-engine client settings, before resolution.
#[derive(Debug, Clone, Default)]
pub struct DockerClientConfig {
    pub host: Option<String>,
    pub use_tls: bool,
    pub verify_tls: bool,
    pub tls_cert_path: Option<PathBuf>,
    /// Snapshot of the `DOCKER_*` environment.
    pub env: HashMap<String, String>,
}

impl DockerClientConfig {
    /// Value of a captured environment variable, if set and non-empty.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // Paths
    pub state_dir: PathBuf,
    pub sensor_path: PathBuf,

    // Sensor IPC
    pub target_host: Option<String>,
    pub cmd_port: u16,
    pub evt_port: u16,
    pub cmd_send_timeout_secs: u64,
    pub cmd_recv_timeout_secs: u64,
    pub evt_recv_timeout_secs: u64,

    // Continuation
    pub continue_after: String,
    pub continue_after_timeout: u64,

    // HTTP probe
    pub http_probe: bool,
    pub http_probe_cmds: Vec<HttpProbeCmd>,
    pub http_probe_retries: u32,
    pub http_probe_start_wait_secs: u64,

    // Profiled container
    /// Paths the sensor must keep even if the application never touches them.
    pub include_paths: Vec<String>,
    /// Paths the sensor must leave out of its report.
    pub exclude_paths: Vec<String>,
    pub volume_mounts: Vec<VolumeMount>,

    // Artifacts
    pub remove_artifacts: bool,

    // Container engine
    pub docker: DockerClientConfig,

    // Logging
    pub log_level: String,
    pub log_format: String,
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables (with dotenvy).
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignore errors, file may not exist)
        let _ = dotenvy::dotenv();

        let base = std::env::current_dir().unwrap_or_default();
        let state_dir = env_path_or("SLIM_STATE_DIR", || base.join(".slim-state"));

        let http_probe_cmds = match env_opt("SLIM_HTTP_PROBE_CMDS") {
            Some(raw) => parse_probe_cmds(&raw)?,
            None => Vec::new(),
        };

        let volume_mounts = match env_opt("SLIM_MOUNTS") {
            Some(raw) => parse_mounts(&raw)?,
            None => Vec::new(),
        };

        let docker = DockerClientConfig {
            host: env_opt("SLIM_DOCKER_HOST"),
            use_tls: env_bool("SLIM_DOCKER_TLS", false),
            verify_tls: env_bool("SLIM_DOCKER_TLS_VERIFY", false),
            tls_cert_path: env_opt("SLIM_DOCKER_TLS_CERT_PATH").map(PathBuf::from),
            env: DOCKER_ENV_KEYS
                .iter()
                .filter_map(|k| std::env::var(k).ok().map(|v| (k.to_string(), v)))
                .collect(),
        };

        let default_level = if env_bool("SLIM_DEBUG", false) { "debug" } else { "info" };

        let config = Config {
            sensor_path: env_path_or("SLIM_SENSOR_PATH", || state_dir.join("bin/slim-sensor")),
            state_dir,

            target_host: env_opt("SLIM_TARGET_HOST"),
            cmd_port: env_u16("SLIM_CMD_PORT", DEFAULT_CMD_PORT),
            evt_port: env_u16("SLIM_EVT_PORT", DEFAULT_EVT_PORT),
            cmd_send_timeout_secs: env_u64("SLIM_CMD_SEND_TIMEOUT", 3),
            cmd_recv_timeout_secs: env_u64("SLIM_CMD_RECV_TIMEOUT", 3),
            evt_recv_timeout_secs: env_u64("SLIM_EVT_RECV_TIMEOUT", 120),

            continue_after: env_or("SLIM_CONTINUE_AFTER", || "enter".to_string()),
            continue_after_timeout: env_u64("SLIM_CONTINUE_AFTER_TIMEOUT", 60),

            http_probe: env_bool("SLIM_HTTP_PROBE", false),
            http_probe_cmds,
            http_probe_retries: env_u32("SLIM_HTTP_PROBE_RETRIES", 5),
            http_probe_start_wait_secs: env_u64("SLIM_HTTP_PROBE_START_WAIT", 9),

            include_paths: parse_path_list(&env_or("SLIM_INCLUDE_PATHS", String::new)),
            exclude_paths: parse_path_list(&env_or("SLIM_EXCLUDE_PATHS", String::new)),
            volume_mounts,

            remove_artifacts: env_bool("SLIM_REMOVE_ARTIFACTS", false),

            docker,

            log_level: env_or("LOG_LEVEL", || default_level.to_string()),
            log_format: env_or("LOG_FORMAT", || "text".to_string()),
            log_file: env_opt("LOG_FILE").map(PathBuf::from),
        };

        debug!(state_dir = %config.state_dir.display(), "Configuration loaded from environment");
        Ok(config)
    }

    /// Create required directories.
    pub fn create_directories(&self) -> Result<()> {
        let dirs = [self.state_dir.clone(), self.state_dir.join("images")];

        for dir in &dirs {
            std::fs::create_dir_all(dir).map_err(|e| {
                SlimError::Config(format!(
                    "Failed to create directory {}: {e}",
                    dir.display()
                ))
            })?;
        }

        Ok(())
    }
}

/// Parse a comma-separated list of `METHOD:/resource` probe commands.
pub fn parse_probe_cmds(raw: &str) -> Result<Vec<HttpProbeCmd>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// Parse a comma-separated list of `src:dst[:ro|rw]` volume mounts.
pub fn parse_mounts(raw: &str) -> Result<Vec<VolumeMount>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// Split a comma-separated path list, dropping empty entries.
pub fn parse_path_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Env helpers
// ---------------------------------------------------------------------------

fn env_or(key: &str, default: impl FnOnce() -> String) -> String {
    std::env::var(key).unwrap_or_else(|_| default())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path_or(key: &str, default: impl FnOnce() -> PathBuf) -> PathBuf {
    std::env::var(key)
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_load_defaults() {
        let cfg = Config::load().unwrap();
        assert_eq!(cfg.cmd_port, DEFAULT_CMD_PORT);
        assert_eq!(cfg.evt_port, DEFAULT_EVT_PORT);
        assert_eq!(cfg.cmd_send_timeout_secs, 3);
        assert_eq!(cfg.cmd_recv_timeout_secs, 3);
        assert_eq!(cfg.evt_recv_timeout_secs, 120);
        assert_eq!(cfg.continue_after_timeout, 60);
    }

    #[test]
    fn config_env_override() {
        // Use a unique env var unlikely to collide
        std::env::set_var("SLIM_HTTP_PROBE_RETRIES", "11");
        let cfg = Config::load().unwrap();
        assert_eq!(cfg.http_probe_retries, 11);
        std::env::remove_var("SLIM_HTTP_PROBE_RETRIES");
    }

    #[test]
    fn parse_probe_cmds_rejects_bad_method() {
        let result = parse_probe_cmds("GET:/,B4D:/x");
        assert!(matches!(result, Err(SlimError::Config(_))));
    }

    #[test]
    fn parse_probe_cmds_list() {
        let cmds = parse_probe_cmds("GET:/, post:/login ,,").unwrap();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].resource, "/");
        assert_eq!(cmds[1].method, "POST");
    }

    #[test]
    fn config_debug_raises_default_log_level() {
        std::env::set_var("SLIM_DEBUG", "1");
        let cfg = Config::load().unwrap();
        std::env::remove_var("SLIM_DEBUG");
        if std::env::var("LOG_LEVEL").is_err() {
            assert_eq!(cfg.log_level, "debug");
        }
    }

    #[test]
    fn config_reads_paths_and_mounts() {
        std::env::set_var("SLIM_INCLUDE_PATHS", "/etc/nginx, /usr/share/nginx,");
        std::env::set_var("SLIM_MOUNTS", "/srv/site:/usr/share/nginx/html:ro");
        let cfg = Config::load().unwrap();
        std::env::remove_var("SLIM_INCLUDE_PATHS");
        std::env::remove_var("SLIM_MOUNTS");

        assert_eq!(cfg.include_paths, vec!["/etc/nginx", "/usr/share/nginx"]);
        assert_eq!(cfg.volume_mounts.len(), 1);
        assert!(cfg.volume_mounts[0].read_only);
    }

    #[test]
    fn parse_mounts_rejects_bad_entry() {
        assert!(parse_mounts("/a:/b,/c").is_err());
        assert_eq!(parse_mounts(" /a:/b , ").unwrap().len(), 1);
    }

    #[test]
    fn docker_env_var_ignores_empty_values() {
        let mut docker = DockerClientConfig::default();
        docker.env.insert("DOCKER_HOST".to_string(), String::new());
        docker
            .env
            .insert("DOCKER_CERT_PATH".to_string(), "/certs".to_string());
        assert_eq!(docker.env_var("DOCKER_HOST"), None);
        assert_eq!(docker.env_var("DOCKER_CERT_PATH"), Some("/certs"));
    }

    #[test]
    fn config_create_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = Config::load().unwrap();
        cfg.state_dir = tmp.path().join("state");

        cfg.create_directories().unwrap();

        assert!(tmp.path().join("state").exists());
        assert!(tmp.path().join("state/images").exists());
    }
}

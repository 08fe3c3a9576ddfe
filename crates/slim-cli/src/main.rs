use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use slim_config::{parse_mounts, parse_probe_cmds, Config};
use slim_core::{
    connect, init_logging, resolve_docker_endpoint, target_host, CustomProbe, DockerEngine,
    FsArtifactStore, LogFormat, SessionOptions, SessionOrchestrator, ZmqConnector,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "slim", about = "Profile a container image with an in-container sensor", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the image under the sensor and collect what it observes
    Profile(ProfileArgs),
}

#[derive(Args, Debug, Default)]
struct ProfileArgs {
    /// Image to profile
    image: String,

    /// When to stop observing: enter, signal, timeout or probe
    #[arg(long)]
    continue_after: Option<String>,

    /// Seconds to wait in timeout mode
    #[arg(long)]
    continue_after_timeout: Option<u64>,

    /// Exercise published ports over HTTP (forces continue-after probe)
    #[arg(long)]
    http_probe: bool,

    /// Probe request as METHOD:/path; may be repeated
    #[arg(long = "http-probe-cmd")]
    http_probe_cmds: Vec<String>,

    #[arg(long)]
    http_probe_retries: Option<u32>,

    /// Sensor command port
    #[arg(long)]
    cmd_port: Option<u16>,

    /// Sensor event port
    #[arg(long)]
    evt_port: Option<u16>,

    /// Host the container's published ports are reachable on
    #[arg(long)]
    target_host: Option<String>,

    /// Sensor binary to mount into the container
    #[arg(long)]
    sensor_path: Option<PathBuf>,

    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Environment for the container as KEY=VALUE; may be repeated
    #[arg(long = "env")]
    env: Vec<String>,

    /// Path the sensor keeps even if unused; may be repeated
    #[arg(long = "include-path")]
    include_paths: Vec<String>,

    /// Path the sensor leaves out; may be repeated
    #[arg(long = "exclude-path")]
    exclude_paths: Vec<String>,

    /// Bind mount as SRC:DST[:ro|rw]; may be repeated
    #[arg(long = "mount")]
    mounts: Vec<String>,

    /// Delete collected artifacts after processing
    #[arg(long)]
    remove_artifacts: bool,

    /// Docker engine address
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    tls: bool,

    #[arg(long)]
    tls_verify: bool,

    #[arg(long)]
    tls_cert_path: Option<PathBuf>,

    /// Write the session report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(long)]
    log_level: Option<String>,

    /// text or json
    #[arg(long)]
    log_format: Option<String>,

    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl ProfileArgs {
    /// Layer command-line flags over the loaded configuration.
    fn apply(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(mode) = &self.continue_after {
            config.continue_after = mode.clone();
        }
        if let Some(secs) = self.continue_after_timeout {
            config.continue_after_timeout = secs;
        }
        if !self.http_probe_cmds.is_empty() {
            config.http_probe_cmds = parse_probe_cmds(&self.http_probe_cmds.join(","))
                .context("Invalid --http-probe-cmd")?;
            config.http_probe = true;
        }
        if self.http_probe {
            config.http_probe = true;
        }
        if let Some(retries) = self.http_probe_retries {
            config.http_probe_retries = retries;
        }
        if let Some(port) = self.cmd_port {
            config.cmd_port = port;
        }
        if let Some(port) = self.evt_port {
            config.evt_port = port;
        }
        if let Some(host) = &self.target_host {
            config.target_host = Some(host.clone());
        }
        if let Some(path) = &self.sensor_path {
            config.sensor_path = path.clone();
        }
        if let Some(dir) = &self.state_dir {
            config.state_dir = dir.clone();
        }
        if !self.include_paths.is_empty() {
            config.include_paths = self.include_paths.clone();
        }
        if !self.exclude_paths.is_empty() {
            config.exclude_paths = self.exclude_paths.clone();
        }
        if !self.mounts.is_empty() {
            config.volume_mounts =
                parse_mounts(&self.mounts.join(",")).context("Invalid --mount")?;
        }
        if self.remove_artifacts {
            config.remove_artifacts = true;
        }
        if let Some(host) = &self.host {
            config.docker.host = Some(host.clone());
        }
        if self.tls {
            config.docker.use_tls = true;
        }
        if self.tls_verify {
            config.docker.use_tls = true;
            config.docker.verify_tls = true;
        }
        if let Some(path) = &self.tls_cert_path {
            config.docker.tls_cert_path = Some(path.clone());
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.log_format = format.clone();
        }
        if let Some(file) = &self.log_file {
            config.log_file = Some(file.clone());
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Profile(args) => profile(args).await?,
    }
    Ok(())
}

async fn profile(args: ProfileArgs) -> anyhow::Result<()> {
    // 1. Load config, flags win
    let mut config = Config::load().context("Failed to load configuration")?;
    args.apply(&mut config)?;

    // 2. Init logging
    let format: LogFormat = config.log_format.parse().context("Invalid log format")?;
    init_logging(&config.log_level, config.log_file.as_deref(), format)
        .context("Failed to initialize logging")?;

    // 3. Resolve what to run before touching the engine
    let mut options =
        SessionOptions::from_config(&config, &args.image).context("Invalid session options")?;
    options.env = args.env.clone();
    config
        .create_directories()
        .context("Failed to create state directories")?;

    // 4. Container engine
    let endpoint =
        resolve_docker_endpoint(&config.docker).context("Invalid docker client settings")?;
    let docker = connect(&endpoint).context("Failed to create docker client")?;
    let host = config
        .target_host
        .clone()
        .unwrap_or_else(|| target_host(&endpoint));
    info!(image = %args.image, target_host = %host, "Configuration loaded");

    // 5. Wire and run the session
    let mut orchestrator = SessionOrchestrator::new(
        Arc::new(DockerEngine::new(docker, host)),
        Box::new(FsArtifactStore::new(&config.state_dir)),
        Arc::new(ZmqConnector::default()),
        options,
    );
    if config.http_probe {
        let probe = CustomProbe::from_config(&config).context("Failed to create HTTP probe")?;
        orchestrator = orchestrator.with_probe(Arc::new(probe));
    }

    let report = orchestrator
        .run()
        .await
        .with_context(|| format!("Profiling {} failed", args.image))?;

    let json = serde_json::to_string_pretty(&report).context("Failed to encode report")?;
    match &args.report {
        Some(path) => std::fs::write(path, &json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

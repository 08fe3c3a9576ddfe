//! HTTP probe: exercises the container's published application ports, then
//! signals completion.

use std::time::Duration;

use reqwest::Method;
use slim_config::Config;
use slim_types::{ExternalStep, HttpProbeCmd, LaunchedContainer, Result, SlimError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::utils::CompletionNotifier;

/// Outcome of one probe run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeSummary {
    pub calls: u32,
    pub ok: u32,
    pub errors: u32,
}

pub trait HttpProbe: Send + Sync {
    /// Start probing in the background. `done` fires once the request
    /// sequence has finished, whatever the individual results.
    fn start(
        &self,
        target: &LaunchedContainer,
        done: CompletionNotifier,
    ) -> Result<JoinHandle<ProbeSummary>>;
}

/// Probe issuing a fixed list of requests against every application port.
#[derive(Debug, Clone)]
pub struct CustomProbe {
    client: reqwest::Client,
    cmds: Vec<HttpProbeCmd>,
    retries: u32,
    start_wait: Duration,
    retry_wait: Duration,
}

impl CustomProbe {
    pub fn new(cmds: Vec<HttpProbeCmd>, retries: u32, start_wait: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SlimError::step(ExternalStep::HttpProbe, e))?;
        let cmds = if cmds.is_empty() {
            vec![HttpProbeCmd::default()]
        } else {
            cmds
        };
        Ok(Self {
            client,
            cmds,
            retries,
            start_wait,
            retry_wait: Duration::from_secs(2),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.http_probe_cmds.clone(),
            config.http_probe_retries,
            Duration::from_secs(config.http_probe_start_wait_secs),
        )
    }

    pub fn with_retry_wait(mut self, retry_wait: Duration) -> Self {
        self.retry_wait = retry_wait;
        self
    }

    async fn call(&self, method: &Method, url: &str) -> bool {
        for attempt in 0..=self.retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry_wait).await;
            }
            match self.client.request(method.clone(), url).send().await {
                Ok(resp) => {
                    debug!(%method, url = %url, status = %resp.status(), attempt, "Probe call answered");
                    return true;
                }
                Err(e) => {
                    debug!(%method, url = %url, attempt, error = %e, "Probe call failed");
                }
            }
        }
        false
    }

    async fn run(self, host: String, ports: Vec<u16>) -> ProbeSummary {
        let mut summary = ProbeSummary::default();
        if ports.is_empty() {
            warn!("HTTP probe found no published application ports");
            return summary;
        }

        tokio::time::sleep(self.start_wait).await;
        for cmd in &self.cmds {
            let method = match Method::from_bytes(cmd.method.as_bytes()) {
                Ok(method) => method,
                Err(e) => {
                    warn!(method = %cmd.method, error = %e, "Skipping probe command");
                    continue;
                }
            };
            for port in &ports {
                let url = format!("http://{host}:{port}{}", cmd.resource);
                summary.calls += 1;
                if self.call(&method, &url).await {
                    summary.ok += 1;
                } else {
                    summary.errors += 1;
                    warn!(%method, url = %url, "Probe call gave up");
                }
            }
        }
        summary
    }
}

impl HttpProbe for CustomProbe {
    fn start(
        &self,
        target: &LaunchedContainer,
        done: CompletionNotifier,
    ) -> Result<JoinHandle<ProbeSummary>> {
        let ports = target.app_ports();
        let host = target.host.clone();
        let probe = self.clone();
        info!(host = %host, ports = ?ports, commands = self.cmds.len(), "HTTP probe starting");

        Ok(tokio::spawn(async move {
            let summary = probe.run(host, ports).await;
            info!(calls = summary.calls, ok = summary.ok, errors = summary.errors, "HTTP probe finished");
            done.notify();
            summary
        }))
    }
}

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
        }
    }
}

/// Execute an async function with exponential backoff retry.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, name: &str, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt >= config.max_retries => {
                error!(
                    "Function {name} failed after {} retries: {e}",
                    config.max_retries
                );
                return Err(e);
            }
            Err(e) => {
                let delay_secs =
                    config.base_delay.as_secs_f64() * config.exponential_base.powi(attempt as i32);
                let delay_secs = delay_secs.min(config.max_delay.as_secs_f64());
                let delay = Duration::from_secs_f64(delay_secs);

                warn!(
                    "Function {name} failed (attempt {}/{}) retrying in {:.1}s: {e}",
                    attempt + 1,
                    config.max_retries + 1,
                    delay.as_secs_f64()
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Number of timeouts tolerated in one direction of a request/reply exchange.
///
/// The first attempt is free; each recorded timeout spends one retry.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    max_retries: u32,
    spent: u32,
}

impl RetryBudget {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            spent: 0,
        }
    }

    /// Record a timeout. Returns false once the budget is exhausted.
    pub fn record_timeout(&mut self) -> bool {
        self.spent += 1;
        self.spent <= self.max_retries
    }

    /// Timeouts recorded so far.
    pub fn spent(&self) -> u32 {
        self.spent
    }
}

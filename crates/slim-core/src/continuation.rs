//! "Continue after" strategies: how long the instrumented container is left running.

use std::time::Duration;

use slim_types::{ContinueAfterMode, Result, SlimError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::utils::{CompletionNotifier, CompletionSignal};

/// Resolved continuation strategy for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Wait for a line (or end of input) from the operator.
    Manual,
    /// Wait for SIGUSR1.
    Signal,
    /// Wait for a fixed duration.
    Timeout(Duration),
    /// Wait for the HTTP probe to finish.
    Probe,
}

impl Continuation {
    pub fn mode(&self) -> ContinueAfterMode {
        match self {
            Self::Manual => ContinueAfterMode::Enter,
            Self::Signal => ContinueAfterMode::Signal,
            Self::Timeout(_) => ContinueAfterMode::Timeout,
            Self::Probe => ContinueAfterMode::Probe,
        }
    }
}

/// Turn the operator's raw mode into a [`Continuation`].
///
/// A requested HTTP probe always wins over the given mode.
pub fn resolve_continuation(
    raw_mode: &str,
    timeout_secs: u64,
    probe_requested: bool,
) -> Result<Continuation> {
    let mode: ContinueAfterMode = raw_mode.parse()?;
    if probe_requested || mode == ContinueAfterMode::Probe {
        if mode != ContinueAfterMode::Probe {
            debug!(requested = %mode, "HTTP probe requested, continuing after probe");
        }
        return Ok(Continuation::Probe);
    }

    match mode {
        ContinueAfterMode::Enter => Ok(Continuation::Manual),
        ContinueAfterMode::Signal => Ok(Continuation::Signal),
        ContinueAfterMode::Timeout if timeout_secs == 0 => Err(SlimError::Config(
            "continue-after timeout must be greater than zero".to_string(),
        )),
        ContinueAfterMode::Timeout => Ok(Continuation::Timeout(Duration::from_secs(timeout_secs))),
        ContinueAfterMode::Probe => Ok(Continuation::Probe),
    }
}

type OperatorInput = Box<dyn AsyncBufRead + Unpin + Send>;

/// Blocks the session until its continuation trigger fires.
///
/// Every mode funnels into one [`CompletionSignal`]; whichever trigger fires
/// first completes the wait and later triggers are ignored.
pub struct ContinuationController {
    continuation: Continuation,
    signal: CompletionSignal,
    input: Option<OperatorInput>,
    triggers: Vec<JoinHandle<()>>,
    armed: bool,
}

impl ContinuationController {
    pub fn new(continuation: Continuation) -> Self {
        Self {
            continuation,
            signal: CompletionSignal::new(),
            input: None,
            triggers: Vec::new(),
            armed: false,
        }
    }

    /// Read operator input from `reader` instead of stdin.
    pub fn with_input(mut self, reader: impl AsyncBufRead + Unpin + Send + 'static) -> Self {
        self.input = Some(Box::new(reader));
        self
    }

    pub fn continuation(&self) -> Continuation {
        self.continuation
    }

    /// Trigger handle for external sources such as the HTTP probe.
    pub fn notifier(&self) -> CompletionNotifier {
        self.signal.notifier()
    }

    pub fn is_complete(&self) -> bool {
        self.signal.is_complete()
    }

    /// Start the trigger for the resolved mode. Calling it again does nothing.
    pub fn arm(&mut self) -> Result<()> {
        if self.armed {
            return Ok(());
        }
        self.armed = true;

        let notifier = self.signal.notifier();
        match self.continuation {
            Continuation::Manual => {
                let mut input = self
                    .input
                    .take()
                    .unwrap_or_else(|| -> OperatorInput { Box::new(BufReader::new(tokio::io::stdin())) });
                info!("Press <enter> when you are done using the container");
                self.triggers.push(tokio::spawn(async move {
                    let mut line = String::new();
                    // End of input counts as the operator being done.
                    let _ = input.read_line(&mut line).await;
                    notifier.notify();
                }));
            }
            Continuation::Signal => {
                self.triggers.push(spawn_signal_listener(notifier)?);
                info!(pid = std::process::id(), "Send SIGUSR1 when you are done using the container");
            }
            Continuation::Timeout(duration) => {
                info!(?duration, "Waiting for the continue-after timeout");
                self.triggers.push(tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    notifier.notify();
                }));
            }
            Continuation::Probe => {
                info!("Waiting for the HTTP probe to finish");
            }
        }
        Ok(())
    }

    /// Arm the trigger if needed and block until the session may continue.
    pub async fn await_completion(mut self) -> Result<()> {
        self.arm()?;
        self.signal.wait().await;
        debug!(mode = %self.continuation.mode(), "Continue-after condition met");
        Ok(())
    }
}

impl Drop for ContinuationController {
    fn drop(&mut self) {
        for trigger in self.triggers.drain(..) {
            trigger.abort();
        }
    }
}

#[cfg(unix)]
fn spawn_signal_listener(notifier: CompletionNotifier) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    // Register before returning so a signal sent right after arming is not lost.
    let mut usr1 = signal(SignalKind::user_defined1())?;
    Ok(tokio::spawn(async move {
        if usr1.recv().await.is_some() {
            debug!("SIGUSR1 received");
        }
        notifier.notify();
    }))
}

#[cfg(not(unix))]
fn spawn_signal_listener(_notifier: CompletionNotifier) -> Result<JoinHandle<()>> {
    Err(SlimError::Config(
        "continue-after signal is only supported on unix".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::time::Instant;

    #[test]
    fn resolves_each_mode() {
        assert_eq!(resolve_continuation("enter", 60, false).unwrap(), Continuation::Manual);
        assert_eq!(resolve_continuation("signal", 60, false).unwrap(), Continuation::Signal);
        assert_eq!(
            resolve_continuation("timeout", 60, false).unwrap(),
            Continuation::Timeout(Duration::from_secs(60))
        );
        assert_eq!(resolve_continuation("probe", 60, false).unwrap(), Continuation::Probe);
    }

    #[test]
    fn probe_request_overrides_mode() {
        for raw in ["enter", "signal", "timeout", "probe"] {
            assert_eq!(resolve_continuation(raw, 60, true).unwrap(), Continuation::Probe);
        }
    }

    #[test]
    fn unknown_mode_is_config_error() {
        let err = resolve_continuation("later", 60, false).unwrap_err();
        assert!(matches!(err, SlimError::Config(_)));
        assert!(resolve_continuation("later", 60, true).is_err());
    }

    #[test]
    fn zero_timeout_is_config_error() {
        let err = resolve_continuation("timeout", 0, false).unwrap_err();
        assert!(matches!(err, SlimError::Config(_)));
        // The duration is irrelevant when another mode wins.
        assert!(resolve_continuation("enter", 0, false).is_ok());
        assert!(resolve_continuation("timeout", 0, true).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_completes_after_exact_duration() {
        let ctrl = ContinuationController::new(Continuation::Timeout(Duration::from_secs(2)));
        let started = Instant::now();
        ctrl.await_completion().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_completes_when_notified() {
        let ctrl = ContinuationController::new(Continuation::Probe);
        let notifier = ctrl.notifier();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            assert!(notifier.notify());
            assert!(!notifier.notify());
        });

        let started = Instant::now();
        ctrl.await_completion().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn manual_completes_on_line() {
        let ctrl = ContinuationController::new(Continuation::Manual).with_input(&b"\n"[..]);
        tokio::time::timeout(Duration::from_secs(5), ctrl.await_completion())
            .await
            .expect("enter should complete the wait")
            .unwrap();
    }

    #[tokio::test]
    async fn manual_completes_on_end_of_input() {
        let ctrl = ContinuationController::new(Continuation::Manual).with_input(&b""[..]);
        tokio::time::timeout(Duration::from_secs(5), ctrl.await_completion())
            .await
            .expect("closed input should complete the wait")
            .unwrap();
    }

    #[tokio::test]
    async fn manual_waits_for_operator() {
        let (mut operator, input) = tokio::io::duplex(64);
        let mut ctrl = ContinuationController::new(Continuation::Manual).with_input(BufReader::new(input));
        ctrl.arm().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!ctrl.is_complete());

        operator.write_all(b"done\n").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), ctrl.await_completion())
            .await
            .expect("line should complete the wait")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn first_trigger_wins() {
        let mut ctrl = ContinuationController::new(Continuation::Timeout(Duration::from_secs(30)));
        ctrl.arm().unwrap();
        ctrl.arm().unwrap();
        let notifier = ctrl.notifier();
        assert!(notifier.notify());

        let started = Instant::now();
        ctrl.await_completion().await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn signal_completes_on_sigusr1() {
        let mut ctrl = ContinuationController::new(Continuation::Signal);
        ctrl.arm().unwrap();

        let sent = std::process::Command::new("kill")
            .args(["-USR1", &std::process::id().to_string()])
            .status();
        if !matches!(sent, Ok(status) if status.success()) {
            // No kill(1) on this host.
            return;
        }

        tokio::time::timeout(Duration::from_secs(5), ctrl.await_completion())
            .await
            .expect("SIGUSR1 should complete the wait")
            .unwrap();
    }
}

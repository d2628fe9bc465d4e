use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::{Signal, SignalError};
use crate::alarm::SignalCommand;
use crate::tracing::prelude::*;

/// What [`SignalDriver::apply`] did with a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The device already shows this command.
    Skipped,
    Applied,
    /// The call failed or timed out. Already logged.
    Failed,
}

/// Applies alarm commands to a [`Signal`].
///
/// Consecutive identical commands collapse into one device call. A failed
/// call forgets what the device shows, so whatever command comes next is
/// always attempted. Failures never reach the caller beyond the returned
/// [`ApplyOutcome`].
pub struct SignalDriver<S> {
    signal: S,
    call_timeout: Duration,
    last_applied: Option<SignalCommand>,
}

impl<S: Signal> SignalDriver<S> {
    pub fn new(signal: S, call_timeout: Duration) -> Self {
        Self {
            signal,
            call_timeout,
            last_applied: None,
        }
    }

    /// The last command the device confirmed, if any.
    pub fn last_applied(&self) -> Option<SignalCommand> {
        self.last_applied
    }

    pub async fn apply(&mut self, command: SignalCommand) -> ApplyOutcome {
        if self.last_applied == Some(command) {
            debug!(command = %command, "Signal already showing command, skipping");
            return ApplyOutcome::Skipped;
        }

        debug!(command = %command, "Applying signal command");

        match self.call(command).await {
            Ok(()) => {
                info!(command = %command, "Signal updated");
                self.last_applied = Some(command);
                ApplyOutcome::Applied
            }
            Err(e) => {
                warn!(command = %command, error = %e, "Signal update failed");
                self.last_applied = None;
                ApplyOutcome::Failed
            }
        }
    }

    async fn call(&self, command: SignalCommand) -> Result<(), SignalError> {
        let signal = &self.signal;
        let request = async {
            match command {
                SignalCommand::Normal => signal.resume_normal().await,
                SignalCommand::ThresholdWarning => signal.set_warning().await,
                SignalCommand::Silence => signal.set_silence_alarm().await,
            }
        };

        time::timeout(self.call_timeout, request)
            .await
            .unwrap_or(Err(SignalError::Timeout(self.call_timeout)))
    }

    /// Apply commands in order until the channel closes or shutdown.
    ///
    /// Shutdown leaves the device as it is.
    pub async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<SignalCommand>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = command_rx.recv() => match command {
                    Some(command) => {
                        self.apply(command).await;
                    }
                    None => {
                        debug!("Signal command channel closed");
                        break;
                    }
                },
            }
        }

        trace!("Signal driver stopped");
    }
}

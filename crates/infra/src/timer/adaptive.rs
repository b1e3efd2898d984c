//! Background loop that drives a [`TimerCommand`].

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::command::TimerCommand;

/// Timer lifecycle error.
#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    #[error("timer '{0}' is already running")]
    AlreadyRunning(String),

    #[error("timer '{0}' has no command (a previous stop had to abort it)")]
    CommandUnavailable(String),

    #[error("timer '{name}' did not stop within {timeout:?}; task aborted")]
    StopTimedOut { name: String, timeout: Duration },

    #[error("timer '{name}' task failed: {reason}")]
    TaskFailed { name: String, reason: String },
}

struct Running<C> {
    cancel: CancellationToken,
    join: JoinHandle<C>,
}

/// Runs a command on a background task: step, wait the interval the
/// command reports, repeat.
///
/// The command moves into the task while the timer runs and comes back
/// when [`stop`](AdaptiveTimer::stop) completes, so a stopped timer can be
/// started again. Dropping a running timer cancels and aborts its task.
pub struct AdaptiveTimer<C: TimerCommand> {
    name: String,
    command: Option<C>,
    running: Option<Running<C>>,
}

impl<C: TimerCommand> AdaptiveTimer<C> {
    pub fn new(name: impl Into<String>, command: C) -> Self {
        Self {
            name: name.into(),
            command: Some(command),
            running: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while the background task is alive.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.join.is_finished())
    }

    /// The command, while the timer is stopped.
    pub fn command(&self) -> Option<&C> {
        self.command.as_ref()
    }

    /// Spawn the loop on the current tokio runtime.
    ///
    /// With `execute_first_immediately` the first step runs right away;
    /// otherwise the loop first waits the command's current interval.
    pub fn start(&mut self, execute_first_immediately: bool) -> Result<(), TimerError> {
        if self.running.is_some() {
            return Err(TimerError::AlreadyRunning(self.name.clone()));
        }
        let command = self
            .command
            .take()
            .ok_or_else(|| TimerError::CommandUnavailable(self.name.clone()))?;

        let cancel = CancellationToken::new();
        let join = tokio::spawn(run_loop(
            self.name.clone(),
            command,
            cancel.clone(),
            execute_first_immediately,
        ));
        self.running = Some(Running { cancel, join });

        debug!(timer = %self.name, "timer started");
        Ok(())
    }

    /// Cancel the pending wait and the in-flight step, then wait up to
    /// `timeout` for the current iteration to finish.
    ///
    /// No step starts after this returns. If the iteration overruns the
    /// timeout the task is aborted and the command is lost.
    pub async fn stop(&mut self, timeout: Duration) -> Result<(), TimerError> {
        let Some(Running { cancel, mut join }) = self.running.take() else {
            return Ok(());
        };
        cancel.cancel();

        match tokio::time::timeout(timeout, &mut join).await {
            Ok(Ok(command)) => {
                self.command = Some(command);
                debug!(timer = %self.name, "timer stopped");
                Ok(())
            }
            Ok(Err(join_err)) => Err(TimerError::TaskFailed {
                name: self.name.clone(),
                reason: join_err.to_string(),
            }),
            Err(_) => {
                join.abort();
                warn!(timer = %self.name, ?timeout, "timer did not stop in time; aborting");
                Err(TimerError::StopTimedOut {
                    name: self.name.clone(),
                    timeout,
                })
            }
        }
    }
}

impl<C: TimerCommand> Drop for AdaptiveTimer<C> {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            running.join.abort();
        }
    }
}

async fn run_loop<C: TimerCommand>(
    name: String,
    mut command: C,
    cancel: CancellationToken,
    execute_first_immediately: bool,
) -> C {
    if !execute_first_immediately && !wait(&cancel, command.next_interval()).await {
        return command;
    }

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if let Err(err) = command.execute(&cancel).await {
            error!(timer = %name, error = %err, "timer step failed");
        }

        if !wait(&cancel, command.next_interval()).await {
            break;
        }
    }

    command
}

/// Sleep for `interval`; false when cancelled first.
async fn wait(cancel: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}

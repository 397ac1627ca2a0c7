use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::supervisor::{Interruption, RunOutcome, SupervisorError, SupervisorState};

pub(crate) type OutcomeSlot = Option<Result<RunOutcome, SupervisorError>>;

/// Messages sent from a `SupervisorHandle` to the supervisor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorMessage {
    /// Stop the child; how forcefully depends on the cause.
    Interrupt(Interruption),
}

#[derive(Debug, Error)]
pub enum SupervisorHandleError {
    #[error("supervisor is no longer running: {0}")]
    SendError(#[from] mpsc::error::SendError<SupervisorMessage>),
}

/// Cloneable handle to a supervisor: signals go in, state and outcome come out.
///
/// This is the only way to reach the running child from outside the
/// supervisor task, e.g. from the OS signal forwarder.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<SupervisorMessage>,
    state: watch::Receiver<SupervisorState>,
    child_pid: watch::Receiver<Option<u32>>,
    outcome: watch::Receiver<OutcomeSlot>,
}

impl SupervisorHandle {
    pub(crate) const fn new(
        tx: mpsc::UnboundedSender<SupervisorMessage>,
        state: watch::Receiver<SupervisorState>,
        child_pid: watch::Receiver<Option<u32>>,
        outcome: watch::Receiver<OutcomeSlot>,
    ) -> Self {
        Self {
            tx,
            state,
            child_pid,
            outcome,
        }
    }

    /// Operator interrupt: terminate the child gracefully, retrying until it is gone.
    pub fn interrupt(&self) -> Result<(), SupervisorHandleError> {
        self.send(Interruption::Interrupt)
    }

    /// Abnormal termination: kill the child, retrying until it is gone.
    pub fn abort(&self) -> Result<(), SupervisorHandleError> {
        self.send(Interruption::Abort)
    }

    pub fn send(&self, interruption: Interruption) -> Result<(), SupervisorHandleError> {
        self.tx.send(SupervisorMessage::Interrupt(interruption))?;
        Ok(())
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Pid of the running child, once it has been spawned.
    pub fn child_pid(&self) -> Option<u32> {
        *self.child_pid.borrow()
    }

    /// Waits until the supervisor reaches `state`. Returns `false` if it finished without doing so.
    pub async fn wait_for_state(&self, state: SupervisorState) -> bool {
        let mut rx = self.state.clone();
        let reached = rx.wait_for(|current| *current == state).await.is_ok();
        reached
    }

    /// Waits for the run to finish. Every clone observes the same outcome.
    pub async fn wait(&self) -> Result<RunOutcome, SupervisorError> {
        let mut rx = self.outcome.clone();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone().unwrap_or(Err(SupervisorError::Vanished)),
            Err(_) => Err(SupervisorError::Vanished),
        };
        result
    }
}

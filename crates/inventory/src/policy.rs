/// What to do with a delivery whose message could not be processed.
///
/// Applies to failures of the message itself, such as an unparseable body.
/// Store and broker outages are requeued by the consumer without consuming
/// an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Put the message back on its queue, no matter how often it failed.
    RequeueForever,
    /// Retry up to `max_attempts` times, then move the message to the
    /// dead-letter queue.
    DeadLetterAfter { max_attempts: u32 },
}

/// The action chosen for one failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// `nack` with requeue.
    Requeue,
    /// Republish with the next attempt number, then ack.
    Retry,
    /// Publish to the dead-letter queue, then ack.
    DeadLetter,
}

impl FailurePolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    /// Builds the policy from a configured attempt limit; 0 means no limit.
    pub fn from_max_attempts(max_attempts: u32) -> Self {
        if max_attempts == 0 {
            FailurePolicy::RequeueForever
        } else {
            FailurePolicy::DeadLetterAfter { max_attempts }
        }
    }

    /// Chooses the action for a delivery that failed on its `attempt`-th try.
    pub fn action_for(&self, attempt: u32) -> FailureAction {
        match self {
            FailurePolicy::RequeueForever => FailureAction::Requeue,
            FailurePolicy::DeadLetterAfter { max_attempts } if attempt < *max_attempts => {
                FailureAction::Retry
            }
            FailurePolicy::DeadLetterAfter { .. } => FailureAction::DeadLetter,
        }
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::DeadLetterAfter {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

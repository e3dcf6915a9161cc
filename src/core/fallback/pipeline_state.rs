// The resilience policy as an explicit state machine.
//
// `advance` is pure: it takes the current state and what just happened and
// returns the next state. The coordinator performs the effects (calling the
// resolver, dispatching, sleeping) and feeds the results back in as events.

use super::retry_policy::RetryPolicy;
use crate::core::dispatch::DispatchResult;
use crate::core::errors::{ExternalError, RouterError};
use crate::core::intent::{ClarificationRequest, Intent};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum RetryTarget {
    Resolve,
    Dispatch(Intent),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    Resolving { attempt: u32 },
    ClarificationPending(ClarificationRequest),
    Dispatching { intent: Intent, attempt: u32 },
    Retrying {
        target: RetryTarget,
        /// The attempt that runs once the delay is over.
        attempt: u32,
        delay: Duration,
    },
    Done { intent: Intent, result: DispatchResult },
    Failed { intent: Option<Intent>, error: RouterError },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Resolved(Intent),
    ClarificationNeeded(ClarificationRequest),
    ResolveFailed(RouterError),
    Dispatched(DispatchResult),
    DispatchFailed {
        error: ExternalError,
        /// Whether the operation may be repeated without side effects.
        retry_safe: bool,
    },
    /// The intent was refused before any call was made.
    DispatchRejected(RouterError),
    BackoffElapsed,
}

impl PipelineState {
    pub fn start() -> Self {
        PipelineState::Resolving { attempt: 1 }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::ClarificationPending(_)
                | PipelineState::Done { .. }
                | PipelineState::Failed { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Resolving { .. } => "resolving",
            PipelineState::ClarificationPending(_) => "clarification_pending",
            PipelineState::Dispatching { .. } => "dispatching",
            PipelineState::Retrying { .. } => "retrying",
            PipelineState::Done { .. } => "done",
            PipelineState::Failed { .. } => "failed",
        }
    }
}

pub fn advance(state: PipelineState, event: PipelineEvent, policy: &RetryPolicy) -> PipelineState {
    use PipelineEvent as E;
    use PipelineState as S;

    match (state, event) {
        (S::Resolving { .. }, E::Resolved(intent)) => S::Dispatching { intent, attempt: 1 },
        (S::Resolving { .. }, E::ClarificationNeeded(request)) => S::ClarificationPending(request),
        (S::Resolving { attempt }, E::ResolveFailed(error)) => match error {
            RouterError::External(external) if external.is_transient() => {
                if policy.can_retry(attempt) {
                    S::Retrying {
                        target: RetryTarget::Resolve,
                        attempt: attempt + 1,
                        delay: policy.delay_for(attempt),
                    }
                } else {
                    S::Failed {
                        intent: None,
                        error: RouterError::RetriesExhausted {
                            attempts: attempt,
                            last: external,
                        },
                    }
                }
            }
            error => S::Failed { intent: None, error },
        },

        (S::Dispatching { intent, .. }, E::Dispatched(result)) => S::Done { intent, result },
        (S::Dispatching { intent, attempt }, E::DispatchFailed { error, retry_safe }) => {
            if !error.is_transient() || !retry_safe {
                S::Failed {
                    intent: Some(intent),
                    error: RouterError::External(error),
                }
            } else if policy.can_retry(attempt) {
                S::Retrying {
                    delay: policy.delay_for(attempt),
                    target: RetryTarget::Dispatch(intent),
                    attempt: attempt + 1,
                }
            } else {
                S::Failed {
                    intent: Some(intent),
                    error: RouterError::RetriesExhausted {
                        attempts: attempt,
                        last: error,
                    },
                }
            }
        }
        (S::Dispatching { intent, .. }, E::DispatchRejected(error)) => S::Failed {
            intent: Some(intent),
            error,
        },

        (S::Retrying { target, attempt, .. }, E::BackoffElapsed) => match target {
            RetryTarget::Resolve => S::Resolving { attempt },
            RetryTarget::Dispatch(intent) => S::Dispatching { intent, attempt },
        },

        // Events that do not apply leave the state alone.
        (state, event) => {
            tracing::warn!(state = state.name(), ?event, "Ignoring pipeline event");
            state
        }
    }
}

pub mod coordinator;
pub mod pipeline_state;
pub mod retry_policy;

pub use coordinator::{FallbackCoordinator, PipelineOutcome};
pub use retry_policy::RetryPolicy;

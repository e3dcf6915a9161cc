pub mod coercion;
pub mod dispatcher;
pub mod workspace_client;

pub use coercion::{parse_datetime, ParamValue, Parameters};
pub use dispatcher::{DispatchResult, Dispatcher};
pub use workspace_client::{ServiceError, WorkspaceClient};

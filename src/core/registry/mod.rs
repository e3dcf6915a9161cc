pub mod capability_registry;
pub mod schema;
pub mod workspace_catalog;

pub use capability_registry::CapabilityRegistry;
pub use schema::{Operation, OperationDescriptor, ParamType};
pub use workspace_catalog::workspace_catalog;

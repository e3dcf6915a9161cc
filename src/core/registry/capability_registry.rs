use super::schema::{CapabilityDescriptor, OperationDescriptor};
use crate::core::errors::RegistryError;
use std::collections::HashMap;

/// Static mapping from capability name to its operations.
///
/// Populated once at startup and shared read-only afterwards (usually behind
/// an `Arc`), so no interior locking is needed.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    capabilities: Vec<CapabilityDescriptor>,
    index: HashMap<String, usize>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: CapabilityDescriptor) -> Result<(), RegistryError> {
        if descriptor.name.trim().is_empty() {
            return Err(RegistryError::InvalidSchema {
                capability: descriptor.name,
                operation: String::new(),
                reason: "capability name is empty".to_string(),
            });
        }
        if self.index.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateCapability(descriptor.name));
        }

        for operation in &descriptor.operations {
            operation.validate(&descriptor.name)?;
        }

        let mut seen_ops = std::collections::HashSet::new();
        for operation in &descriptor.operations {
            if !seen_ops.insert(operation.name()) {
                return Err(RegistryError::InvalidSchema {
                    capability: descriptor.name.clone(),
                    operation: operation.name().to_string(),
                    reason: "operation is declared twice".to_string(),
                });
            }
        }

        tracing::debug!(
            capability = %descriptor.name,
            operations = descriptor.operations.len(),
            "Registered capability"
        );

        self.index
            .insert(descriptor.name.clone(), self.capabilities.len());
        self.capabilities.push(descriptor);
        Ok(())
    }

    pub fn resolve(
        &self,
        capability: &str,
        operation: &str,
    ) -> Result<&OperationDescriptor, RegistryError> {
        let descriptor = self
            .capability(capability)
            .ok_or_else(|| RegistryError::UnknownCapability(capability.to_string()))?;

        descriptor
            .find_operation(operation)
            .ok_or_else(|| RegistryError::UnknownOperation {
                capability: capability.to_string(),
                operation: operation.to_string(),
            })
    }

    pub fn capability(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.index.get(name).map(|&i| &self.capabilities[i])
    }

    /// Capabilities in registration order.
    pub fn capabilities(&self) -> impl Iterator<Item = &CapabilityDescriptor> {
        self.capabilities.iter()
    }

    pub fn capability_names(&self) -> Vec<&str> {
        self.capabilities.iter().map(|c| c.name.as_str()).collect()
    }

    /// Renders the whole registry as prompt text, one operation per line.
    pub fn prompt_schema(&self) -> String {
        let mut out = String::new();
        for capability in &self.capabilities {
            out.push_str(&format!("{}: {}\n", capability.name, capability.description));
            for op in &capability.operations {
                out.push_str(&format!(
                    "  - {}  # {}\n",
                    op.prompt_signature(),
                    op.description
                ));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::schema::{ParamSpec, ParamType};

    fn notes() -> CapabilityDescriptor {
        CapabilityDescriptor::new("notes", "Plain notes").operation(
            OperationDescriptor::new("get_item", "Read a note")
                .param(ParamSpec::required("id", ParamType::Text, "Note id")),
        )
    }

    #[test]
    fn register_and_resolve() {
        let mut registry = CapabilityRegistry::new();
        registry.register(notes()).unwrap();

        let op = registry.resolve("notes", "get_item").unwrap();
        assert_eq!(op.name(), "get_item");
        assert_eq!(registry.capability_names(), vec!["notes"]);
    }

    #[test]
    fn duplicate_capability_is_rejected() {
        let mut registry = CapabilityRegistry::new();
        registry.register(notes()).unwrap();
        assert_eq!(
            registry.register(notes()),
            Err(RegistryError::DuplicateCapability("notes".to_string()))
        );
    }

    #[test]
    fn unknown_names_get_distinct_errors() {
        let mut registry = CapabilityRegistry::new();
        registry.register(notes()).unwrap();

        assert_eq!(
            registry.resolve("mail", "get_item").unwrap_err(),
            RegistryError::UnknownCapability("mail".to_string())
        );
        assert_eq!(
            registry.resolve("notes", "delete_item").unwrap_err(),
            RegistryError::UnknownOperation {
                capability: "notes".to_string(),
                operation: "delete_item".to_string(),
            }
        );
    }

    #[test]
    fn duplicate_operation_is_rejected() {
        let descriptor = notes().operation(OperationDescriptor::new("get_item", "again"));
        let mut registry = CapabilityRegistry::new();
        assert!(matches!(
            registry.register(descriptor),
            Err(RegistryError::InvalidSchema { .. })
        ));
        assert!(registry.capability("notes").is_none());
    }

    #[test]
    fn empty_capability_name_is_rejected() {
        let mut registry = CapabilityRegistry::new();
        let blank = CapabilityDescriptor::new("  ", "Nameless").operation(
            OperationDescriptor::new("get_item", "Read")
                .param(ParamSpec::required("id", ParamType::Text, "Id")),
        );
        assert!(matches!(
            registry.register(blank),
            Err(RegistryError::InvalidSchema { .. })
        ));
        assert!(registry.capability_names().is_empty());
    }

    #[test]
    fn prompt_schema_lists_operations() {
        let mut registry = CapabilityRegistry::new();
        registry.register(notes()).unwrap();
        let schema = registry.prompt_schema();
        assert!(schema.contains("notes: Plain notes"));
        assert!(schema.contains("get_item(id: string)"));
    }
}

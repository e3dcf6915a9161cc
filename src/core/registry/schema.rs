// Schema types for the capability registry.
//
// A capability is a workspace service area; each of its operations declares
// a typed parameter list. Everything the model proposes is checked against
// these descriptors before it goes anywhere near a service client.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

use crate::core::errors::RegistryError;

// ============================================================================
// PARAMETER TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Text,
    /// Positive integer, e.g. a result limit.
    Count,
    Boolean,
    /// RFC 3339 timestamp, naive timestamp, or plain date.
    DateTime,
    Email,
    TextList,
    EmailList,
    /// Rows of scalar cells, as used by spreadsheet ranges.
    Table,
    /// Free-form JSON object of field updates.
    Object,
}

impl ParamType {
    pub fn name(&self) -> &'static str {
        match self {
            ParamType::Text => "text",
            ParamType::Count => "positive integer",
            ParamType::Boolean => "boolean",
            ParamType::DateTime => "date/time",
            ParamType::Email => "email address",
            ParamType::TextList => "list of text",
            ParamType::EmailList => "list of email addresses",
            ParamType::Table => "table of rows",
            ParamType::Object => "object",
        }
    }

    /// Short form used when rendering the schema into a prompt.
    pub fn prompt_name(&self) -> &'static str {
        match self {
            ParamType::Text => "string",
            ParamType::Count => "integer",
            ParamType::Boolean => "boolean",
            ParamType::DateTime => "datetime",
            ParamType::Email => "email",
            ParamType::TextList => "string[]",
            ParamType::EmailList => "email[]",
            ParamType::Table => "cell[][]",
            ParamType::Object => "object",
        }
    }

    /// Structural check only: is this JSON value the right kind of thing?
    ///
    /// Semantic conversion (dates, addresses, ranges) happens at dispatch.
    pub fn accepts_shape(&self, value: &Value) -> bool {
        match self {
            ParamType::Text => value.is_string() || value.is_number() || value.is_boolean(),
            ParamType::Count => value.is_number() || value.is_string(),
            ParamType::Boolean => value.is_boolean() || value.is_string(),
            ParamType::DateTime | ParamType::Email => value.is_string(),
            ParamType::TextList | ParamType::EmailList => value.is_array() || value.is_string(),
            ParamType::Table => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: String,
    /// Keys inside an object parameter that must convert to a given type
    /// when present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub typed_keys: Vec<(String, ParamType)>,
}

impl ParamSpec {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: true,
            default: None,
            description: description.to_string(),
            typed_keys: Vec::new(),
        }
    }

    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: false,
            default: None,
            description: description.to_string(),
            typed_keys: Vec::new(),
        }
    }

    pub fn with_default(
        name: &str,
        param_type: ParamType,
        default: Value,
        description: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: false,
            default: Some(default),
            description: description.to_string(),
            typed_keys: Vec::new(),
        }
    }

    pub fn typed_key(mut self, key: &str, param_type: ParamType) -> Self {
        self.typed_keys.push((key.to_string(), param_type));
        self
    }
}

// ============================================================================
// OPERATIONS
// ============================================================================

/// The uniform operation surface plus capability-specific extensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Operation {
    ListItems,
    GetItem,
    CreateItem,
    UpdateItem,
    DeleteItem,
    Extension(String),
}

impl Operation {
    pub fn parse(name: &str) -> Self {
        match name {
            "list_items" => Operation::ListItems,
            "get_item" => Operation::GetItem,
            "create_item" => Operation::CreateItem,
            "update_item" => Operation::UpdateItem,
            "delete_item" => Operation::DeleteItem,
            other => Operation::Extension(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Operation::ListItems => "list_items",
            Operation::GetItem => "get_item",
            Operation::CreateItem => "create_item",
            Operation::UpdateItem => "update_item",
            Operation::DeleteItem => "delete_item",
            Operation::Extension(name) => name,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<Operation> for String {
    fn from(op: Operation) -> Self {
        op.as_str().to_string()
    }
}

impl From<String> for Operation {
    fn from(name: String) -> Self {
        Operation::parse(&name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub operation: Operation,
    pub description: String,
    /// Whether a call changes state in the backing service.
    pub mutating: bool,
    pub params: Vec<ParamSpec>,
}

impl OperationDescriptor {
    /// Standard operations know whether they mutate; extensions default to
    /// mutating until marked otherwise with [`read_only`](Self::read_only).
    pub fn new(name: &str, description: &str) -> Self {
        let operation = Operation::parse(name);
        let mutating = !matches!(operation, Operation::ListItems | Operation::GetItem);
        Self {
            operation,
            description: description.to_string(),
            mutating,
            params: Vec::new(),
        }
    }

    pub fn read_only(mut self) -> Self {
        self.mutating = false;
        self
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn name(&self) -> &str {
        self.operation.as_str()
    }

    pub fn find_param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn required_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| p.required)
    }

    /// Checks the descriptor invariants: non-empty unique parameter names,
    /// and no defaults on required parameters.
    pub fn validate(&self, capability: &str) -> Result<(), RegistryError> {
        let invalid = |reason: String| RegistryError::InvalidSchema {
            capability: capability.to_string(),
            operation: self.name().to_string(),
            reason,
        };

        if self.name().trim().is_empty() {
            return Err(invalid("operation name is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for spec in &self.params {
            if spec.name.trim().is_empty() {
                return Err(invalid("parameter name is empty".to_string()));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(invalid(format!("parameter '{}' is declared twice", spec.name)));
            }
            if spec.required && spec.default.is_some() {
                return Err(invalid(format!(
                    "required parameter '{}' must not have a default",
                    spec.name
                )));
            }
        }

        Ok(())
    }

    /// One line of prompt schema, e.g.
    /// `list_items(max_results?: integer = 10, query?: string)`.
    pub fn prompt_signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let marker = if p.required { "" } else { "?" };
                match &p.default {
                    Some(default) => format!(
                        "{}{}: {} = {}",
                        p.name,
                        marker,
                        p.param_type.prompt_name(),
                        default
                    ),
                    None => format!("{}{}: {}", p.name, marker, p.param_type.prompt_name()),
                }
            })
            .collect();
        format!("{}({})", self.name(), params.join(", "))
    }
}

// ============================================================================
// CAPABILITIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub operations: Vec<OperationDescriptor>,
}

impl CapabilityDescriptor {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            operations: Vec::new(),
        }
    }

    pub fn operation(mut self, descriptor: OperationDescriptor) -> Self {
        self.operations.push(descriptor);
        self
    }

    pub fn find_operation(&self, name: &str) -> Option<&OperationDescriptor> {
        self.operations.iter().find(|op| op.name() == name)
    }
}

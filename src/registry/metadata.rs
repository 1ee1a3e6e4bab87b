use crate::core::FlowFunc;
use serde::{Deserialize, Serialize};

/// Schema for a parameter a function reads from its `params`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Factory function type for creating function instances
pub type FuncFactory = fn() -> Box<dyn FlowFunc>;

/// Compile-time description of a built-in function
#[derive(Clone)]
pub struct FuncMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSchema>,
    pub factory: FuncFactory,
}

impl FuncMetadata {
    pub fn create_instance(&self) -> Box<dyn FlowFunc> {
        (self.factory)()
    }
}

impl std::fmt::Debug for FuncMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuncMetadata")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish()
    }
}

// Factory type for creating function metadata at runtime
pub type FuncMetadataFactory = fn() -> FuncMetadata;

// Wrapper for inventory collection
pub struct FuncMetadataFactoryWrapper(pub FuncMetadataFactory);

inventory::collect!(FuncMetadataFactoryWrapper);

mod metadata;

pub use metadata::{FuncFactory, FuncMetadata, FuncMetadataFactory, FuncMetadataFactoryWrapper, ParameterSchema};

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use tracing::debug;

use crate::core::FlowFunc;

type DynFactory = Box<dyn Fn() -> Box<dyn FlowFunc> + Send + Sync>;

/// Resolves function names to fresh function instances.
///
/// Built explicitly and handed to every processor; nothing is registered
/// globally at runtime.
pub struct FuncRegistry {
    factories: HashMap<String, DynFactory>,
    metadata: HashMap<String, FuncMetadata>,
}

impl FuncRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    /// A registry holding every function registered through
    /// `#[derive(FlowFunc)]`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for wrapper in inventory::iter::<FuncMetadataFactoryWrapper> {
            let meta = (wrapper.0)();
            let factory = meta.factory;
            debug!(func = %meta.name, "registering built-in function");
            registry.factories.insert(meta.name.clone(), Box::new(factory));
            registry.metadata.insert(meta.name.clone(), meta);
        }
        registry
    }

    /// Registers `factory` under `name`, replacing an earlier registration.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn FlowFunc> + Send + Sync + 'static,
    {
        self.metadata.remove(name);
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn resolve(&self, name: &str) -> Result<Box<dyn FlowFunc>> {
        self.factories
            .get(name)
            .ok_or_else(|| anyhow!("Unknown flow function: {}", name))
            .map(|factory| factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn metadata(&self, name: &str) -> Option<&FuncMetadata> {
        self.metadata.get(name)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for FuncRegistry {
    fn default() -> Self {
        Self::new()
    }
}

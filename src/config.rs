use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use crate::hal::QueueBinding;

fn default_cache_num() -> usize {
    1024
}

/// Alignment limits for a multi-input reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignConfig {
    /// Maximum number of pending (transaction, stream) keys
    #[serde(default = "default_cache_num")]
    pub cache_num: usize,
    /// Age after which an incomplete key is released; `None` disables expiry
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Discard incomplete keys instead of delivering a partial set
    #[serde(default)]
    pub drop_when_not_align: bool,
}

impl AlignConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_num == 0 {
            bail!("align.cache_num must be greater than zero");
        }
        Ok(())
    }
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            cache_num: default_cache_num(),
            timeout_ms: None,
            drop_when_not_align: false,
        }
    }
}

/// How a function receives its input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// One aligned set per invocation
    #[default]
    Single,
    /// The function pulls from its input queues itself
    Streaming,
}

/// Static description of one execution unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    pub name: String,
    #[serde(default)]
    pub device_id: u32,
    pub func_name: String,
    #[serde(default)]
    pub inputs: Vec<QueueBinding>,
    #[serde(default)]
    pub outputs: Vec<QueueBinding>,
    /// Output indices the function may write; all outputs when absent
    #[serde(default)]
    pub usable_outputs: Option<Vec<usize>>,
    #[serde(default)]
    pub align: Option<AlignConfig>,
    #[serde(default)]
    pub input_mode: InputMode,
    #[serde(default)]
    pub params: Value,
}

impl ProcessorConfig {
    pub fn new(name: impl Into<String>, func_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_id: 0,
            func_name: func_name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            usable_outputs: None,
            align: None,
            input_mode: InputMode::Single,
            params: Value::Null,
        }
    }

    pub fn from_json(config: Value) -> Result<Self> {
        let parsed: Self = serde_json::from_value(config).context("invalid processor config")?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn from_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).context("processor config is not valid JSON")?;
        Self::from_json(value)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read processor config {}", path.display()))?;
        Self::from_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("processor name must not be empty");
        }
        if self.func_name.is_empty() {
            return Err(anyhow!("processor {}: func_name must not be empty", self.name));
        }
        if let Some(usable) = &self.usable_outputs {
            if let Some(bad) = usable.iter().find(|&&index| index >= self.outputs.len()) {
                bail!(
                    "processor {}: usable output {} out of range (outputs = {})",
                    self.name,
                    bad,
                    self.outputs.len()
                );
            }
        }
        if let Some(align) = &self.align {
            align.validate().with_context(|| format!("processor {}", self.name))?;
        }
        Ok(())
    }

    pub fn usable_outputs(&self) -> Vec<usize> {
        match &self.usable_outputs {
            Some(usable) => usable.clone(),
            None => (0..self.outputs.len()).collect(),
        }
    }
}

/// Event group a model waits on unless configured otherwise. Processors
/// subscribe to their device id, so this stays clear of real devices.
pub const MODEL_EVENT_GROUP: u32 = u32::MAX;

/// Queues of a nested sub-graph invoked synchronously from a function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub inputs: Vec<QueueBinding>,
    pub outputs: Vec<QueueBinding>,
    #[serde(default)]
    pub align: Option<AlignConfig>,
    /// Event group used while waiting on native output queues. Must not
    /// be the device id of a processor serving the sub-graph.
    #[serde(default = "default_model_group")]
    pub group_id: u32,
    /// Longest single wait before re-checking exit and exception state
    #[serde(default = "default_wait_slice_ms")]
    pub wait_slice_ms: u64,
}

fn default_wait_slice_ms() -> u64 {
    10
}

fn default_model_group() -> u32 {
    MODEL_EVENT_GROUP
}

impl ModelConfig {
    pub fn from_json(config: Value) -> Result<Self> {
        let parsed: Self = serde_json::from_value(config).context("invalid model config")?;
        if parsed.outputs.is_empty() {
            bail!("model {}: at least one output queue is required", parsed.name);
        }
        let collides = parsed.inputs
            .iter()
            .chain(&parsed.outputs)
            .any(|binding| binding.device_id == parsed.group_id);
        if collides {
            bail!(
                "model {}: group_id {} is also a device id of its queues",
                parsed.name,
                parsed.group_id
            );
        }
        if let Some(align) = &parsed.align {
            align.validate()?;
        }
        Ok(parsed)
    }
}

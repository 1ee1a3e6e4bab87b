use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Exception raised against one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub trans_id: u64,
    pub code: i32,
    #[serde(default)]
    pub context: String,
}

impl ExceptionRecord {
    pub fn new(trans_id: u64, code: i32, context: impl Into<String>) -> Self {
        Self {
            trans_id,
            code,
            context: context.into(),
        }
    }
}

/// Transaction ids currently under exception with their codes, shared
/// between a processor and the nested models its function calls.
#[derive(Debug, Default)]
pub struct ExceptionSet {
    ids: Mutex<HashMap<u64, i32>>,
}

impl ExceptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, trans_id: u64, code: i32) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(trans_id, code)
            .is_none()
    }

    pub fn remove(&self, trans_id: u64) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&trans_id)
            .is_some()
    }

    pub fn contains(&self, trans_id: u64) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(&trans_id)
    }

    pub fn code(&self, trans_id: u64) -> Option<i32> {
        self.ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&trans_id)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

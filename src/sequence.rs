use crate::error::{RelError, ResourceType};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceKey {
    pub tenant_id: Option<String>,
    pub schema: Option<String>,
    pub name: String,
}

impl SequenceKey {
    pub fn new(schema: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            tenant_id: None,
            schema: schema.map(str::to_string),
            name: name.into(),
        }
    }

    pub fn for_tenant(mut self, tenant_id: Option<&str>) -> Self {
        self.tenant_id = tenant_id.map(str::to_string);
        self
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tenant) = &self.tenant_id {
            write!(f, "{tenant}:")?;
        }
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceState {
    /// Next value `increment` hands out.
    pub current_value: i64,
    pub increment_by: i64,
    pub cache_size: u32,
    pub created_at: u64,
    /// Most recent value handed out, if any.
    pub last_value: Option<i64>,
    /// Set once `current_value` was the last value the type can hold and has
    /// been handed out.
    #[serde(default)]
    pub exhausted: bool,
}

impl SequenceState {
    fn next_value(&self, key: &SequenceKey) -> Result<i64, RelError> {
        if self.exhausted {
            return Err(RelError::SequenceOverflow {
                sequence: key.to_string(),
            });
        }
        Ok(self.current_value)
    }
}

/// Result for one key of a batched call, in the caller's key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceOutcome {
    pub key: SequenceKey,
    pub result: Result<i64, RelError>,
}

impl SequenceOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// A dropped sequence leaves `None` behind for callers that still hold the
/// slot.
type Slot = Arc<Mutex<Option<SequenceState>>>;

/// Sequences shared by every session of one [`CoreServices`](crate::CoreServices).
///
/// The map lock is held only to find or replace a slot; reads and advances
/// lock the single slot they touch, so calls on different keys never wait on
/// each other.
#[derive(Debug)]
pub struct SequenceService {
    slots: RwLock<HashMap<SequenceKey, Slot>>,
    default_cache_size: u32,
}

impl SequenceService {
    pub fn new(default_cache_size: u32) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            default_cache_size,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    pub fn contains(&self, key: &SequenceKey) -> bool {
        self.slots.read().contains_key(key)
    }

    pub fn state(&self, key: &SequenceKey) -> Option<SequenceState> {
        let slot = self.slot(key)?;
        slot.lock().clone()
    }

    /// Registers `key` starting at `start_with`. A `cache_size` of zero takes
    /// the configured default. Returns `timestamp`.
    pub fn create(
        &self,
        key: &SequenceKey,
        start_with: i64,
        increment_by: i64,
        cache_size: u32,
        timestamp: u64,
    ) -> Result<u64, RelError> {
        if increment_by == 0 {
            return Err(RelError::Validation(format!(
                "sequence '{key}' must have a non-zero increment"
            )));
        }
        let cache_size = if cache_size == 0 {
            self.default_cache_size
        } else {
            cache_size
        };
        let mut slots = self.slots.write();
        if slots.contains_key(key) {
            return Err(RelError::AlreadyExists {
                resource_type: ResourceType::Sequence,
                resource_id: key.to_string(),
            });
        }
        slots.insert(
            key.clone(),
            Arc::new(Mutex::new(Some(SequenceState {
                current_value: start_with,
                increment_by,
                cache_size,
                created_at: timestamp,
                last_value: None,
                exhausted: false,
            }))),
        );
        info!(sequence = %key, start_with, increment_by, cache_size, "sequence created");
        Ok(timestamp)
    }

    pub fn drop_sequence(&self, key: &SequenceKey, timestamp: u64) -> Result<u64, RelError> {
        let slot = self
            .slots
            .write()
            .remove(key)
            .ok_or_else(|| not_found(key))?;
        *slot.lock() = None;
        info!(sequence = %key, "sequence dropped");
        Ok(timestamp)
    }

    /// Next value per key without advancing anything.
    pub fn reserve(&self, keys: &[SequenceKey], timestamp: u64) -> Vec<SequenceOutcome> {
        keys.iter()
            .map(|key| SequenceOutcome {
                key: key.clone(),
                result: self.with_visible(key, timestamp, |state| state.next_value(key)),
            })
            .collect()
    }

    /// Hands out the next value per key and advances it by its increment.
    ///
    /// Keys fail independently. The last representable value is still handed
    /// out; the call after it fails with `SequenceOverflow`, and a key whose
    /// own state failed is evicted from the service so it can be created
    /// again.
    pub fn increment(&self, keys: &[SequenceKey], timestamp: u64) -> Vec<SequenceOutcome> {
        let mut evict = Vec::new();
        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            let slot = self.slot(key);
            let result = visible(slot.as_ref(), key, timestamp, |state| {
                let value = state.next_value(key)?;
                match value.checked_add(state.increment_by) {
                    Some(next) => state.current_value = next,
                    None => state.exhausted = true,
                }
                state.last_value = Some(value);
                Ok(value)
            });
            if let (Err(RelError::SequenceOverflow { .. }), Some(slot)) = (&result, slot) {
                evict.push((key, slot));
            }
            outcomes.push(SequenceOutcome {
                key: key.clone(),
                result,
            });
        }
        if !evict.is_empty() {
            let mut slots = self.slots.write();
            for (key, failed) in evict {
                // A drop and re-create may have replaced the slot meanwhile.
                if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, &failed)) {
                    slots.remove(key);
                    warn!(sequence = %key, "sequence evicted after failed increment");
                }
            }
        }
        outcomes
    }

    /// Value most recently handed out by `increment` for `key`.
    pub fn current_value(&self, key: &SequenceKey, timestamp: u64) -> Result<i64, RelError> {
        self.with_visible(key, timestamp, |state| {
            state.last_value.ok_or_else(|| RelError::CurrentValueUnavailable {
                sequence: key.to_string(),
            })
        })
    }

    fn slot(&self, key: &SequenceKey) -> Option<Slot> {
        self.slots.read().get(key).cloned()
    }

    fn with_visible<T>(
        &self,
        key: &SequenceKey,
        timestamp: u64,
        f: impl FnOnce(&mut SequenceState) -> Result<T, RelError>,
    ) -> Result<T, RelError> {
        visible(self.slot(key).as_ref(), key, timestamp, f)
    }
}

/// Runs `f` under the key's lock when the sequence exists and was created at
/// or before `timestamp`.
fn visible<T>(
    slot: Option<&Slot>,
    key: &SequenceKey,
    timestamp: u64,
    f: impl FnOnce(&mut SequenceState) -> Result<T, RelError>,
) -> Result<T, RelError> {
    let slot = slot.ok_or_else(|| not_found(key))?;
    let mut guard = slot.lock();
    match guard.as_mut() {
        Some(state) if state.created_at <= timestamp => f(state),
        _ => Err(not_found(key)),
    }
}

fn not_found(key: &SequenceKey) -> RelError {
    RelError::NotFound {
        resource_type: ResourceType::Sequence,
        resource_id: key.to_string(),
    }
}

//! Per-device variable registry
//!
//! Shared between the host-facing API (registration, queued writes) and the
//! polling task. The lock is held only to copy due items out and results
//! back in, never across a transport call.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::address::Address;
use crate::error::{GatewayError, Result};

/// A tracked PLC variable
#[derive(Debug, Clone)]
pub struct Variable {
    /// Raw address string as registered
    pub name: String,
    pub address: Address,
    pub poll_interval_secs: u64,
    /// `None` until first polled, or after a write asked for a read-back
    pub last_polled: Option<Instant>,
    pub pending_write: Option<Vec<u8>>,
}

/// Snapshot of a variable handed to the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueItem {
    pub name: String,
    pub address: Address,
    pub poll_interval_secs: u64,
    /// Write payload, or read result once the batch completes
    pub data: Vec<u8>,
}

impl DueItem {
    pub fn byte_size(&self) -> usize {
        self.address.byte_size()
    }
}

/// Variables of one device
#[derive(Debug)]
pub struct VariableStore {
    variables: Mutex<BTreeMap<String, Variable>>,
    default_interval: Duration,
}

impl VariableStore {
    /// `default_interval` is the global floor for every poll interval
    pub fn new(default_interval: Duration) -> Self {
        Self {
            variables: Mutex::new(BTreeMap::new()),
            default_interval,
        }
    }

    /// Register or update a variable; returns `true` when newly added
    pub fn insert(&self, name: &str, address: Address, poll_interval_secs: u64) -> bool {
        let mut vars = self.variables.lock();
        match vars.get_mut(name) {
            Some(var) => {
                var.poll_interval_secs = poll_interval_secs;
                false
            },
            None => {
                vars.insert(
                    name.to_string(),
                    Variable {
                        name: name.to_string(),
                        address,
                        poll_interval_secs,
                        last_polled: None,
                        pending_write: None,
                    },
                );
                true
            },
        }
    }

    pub fn remove(&self, name: &str) -> bool {
        self.variables.lock().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.variables.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.lock().is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Variable> {
        self.variables.lock().get(name).cloned()
    }

    /// Queue a write; a newer payload replaces an unsent one
    pub fn queue_write(&self, name: &str, payload: Vec<u8>) -> Result<()> {
        let mut vars = self.variables.lock();
        let var = vars
            .get_mut(name)
            .ok_or_else(|| GatewayError::VariableNotFound(name.to_string()))?;
        var.pending_write = Some(payload);
        Ok(())
    }

    /// Take every pending write
    pub fn due_for_write(&self) -> Vec<DueItem> {
        self.variables
            .lock()
            .values_mut()
            .filter_map(|var| {
                var.pending_write.take().map(|data| DueItem {
                    name: var.name.clone(),
                    address: var.address.clone(),
                    poll_interval_secs: var.poll_interval_secs,
                    data,
                })
            })
            .collect()
    }

    /// Variables whose effective interval has elapsed
    ///
    /// The effective interval is `max(variable interval, default interval)`.
    /// Selected variables are stamped with `now` immediately so an in-flight
    /// batch does not select them again.
    pub fn due_for_read(&self, now: Instant) -> Vec<DueItem> {
        let default_interval = self.default_interval;
        self.variables
            .lock()
            .values_mut()
            .filter_map(|var| {
                let interval = Duration::from_secs(var.poll_interval_secs).max(default_interval);
                let due = match var.last_polled {
                    None => true,
                    Some(last) => now.saturating_duration_since(last) >= interval,
                };
                if !due {
                    return None;
                }
                var.last_polled = Some(now);
                Some(DueItem {
                    name: var.name.clone(),
                    address: var.address.clone(),
                    poll_interval_secs: var.poll_interval_secs,
                    data: Vec::new(),
                })
            })
            .collect()
    }

    /// Make a variable due on the next cycle
    pub fn mark_due(&self, name: &str) {
        if let Some(var) = self.variables.lock().get_mut(name) {
            var.last_polled = None;
        }
    }

    /// Forget poll timestamps and unsent writes
    pub fn clear_schedule(&self) {
        for var in self.variables.lock().values_mut() {
            var.last_polled = None;
            var.pending_write = None;
        }
    }
}

//! Per-key mutual exclusion for provisioning calls.
//!
//! # Invariants
//! - At most one guard exists per key at any time.
//! - Dropping a guard releases the key and wakes every waiter.
//! - Distinct keys never block each other.

use crate::model::attribute::OwnerKind;
use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Serialization key of one provisioning call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub owner_kind: OwnerKind,
    pub physical_name: String,
}

impl LockKey {
    pub fn new(owner_kind: OwnerKind, physical_name: impl Into<String>) -> Self {
        Self {
            owner_kind,
            physical_name: physical_name.into(),
        }
    }
}

/// Table of held keys shared by every worker of one process.
#[derive(Debug, Default)]
pub struct KeyLocks {
    held: Mutex<HashSet<LockKey>>,
    released: Condvar,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `key` is free, then holds it until the guard drops.
    pub fn acquire(&self, key: LockKey) -> KeyGuard<'_> {
        let mut held = self.lock_held();
        while held.contains(&key) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(key.clone());
        KeyGuard { locks: self, key }
    }

    /// Holds `key` only if nobody else does.
    pub fn try_acquire(&self, key: LockKey) -> Option<KeyGuard<'_>> {
        let mut held = self.lock_held();
        if !held.insert(key.clone()) {
            return None;
        }
        Some(KeyGuard { locks: self, key })
    }

    pub fn is_held(&self, key: &LockKey) -> bool {
        self.lock_held().contains(key)
    }

    // A panic while holding the table cannot leave the set half-updated.
    fn lock_held(&self) -> MutexGuard<'_, HashSet<LockKey>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, key: &LockKey) {
        self.lock_held().remove(key);
        self.released.notify_all();
    }
}

/// Held key; released on drop.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: LockKey,
}

impl KeyGuard<'_> {
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.key);
    }
}

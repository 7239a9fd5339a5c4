//! Provisioning use-case services.
//!
//! # Responsibility
//! - Orchestrate catalog, schema and view repositories into create/remove.
//! - Own the process-wide key locks and derived registry cache.

pub mod key_lock;
pub mod provisioning_service;
pub mod registry_cache;

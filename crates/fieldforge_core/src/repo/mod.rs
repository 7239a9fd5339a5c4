//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the narrow storage contracts the provisioning pipeline consumes:
//!   attribute catalog, physical schema mutator, view layouts/fragments.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Catalog writes enforce `AttributeDefinition::validate()` before persistence.
//! - Storage-level duplicates are reported as semantic errors
//!   (`DuplicateDefinition`, `DuplicateColumn`), never as raw SQLite errors.

pub mod catalog_repo;
pub mod schema_repo;
pub mod view_repo;

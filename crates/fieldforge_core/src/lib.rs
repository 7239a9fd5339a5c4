//! Core of fieldforge: runtime provisioning of typed attributes.
//! This crate is the single source of truth for provisioning invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod view;

pub use config::{ConfigError, ProvisioningConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LogSettings, LoggingError};
pub use model::attribute::{
    parse_selection_options, AttributeDefinition, AttributeId, LogicalType, OwnerKind,
    PhysicalType, SelectionOption, TargetView,
};
pub use model::naming::{normalize, NamingError};
pub use model::view::{FragmentDescriptor, ViewFragment};
pub use repo::catalog_repo::{CatalogError, CatalogRepository, SqliteCatalogRepository};
pub use repo::schema_repo::{ColumnChange, SchemaError, SchemaMutator, SqliteSchemaMutator};
pub use repo::view_repo::{SqliteViewRepository, ViewError, ViewFragmentRepository};
pub use service::provisioning_service::{
    AttributeProvisioner, CreateAttributeRequest, ProvisionError, ProvisionResult,
    ProvisionStatus, ProvisioningContext, SqliteProvisioner,
};
pub use service::registry_cache::{FieldRegistry, RegisteredField, RegistryCache};

/// Minimal health-check API.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

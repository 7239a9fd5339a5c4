//! Attribute provisioning orchestrator.
//!
//! # Responsibility
//! - Sequence naming, column DDL, catalog registration, view attachment and
//!   cache invalidation for create/remove.
//! - Undo this call's own effects when a later step fails.
//!
//! # Invariants
//! - Validation-class failures happen before any side effect.
//! - At most one create/remove runs per `(owner_kind, physical_name)`.
//! - A terminal create failure leaves catalog, columns and fragments as they
//!   were before the call, or reports `CompensationFailure`.
//! - A failed cache rebuild never fails the call.

use crate::config::{ConfigError, ProvisioningConfig};
use crate::model::attribute::{
    clean_selection_options, AttributeDefinition, AttributeValidationError, LogicalType,
    OwnerKind, SelectionOption, TargetView,
};
use crate::model::naming::{is_valid_physical_name, normalize_with_limit};
use crate::model::view::ViewFragment;
use crate::repo::catalog_repo::{CatalogError, CatalogRepository, SqliteCatalogRepository};
use crate::repo::schema_repo::{ColumnChange, SchemaError, SchemaMutator, SqliteSchemaMutator};
use crate::repo::view_repo::{SqliteViewRepository, ViewError, ViewFragmentRepository};
use crate::service::key_lock::{KeyLocks, LockKey};
use crate::service::registry_cache::RegistryCache;
use crate::view::manager::ViewFragmentManager;
use log::{debug, error, info, warn};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Process-wide state shared by every provisioner.
#[derive(Debug, Default)]
pub struct ProvisioningContext {
    pub config: ProvisioningConfig,
    pub locks: KeyLocks,
    pub cache: RegistryCache,
}

impl ProvisioningContext {
    pub fn new(config: ProvisioningConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            locks: KeyLocks::new(),
            cache: RegistryCache::new(),
        })
    }
}

/// Steps of one create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    Idle,
    Validating,
    Naming,
    TypeResolved,
    ColumnAdded,
    CatalogRegistered,
    ViewsAttached,
    Invalidated,
    Done,
}

impl ProvisionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Naming => "naming",
            Self::TypeResolved => "type_resolved",
            Self::ColumnAdded => "column_added",
            Self::CatalogRegistered => "catalog_registered",
            Self::ViewsAttached => "views_attached",
            Self::Invalidated => "invalidated",
            Self::Done => "done",
        }
    }
}

/// Inbound create request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAttributeRequest {
    pub owner_kind: OwnerKind,
    pub scope_entity_id: Option<i64>,
    pub raw_label: String,
    /// Kept as text so unknown types are reported, not rejected by a parser.
    pub logical_type: String,
    pub enumerated_options: Vec<SelectionOption>,
    pub created_by: Option<String>,
}

impl CreateAttributeRequest {
    pub fn new(
        owner_kind: OwnerKind,
        raw_label: impl Into<String>,
        logical_type: impl Into<String>,
    ) -> Self {
        Self {
            owner_kind,
            scope_entity_id: None,
            raw_label: raw_label.into(),
            logical_type: logical_type.into(),
            enumerated_options: Vec::new(),
            created_by: None,
        }
    }

    pub fn with_options(mut self, options: Vec<SelectionOption>) -> Self {
        self.enumerated_options = options;
        self
    }

    pub fn with_scope(mut self, scope_entity_id: i64) -> Self {
        self.scope_entity_id = Some(scope_entity_id);
        self
    }

    pub fn with_actor(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = Some(created_by.into());
        self
    }
}

/// Caller-facing outcome taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStatus {
    Success,
    InvalidName,
    NameConflict,
    UnsupportedType,
    MissingSelectionOptions,
    StorageBusy,
    StorageFailure,
    ViewAttachFailure,
    CompensationFailure,
}

impl ProvisionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::InvalidName => "invalid_name",
            Self::NameConflict => "name_conflict",
            Self::UnsupportedType => "unsupported_type",
            Self::MissingSelectionOptions => "missing_selection_options",
            Self::StorageBusy => "storage_busy",
            Self::StorageFailure => "storage_failure",
            Self::ViewAttachFailure => "view_attach_failure",
            Self::CompensationFailure => "compensation_failure",
        }
    }
}

#[derive(Debug)]
pub enum ProvisionError {
    InvalidName(String),
    NameConflict {
        owner_kind: OwnerKind,
        physical_name: String,
    },
    UnsupportedType(String),
    MissingSelectionOptions,
    /// The store gave up waiting for a lock.
    StorageBusy(String),
    Storage(String),
    ViewAttachFailure(String),
    /// Undoing a failed create failed too; state needs operator attention.
    CompensationFailure {
        original: Box<ProvisionError>,
        failures: Vec<String>,
    },
}

impl ProvisionError {
    pub fn status(&self) -> ProvisionStatus {
        match self {
            Self::InvalidName(_) => ProvisionStatus::InvalidName,
            Self::NameConflict { .. } => ProvisionStatus::NameConflict,
            Self::UnsupportedType(_) => ProvisionStatus::UnsupportedType,
            Self::MissingSelectionOptions => ProvisionStatus::MissingSelectionOptions,
            Self::StorageBusy(_) => ProvisionStatus::StorageBusy,
            Self::Storage(_) => ProvisionStatus::StorageFailure,
            Self::ViewAttachFailure(_) => ProvisionStatus::ViewAttachFailure,
            Self::CompensationFailure { .. } => ProvisionStatus::CompensationFailure,
        }
    }

    fn name_conflict(owner_kind: OwnerKind, physical_name: &str) -> Self {
        Self::NameConflict {
            owner_kind,
            physical_name: physical_name.to_string(),
        }
    }
}

impl Display for ProvisionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(message) => write!(f, "invalid attribute name: {message}"),
            Self::NameConflict {
                owner_kind,
                physical_name,
            } => write!(
                f,
                "attribute `{physical_name}` already exists on `{owner_kind}`"
            ),
            Self::UnsupportedType(value) => write!(f, "unsupported logical type `{value}`"),
            Self::MissingSelectionOptions => {
                write!(f, "enumerated attribute requires at least one option")
            }
            Self::StorageBusy(message) => write!(f, "storage busy: {message}"),
            Self::Storage(message) => write!(f, "storage failure: {message}"),
            Self::ViewAttachFailure(message) => write!(f, "view attach failed: {message}"),
            Self::CompensationFailure { original, failures } => write!(
                f,
                "rollback after `{original}` failed: {}",
                failures.join("; ")
            ),
        }
    }
}

impl Error for ProvisionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CompensationFailure { original, .. } => Some(original.as_ref()),
            _ => None,
        }
    }
}

impl From<CatalogError> for ProvisionError {
    fn from(value: CatalogError) -> Self {
        match value {
            CatalogError::DuplicateDefinition {
                owner_kind,
                physical_name,
            } => Self::NameConflict {
                owner_kind,
                physical_name,
            },
            CatalogError::Validation(AttributeValidationError::MissingOptions) => {
                Self::MissingSelectionOptions
            }
            CatalogError::Validation(err) => Self::InvalidName(err.to_string()),
            CatalogError::Db(err) if err.is_busy() => Self::StorageBusy(err.to_string()),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<SchemaError> for ProvisionError {
    fn from(value: SchemaError) -> Self {
        match value {
            SchemaError::Busy(message) => Self::StorageBusy(message),
            SchemaError::DuplicateColumn { table, column } => match OwnerKind::from_table(&table) {
                Some(owner_kind) => Self::NameConflict {
                    owner_kind,
                    physical_name: column,
                },
                None => Self::Storage(format!("column `{column}` already exists in `{table}`")),
            },
            SchemaError::InvalidIdentifier(value) => Self::InvalidName(value),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<ViewError> for ProvisionError {
    fn from(value: ViewError) -> Self {
        match value {
            ViewError::Db(err) if err.is_busy() => Self::StorageBusy(err.to_string()),
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Side effects one create call has produced so far.
#[derive(Debug, Default)]
struct Effects {
    column_added: bool,
    catalog_registered: bool,
    attached: Vec<TargetView>,
}

impl Effects {
    fn is_empty(&self) -> bool {
        !self.column_added && !self.catalog_registered && self.attached.is_empty()
    }
}

/// State tracker that logs every transition of one create call.
struct Progress {
    owner_kind: OwnerKind,
    physical_name: String,
    state: ProvisionState,
}

impl Progress {
    fn new(owner_kind: OwnerKind) -> Self {
        Self {
            owner_kind,
            physical_name: String::new(),
            state: ProvisionState::Idle,
        }
    }

    fn advance(&mut self, next: ProvisionState) {
        debug!(
            "event=attribute_state module=service status=ok owner_kind={} name={} from={} to={}",
            self.owner_kind,
            self.physical_name,
            self.state.as_str(),
            next.as_str()
        );
        self.state = next;
    }
}

/// Provisioner over SQLite-backed repositories sharing one connection.
pub type SqliteProvisioner<'conn> = AttributeProvisioner<
    SqliteCatalogRepository<'conn>,
    SqliteSchemaMutator<'conn>,
    SqliteViewRepository<'conn>,
>;

impl<'conn> SqliteProvisioner<'conn> {
    /// Builds a provisioner from a migrated connection.
    pub fn sqlite(conn: &'conn Connection, context: Arc<ProvisioningContext>) -> ProvisionResult<Self> {
        Ok(Self::new(
            SqliteCatalogRepository::try_new(conn)?,
            SqliteSchemaMutator::new(conn),
            SqliteViewRepository::new(conn),
            context,
        ))
    }
}

/// Create/remove orchestrator for dynamic attributes.
pub struct AttributeProvisioner<C, S, V>
where
    C: CatalogRepository,
    S: SchemaMutator,
    V: ViewFragmentRepository,
{
    catalog: C,
    schema: S,
    views: ViewFragmentManager<V>,
    context: Arc<ProvisioningContext>,
}

impl<C, S, V> AttributeProvisioner<C, S, V>
where
    C: CatalogRepository,
    S: SchemaMutator,
    V: ViewFragmentRepository,
{
    pub fn new(catalog: C, schema: S, view_repo: V, context: Arc<ProvisioningContext>) -> Self {
        let views = ViewFragmentManager::new(
            view_repo,
            context.config.fragment_priority,
            context.config.scope_context_key.clone(),
        );
        Self {
            catalog,
            schema,
            views,
            context,
        }
    }

    pub fn context(&self) -> &Arc<ProvisioningContext> {
        &self.context
    }

    pub fn views(&self) -> &ViewFragmentManager<V> {
        &self.views
    }

    /// Provisions a new attribute end to end.
    ///
    /// # Contract
    /// - On `Ok(())` the column, catalog row and default-view fragments exist
    ///   and the registry cache has been asked to rebuild.
    /// - On error, nothing this call produced remains, unless the error is
    ///   `CompensationFailure`.
    pub fn create(&self, request: &CreateAttributeRequest) -> ProvisionResult<()> {
        let owner_kind = request.owner_kind;
        let mut progress = Progress::new(owner_kind);
        let result = self.run_create(request, &mut progress);

        match &result {
            Ok(()) => info!(
                "event=attribute_create module=service status=ok owner_kind={owner_kind} name={}",
                progress.physical_name
            ),
            Err(err) => error!(
                "event=attribute_create module=service status=error owner_kind={owner_kind} name={} state={} outcome={} error={err}",
                progress.physical_name,
                progress.state.as_str(),
                err.status().as_str()
            ),
        }
        result
    }

    fn run_create(
        &self,
        request: &CreateAttributeRequest,
        progress: &mut Progress,
    ) -> ProvisionResult<()> {
        let owner_kind = request.owner_kind;
        let config = &self.context.config;

        progress.advance(ProvisionState::Validating);
        let logical_type = LogicalType::parse(&request.logical_type)
            .ok_or_else(|| ProvisionError::UnsupportedType(request.logical_type.clone()))?;
        let options = prepare_options(owner_kind, logical_type, &request.enumerated_options)?;

        progress.advance(ProvisionState::Naming);
        let physical_name = normalize_with_limit(&request.raw_label, config.max_name_len)
            .map_err(|err| ProvisionError::InvalidName(err.to_string()))?;
        progress.physical_name = physical_name.clone();

        let _guard = self
            .context
            .locks
            .acquire(LockKey::new(owner_kind, physical_name.as_str()));
        self.check_free(owner_kind, &physical_name)?;

        progress.advance(ProvisionState::TypeResolved);
        let mut definition = AttributeDefinition::new(
            owner_kind,
            physical_name,
            request.raw_label.trim(),
            logical_type,
        );
        definition.enumerated_options = options;
        definition.scope_entity_id = request.scope_entity_id;
        definition.created_by = request
            .created_by
            .as_deref()
            .map(str::trim)
            .filter(|actor| !actor.is_empty())
            .unwrap_or(config.default_actor.as_str())
            .to_string();
        definition
            .validate()
            .map_err(|err| ProvisionError::from(CatalogError::Validation(err)))?;

        let mut effects = Effects::default();
        if let Err(err) = self.apply(&definition, &mut effects, progress) {
            return Err(self.compensate(&definition, effects, err));
        }

        self.invalidate_cache(owner_kind);
        progress.advance(ProvisionState::Invalidated);
        progress.advance(ProvisionState::Done);
        Ok(())
    }

    fn check_free(&self, owner_kind: OwnerKind, physical_name: &str) -> ProvisionResult<()> {
        if self.catalog.definition_exists(owner_kind, physical_name)?
            || self.schema.has_column(owner_kind.table(), physical_name)?
        {
            return Err(ProvisionError::name_conflict(owner_kind, physical_name));
        }
        Ok(())
    }

    fn apply(
        &self,
        definition: &AttributeDefinition,
        effects: &mut Effects,
        progress: &mut Progress,
    ) -> ProvisionResult<()> {
        let owner_kind = definition.owner_kind;
        let name = definition.physical_name.as_str();

        match self
            .schema
            .add_column(owner_kind.table(), name, definition.physical_type())?
        {
            ColumnChange::Applied => effects.column_added = true,
            // Someone else's column: never ours to drop.
            ColumnChange::AlreadyPresent => {
                return Err(ProvisionError::name_conflict(owner_kind, name));
            }
            ColumnChange::AlreadyAbsent => {
                return Err(ProvisionError::Storage(format!(
                    "add_column reported `{name}` absent"
                )));
            }
        }
        progress.advance(ProvisionState::ColumnAdded);

        self.catalog.create_definition(definition)?;
        effects.catalog_registered = true;
        progress.advance(ProvisionState::CatalogRegistered);

        for &target_view in owner_kind.default_views() {
            self.views
                .attach(owner_kind, target_view, definition, definition.scope_entity_id)
                .map_err(|err| ProvisionError::ViewAttachFailure(format!("{target_view}: {err}")))?;
            effects.attached.push(target_view);
        }
        progress.advance(ProvisionState::ViewsAttached);
        Ok(())
    }

    /// Undoes `effects` in reverse order and returns the error to surface.
    fn compensate(
        &self,
        definition: &AttributeDefinition,
        effects: Effects,
        original: ProvisionError,
    ) -> ProvisionError {
        if effects.is_empty() {
            return original;
        }

        let owner_kind = definition.owner_kind;
        let name = definition.physical_name.as_str();
        warn!(
            "event=attribute_compensate module=service status=start owner_kind={owner_kind} name={name} views={} catalog={} column={}",
            effects.attached.len(),
            effects.catalog_registered,
            effects.column_added
        );

        let mut failures = Vec::new();
        for &target_view in effects.attached.iter().rev() {
            if let Err(err) = self.views.detach(owner_kind, target_view, name) {
                failures.push(format!("detach {target_view} fragment: {err}"));
            }
        }
        if effects.catalog_registered {
            if let Err(err) = self.catalog.remove_definition(owner_kind, name) {
                failures.push(format!("remove catalog entry: {err}"));
            }
        }
        if effects.column_added {
            if let Err(err) = self.schema.drop_column(owner_kind.table(), name) {
                failures.push(format!("drop column: {err}"));
            }
        }

        if failures.is_empty() {
            warn!(
                "event=attribute_compensate module=service status=ok owner_kind={owner_kind} name={name}"
            );
            return original;
        }
        error!(
            "event=attribute_compensate module=service status=error owner_kind={owner_kind} name={name} failures={}",
            failures.len()
        );
        ProvisionError::CompensationFailure {
            original: Box::new(original),
            failures,
        }
    }

    /// Removes an attribute and every derived artifact.
    ///
    /// Each step tolerates the artifact already being gone, so a retry after
    /// a partial failure finishes the job.
    pub fn remove(&self, owner_kind: OwnerKind, physical_name: &str) -> ProvisionResult<()> {
        if !is_valid_physical_name(physical_name) {
            return Err(ProvisionError::InvalidName(format!(
                "`{physical_name}` is not a dynamic attribute name"
            )));
        }
        let _guard = self
            .context
            .locks
            .acquire(LockKey::new(owner_kind, physical_name));

        let result = self.run_remove(owner_kind, physical_name);
        match &result {
            Ok(true) => info!(
                "event=attribute_remove module=service status=ok owner_kind={owner_kind} name={physical_name}"
            ),
            Ok(false) => info!(
                "event=attribute_remove module=service status=noop owner_kind={owner_kind} name={physical_name}"
            ),
            Err(err) => error!(
                "event=attribute_remove module=service status=error owner_kind={owner_kind} name={physical_name} outcome={} error={err}",
                err.status().as_str()
            ),
        }
        result.map(|_| ())
    }

    fn run_remove(&self, owner_kind: OwnerKind, physical_name: &str) -> ProvisionResult<bool> {
        let detached = self.views.detach_all(owner_kind, physical_name)?;
        let removed = self.catalog.remove_definition(owner_kind, physical_name)?;
        let dropped = self.schema.drop_column(owner_kind.table(), physical_name)?;
        self.invalidate_cache(owner_kind);
        Ok(!detached.is_empty() || removed || dropped == ColumnChange::Applied)
    }

    pub fn get(
        &self,
        owner_kind: OwnerKind,
        physical_name: &str,
    ) -> ProvisionResult<Option<AttributeDefinition>> {
        Ok(self.catalog.get_definition(owner_kind, physical_name)?)
    }

    /// Lists definitions; with a scope, only those applying to it.
    pub fn list(
        &self,
        owner_kind: OwnerKind,
        scope_entity_id: Option<i64>,
    ) -> ProvisionResult<Vec<AttributeDefinition>> {
        Ok(self.catalog.list_definitions(owner_kind, scope_entity_id)?)
    }

    pub fn fragments(
        &self,
        owner_kind: OwnerKind,
        physical_name: &str,
    ) -> ProvisionResult<Vec<ViewFragment>> {
        Ok(self.views.list_for_attribute(owner_kind, physical_name)?)
    }

    /// Rebuilds the cache for `owner_kind`, surfacing failures.
    pub fn refresh_cache(&self, owner_kind: OwnerKind) -> ProvisionResult<u64> {
        self.context
            .cache
            .invalidate(owner_kind, &self.catalog, &self.views)
            .map_err(|err| ProvisionError::Storage(err.to_string()))
    }

    fn invalidate_cache(&self, owner_kind: OwnerKind) {
        match self
            .context
            .cache
            .invalidate(owner_kind, &self.catalog, &self.views)
        {
            Ok(generation) => debug!(
                "event=cache_invalidate module=service status=ok owner_kind={owner_kind} generation={generation}"
            ),
            Err(err) => warn!(
                "event=cache_invalidate module=service status=error owner_kind={owner_kind} error={err}"
            ),
        }
    }
}

fn prepare_options(
    owner_kind: OwnerKind,
    logical_type: LogicalType,
    raw: &[SelectionOption],
) -> ProvisionResult<Vec<SelectionOption>> {
    if logical_type != LogicalType::Enumerated {
        if !raw.is_empty() {
            info!(
                "event=attribute_options_ignored module=service status=noop owner_kind={owner_kind} logical_type={logical_type} count={}",
                raw.len()
            );
        }
        return Ok(Vec::new());
    }

    let cleaned = clean_selection_options(raw);
    if cleaned.is_empty() {
        return Err(ProvisionError::MissingSelectionOptions);
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::{CreateAttributeRequest, ProvisionError, ProvisionStatus, ProvisioningContext};
    use crate::config::ProvisioningConfig;
    use crate::model::attribute::{OwnerKind, SelectionOption};

    #[test]
    fn status_maps_every_error() {
        let conflict = ProvisionError::NameConflict {
            owner_kind: OwnerKind::Group,
            physical_name: "x_a".to_string(),
        };
        assert_eq!(conflict.status(), ProvisionStatus::NameConflict);
        assert_eq!(
            ProvisionError::Storage("disk".to_string()).status(),
            ProvisionStatus::StorageFailure
        );
        let wrapped = ProvisionError::CompensationFailure {
            original: Box::new(ProvisionError::StorageBusy("locked".to_string())),
            failures: vec!["drop column: locked".to_string()],
        };
        assert_eq!(wrapped.status(), ProvisionStatus::CompensationFailure);
        assert!(std::error::Error::source(&wrapped).is_some());
    }

    #[test]
    fn request_builders_fill_optional_fields() {
        let request = CreateAttributeRequest::new(OwnerKind::SubItem, "Effort", "integer")
            .with_scope(3)
            .with_actor("alice")
            .with_options(vec![SelectionOption::new("a", "A")]);
        assert_eq!(request.scope_entity_id, Some(3));
        assert_eq!(request.created_by.as_deref(), Some("alice"));
        assert_eq!(request.enumerated_options.len(), 1);
    }

    #[test]
    fn context_rejects_invalid_config() {
        let config = ProvisioningConfig {
            max_name_len: 1,
            ..ProvisioningConfig::default()
        };
        assert!(ProvisioningContext::new(config).is_err());
    }
}

//! In-process field registry and compiled view cache.
//!
//! # Responsibility
//! - Expose the fields the running type system knows per owner kind.
//! - Hold compiled view arches per `(owner_kind, target_view)`.
//!
//! # Invariants
//! - Snapshots are rebuilt from the catalog, never patched in place.
//! - A rebuild is complete before it is swapped in; a failed rebuild keeps
//!   the previous snapshot.
//! - `generation` grows by one per successful rebuild of an owner kind.
//! - Rebuilds of one owner kind run one at a time from catalog read to swap,
//!   so the newest generation always reflects the latest committed catalog.

use crate::model::attribute::{AttributeDefinition, LogicalType, OwnerKind, TargetView};
use crate::repo::catalog_repo::{CatalogError, CatalogRepository};
use crate::repo::view_repo::{ViewError, ViewFragmentRepository};
use crate::view::manager::ViewFragmentManager;
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// One field visible to the running type system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredField {
    pub name: String,
    pub label: String,
    pub widget: String,
    pub builtin: bool,
    pub scope_entity_id: Option<i64>,
    /// `None` for built-in fields.
    pub logical_type: Option<LogicalType>,
}

impl RegisteredField {
    fn from_definition(definition: &AttributeDefinition) -> Self {
        Self {
            name: definition.physical_name.clone(),
            label: definition.display_label.clone(),
            widget: definition.widget_hint().to_string(),
            builtin: false,
            scope_entity_id: definition.scope_entity_id,
            logical_type: Some(definition.logical_type),
        }
    }
}

/// Field list of one owner kind at one generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldRegistry {
    pub generation: u64,
    pub fields: Vec<RegisteredField>,
}

#[derive(Debug, Clone, Default)]
struct OwnerSnapshot {
    registry: FieldRegistry,
    views: BTreeMap<TargetView, String>,
}

#[derive(Debug)]
pub enum CacheError {
    Catalog(CatalogError),
    View(ViewError),
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Catalog(err) => write!(f, "registry rebuild failed reading catalog: {err}"),
            Self::View(err) => write!(f, "registry rebuild failed compiling views: {err}"),
        }
    }
}

impl Error for CacheError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Catalog(err) => Some(err),
            Self::View(err) => Some(err),
        }
    }
}

impl From<CatalogError> for CacheError {
    fn from(value: CatalogError) -> Self {
        Self::Catalog(value)
    }
}

impl From<ViewError> for CacheError {
    fn from(value: ViewError) -> Self {
        Self::View(value)
    }
}

/// Derived projection of the catalog and view layouts, shared across workers.
#[derive(Debug, Default)]
pub struct RegistryCache {
    snapshots: RwLock<HashMap<OwnerKind, OwnerSnapshot>>,
    rebuild_gates: Mutex<HashMap<OwnerKind, Arc<Mutex<()>>>>,
}

impl RegistryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the snapshot of `owner_kind` and returns its new generation.
    pub fn invalidate<C, V>(
        &self,
        owner_kind: OwnerKind,
        catalog: &C,
        views: &ViewFragmentManager<V>,
    ) -> Result<u64, CacheError>
    where
        C: CatalogRepository,
        V: ViewFragmentRepository,
    {
        let gate = self.rebuild_gate(owner_kind);
        let _rebuilding = gate.lock().unwrap_or_else(PoisonError::into_inner);

        let mut fields: Vec<RegisteredField> = owner_kind
            .builtin_fields()
            .iter()
            .map(|field| RegisteredField {
                name: field.name.to_string(),
                label: field.label.to_string(),
                widget: field.widget.to_string(),
                builtin: true,
                scope_entity_id: None,
                logical_type: None,
            })
            .collect();
        fields.extend(
            catalog
                .list_definitions(owner_kind, None)?
                .iter()
                .map(RegisteredField::from_definition),
        );

        let mut compiled = BTreeMap::new();
        for target_view in views.available_views(owner_kind)? {
            compiled.insert(target_view, views.compiled_view(owner_kind, target_view)?);
        }

        let mut snapshots = self
            .snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let generation = snapshots
            .get(&owner_kind)
            .map_or(0, |snapshot| snapshot.registry.generation)
            + 1;
        snapshots.insert(
            owner_kind,
            OwnerSnapshot {
                registry: FieldRegistry { generation, fields },
                views: compiled,
            },
        );
        Ok(generation)
    }

    /// Current field list; `None` before the first rebuild.
    pub fn fields(&self, owner_kind: OwnerKind) -> Option<FieldRegistry> {
        self.read(owner_kind, |snapshot| snapshot.registry.clone())
    }

    pub fn field(&self, owner_kind: OwnerKind, name: &str) -> Option<RegisteredField> {
        self.read(owner_kind, |snapshot| {
            snapshot
                .registry
                .fields
                .iter()
                .find(|field| field.name == name)
                .cloned()
        })
        .flatten()
    }

    pub fn compiled_view(&self, owner_kind: OwnerKind, target_view: TargetView) -> Option<String> {
        self.read(owner_kind, |snapshot| snapshot.views.get(&target_view).cloned())
            .flatten()
    }

    /// Generation of the current snapshot; 0 before the first rebuild.
    pub fn generation(&self, owner_kind: OwnerKind) -> u64 {
        self.read(owner_kind, |snapshot| snapshot.registry.generation)
            .unwrap_or(0)
    }

    fn rebuild_gate(&self, owner_kind: OwnerKind) -> Arc<Mutex<()>> {
        let mut gates = self
            .rebuild_gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(owner_kind).or_default())
    }

    fn read<T>(&self, owner_kind: OwnerKind, f: impl FnOnce(&OwnerSnapshot) -> T) -> Option<T> {
        let snapshots = self
            .snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        snapshots.get(&owner_kind).map(f)
    }
}

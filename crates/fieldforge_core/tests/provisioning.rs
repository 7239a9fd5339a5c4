use fieldforge_core::db::open_db_in_memory;
use fieldforge_core::repo::catalog_repo::CatalogResult;
use fieldforge_core::repo::schema_repo::{ColumnInfo, SchemaResult};
use fieldforge_core::repo::view_repo::{BaseLayout, ViewResult};
use fieldforge_core::{
    AttributeDefinition, AttributeId, AttributeProvisioner, CatalogError, CatalogRepository,
    ColumnChange, CreateAttributeRequest, OwnerKind, PhysicalType, ProvisionError,
    ProvisionStatus, ProvisioningConfig, ProvisioningContext, SchemaError, SchemaMutator,
    SelectionOption, SqliteCatalogRepository, SqliteProvisioner, SqliteSchemaMutator,
    SqliteViewRepository, TargetView, ViewError, ViewFragment, ViewFragmentRepository,
};
use rusqlite::Connection;
use std::sync::Arc;

fn context() -> Arc<ProvisioningContext> {
    Arc::new(ProvisioningContext::default())
}

fn priority_request() -> CreateAttributeRequest {
    CreateAttributeRequest::new(OwnerKind::Group, "Priority Level", "enumerated").with_options(vec![
        SelectionOption::new("low", "Low"),
        SelectionOption::new("high", "High"),
    ])
}

fn column_names(conn: &Connection, table: &str) -> Vec<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid;")
        .unwrap();
    stmt.query_map([table], |row| row.get(0))
        .unwrap()
        .map(Result::unwrap)
        .collect()
}

fn column_type(conn: &Connection, table: &str, column: &str) -> Option<String> {
    conn.query_row(
        "SELECT type FROM pragma_table_info(?1) WHERE name = ?2;",
        [table, column],
        |row| row.get(0),
    )
    .ok()
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| row.get(0))
        .unwrap()
}

/// Columns of every record table plus catalog and fragment row counts.
fn store_state(conn: &Connection) -> (Vec<Vec<String>>, i64, i64) {
    let columns = OwnerKind::ALL
        .iter()
        .map(|kind| column_names(conn, kind.table()))
        .collect();
    (
        columns,
        count(conn, "attribute_definitions"),
        count(conn, "view_fragments"),
    )
}

#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    catalog_create: bool,
    catalog_remove: bool,
    catalog_list: bool,
    schema_busy: bool,
    schema_drop: bool,
    view_upsert: Option<TargetView>,
    view_delete: bool,
}

struct FaultyCatalog<'conn> {
    inner: SqliteCatalogRepository<'conn>,
    faults: Faults,
}

impl CatalogRepository for FaultyCatalog<'_> {
    fn create_definition(&self, definition: &AttributeDefinition) -> CatalogResult<AttributeId> {
        if self.faults.catalog_create {
            return Err(CatalogError::InvalidData("injected create failure".to_string()));
        }
        self.inner.create_definition(definition)
    }

    fn remove_definition(&self, owner_kind: OwnerKind, physical_name: &str) -> CatalogResult<bool> {
        if self.faults.catalog_remove {
            return Err(CatalogError::InvalidData("injected remove failure".to_string()));
        }
        self.inner.remove_definition(owner_kind, physical_name)
    }

    fn get_definition(
        &self,
        owner_kind: OwnerKind,
        physical_name: &str,
    ) -> CatalogResult<Option<AttributeDefinition>> {
        self.inner.get_definition(owner_kind, physical_name)
    }

    fn list_definitions(
        &self,
        owner_kind: OwnerKind,
        scope_entity_id: Option<i64>,
    ) -> CatalogResult<Vec<AttributeDefinition>> {
        if self.faults.catalog_list {
            return Err(CatalogError::InvalidData("injected list failure".to_string()));
        }
        self.inner.list_definitions(owner_kind, scope_entity_id)
    }
}

struct FaultySchema<'conn> {
    inner: SqliteSchemaMutator<'conn>,
    faults: Faults,
}

impl SchemaMutator for FaultySchema<'_> {
    fn add_column(
        &self,
        table: &str,
        column: &str,
        physical_type: PhysicalType,
    ) -> SchemaResult<ColumnChange> {
        if self.faults.schema_busy {
            return Err(SchemaError::Busy("database is locked".to_string()));
        }
        self.inner.add_column(table, column, physical_type)
    }

    fn drop_column(&self, table: &str, column: &str) -> SchemaResult<ColumnChange> {
        if self.faults.schema_drop {
            return Err(SchemaError::Busy("database is locked".to_string()));
        }
        self.inner.drop_column(table, column)
    }

    fn list_columns(&self, table: &str) -> SchemaResult<Vec<ColumnInfo>> {
        self.inner.list_columns(table)
    }
}

struct FaultyViews<'conn> {
    inner: SqliteViewRepository<'conn>,
    faults: Faults,
}

impl ViewFragmentRepository for FaultyViews<'_> {
    fn base_layout(
        &self,
        owner_kind: OwnerKind,
        target_view: TargetView,
    ) -> ViewResult<Option<BaseLayout>> {
        self.inner.base_layout(owner_kind, target_view)
    }

    fn upsert_fragment(&self, fragment: &ViewFragment) -> ViewResult<()> {
        if self.faults.view_upsert == Some(fragment.target_view()) {
            return Err(ViewError::InvalidData("injected upsert failure".to_string()));
        }
        self.inner.upsert_fragment(fragment)
    }

    fn delete_fragment(
        &self,
        owner_kind: OwnerKind,
        target_view: TargetView,
        attribute: &str,
    ) -> ViewResult<bool> {
        if self.faults.view_delete {
            return Err(ViewError::InvalidData("injected delete failure".to_string()));
        }
        self.inner.delete_fragment(owner_kind, target_view, attribute)
    }

    fn list_fragments(
        &self,
        owner_kind: OwnerKind,
        target_view: Option<TargetView>,
    ) -> ViewResult<Vec<ViewFragment>> {
        self.inner.list_fragments(owner_kind, target_view)
    }
}

type FaultyProvisioner<'conn> =
    AttributeProvisioner<FaultyCatalog<'conn>, FaultySchema<'conn>, FaultyViews<'conn>>;

fn faulty<'conn>(
    conn: &'conn Connection,
    context: Arc<ProvisioningContext>,
    faults: Faults,
) -> FaultyProvisioner<'conn> {
    AttributeProvisioner::new(
        FaultyCatalog {
            inner: SqliteCatalogRepository::try_new(conn).unwrap(),
            faults,
        },
        FaultySchema {
            inner: SqliteSchemaMutator::new(conn),
            faults,
        },
        FaultyViews {
            inner: SqliteViewRepository::new(conn),
            faults,
        },
        context,
    )
}

#[test]
fn create_priority_level_provisions_every_artifact() {
    let conn = open_db_in_memory().unwrap();
    let provisioner = SqliteProvisioner::sqlite(&conn, context()).unwrap();

    provisioner.create(&priority_request()).unwrap();

    let definitions = provisioner.list(OwnerKind::Group, None).unwrap();
    assert_eq!(definitions.len(), 1);
    let definition = &definitions[0];
    assert_eq!(definition.physical_name, "x_priority_level");
    assert_eq!(definition.display_label, "Priority Level");
    assert_eq!(definition.created_by, "system");
    assert_eq!(definition.enumerated_options.len(), 2);

    assert_eq!(
        column_type(&conn, "task_board", "x_priority_level").as_deref(),
        Some("VARCHAR(255)")
    );

    let fragments = provisioner
        .fragments(OwnerKind::Group, "x_priority_level")
        .unwrap();
    let mut views: Vec<TargetView> = fragments.iter().map(ViewFragment::target_view).collect();
    views.sort();
    assert_eq!(views, vec![TargetView::Tree, TargetView::Form]);
    assert!(fragments
        .iter()
        .all(|fragment| fragment.descriptor.widget_hint == "selection"));
}

#[test]
fn create_refreshes_registry_cache_and_compiled_views() {
    let conn = open_db_in_memory().unwrap();
    let ctx = context();
    let provisioner = SqliteProvisioner::sqlite(&conn, Arc::clone(&ctx)).unwrap();

    provisioner.create(&priority_request()).unwrap();

    let field = ctx.cache.field(OwnerKind::Group, "x_priority_level").unwrap();
    assert_eq!(field.widget, "selection");
    assert!(!field.builtin);
    for view in [TargetView::Tree, TargetView::Form] {
        let arch = ctx.cache.compiled_view(OwnerKind::Group, view).unwrap();
        assert!(
            arch.contains(r#"<field name="person"/><field name="x_priority_level""#),
            "{view} arch: {arch}"
        );
    }
    let generation = ctx.cache.generation(OwnerKind::Group);

    provisioner.remove(OwnerKind::Group, "x_priority_level").unwrap();
    assert!(ctx.cache.field(OwnerKind::Group, "x_priority_level").is_none());
    assert!(!ctx
        .cache
        .compiled_view(OwnerKind::Group, TargetView::Tree)
        .unwrap()
        .contains("x_priority_level"));
    assert_eq!(ctx.cache.generation(OwnerKind::Group), generation + 1);
}

#[test]
fn remove_of_unknown_attribute_is_a_noop() {
    let conn = open_db_in_memory().unwrap();
    let provisioner = SqliteProvisioner::sqlite(&conn, context()).unwrap();

    provisioner.remove(OwnerKind::Group, "x_priority_level").unwrap();
    assert!(provisioner.list(OwnerKind::Group, None).unwrap().is_empty());
}

#[test]
fn remove_twice_matches_single_remove() {
    let conn = open_db_in_memory().unwrap();
    let provisioner = SqliteProvisioner::sqlite(&conn, context()).unwrap();
    provisioner.create(&priority_request()).unwrap();

    provisioner.remove(OwnerKind::Group, "x_priority_level").unwrap();
    let after_first = store_state(&conn);
    provisioner.remove(OwnerKind::Group, "x_priority_level").unwrap();
    assert_eq!(store_state(&conn), after_first);
}

#[test]
fn create_then_remove_restores_prior_state() {
    let conn = open_db_in_memory().unwrap();
    let provisioner = SqliteProvisioner::sqlite(&conn, context()).unwrap();
    provisioner
        .create(&CreateAttributeRequest::new(OwnerKind::SubItem, "Effort", "integer"))
        .unwrap();
    let before = store_state(&conn);

    provisioner
        .create(&CreateAttributeRequest::new(OwnerKind::SubItem, "Due on", "date"))
        .unwrap();
    assert_ne!(store_state(&conn), before);
    provisioner.remove(OwnerKind::SubItem, "x_due_on").unwrap();

    assert_eq!(store_state(&conn), before);
}

#[test]
fn colliding_label_reports_name_conflict_without_side_effects() {
    let conn = open_db_in_memory().unwrap();
    let provisioner = SqliteProvisioner::sqlite(&conn, context()).unwrap();
    provisioner.create(&priority_request()).unwrap();
    let before = store_state(&conn);

    let err = provisioner
        .create(&CreateAttributeRequest::new(OwnerKind::Group, "priority-level", "text"))
        .unwrap_err();
    assert_eq!(err.status(), ProvisionStatus::NameConflict);
    assert_eq!(store_state(&conn), before);
}

#[test]
fn same_label_on_another_owner_kind_is_allowed() {
    let conn = open_db_in_memory().unwrap();
    let provisioner = SqliteProvisioner::sqlite(&conn, context()).unwrap();
    provisioner.create(&priority_request()).unwrap();

    let mut request = priority_request();
    request.owner_kind = OwnerKind::SubItemActivity;
    provisioner.create(&request).unwrap();
    assert!(column_names(&conn, "subtask_activity").contains(&"x_priority_level".to_string()));
}

#[test]
fn orphan_column_is_a_conflict_and_is_left_alone() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch("ALTER TABLE task_board ADD COLUMN x_legacy TEXT;")
        .unwrap();
    let provisioner = SqliteProvisioner::sqlite(&conn, context()).unwrap();

    let err = provisioner
        .create(&CreateAttributeRequest::new(OwnerKind::Group, "Legacy", "text"))
        .unwrap_err();
    assert!(matches!(
        err,
        ProvisionError::NameConflict { owner_kind: OwnerKind::Group, ref physical_name }
            if physical_name == "x_legacy"
    ));
    assert!(column_names(&conn, "task_board").contains(&"x_legacy".to_string()));
    assert_eq!(count(&conn, "attribute_definitions"), 0);
}

#[test]
fn enumerated_without_options_is_rejected_up_front() {
    let conn = open_db_in_memory().unwrap();
    let provisioner = SqliteProvisioner::sqlite(&conn, context()).unwrap();
    let before = store_state(&conn);

    let err = provisioner
        .create(&CreateAttributeRequest::new(OwnerKind::Group, "State", "enumerated"))
        .unwrap_err();
    assert_eq!(err.status(), ProvisionStatus::MissingSelectionOptions);

    let blank_only = CreateAttributeRequest::new(OwnerKind::Group, "State", "selection")
        .with_options(vec![SelectionOption::new("  ", "Nothing")]);
    assert_eq!(
        provisioner.create(&blank_only).unwrap_err().status(),
        ProvisionStatus::MissingSelectionOptions
    );
    assert_eq!(store_state(&conn), before);
}

#[test]
fn validation_errors_precede_side_effects() {
    let conn = open_db_in_memory().unwrap();
    let provisioner = SqliteProvisioner::sqlite(&conn, context()).unwrap();
    let before = store_state(&conn);

    let unsupported = provisioner
        .create(&CreateAttributeRequest::new(OwnerKind::Group, "Payload", "json"))
        .unwrap_err();
    assert!(matches!(unsupported, ProvisionError::UnsupportedType(ref value) if value == "json"));

    let unnamed = provisioner
        .create(&CreateAttributeRequest::new(OwnerKind::Group, "!!!", "text"))
        .unwrap_err();
    assert_eq!(unnamed.status(), ProvisionStatus::InvalidName);

    let builtin = provisioner
        .remove(OwnerKind::Group, "person")
        .unwrap_err();
    assert_eq!(builtin.status(), ProvisionStatus::InvalidName);

    assert_eq!(store_state(&conn), before);
}

#[test]
fn options_are_ignored_for_scalar_types() {
    let conn = open_db_in_memory().unwrap();
    let provisioner = SqliteProvisioner::sqlite(&conn, context()).unwrap();

    let request = CreateAttributeRequest::new(OwnerKind::Group, "Hours", "float")
        .with_options(vec![SelectionOption::new("a", "A")])
        .with_actor("dana");
    provisioner.create(&request).unwrap();

    let definition = provisioner
        .get(OwnerKind::Group, "x_hours")
        .unwrap()
        .unwrap();
    assert!(definition.enumerated_options.is_empty());
    assert_eq!(definition.created_by, "dana");
    assert_eq!(
        column_type(&conn, "task_board", "x_hours").as_deref(),
        Some("NUMERIC")
    );
}

#[test]
fn scoped_attribute_guards_fragments_and_filters_listing() {
    let conn = open_db_in_memory().unwrap();
    let provisioner = SqliteProvisioner::sqlite(&conn, context()).unwrap();
    provisioner
        .create(&CreateAttributeRequest::new(OwnerKind::Group, "Sprint", "text").with_scope(7))
        .unwrap();

    for fragment in provisioner.fragments(OwnerKind::Group, "x_sprint").unwrap() {
        assert_eq!(
            fragment.descriptor.visibility_guard.as_deref(),
            Some("context.get('default_scope_id') != 7")
        );
    }
    assert_eq!(provisioner.list(OwnerKind::Group, Some(7)).unwrap().len(), 1);
    assert!(provisioner.list(OwnerKind::Group, Some(9)).unwrap().is_empty());
}

#[test]
fn configured_priority_and_context_key_reach_fragments() {
    let conn = open_db_in_memory().unwrap();
    let config = ProvisioningConfig::from_json_str(
        r#"{"fragment_priority": 40, "scope_context_key": "board_id"}"#,
    )
    .unwrap();
    let ctx = Arc::new(ProvisioningContext::new(config).unwrap());
    let provisioner = SqliteProvisioner::sqlite(&conn, ctx).unwrap();
    provisioner
        .create(&CreateAttributeRequest::new(OwnerKind::SubItem, "Owner note", "text").with_scope(2))
        .unwrap();

    let fragments = provisioner.fragments(OwnerKind::SubItem, "x_owner_note").unwrap();
    assert_eq!(fragments.len(), 2);
    for fragment in fragments {
        assert_eq!(fragment.priority, 40);
        assert_eq!(
            fragment.descriptor.visibility_guard.as_deref(),
            Some("context.get('board_id') != 2")
        );
    }
}

#[test]
fn catalog_failure_rolls_back_column() {
    let conn = open_db_in_memory().unwrap();
    let before = store_state(&conn);
    let provisioner = faulty(
        &conn,
        context(),
        Faults {
            catalog_create: true,
            ..Faults::default()
        },
    );

    let err = provisioner.create(&priority_request()).unwrap_err();
    assert_eq!(err.status(), ProvisionStatus::StorageFailure);
    assert_eq!(store_state(&conn), before);
}

#[test]
fn view_attach_failure_rolls_back_everything() {
    let conn = open_db_in_memory().unwrap();
    let before = store_state(&conn);
    let provisioner = faulty(
        &conn,
        context(),
        Faults {
            view_upsert: Some(TargetView::Form),
            ..Faults::default()
        },
    );

    let err = provisioner.create(&priority_request()).unwrap_err();
    assert_eq!(err.status(), ProvisionStatus::ViewAttachFailure);
    assert_eq!(store_state(&conn), before);
}

#[test]
fn busy_schema_lock_reports_storage_busy() {
    let conn = open_db_in_memory().unwrap();
    let before = store_state(&conn);
    let provisioner = faulty(
        &conn,
        context(),
        Faults {
            schema_busy: true,
            ..Faults::default()
        },
    );

    let err = provisioner.create(&priority_request()).unwrap_err();
    assert!(matches!(err, ProvisionError::StorageBusy(_)));
    assert_eq!(store_state(&conn), before);
}

#[test]
fn failed_undo_reports_compensation_failure() {
    let conn = open_db_in_memory().unwrap();
    let provisioner = faulty(
        &conn,
        context(),
        Faults {
            view_upsert: Some(TargetView::Form),
            schema_drop: true,
            ..Faults::default()
        },
    );

    let err = provisioner.create(&priority_request()).unwrap_err();
    match err {
        ProvisionError::CompensationFailure { original, failures } => {
            assert_eq!(original.status(), ProvisionStatus::ViewAttachFailure);
            assert_eq!(failures.len(), 1);
            assert!(failures[0].starts_with("drop column"));
        }
        other => panic!("unexpected error: {other}"),
    }
    // Undo steps that could run did run.
    assert_eq!(count(&conn, "attribute_definitions"), 0);
    assert_eq!(count(&conn, "view_fragments"), 0);
    assert!(column_names(&conn, "task_board").contains(&"x_priority_level".to_string()));
}

#[test]
fn remove_retry_finishes_after_partial_failure() {
    let conn = open_db_in_memory().unwrap();
    let ctx = context();
    SqliteProvisioner::sqlite(&conn, Arc::clone(&ctx))
        .unwrap()
        .create(&priority_request())
        .unwrap();

    let broken = faulty(
        &conn,
        Arc::clone(&ctx),
        Faults {
            catalog_remove: true,
            ..Faults::default()
        },
    );
    let err = broken.remove(OwnerKind::Group, "x_priority_level").unwrap_err();
    assert_eq!(err.status(), ProvisionStatus::StorageFailure);
    assert_eq!(count(&conn, "view_fragments"), 0);
    assert_eq!(count(&conn, "attribute_definitions"), 1);

    let provisioner = SqliteProvisioner::sqlite(&conn, ctx).unwrap();
    provisioner.remove(OwnerKind::Group, "x_priority_level").unwrap();
    assert_eq!(count(&conn, "attribute_definitions"), 0);
    assert!(!column_names(&conn, "task_board").contains(&"x_priority_level".to_string()));
}

#[test]
fn remove_stops_at_failing_detach() {
    let conn = open_db_in_memory().unwrap();
    let ctx = context();
    SqliteProvisioner::sqlite(&conn, Arc::clone(&ctx))
        .unwrap()
        .create(&priority_request())
        .unwrap();

    let broken = faulty(
        &conn,
        ctx,
        Faults {
            view_delete: true,
            ..Faults::default()
        },
    );
    assert!(broken.remove(OwnerKind::Group, "x_priority_level").is_err());
    assert_eq!(count(&conn, "attribute_definitions"), 1);
    assert!(column_names(&conn, "task_board").contains(&"x_priority_level".to_string()));
}

#[test]
fn cache_failure_does_not_fail_create_and_keeps_snapshot() {
    let conn = open_db_in_memory().unwrap();
    let ctx = context();
    let healthy = SqliteProvisioner::sqlite(&conn, Arc::clone(&ctx)).unwrap();
    assert_eq!(healthy.refresh_cache(OwnerKind::Group).unwrap(), 1);

    let stale = faulty(
        &conn,
        Arc::clone(&ctx),
        Faults {
            catalog_list: true,
            ..Faults::default()
        },
    );
    stale.create(&priority_request()).unwrap();

    assert_eq!(ctx.cache.generation(OwnerKind::Group), 1);
    assert!(ctx.cache.field(OwnerKind::Group, "x_priority_level").is_none());
    assert!(ctx.cache.field(OwnerKind::Group, "person").is_some());
    assert_eq!(count(&conn, "attribute_definitions"), 1);

    assert_eq!(healthy.refresh_cache(OwnerKind::Group).unwrap(), 2);
    assert!(ctx.cache.field(OwnerKind::Group, "x_priority_level").is_some());
}

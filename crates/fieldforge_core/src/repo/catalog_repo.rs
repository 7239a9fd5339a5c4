//! Attribute catalog contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist, remove and list attribute definitions per owner kind.
//! - Own the authoritative uniqueness check on `(owner_kind, physical_name)`.
//!
//! # Invariants
//! - Write paths call `AttributeDefinition::validate()` before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.
//! - `remove_definition` is idempotent.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::{is_unique_violation, DbError};
use crate::model::attribute::{
    AttributeDefinition, AttributeId, AttributeValidationError, LogicalType, OwnerKind,
    SelectionOption,
};
use rusqlite::{params, Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const DEFINITION_SELECT_SQL: &str = "SELECT
    id,
    owner_kind,
    physical_name,
    display_label,
    logical_type,
    enumerated_options,
    scope_entity_id,
    created_at,
    created_by
FROM attribute_definitions";

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors from attribute catalog operations.
#[derive(Debug)]
pub enum CatalogError {
    Validation(AttributeValidationError),
    Db(DbError),
    /// The `(owner_kind, physical_name)` uniqueness constraint rejected a row.
    DuplicateDefinition {
        owner_kind: OwnerKind,
        physical_name: String,
    },
    InvalidData(String),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
}

impl Display for CatalogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::DuplicateDefinition {
                owner_kind,
                physical_name,
            } => write!(
                f,
                "attribute `{physical_name}` already defined for `{owner_kind}`"
            ),
            Self::InvalidData(message) => {
                write!(f, "invalid persisted attribute data: {message}")
            }
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "attribute catalog requires schema version {expected_version}, got {actual_version}"
            ),
        }
    }
}

impl Error for CatalogError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::DuplicateDefinition { .. } => None,
            Self::InvalidData(_) => None,
            Self::UninitializedConnection { .. } => None,
        }
    }
}

impl From<AttributeValidationError> for CatalogError {
    fn from(value: AttributeValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for CatalogError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for CatalogError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for the attribute catalog.
pub trait CatalogRepository {
    /// Persists one definition; the uniqueness constraint is authoritative.
    fn create_definition(&self, definition: &AttributeDefinition) -> CatalogResult<AttributeId>;
    /// Deletes one definition. Returns `false` when nothing was there.
    fn remove_definition(&self, owner_kind: OwnerKind, physical_name: &str)
        -> CatalogResult<bool>;
    fn get_definition(
        &self,
        owner_kind: OwnerKind,
        physical_name: &str,
    ) -> CatalogResult<Option<AttributeDefinition>>;
    /// Lists definitions ordered by creation time.
    ///
    /// With a scope, returns definitions scoped to that entity plus unscoped
    /// ones.
    fn list_definitions(
        &self,
        owner_kind: OwnerKind,
        scope_entity_id: Option<i64>,
    ) -> CatalogResult<Vec<AttributeDefinition>>;

    fn definition_exists(&self, owner_kind: OwnerKind, physical_name: &str) -> CatalogResult<bool> {
        Ok(self.get_definition(owner_kind, physical_name)?.is_some())
    }
}

/// SQLite-backed attribute catalog.
pub struct SqliteCatalogRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCatalogRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> CatalogResult<Self> {
        let expected_version = latest_version();
        let actual_version = current_user_version(conn)?;
        if actual_version != expected_version {
            return Err(CatalogError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }
        Ok(Self { conn })
    }
}

impl CatalogRepository for SqliteCatalogRepository<'_> {
    fn create_definition(&self, definition: &AttributeDefinition) -> CatalogResult<AttributeId> {
        definition.validate()?;

        let options_json = encode_options(definition)?;
        let result = self.conn.execute(
            "INSERT INTO attribute_definitions (
                id,
                owner_kind,
                physical_name,
                display_label,
                logical_type,
                enumerated_options,
                scope_entity_id,
                created_at,
                created_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                definition.id.to_string(),
                definition.owner_kind.as_str(),
                definition.physical_name.as_str(),
                definition.display_label.as_str(),
                definition.logical_type.as_str(),
                options_json,
                definition.scope_entity_id,
                definition.created_at,
                definition.created_by.as_str(),
            ],
        );

        match result {
            Ok(_) => Ok(definition.id),
            Err(err) if is_unique_violation(&err) => Err(CatalogError::DuplicateDefinition {
                owner_kind: definition.owner_kind,
                physical_name: definition.physical_name.clone(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn remove_definition(
        &self,
        owner_kind: OwnerKind,
        physical_name: &str,
    ) -> CatalogResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM attribute_definitions
             WHERE owner_kind = ?1 AND physical_name = ?2;",
            params![owner_kind.as_str(), physical_name],
        )?;
        Ok(changed > 0)
    }

    fn get_definition(
        &self,
        owner_kind: OwnerKind,
        physical_name: &str,
    ) -> CatalogResult<Option<AttributeDefinition>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DEFINITION_SELECT_SQL}
             WHERE owner_kind = ?1 AND physical_name = ?2;"
        ))?;

        let mut rows = stmt.query(params![owner_kind.as_str(), physical_name])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_definition_row(row)?));
        }

        Ok(None)
    }

    fn list_definitions(
        &self,
        owner_kind: OwnerKind,
        scope_entity_id: Option<i64>,
    ) -> CatalogResult<Vec<AttributeDefinition>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DEFINITION_SELECT_SQL}
             WHERE owner_kind = ?1
               AND (?2 IS NULL OR scope_entity_id IS NULL OR scope_entity_id = ?2)
             ORDER BY created_at ASC, rowid ASC;"
        ))?;

        let mut rows = stmt.query(params![owner_kind.as_str(), scope_entity_id])?;
        let mut definitions = Vec::new();
        while let Some(row) = rows.next()? {
            definitions.push(parse_definition_row(row)?);
        }

        Ok(definitions)
    }
}

fn encode_options(definition: &AttributeDefinition) -> CatalogResult<Option<String>> {
    if definition.logical_type != LogicalType::Enumerated {
        return Ok(None);
    }
    serde_json::to_string(&definition.enumerated_options)
        .map(Some)
        .map_err(|err| CatalogError::InvalidData(format!("cannot encode options: {err}")))
}

fn parse_definition_row(row: &Row<'_>) -> CatalogResult<AttributeDefinition> {
    let id_text: String = row.get("id")?;
    let id = Uuid::parse_str(&id_text).map_err(|_| {
        CatalogError::InvalidData(format!(
            "invalid uuid value `{id_text}` in attribute_definitions.id"
        ))
    })?;

    let owner_text: String = row.get("owner_kind")?;
    let owner_kind = OwnerKind::parse(&owner_text).ok_or_else(|| {
        CatalogError::InvalidData(format!(
            "invalid owner kind `{owner_text}` in attribute_definitions.owner_kind"
        ))
    })?;

    let type_text: String = row.get("logical_type")?;
    let logical_type = LogicalType::parse(&type_text).ok_or_else(|| {
        CatalogError::InvalidData(format!(
            "invalid logical type `{type_text}` in attribute_definitions.logical_type"
        ))
    })?;

    let enumerated_options = match row.get::<_, Option<String>>("enumerated_options")? {
        Some(json) => serde_json::from_str::<Vec<SelectionOption>>(&json).map_err(|err| {
            CatalogError::InvalidData(format!(
                "invalid options json in attribute_definitions.enumerated_options: {err}"
            ))
        })?,
        None => Vec::new(),
    };

    let definition = AttributeDefinition {
        id,
        owner_kind,
        physical_name: row.get("physical_name")?,
        display_label: row.get("display_label")?,
        logical_type,
        enumerated_options,
        scope_entity_id: row.get("scope_entity_id")?,
        created_at: row.get("created_at")?,
        created_by: row.get("created_by")?,
    };
    definition.validate()?;
    Ok(definition)
}

//! Base layout and view fragment persistence.
//!
//! # Responsibility
//! - Read base layouts per `(owner_kind, target_view)`.
//! - Store, replace, delete and list view fragments.
//!
//! # Invariants
//! - One fragment per `(owner_kind, target_view, attribute)`; upsert replaces.
//! - Fragment listing is deterministic: `priority ASC, attribute ASC`.

use crate::db::DbError;
use crate::model::attribute::{OwnerKind, TargetView};
use crate::model::view::{FragmentDescriptor, ViewFragment};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const FRAGMENT_SELECT_SQL: &str = "SELECT
    id,
    owner_kind,
    target_view,
    attribute,
    anchor,
    label,
    widget_hint,
    visibility_guard,
    xml_fragment,
    priority
FROM view_fragments";

pub type ViewResult<T> = Result<T, ViewError>;

/// Errors from view layout/fragment operations.
#[derive(Debug)]
pub enum ViewError {
    Db(DbError),
    MissingBaseLayout {
        owner_kind: OwnerKind,
        target_view: TargetView,
    },
    /// Persisted fragment cannot be converted to a valid record.
    InvalidData(String),
    /// Base layout arch has no recognizable root element.
    InvalidLayout(String),
}

impl Display for ViewError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::MissingBaseLayout {
                owner_kind,
                target_view,
            } => write!(f, "no base {target_view} layout for `{owner_kind}`"),
            Self::InvalidData(message) => write!(f, "invalid view fragment data: {message}"),
            Self::InvalidLayout(message) => write!(f, "invalid base layout: {message}"),
        }
    }
}

impl Error for ViewError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for ViewError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for ViewError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Layout a view is compiled from before fragments apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseLayout {
    pub owner_kind: OwnerKind,
    pub target_view: TargetView,
    pub arch: String,
}

/// Repository interface for layouts and fragments.
pub trait ViewFragmentRepository {
    fn base_layout(
        &self,
        owner_kind: OwnerKind,
        target_view: TargetView,
    ) -> ViewResult<Option<BaseLayout>>;
    /// Inserts the fragment or replaces the one sharing its identity key.
    fn upsert_fragment(&self, fragment: &ViewFragment) -> ViewResult<()>;
    /// Deletes one fragment. Returns `false` when nothing was there.
    fn delete_fragment(
        &self,
        owner_kind: OwnerKind,
        target_view: TargetView,
        attribute: &str,
    ) -> ViewResult<bool>;
    fn list_fragments(
        &self,
        owner_kind: OwnerKind,
        target_view: Option<TargetView>,
    ) -> ViewResult<Vec<ViewFragment>>;
}

/// SQLite-backed layout/fragment repository.
pub struct SqliteViewRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteViewRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl ViewFragmentRepository for SqliteViewRepository<'_> {
    fn base_layout(
        &self,
        owner_kind: OwnerKind,
        target_view: TargetView,
    ) -> ViewResult<Option<BaseLayout>> {
        let arch = self
            .conn
            .query_row(
                "SELECT arch FROM view_layouts WHERE owner_kind = ?1 AND target_view = ?2;",
                params![owner_kind.as_str(), target_view.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(arch.map(|arch| BaseLayout {
            owner_kind,
            target_view,
            arch,
        }))
    }

    fn upsert_fragment(&self, fragment: &ViewFragment) -> ViewResult<()> {
        let descriptor = &fragment.descriptor;
        self.conn.execute(
            "INSERT INTO view_fragments (
                id,
                owner_kind,
                target_view,
                attribute,
                anchor,
                label,
                widget_hint,
                visibility_guard,
                xml_fragment,
                priority
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (owner_kind, target_view, attribute) DO UPDATE SET
                id = excluded.id,
                anchor = excluded.anchor,
                label = excluded.label,
                widget_hint = excluded.widget_hint,
                visibility_guard = excluded.visibility_guard,
                xml_fragment = excluded.xml_fragment,
                priority = excluded.priority;",
            params![
                fragment.id.to_string(),
                fragment.owner_kind.as_str(),
                descriptor.target_view.as_str(),
                descriptor.attribute.as_str(),
                descriptor.anchor.as_deref(),
                descriptor.label.as_str(),
                descriptor.widget_hint.as_str(),
                descriptor.visibility_guard.as_deref(),
                fragment.xml_fragment.as_str(),
                fragment.priority,
            ],
        )?;
        Ok(())
    }

    fn delete_fragment(
        &self,
        owner_kind: OwnerKind,
        target_view: TargetView,
        attribute: &str,
    ) -> ViewResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM view_fragments
             WHERE owner_kind = ?1 AND target_view = ?2 AND attribute = ?3;",
            params![owner_kind.as_str(), target_view.as_str(), attribute],
        )?;
        Ok(changed > 0)
    }

    fn list_fragments(
        &self,
        owner_kind: OwnerKind,
        target_view: Option<TargetView>,
    ) -> ViewResult<Vec<ViewFragment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{FRAGMENT_SELECT_SQL}
             WHERE owner_kind = ?1
               AND (?2 IS NULL OR target_view = ?2)
             ORDER BY priority ASC, attribute ASC, target_view ASC;"
        ))?;

        let mut rows = stmt.query(params![
            owner_kind.as_str(),
            target_view.map(TargetView::as_str)
        ])?;
        let mut fragments = Vec::new();
        while let Some(row) = rows.next()? {
            fragments.push(parse_fragment_row(row)?);
        }
        Ok(fragments)
    }
}

fn parse_fragment_row(row: &Row<'_>) -> ViewResult<ViewFragment> {
    let id_text: String = row.get("id")?;
    let id = Uuid::parse_str(&id_text).map_err(|_| {
        ViewError::InvalidData(format!("invalid uuid value `{id_text}` in view_fragments.id"))
    })?;

    let owner_text: String = row.get("owner_kind")?;
    let owner_kind = OwnerKind::parse(&owner_text).ok_or_else(|| {
        ViewError::InvalidData(format!(
            "invalid owner kind `{owner_text}` in view_fragments.owner_kind"
        ))
    })?;

    let view_text: String = row.get("target_view")?;
    let target_view = TargetView::parse(&view_text).ok_or_else(|| {
        ViewError::InvalidData(format!(
            "invalid target view `{view_text}` in view_fragments.target_view"
        ))
    })?;

    Ok(ViewFragment {
        id,
        owner_kind,
        descriptor: FragmentDescriptor {
            target_view,
            anchor: row.get("anchor")?,
            attribute: row.get("attribute")?,
            label: row.get("label")?,
            widget_hint: row.get("widget_hint")?,
            visibility_guard: row.get("visibility_guard")?,
        },
        xml_fragment: row.get("xml_fragment")?,
        priority: row.get("priority")?,
    })
}

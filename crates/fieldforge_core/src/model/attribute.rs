//! Attribute definition domain model.
//!
//! # Responsibility
//! - Define the catalog record describing one user-defined attribute.
//! - Carry the closed logical-type table (physical type + default widget).
//! - Validate record-level invariants before persistence.
//!
//! # Invariants
//! - `id` is stable and never reused for another definition.
//! - `enumerated_options` is non-empty iff `logical_type == Enumerated`.
//! - `physical_name` is immutable once the definition exists.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::model::naming::is_valid_physical_name;

/// Stable identifier for one attribute definition.
pub type AttributeId = Uuid;

/// Record kind an attribute can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    /// A work group (task board).
    Group,
    /// A sub-item of a group.
    SubItem,
    /// A logged activity of a sub-item.
    SubItemActivity,
}

/// Field present on an owner kind's table regardless of dynamic attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinField {
    pub name: &'static str,
    pub label: &'static str,
    pub widget: &'static str,
}

const GROUP_FIELDS: &[BuiltinField] = &[
    BuiltinField { name: "id", label: "ID", widget: "integer" },
    BuiltinField { name: "name", label: "Task", widget: "char" },
    BuiltinField { name: "person", label: "Assigned To", widget: "many2one" },
    BuiltinField { name: "status", label: "State", widget: "selection" },
    BuiltinField { name: "completion_date", label: "Timeline", widget: "datetime" },
];

const SUB_ITEM_FIELDS: &[BuiltinField] = &[
    BuiltinField { name: "id", label: "ID", widget: "integer" },
    BuiltinField { name: "name", label: "Subtask", widget: "char" },
    BuiltinField { name: "task_id", label: "Group", widget: "many2one" },
    BuiltinField { name: "person", label: "Responsible", widget: "many2one" },
    BuiltinField { name: "state", label: "State", widget: "selection" },
    BuiltinField { name: "date_deadline", label: "Deadline", widget: "date" },
];

const SUB_ITEM_ACTIVITY_FIELDS: &[BuiltinField] = &[
    BuiltinField { name: "id", label: "ID", widget: "integer" },
    BuiltinField { name: "name", label: "Activity", widget: "char" },
    BuiltinField { name: "subtask_id", label: "Subtask", widget: "many2one" },
    BuiltinField { name: "person", label: "Responsible", widget: "many2one" },
    BuiltinField { name: "done", label: "Done", widget: "boolean" },
    BuiltinField { name: "state", label: "State", widget: "selection" },
    BuiltinField { name: "date_deadline", label: "Date", widget: "date" },
];

impl OwnerKind {
    /// Every owner kind, in declaration order.
    pub const ALL: [OwnerKind; 3] = [Self::Group, Self::SubItem, Self::SubItemActivity];

    /// Physical table backing records of this kind.
    pub fn table(self) -> &'static str {
        match self {
            Self::Group => "task_board",
            Self::SubItem => "subtask_board",
            Self::SubItemActivity => "subtask_activity",
        }
    }

    /// Documented stable anchor field dynamic widgets are inserted after.
    pub fn anchor_field(self) -> &'static str {
        "person"
    }

    /// Views a newly created attribute is attached to.
    pub fn default_views(self) -> &'static [TargetView] {
        &[TargetView::Tree, TargetView::Form]
    }

    pub fn builtin_fields(self) -> &'static [BuiltinField] {
        match self {
            Self::Group => GROUP_FIELDS,
            Self::SubItem => SUB_ITEM_FIELDS,
            Self::SubItemActivity => SUB_ITEM_ACTIVITY_FIELDS,
        }
    }

    /// Storage/serialization key.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::SubItem => "sub_item",
            Self::SubItemActivity => "sub_item_activity",
        }
    }

    /// Parses the storage key or the PascalCase name used by inbound requests.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "group" | "Group" => Some(Self::Group),
            "sub_item" | "SubItem" => Some(Self::SubItem),
            "sub_item_activity" | "SubItemActivity" => Some(Self::SubItemActivity),
            _ => None,
        }
    }

    /// Resolves a managed table name back to its owner kind.
    pub fn from_table(table: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.table() == table)
    }
}

impl Display for OwnerKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// UI view type a fragment can patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetView {
    Tree,
    Form,
    Kanban,
}

impl TargetView {
    pub const ALL: [TargetView; 3] = [Self::Tree, Self::Form, Self::Kanban];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tree => "tree",
            Self::Form => "form",
            Self::Kanban => "kanban",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "tree" => Some(Self::Tree),
            "form" => Some(Self::Form),
            "kanban" => Some(Self::Kanban),
            _ => None,
        }
    }
}

impl Display for TargetView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage type a logical type is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysicalType {
    VarChar,
    Integer,
    Numeric,
    Boolean,
    Date,
    Timestamp,
}

impl PhysicalType {
    /// Column type used in `ADD COLUMN` DDL.
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::VarChar => "VARCHAR(255)",
            Self::Integer => "INTEGER",
            Self::Numeric => "NUMERIC",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::Timestamp => "TIMESTAMP",
        }
    }
}

/// Abstract value type chosen when defining an attribute.
///
/// Closed set: every variant carries its physical type and default widget as
/// data, so adding a variant forces every mapping site to be updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
    DateTime,
    /// Options are carried on the definition, never as a DB constraint.
    Enumerated,
}

impl LogicalType {
    pub const ALL: [LogicalType; 7] = [
        Self::Text,
        Self::Integer,
        Self::Decimal,
        Self::Boolean,
        Self::Date,
        Self::DateTime,
        Self::Enumerated,
    ];

    pub fn physical_type(self) -> PhysicalType {
        match self {
            Self::Text | Self::Enumerated => PhysicalType::VarChar,
            Self::Integer => PhysicalType::Integer,
            Self::Decimal => PhysicalType::Numeric,
            Self::Boolean => PhysicalType::Boolean,
            Self::Date => PhysicalType::Date,
            Self::DateTime => PhysicalType::Timestamp,
        }
    }

    pub fn widget_hint(self) -> &'static str {
        match self {
            Self::Text => "char",
            Self::Integer => "integer",
            Self::Decimal => "float",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Enumerated => "selection",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Enumerated => "enumerated",
        }
    }

    /// Parses canonical names plus the legacy wizard aliases
    /// (`char`, `float`, `selection`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "char" => Some(Self::Text),
            "integer" => Some(Self::Integer),
            "decimal" | "float" => Some(Self::Decimal),
            "boolean" => Some(Self::Boolean),
            "date" => Some(Self::Date),
            "datetime" => Some(Self::DateTime),
            "enumerated" | "selection" => Some(Self::Enumerated),
            _ => None,
        }
    }
}

impl Display for LogicalType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(key, label)` choice of an enumerated attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionOption {
    pub key: String,
    pub label: String,
}

impl SelectionOption {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }
}

/// Catalog record for one user-defined attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub id: AttributeId,
    pub owner_kind: OwnerKind,
    /// Canonical column/field identifier, unique within `owner_kind`.
    pub physical_name: String,
    pub display_label: String,
    pub logical_type: LogicalType,
    /// Ordered choices; empty unless `logical_type` is `Enumerated`.
    pub enumerated_options: Vec<SelectionOption>,
    /// Restricts applicability to one owning record instance.
    pub scope_entity_id: Option<i64>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    pub created_by: String,
}

impl AttributeDefinition {
    /// Builds a definition with a fresh id and the current timestamp.
    pub fn new(
        owner_kind: OwnerKind,
        physical_name: impl Into<String>,
        display_label: impl Into<String>,
        logical_type: LogicalType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_kind,
            physical_name: physical_name.into(),
            display_label: display_label.into(),
            logical_type,
            enumerated_options: Vec::new(),
            scope_entity_id: None,
            created_at: now_epoch_ms(),
            created_by: "system".to_string(),
        }
    }

    /// Validates record-level invariants.
    pub fn validate(&self) -> Result<(), AttributeValidationError> {
        if !is_valid_physical_name(&self.physical_name) {
            return Err(AttributeValidationError::InvalidPhysicalName(
                self.physical_name.clone(),
            ));
        }
        if self.display_label.trim().is_empty() {
            return Err(AttributeValidationError::EmptyLabel);
        }
        match (self.logical_type, self.enumerated_options.is_empty()) {
            (LogicalType::Enumerated, true) => {
                return Err(AttributeValidationError::MissingOptions);
            }
            (other, false) if other != LogicalType::Enumerated => {
                return Err(AttributeValidationError::UnexpectedOptions(other));
            }
            _ => {}
        }
        for option in &self.enumerated_options {
            if option.key.trim().is_empty() {
                return Err(AttributeValidationError::BlankOptionKey);
            }
        }
        Ok(())
    }

    /// Storage type of the backing column.
    pub fn physical_type(&self) -> PhysicalType {
        self.logical_type.physical_type()
    }

    /// Widget used when the attribute is exposed in a view.
    pub fn widget_hint(&self) -> &'static str {
        self.logical_type.widget_hint()
    }

    /// Whether the attribute applies to records of `entity_id`.
    pub fn applies_to(&self, entity_id: i64) -> bool {
        self.scope_entity_id.map_or(true, |scope| scope == entity_id)
    }
}

/// Record-level invariant violations of `AttributeDefinition`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValidationError {
    InvalidPhysicalName(String),
    EmptyLabel,
    MissingOptions,
    UnexpectedOptions(LogicalType),
    BlankOptionKey,
}

impl Display for AttributeValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPhysicalName(name) => write!(f, "invalid physical name `{name}`"),
            Self::EmptyLabel => write!(f, "display label must not be blank"),
            Self::MissingOptions => write!(f, "enumerated attribute requires options"),
            Self::UnexpectedOptions(kind) => {
                write!(f, "attribute of type `{kind}` cannot carry options")
            }
            Self::BlankOptionKey => write!(f, "selection option key must not be blank"),
        }
    }
}

impl Error for AttributeValidationError {}

/// Cleans user-entered options.
///
/// Blank keys are dropped, blank labels fall back to the key and duplicate
/// keys keep their first occurrence.
pub fn clean_selection_options(options: &[SelectionOption]) -> Vec<SelectionOption> {
    let mut cleaned: Vec<SelectionOption> = Vec::with_capacity(options.len());
    for option in options {
        let key = option.key.trim();
        if key.is_empty() || cleaned.iter().any(|existing| existing.key == key) {
            continue;
        }
        let label = match option.label.trim() {
            "" => key,
            label => label,
        };
        cleaned.push(SelectionOption::new(key, label));
    }
    cleaned
}

/// Parses the `key:label` per line text format of the selection wizard.
///
/// A line without `:` uses the whole line as both key and label.
pub fn parse_selection_options(text: &str) -> Vec<SelectionOption> {
    let parsed: Vec<SelectionOption> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once(':') {
            Some((key, label)) => SelectionOption::new(key.trim(), label.trim()),
            None => SelectionOption::new(line, line),
        })
        .collect();
    clean_selection_options(&parsed)
}

pub(crate) fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

//! Physical schema mutation for dynamic attribute columns.
//!
//! # Responsibility
//! - Add/drop one column of a managed record table, idempotently.
//! - Report the physical column list for drift checks.
//!
//! # Invariants
//! - Only managed tables (`OwnerKind::table`) and identifiers matching the
//!   physical-name grammar reach SQL text; `ddl_statement` is the only place
//!   DDL text is assembled.
//! - The existence probe and the DDL run in one `IMMEDIATE` transaction and
//!   commit on their own; callers undo with the inverse operation.
//! - Lock waits surface as `SchemaError::Busy`.

use crate::db::{is_busy, is_duplicate_column, DbError};
use crate::model::attribute::{OwnerKind, PhysicalType};
use crate::model::naming::is_valid_physical_name;
use log::{debug, info};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Outcome of an idempotent column mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnChange {
    /// The DDL ran and changed the schema.
    Applied,
    /// `add_column` found the column already there.
    AlreadyPresent,
    /// `drop_column` found no such column.
    AlreadyAbsent,
}

/// One physical column of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
}

#[derive(Debug)]
pub enum SchemaError {
    Db(DbError),
    /// The store gave up waiting for a schema lock.
    Busy(String),
    DuplicateColumn { table: String, column: String },
    InvalidIdentifier(String),
    MissingTable(String),
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Busy(message) => write!(f, "schema change blocked by lock: {message}"),
            Self::DuplicateColumn { table, column } => {
                write!(f, "column `{column}` already exists in `{table}`")
            }
            Self::InvalidIdentifier(value) => write!(f, "identifier `{value}` is not allowed"),
            Self::MissingTable(table) => write!(f, "table `{table}` does not exist"),
        }
    }
}

impl Error for SchemaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for SchemaError {
    fn from(value: rusqlite::Error) -> Self {
        if is_busy(&value) {
            return Self::Busy(value.to_string());
        }
        Self::Db(DbError::Sqlite(value))
    }
}

/// Narrow interface every physical schema change goes through.
///
/// Both mutations must be safe to call whether or not the column exists.
pub trait SchemaMutator {
    fn add_column(
        &self,
        table: &str,
        column: &str,
        physical_type: PhysicalType,
    ) -> SchemaResult<ColumnChange>;
    fn drop_column(&self, table: &str, column: &str) -> SchemaResult<ColumnChange>;
    fn list_columns(&self, table: &str) -> SchemaResult<Vec<ColumnInfo>>;

    fn has_column(&self, table: &str, column: &str) -> SchemaResult<bool> {
        Ok(self
            .list_columns(table)?
            .iter()
            .any(|info| info.name == column))
    }
}

#[derive(Debug, Clone, Copy)]
enum DdlOp<'a> {
    Add {
        table: &'a str,
        column: &'a str,
        physical_type: PhysicalType,
    },
    Drop {
        table: &'a str,
        column: &'a str,
    },
}

/// SQLite-backed schema mutator.
pub struct SqliteSchemaMutator<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSchemaMutator<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl SchemaMutator for SqliteSchemaMutator<'_> {
    fn add_column(
        &self,
        table: &str,
        column: &str,
        physical_type: PhysicalType,
    ) -> SchemaResult<ColumnChange> {
        check_identifiers(table, column)?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if column_exists(&tx, table, column)? {
            debug!(
                "event=schema_add_column module=schema status=noop table={} column={}",
                table, column
            );
            return Ok(ColumnChange::AlreadyPresent);
        }

        let sql = ddl_statement(DdlOp::Add {
            table,
            column,
            physical_type,
        });
        tx.execute_batch(&sql)
            .map_err(|err| map_ddl_error(err, table, column))?;
        tx.commit()?;

        info!(
            "event=schema_add_column module=schema status=ok table={} column={} type={}",
            table,
            column,
            physical_type.sql_type()
        );
        Ok(ColumnChange::Applied)
    }

    fn drop_column(&self, table: &str, column: &str) -> SchemaResult<ColumnChange> {
        check_identifiers(table, column)?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if !column_exists(&tx, table, column)? {
            debug!(
                "event=schema_drop_column module=schema status=noop table={} column={}",
                table, column
            );
            return Ok(ColumnChange::AlreadyAbsent);
        }

        let sql = ddl_statement(DdlOp::Drop { table, column });
        tx.execute_batch(&sql)
            .map_err(|err| map_ddl_error(err, table, column))?;
        tx.commit()?;

        info!(
            "event=schema_drop_column module=schema status=ok table={} column={}",
            table, column
        );
        Ok(ColumnChange::Applied)
    }

    fn list_columns(&self, table: &str) -> SchemaResult<Vec<ColumnInfo>> {
        if OwnerKind::from_table(table).is_none() {
            return Err(SchemaError::InvalidIdentifier(table.to_string()));
        }
        let columns = read_columns(self.conn, table)?;
        if columns.is_empty() {
            return Err(SchemaError::MissingTable(table.to_string()));
        }
        Ok(columns)
    }
}

fn check_identifiers(table: &str, column: &str) -> SchemaResult<()> {
    if OwnerKind::from_table(table).is_none() {
        return Err(SchemaError::InvalidIdentifier(table.to_string()));
    }
    if !is_valid_physical_name(column) {
        return Err(SchemaError::InvalidIdentifier(column.to_string()));
    }
    Ok(())
}

fn ddl_statement(op: DdlOp<'_>) -> String {
    match op {
        DdlOp::Add {
            table,
            column,
            physical_type,
        } => format!(
            "ALTER TABLE \"{table}\" ADD COLUMN \"{column}\" {};",
            physical_type.sql_type()
        ),
        DdlOp::Drop { table, column } => {
            format!("ALTER TABLE \"{table}\" DROP COLUMN \"{column}\";")
        }
    }
}

fn map_ddl_error(err: rusqlite::Error, table: &str, column: &str) -> SchemaError {
    if is_duplicate_column(&err) {
        return SchemaError::DuplicateColumn {
            table: table.to_string(),
            column: column.to_string(),
        };
    }
    err.into()
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> SchemaResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2
        );",
        [table, column],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn read_columns(conn: &Connection, table: &str) -> SchemaResult<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid;")?;
    let mut rows = stmt.query([table])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(ColumnInfo {
            name: row.get(0)?,
            declared_type: row.get(1)?,
        });
    }
    Ok(columns)
}

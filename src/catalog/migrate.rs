//! Runtime schema migration.
//!
//! New document shapes grow the backing table: the table is created on first write and
//! every unseen top-level field becomes a nullable column typed after its value. Columns
//! are never dropped or retyped, so the schema only ever grows.
use log::info;

use crate::{
    document::{Document, ValueShape, is_writable_key},
    engine::{self, Connection, EngineError},
    error::StorageError,
    settings::Settings,
    sql::Sql,
};

use super::{
    Catalog,
    types::{ColumnType, column_type_for},
};

/// Identity column name used when none is configured.
pub const DEFAULT_ID_FIELD: &str = "_id";

/// DDL issued by one [`ensure_schema`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub created_table: bool,
    pub added_columns: Vec<String>,
}

impl MigrationReport {
    pub fn is_empty(&self) -> bool {
        !self.created_table && self.added_columns.is_empty()
    }
}

fn identity_name(settings: &Settings) -> String {
    settings
        .id_field()
        .unwrap_or(DEFAULT_ID_FIELD)
        .to_string()
}

fn migration_error(action: &'static str) -> impl FnOnce(EngineError) -> StorageError {
    move |cause| StorageError::Migration { action, cause }
}

/// Makes the table and every column needed to store `document` exist.
///
/// Only a failed `CREATE TABLE` or `ALTER TABLE` is a [`StorageError::Migration`].
/// Discovery errors propagate as [`StorageError::Engine`].
pub fn ensure_schema(
    conn: &mut dyn Connection,
    catalog: &mut Catalog,
    settings: &Settings,
    document: &Document,
) -> Result<MigrationReport, StorageError> {
    let mut report = MigrationReport::default();

    catalog.discover(conn, settings)?;

    if !catalog.table_exists() {
        let identity = identity_name(settings);
        let mut sql = Sql::new("CREATE TABLE ");
        sql.table(&settings.database, &settings.table)
            .push(" (")
            .identifier(identity.as_str())
            .push(" INT(11) NOT NULL AUTO_INCREMENT, PRIMARY KEY (")
            .identifier(identity.as_str())
            .push("))");

        info!("creating table {} with identity {identity}", settings.table);
        engine::run(conn, &sql).map_err(migration_error("create"))?;
        report.created_table = true;

        catalog.invalidate();
        catalog.discover(conn, settings)?;
    }

    let identity = match catalog.identity_field() {
        Some(name) if catalog.has_field(name) => None,
        _ => Some(identity_name(settings)),
    };

    let mut clauses = Vec::new();
    for (key, value) in document {
        if !is_writable_key(key)
            || catalog.has_field(key)
            || identity.as_deref() == Some(key.as_str())
        {
            continue;
        }
        let Some(column_type) = column_type_for(ValueShape::of(value)) else {
            continue;
        };

        let mut clause = Sql::new("ADD COLUMN ");
        clause
            .identifier(key.as_str())
            .push(" ")
            .push(column_type.ddl())
            .push(" DEFAULT NULL");
        clauses.push(clause);
        report.added_columns.push(key.clone());
    }

    if let Some(name) = identity {
        let mut clause = Sql::new("ADD COLUMN ");
        clause
            .identifier(name.as_str())
            .push(" ")
            .push(ColumnType::Identity.ddl())
            .push(" NOT NULL AUTO_INCREMENT UNIQUE");
        clauses.push(clause);
        report.added_columns.push(name);
    }

    if clauses.is_empty() {
        return Ok(report);
    }

    let mut sql = Sql::new("ALTER TABLE ");
    sql.table(&settings.database, &settings.table)
        .push(" ")
        .append(Sql::join(clauses, ", "));

    info!(
        "adding columns {:?} to table {}",
        report.added_columns, settings.table
    );
    engine::run(conn, &sql).map_err(migration_error("alter"))?;

    catalog.invalidate();
    catalog.discover(conn, settings)?;

    Ok(report)
}

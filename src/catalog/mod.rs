//! Cached description of the backing table.
//!
//! The catalog is built lazily by [`Catalog::discover`] from the column metadata of an
//! empty `SELECT`, and thrown away with [`Catalog::invalidate`] whenever the schema
//! changes. Until rediscovered, an invalidated catalog must not be trusted.
pub mod migrate;
pub mod types;

use std::collections::BTreeMap;

use log::debug;

use crate::{
    engine::{self, ColumnMeta, Connection, EngineError, ErrorCode, flags},
    settings::Settings,
    sql::Sql,
};

use self::types::{ShortType, short_type_for, type_name_for};

/// Description of one column of the backing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub type_code: u8,
    pub type_name: &'static str,
    pub short_type: ShortType,
    pub allow_null: bool,
    pub is_primary_key: bool,
    pub is_auto_increment: bool,
}

impl From<&ColumnMeta> for ColumnInfo {
    fn from(meta: &ColumnMeta) -> Self {
        Self {
            name: meta.name.clone(),
            type_code: meta.type_code,
            type_name: type_name_for(meta.type_code),
            short_type: short_type_for(meta.type_code),
            allow_null: !flags::has(meta.flags, flags::NOT_NULL),
            is_primary_key: flags::has(meta.flags, flags::PRI_KEY),
            is_auto_increment: flags::has(meta.flags, flags::AUTO_INCREMENT),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    initialized: bool,
    table_exists: bool,
    fields: BTreeMap<String, ColumnInfo>,
    identity_field: Option<String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the table description, unless already loaded.
    ///
    /// A missing table is not an error: the catalog records it as absent. On any other
    /// failure the catalog stays uninitialized.
    pub fn discover(
        &mut self,
        conn: &mut dyn Connection,
        settings: &Settings,
    ) -> Result<(), EngineError> {
        if self.initialized {
            return Ok(());
        }

        let mut sql = Sql::new("SELECT * FROM ");
        sql.table(&settings.database, &settings.table)
            .push(" WHERE (1 = 0)");

        let columns = match engine::run(conn, &sql) {
            Ok(result) => result.columns,
            Err(e) if e.code == ErrorCode::NoSuchTable => {
                debug!("table {} does not exist yet", settings.table);
                self.table_exists = false;
                self.fields.clear();
                self.identity_field = None;
                self.initialized = true;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        self.fields = columns
            .iter()
            .map(|meta| (meta.name.clone(), ColumnInfo::from(meta)))
            .collect();
        self.table_exists = true;
        self.identity_field = match settings.id_field() {
            Some(configured) => Some(configured.to_string()),
            None => columns
                .iter()
                .map(ColumnInfo::from)
                .find(|c| c.is_auto_increment && c.short_type != ShortType::Unsupported)
                .map(|c| c.name),
        };
        self.initialized = true;

        debug!(
            "discovered {} columns on {}, identity {:?}",
            self.fields.len(),
            settings.table,
            self.identity_field
        );
        Ok(())
    }

    pub fn invalidate(&mut self) {
        self.initialized = false;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn table_exists(&self) -> bool {
        self.table_exists
    }

    pub fn fields(&self) -> &BTreeMap<String, ColumnInfo> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&ColumnInfo> {
        self.fields.get(name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn identity_field(&self) -> Option<&str> {
        self.identity_field.as_deref()
    }
}

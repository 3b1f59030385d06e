//! Embedded relational engine.
//!
//! [`MemoryEngine`] implements [`Connector`] for the statement dialect emitted by this
//! crate, reporting MySQL-compatible column type codes, flags and error codes. It keeps
//! every database in memory and, when opened with [`MemoryEngine::open`], rewrites a
//! bincode snapshot of all databases after each successful mutating statement, so state
//! survives restarts of the CLI.
//!
//! Besides serving as a standalone backend, the engine exposes a few hooks for tests:
//!
//! - [`MemoryEngine::journal`]: the escaped text of every executed statement.
//! - [`MemoryEngine::set_offline`]: refuse new connections, simulating an unreachable server.
//! - [`MemoryEngine::open_connections`]: number of connections not yet released.
//!
//! # Example
//! ```rust
//! use docsql::engine::{Connector, memory::MemoryEngine};
//! use docsql::{Settings, sql::Sql};
//!
//! let engine = MemoryEngine::new();
//! let settings = Settings::new("db", "t", "root", "");
//! let mut connection = engine.connect(&settings).unwrap();
//!
//! let mut create = Sql::new("CREATE TABLE ");
//! create.table("db", "t").push(" (").identifier("_id").push(" INT(11) NOT NULL AUTO_INCREMENT, PRIMARY KEY (").identifier("_id").push("))");
//! connection.execute(&create).unwrap();
//! connection.close().unwrap();
//!
//! assert_eq!(engine.table_names("db"), vec!["t".to_string()]);
//! ```
mod parser;
mod table;

use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
};

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint},
};
use log::{debug, info, trace};

use crate::{settings::Settings, sql::Sql};

use super::{Connection, Connector, EngineError, ErrorCode, ResultSet};
use parser::{Statement, TableRef};
use table::Table;

#[derive(Debug, Clone, Default, PartialEq, Encode, Decode)]
struct Databases {
    databases: BTreeMap<String, BTreeMap<String, Table>>,
}

#[derive(Debug, Default)]
struct EngineState {
    data: Databases,
    path: Option<PathBuf>,
    offline: bool,
    journal: Vec<String>,
    open_connections: usize,
}

fn snapshot_config() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// Shared handle to an embedded engine; clones refer to the same databases.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    state: Arc<Mutex<EngineState>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a file-backed engine, loading the snapshot at `path` if present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        let data = if path.exists() {
            let bytes = fs::read(&path).map_err(|e| {
                EngineError::new(
                    ErrorCode::Other,
                    format!("failed to read snapshot {path:?}: {e}"),
                )
            })?;
            let (data, _): (Databases, usize) =
                bincode::decode_from_slice(&bytes, snapshot_config()).map_err(|e| {
                    EngineError::new(
                        ErrorCode::Other,
                        format!("failed to decode snapshot {path:?}: {e}"),
                    )
                })?;
            info!("loaded snapshot {path:?}");
            data
        } else {
            Databases::default()
        };

        Ok(Self {
            state: Arc::new(Mutex::new(EngineState {
                data,
                path: Some(path),
                ..Default::default()
            })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        lock(&self.state)
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    pub fn open_connections(&self) -> usize {
        self.lock().open_connections
    }

    pub fn table_names(&self, database: &str) -> Vec<String> {
        self.lock()
            .data
            .databases
            .get(database)
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn lock(state: &Mutex<EngineState>) -> MutexGuard<'_, EngineState> {
    // Statements stage their changes and swap them in on success.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Connector for MemoryEngine {
    fn connect(&self, settings: &Settings) -> Result<Box<dyn Connection>, EngineError> {
        let mut state = self.lock();
        if state.offline {
            return Err(EngineError::new(
                ErrorCode::ConnectionRefused,
                format!("connect to {}:{} refused", settings.server, settings.port),
            ));
        }
        state.open_connections += 1;
        trace!("connection opened ({} open)", state.open_connections);

        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
            database: settings.database.clone(),
        }))
    }
}

struct MemoryConnection {
    state: Arc<Mutex<EngineState>>,
    database: String,
}

impl Connection for MemoryConnection {
    fn execute(&mut self, sql: &Sql) -> Result<ResultSet, EngineError> {
        let statement = parser::parse(sql)?;
        let mut state = lock(&self.state);
        if state.offline {
            return Err(EngineError::new(
                ErrorCode::ConnectionClosed,
                "connection lost: the server closed the connection",
            ));
        }
        state.journal.push(sql.escaped());

        let mutation = statement.is_mutation();
        let result = execute(&mut state.data, &self.database, statement)?;

        if mutation {
            if let Some(path) = &state.path {
                persist(&state.data, path)?;
            }
        }
        Ok(result)
    }

    fn close(self: Box<Self>) -> Result<(), EngineError> {
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.open_connections = state.open_connections.saturating_sub(1);
        trace!("connection released ({} open)", state.open_connections);
    }
}

fn persist(data: &Databases, path: &PathBuf) -> Result<(), EngineError> {
    let bytes = bincode::encode_to_vec(data, snapshot_config()).map_err(|e| {
        EngineError::new(ErrorCode::Other, format!("failed to encode snapshot: {e}"))
    })?;
    let staging = path.with_extension("tmp");
    fs::write(&staging, bytes)
        .and_then(|_| fs::rename(&staging, path))
        .map_err(|e| {
            EngineError::new(
                ErrorCode::Other,
                format!("failed to write snapshot {path:?}: {e}"),
            )
        })?;
    debug!("snapshot written to {path:?}");
    Ok(())
}

fn qualified(default: &str, table: &TableRef) -> (String, String) {
    (
        table
            .database
            .clone()
            .unwrap_or_else(|| default.to_string()),
        table.table.clone(),
    )
}

fn no_such_table(database: &str, table: &str) -> EngineError {
    EngineError::new(
        ErrorCode::NoSuchTable,
        format!("table '{database}.{table}' doesn't exist"),
    )
}

fn table_mut<'a>(
    data: &'a mut Databases,
    database: &str,
    table: &str,
) -> Result<&'a mut Table, EngineError> {
    data.databases
        .get_mut(database)
        .and_then(|tables| tables.get_mut(table))
        .ok_or_else(|| no_such_table(database, table))
}

fn execute(
    data: &mut Databases,
    default: &str,
    statement: Statement,
) -> Result<ResultSet, EngineError> {
    match statement {
        Statement::Select { table, filter } => {
            let (database, name) = qualified(default, &table);
            let table = data
                .databases
                .get(&database)
                .and_then(|tables| tables.get(&name))
                .ok_or_else(|| no_such_table(&database, &name))?;
            table.select(filter.as_ref())
        }
        Statement::CreateTable {
            table,
            columns,
            primary_key,
        } => {
            let (database, name) = qualified(default, &table);
            let tables = data.databases.entry(database.clone()).or_default();
            if tables.contains_key(&name) {
                return Err(EngineError::new(
                    ErrorCode::TableExists,
                    format!("table '{database}.{name}' already exists"),
                ));
            }
            tables.insert(name, Table::create(columns, primary_key)?);
            Ok(ResultSet::default())
        }
        Statement::AlterTable { table, columns } => {
            let (database, name) = qualified(default, &table);
            table_mut(data, &database, &name)?.add_columns(columns)?;
            Ok(ResultSet::default())
        }
        Statement::Insert {
            table,
            columns,
            values,
        } => {
            let (database, name) = qualified(default, &table);
            table_mut(data, &database, &name)?.insert(columns, values)
        }
        Statement::Update {
            table,
            assignments,
            filter,
        } => {
            let (database, name) = qualified(default, &table);
            table_mut(data, &database, &name)?.update(assignments, filter.as_ref())
        }
        Statement::Delete { table, filter } => {
            let (database, name) = qualified(default, &table);
            table_mut(data, &database, &name)?.delete(filter.as_ref())
        }
        Statement::DropTable { table } => {
            let (database, name) = qualified(default, &table);
            let removed = data
                .databases
                .get_mut(&database)
                .and_then(|tables| tables.remove(&name));
            match removed {
                Some(_) => Ok(ResultSet::default()),
                None => Err(EngineError::new(
                    ErrorCode::BadTable,
                    format!("unknown table '{database}.{name}'"),
                )),
            }
        }
    }
}

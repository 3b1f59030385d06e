//! Document storage over a single relational table.
//!
//! [`DocumentStorage`] exposes document-oriented CRUD operations and maps them onto one
//! table of a relational engine:
//!
//! - reads go through the query executor: a pushed-down `WHERE` clause narrows the
//!   rows, the evaluator re-checks them with full document semantics;
//! - writes flatten documents into rows, growing the schema first when allowed, and
//!   address existing rows by the identity column;
//! - every operation connects, runs its statements and closes the connection, so no
//!   connection outlives an operation.
//!
//! # Example
//! ```rust
//! use docsql::{DocumentStorage, Options, Reply, Settings, engine::memory::MemoryEngine};
//! use serde_json::json;
//!
//! let settings = Settings::new("shop", "orders", "root", "").with_modify_schema(true);
//! let storage = DocumentStorage::new(MemoryEngine::new(), settings).unwrap();
//! let options = Options::default();
//!
//! let order = json!({"item": "pen", "qty": 2});
//! storage.insert_one(order.as_object().unwrap(), &options).unwrap();
//!
//! let criteria = json!({"qty": {"$gt": 1}});
//! let reply = storage.count(criteria.as_object().unwrap(), &options).unwrap();
//! assert_eq!(reply, Reply::Count(1));
//! ```
use std::sync::{Mutex, MutexGuard};

use log::{debug, info, warn};
use serde_json::Value;

use crate::{
    catalog::{Catalog, migrate},
    codec::{self, decode_rows, flatten_value},
    document::{Document, is_writable_key},
    engine::{self, Connection, Connector, ErrorCode, SqlValue},
    error::StorageError,
    evaluator::{BasicEvaluator, Evaluator},
    query,
    settings::Settings,
    sql::Sql,
};

/// Per-operation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Reply with documents instead of counts.
    pub return_documents: bool,
    /// Maximum number of documents `find_many` returns, `0` for no limit.
    pub limit: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            return_documents: true,
            limit: 0,
        }
    }
}

impl Options {
    pub fn counts() -> Self {
        Self {
            return_documents: false,
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Count(usize),
    Document(Option<Document>),
    Documents(Vec<Document>),
}

impl Reply {
    fn one(document: Option<Document>, options: &Options) -> Self {
        if options.return_documents {
            Reply::Document(document)
        } else {
            Reply::Count(usize::from(document.is_some()))
        }
    }

    fn many(documents: Vec<Document>, options: &Options) -> Self {
        if options.return_documents {
            Reply::Documents(documents)
        } else {
            Reply::Count(documents.len())
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Reply::Count(n) => Value::from(*n),
            Reply::Document(Some(d)) => Value::Object(d.clone()),
            Reply::Document(None) => Value::Null,
            Reply::Documents(d) => Value::Array(d.iter().cloned().map(Value::Object).collect()),
        }
    }
}

/// Identity values that cannot address a row.
fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => !b,
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

fn precondition(reason: impl Into<String>) -> StorageError {
    StorageError::SchemaPrecondition {
        reason: reason.into(),
    }
}

pub struct DocumentStorage<C: Connector, E: Evaluator = BasicEvaluator> {
    connector: C,
    evaluator: E,
    settings: Settings,
    catalog: Mutex<Catalog>,
}

impl<C: Connector> DocumentStorage<C> {
    pub fn new(connector: C, settings: Settings) -> Result<Self, StorageError> {
        Self::with_evaluator(connector, settings, BasicEvaluator)
    }
}

impl<C: Connector, E: Evaluator> DocumentStorage<C, E> {
    pub fn with_evaluator(
        connector: C,
        settings: Settings,
        evaluator: E,
    ) -> Result<Self, StorageError> {
        settings.validate()?;
        info!(
            "document storage on {}:{} {}.{}",
            settings.server, settings.port, settings.database, settings.table
        );

        Ok(Self {
            connector,
            evaluator,
            settings,
            catalog: Mutex::new(Catalog::new()),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Snapshot of the cached catalog, as of the last discovery.
    pub fn catalog(&self) -> Catalog {
        self.lock_catalog().clone()
    }

    fn lock_catalog(&self) -> MutexGuard<'_, Catalog> {
        match self.catalog.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let mut guard = poisoned.into_inner();
                guard.invalidate();
                guard
            }
        }
    }

    /// Runs `handler` on a fresh connection.
    ///
    /// The connection is closed when the handler succeeds and dropped without the close
    /// handshake when it fails.
    fn with_connection<T>(
        &self,
        handler: impl FnOnce(&mut dyn Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut conn = self
            .connector
            .connect(&self.settings)
            .map_err(|cause| StorageError::Connectivity { cause })?;

        match handler(conn.as_mut()) {
            Ok(value) => {
                conn.close()?;
                Ok(value)
            }
            Err(e) => {
                warn!("discarding connection after error: {e}");
                drop(conn);
                Err(e)
            }
        }
    }

    fn discover(&self, conn: &mut dyn Connection) -> Result<Catalog, StorageError> {
        let mut catalog = self.lock_catalog();
        catalog.discover(conn, &self.settings)?;
        Ok(catalog.clone())
    }

    /// Readies the schema for `document`: migrates when allowed, discovers otherwise.
    fn prepare_write(
        &self,
        conn: &mut dyn Connection,
        document: &Document,
    ) -> Result<Catalog, StorageError> {
        let mut catalog = self.lock_catalog();
        if self.settings.modify_schema {
            let report = migrate::ensure_schema(conn, &mut catalog, &self.settings, document)?;
            if !report.is_empty() {
                debug!("schema migrated: {report:?}");
            }
        } else {
            catalog.discover(conn, &self.settings)?;
        }
        Ok(catalog.clone())
    }

    fn find(
        &self,
        conn: &mut dyn Connection,
        criteria: &Document,
        max_docs: usize,
    ) -> Result<Vec<Document>, StorageError> {
        let catalog = self.discover(conn)?;
        query::execute(
            conn,
            &self.settings,
            &catalog,
            &self.evaluator,
            criteria,
            max_docs,
        )
    }

    fn select_by_identity(
        &self,
        conn: &mut dyn Connection,
        identity: &str,
        value: SqlValue,
    ) -> Result<Option<Document>, StorageError> {
        let mut sql = Sql::new("SELECT * FROM ");
        sql.table(&self.settings.database, &self.settings.table)
            .push(" WHERE (")
            .identifier(identity)
            .push(" = ")
            .value(value)
            .push(")");

        let result = engine::run(conn, &sql)?;
        Ok(decode_rows(result)?.into_iter().next())
    }

    fn insert_document(
        &self,
        conn: &mut dyn Connection,
        document: &Document,
    ) -> Result<Option<Document>, StorageError> {
        let catalog = self.prepare_write(conn, document)?;
        let identity = catalog.identity_field().ok_or_else(|| {
            precondition(format!(
                "cannot insert into {}.{}: no auto-increment identity column",
                self.settings.database, self.settings.table
            ))
        })?;

        let explicit_id = match document.get(identity) {
            value if is_blank(value) => None,
            value => value.map(flatten_value),
        };

        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (column, value) in codec::flatten(document) {
            if column == identity {
                continue;
            }
            if value.is_null() && !catalog.has_field(&column) {
                continue;
            }
            let mut c = Sql::default();
            c.identifier(column);
            columns.push(c);
            let mut v = Sql::default();
            v.value(value);
            values.push(v);
        }
        if let Some(id) = &explicit_id {
            let mut c = Sql::default();
            c.identifier(identity);
            columns.push(c);
            let mut v = Sql::default();
            v.value(id.clone());
            values.push(v);
        }
        if columns.is_empty() {
            debug!("document has no writable fields, nothing inserted");
            return Ok(None);
        }

        let mut sql = Sql::new("INSERT INTO ");
        sql.table(&self.settings.database, &self.settings.table)
            .push(" (")
            .append(Sql::join(columns, ", "))
            .push(") VALUES (")
            .append(Sql::join(values, ", "))
            .push(")");

        let result = engine::run(conn, &sql)?;
        if result.affected_rows == 0 {
            return Ok(None);
        }

        let id = match explicit_id {
            Some(id) => id,
            None => SqlValue::Int(result.insert_id as i64),
        };
        self.select_by_identity(conn, identity, id)
    }

    /// Writes `document` back over the row holding the same identity value.
    ///
    /// Every known column is written; columns the document lacks are set to NULL.
    fn write_document(
        &self,
        conn: &mut dyn Connection,
        document: &Document,
    ) -> Result<Option<Document>, StorageError> {
        let catalog = self.prepare_write(conn, document)?;
        let identity = catalog.identity_field().ok_or_else(|| {
            precondition(format!(
                "cannot update {}.{}: no auto-increment identity column",
                self.settings.database, self.settings.table
            ))
        })?;
        let id = match document.get(identity) {
            value if is_blank(value) => {
                return Err(precondition(format!(
                    "cannot update a document without a value for identity field {identity}"
                )));
            }
            value => value.map(flatten_value).unwrap_or(SqlValue::Null),
        };

        let mut assignments = Vec::new();
        for column in catalog.fields().values() {
            let present = document.get(&column.name);
            if column.name == identity || (column.is_auto_increment && present.is_none()) {
                continue;
            }
            let mut assignment = Sql::default();
            assignment
                .identifier(column.name.as_str())
                .push(" = ")
                .value(present.map(flatten_value).unwrap_or(SqlValue::Null));
            assignments.push(assignment);
        }
        for (key, value) in document {
            if !is_writable_key(key) || catalog.has_field(key) || value.is_null() {
                continue;
            }
            let mut assignment = Sql::default();
            assignment
                .identifier(key.as_str())
                .push(" = ")
                .value(flatten_value(value));
            assignments.push(assignment);
        }

        if !assignments.is_empty() {
            let mut sql = Sql::new("UPDATE ");
            sql.table(&self.settings.database, &self.settings.table)
                .push(" SET ")
                .append(Sql::join(assignments, ", "))
                .push(" WHERE (")
                .identifier(identity)
                .push(" = ")
                .value(id.clone())
                .push(")");

            let result = engine::run(conn, &sql)?;
            if result.affected_rows == 0 {
                return Ok(None);
            }
        }

        self.select_by_identity(conn, identity, id)
    }

    fn delete_document(
        &self,
        conn: &mut dyn Connection,
        document: &Document,
    ) -> Result<bool, StorageError> {
        let catalog = self.discover(conn)?;
        let identity = catalog.identity_field().ok_or_else(|| {
            precondition(format!(
                "cannot delete from {}.{}: no auto-increment identity column",
                self.settings.database, self.settings.table
            ))
        })?;
        let id = match document.get(identity) {
            value if is_blank(value) => {
                return Err(precondition(format!(
                    "cannot delete a document without a value for identity field {identity}"
                )));
            }
            value => value.map(flatten_value).unwrap_or(SqlValue::Null),
        };

        let mut sql = Sql::new("DELETE FROM ");
        sql.table(&self.settings.database, &self.settings.table)
            .push(" WHERE (")
            .identifier(identity)
            .push(" = ")
            .value(id)
            .push(")");

        Ok(engine::run(conn, &sql)?.affected_rows > 0)
    }

    /// Drops the backing table. A table that does not exist counts as dropped.
    pub fn drop_storage(&self) -> Result<bool, StorageError> {
        self.with_connection(|conn| {
            let mut sql = Sql::new("DROP TABLE ");
            sql.table(&self.settings.database, &self.settings.table);

            match engine::run(conn, &sql) {
                Ok(_) => info!("dropped table {}", self.settings.table),
                Err(e) if e.code == ErrorCode::BadTable => {
                    debug!("table {} already absent", self.settings.table);
                }
                Err(e) => return Err(e.into()),
            }

            let mut catalog = self.lock_catalog();
            catalog.invalidate();
            catalog.discover(conn, &self.settings)?;
            Ok(true)
        })
    }

    /// Nothing is buffered; every write is sent to the engine as it happens.
    pub fn flush_storage(&self) -> bool {
        true
    }

    pub fn count(&self, criteria: &Document, _options: &Options) -> Result<Reply, StorageError> {
        let found = self.with_connection(|conn| self.find(conn, criteria, 0))?;
        Ok(Reply::Count(found.len()))
    }

    pub fn insert_one(&self, document: &Document, options: &Options) -> Result<Reply, StorageError> {
        let inserted = self.with_connection(|conn| self.insert_document(conn, document))?;
        Ok(Reply::one(inserted, options))
    }

    /// Inserts each document on its own connection. A failure leaves earlier documents
    /// inserted.
    pub fn insert_many(
        &self,
        documents: &[Document],
        options: &Options,
    ) -> Result<Reply, StorageError> {
        let mut inserted = Vec::with_capacity(documents.len());
        for document in documents {
            let stored = self.with_connection(|conn| self.insert_document(conn, document))?;
            inserted.extend(stored);
        }
        Ok(Reply::many(inserted, options))
    }

    pub fn find_one(
        &self,
        criteria: &Document,
        projection: &Document,
        options: &Options,
    ) -> Result<Reply, StorageError> {
        let found = self.with_connection(|conn| self.find(conn, criteria, 1))?;
        let document = match found.into_iter().next() {
            Some(d) => Some(self.evaluator.project(&d, projection)?),
            None => None,
        };
        Ok(Reply::one(document, options))
    }

    pub fn find_many(
        &self,
        criteria: &Document,
        projection: &Document,
        options: &Options,
    ) -> Result<Reply, StorageError> {
        let found = self.with_connection(|conn| self.find(conn, criteria, options.limit))?;
        let documents = found
            .iter()
            .map(|d| self.evaluator.project(d, projection))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Reply::many(documents, options))
    }

    fn update(
        &self,
        criteria: &Document,
        update: &Document,
        max_docs: usize,
    ) -> Result<Vec<Document>, StorageError> {
        let found = self.with_connection(|conn| self.find(conn, criteria, max_docs))?;

        let mut updated = Vec::with_capacity(found.len());
        for document in found {
            let changed = self.evaluator.apply(&document, update)?;
            let stored = self.with_connection(|conn| self.write_document(conn, &changed))?;
            updated.extend(stored);
        }
        Ok(updated)
    }

    pub fn update_one(
        &self,
        criteria: &Document,
        update: &Document,
        options: &Options,
    ) -> Result<Reply, StorageError> {
        let updated = self.update(criteria, update, 1)?;
        Ok(Reply::one(updated.into_iter().next(), options))
    }

    pub fn update_many(
        &self,
        criteria: &Document,
        update: &Document,
        options: &Options,
    ) -> Result<Reply, StorageError> {
        let updated = self.update(criteria, update, 0)?;
        Ok(Reply::many(updated, options))
    }

    /// Merges the top-level fields of `replacement` over the first match, keeping its
    /// identity value. Fields the replacement does not name are left as stored.
    pub fn replace_one(
        &self,
        criteria: &Document,
        replacement: &Document,
        options: &Options,
    ) -> Result<Reply, StorageError> {
        let stored = self.with_connection(|conn| {
            let Some(current) = self.find(conn, criteria, 1)?.into_iter().next() else {
                return Ok(None);
            };
            let catalog = self.catalog();
            let identity = catalog
                .identity_field()
                .ok_or_else(|| precondition("cannot replace: no identity column"))?;

            let mut document = current;
            for (key, value) in replacement {
                if key != identity {
                    document.insert(key.clone(), value.clone());
                }
            }
            Ok(Some(document))
        })?;

        let replaced = match stored {
            Some(document) => self.with_connection(|conn| self.write_document(conn, &document))?,
            None => None,
        };
        Ok(Reply::one(replaced, options))
    }

    fn delete(&self, criteria: &Document, max_docs: usize) -> Result<Vec<Document>, StorageError> {
        let found = self.with_connection(|conn| self.find(conn, criteria, max_docs))?;

        let mut deleted = Vec::with_capacity(found.len());
        for document in found {
            if self.with_connection(|conn| self.delete_document(conn, &document))? {
                deleted.push(document);
            }
        }
        Ok(deleted)
    }

    pub fn delete_one(&self, criteria: &Document, options: &Options) -> Result<Reply, StorageError> {
        let deleted = self.delete(criteria, 1)?;
        Ok(Reply::one(deleted.into_iter().next(), options))
    }

    pub fn delete_many(&self, criteria: &Document, options: &Options) -> Result<Reply, StorageError> {
        let deleted = self.delete(criteria, 0)?;
        Ok(Reply::many(deleted, options))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempdir::TempDir;

    use super::*;
    use crate::{engine::memory::MemoryEngine, settings::ConfigError};

    fn settings() -> Settings {
        Settings::new("db", "people", "root", "").with_modify_schema(true)
    }

    fn doc(value: Value) -> Document {
        value.as_object().unwrap().clone()
    }

    fn storage(engine: &MemoryEngine) -> DocumentStorage<MemoryEngine> {
        DocumentStorage::new(engine.clone(), settings()).unwrap()
    }

    fn one(reply: Reply) -> Document {
        match reply {
            Reply::Document(Some(d)) => d,
            other => panic!("expected a document, got {other:?}"),
        }
    }

    fn many(reply: Reply) -> Vec<Document> {
        match reply {
            Reply::Documents(d) => d,
            other => panic!("expected documents, got {other:?}"),
        }
    }

    #[test]
    fn document_lifecycle() {
        let engine = MemoryEngine::new();
        let storage = storage(&engine);
        let options = Options::default();

        let ann = one(
            storage
                .insert_one(&doc(json!({"name": "ann", "age": 30})), &options)
                .unwrap(),
        );
        assert_eq!(ann, doc(json!({"_id": 1, "name": "ann", "age": 30})));

        // A new shape grows the table; earlier rows read the new column as null.
        let bob = one(
            storage
                .insert_one(
                    &doc(json!({"name": "bob", "age": 17, "tags": ["x"]})),
                    &options,
                )
                .unwrap(),
        );
        assert_eq!(bob["_id"], json!(2));
        assert_eq!(bob["tags"], json!(["x"]));

        let found = one(
            storage
                .find_one(&doc(json!({"name": "ann"})), &Document::new(), &options)
                .unwrap(),
        );
        assert_eq!(found["tags"], Value::Null);

        let updated = one(
            storage
                .update_one(
                    &doc(json!({"age": {"$lt": 18}})),
                    &doc(json!({"$inc": {"age": 1}, "$set": {"ok": true}})),
                    &options,
                )
                .unwrap(),
        );
        assert_eq!(updated["age"], json!(18));
        assert_eq!(updated["ok"], json!(true));

        assert_eq!(
            storage
                .count(&doc(json!({"age": {"$gte": 18}})), &options)
                .unwrap(),
            Reply::Count(2)
        );

        let deleted = one(
            storage
                .delete_one(&doc(json!({"name": "ann"})), &options)
                .unwrap(),
        );
        assert_eq!(deleted["_id"], json!(1));
        assert_eq!(
            storage.count(&Document::new(), &options).unwrap(),
            Reply::Count(1)
        );
        assert_eq!(engine.open_connections(), 0);
    }

    #[test]
    fn counts_instead_of_documents() {
        let engine = MemoryEngine::new();
        let storage = storage(&engine);
        let options = Options::counts();

        let reply = storage
            .insert_many(
                &[doc(json!({"n": 1})), doc(json!({})), doc(json!({"n": 2}))],
                &options,
            )
            .unwrap();
        assert_eq!(reply, Reply::Count(2));

        let reply = storage
            .update_many(&Document::new(), &doc(json!({"$mul": {"n": 10}})), &options)
            .unwrap();
        assert_eq!(reply, Reply::Count(2));

        let reply = storage
            .find_one(&doc(json!({"n": 20})), &Document::new(), &options)
            .unwrap();
        assert_eq!(reply, Reply::Count(1));

        let reply = storage.delete_many(&Document::new(), &options).unwrap();
        assert_eq!(reply, Reply::Count(2));
    }

    #[test]
    fn find_many_honors_limit_and_projection() {
        let engine = MemoryEngine::new();
        let storage = storage(&engine);
        let documents: Vec<Document> = (1..=5)
            .map(|i| doc(json!({"n": i, "odd": i % 2 == 1})))
            .collect();
        storage
            .insert_many(&documents, &Options::default())
            .unwrap();

        let found = many(
            storage
                .find_many(
                    &doc(json!({"odd": true})),
                    &doc(json!({"n": 1})),
                    &Options::default().with_limit(2),
                )
                .unwrap(),
        );
        assert_eq!(found, vec![doc(json!({"n": 1})), doc(json!({"n": 3}))]);

        let found = many(
            storage
                .find_many(&Document::new(), &doc(json!({"odd": 0, "_id": 0})), &Options::default())
                .unwrap(),
        );
        assert_eq!(found.len(), 5);
        assert_eq!(found[4], doc(json!({"n": 5})));
    }

    #[test]
    fn unset_clears_the_column() {
        let engine = MemoryEngine::new();
        let storage = storage(&engine);
        let options = Options::default();
        storage
            .insert_one(&doc(json!({"name": "ann", "age": 30})), &options)
            .unwrap();

        let updated = one(
            storage
                .update_one(
                    &doc(json!({"name": "ann"})),
                    &doc(json!({"$unset": {"age": ""}})),
                    &options,
                )
                .unwrap(),
        );
        assert_eq!(updated, doc(json!({"_id": 1, "name": "ann", "age": null})));
    }

    #[test]
    fn replace_merges_over_the_match() {
        let engine = MemoryEngine::new();
        let storage = storage(&engine);
        let options = Options::default();
        storage
            .insert_one(&doc(json!({"name": "ann", "age": 30})), &options)
            .unwrap();

        let replaced = one(
            storage
                .replace_one(
                    &doc(json!({"name": "ann"})),
                    &doc(json!({"_id": 99, "city": "Oslo"})),
                    &options,
                )
                .unwrap(),
        );
        assert_eq!(
            replaced,
            doc(json!({"_id": 1, "name": "ann", "age": 30, "city": "Oslo"}))
        );

        let replaced = one(
            storage
                .replace_one(
                    &doc(json!({"city": "Oslo"})),
                    &doc(json!({"name": "bea", "age": null})),
                    &options,
                )
                .unwrap(),
        );
        assert_eq!(
            replaced,
            doc(json!({"_id": 1, "name": "bea", "age": null, "city": "Oslo"}))
        );

        let missing = storage
            .replace_one(&doc(json!({"name": "zed"})), &doc(json!({"a": 1})), &options)
            .unwrap();
        assert_eq!(missing, Reply::Document(None));
    }

    #[test]
    fn insert_many_keeps_earlier_documents_on_failure() {
        let engine = MemoryEngine::new();
        let storage = storage(&engine);
        let options = Options::default();

        let err = storage
            .insert_many(&[doc(json!({"n": 1})), doc(json!({"n": "x"}))], &options)
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::WrongValue));
        assert_eq!(
            storage.count(&Document::new(), &options).unwrap(),
            Reply::Count(1)
        );
    }

    #[test]
    fn update_many_keeps_earlier_updates_on_failure() {
        let engine = MemoryEngine::new();
        let storage = storage(&engine);
        let options = Options::default();
        storage
            .insert_many(
                &[
                    doc(json!({"n": 1, "tags": [1]})),
                    doc(json!({"n": 2, "tags": {"a": 1}})),
                ],
                &options,
            )
            .unwrap();

        let err = storage
            .update_many(&Document::new(), &doc(json!({"$push": {"tags": 2}})), &options)
            .unwrap_err();
        assert!(matches!(err, StorageError::Evaluation { .. }), "{err}");

        let first = one(
            storage
                .find_one(&doc(json!({"n": 1})), &Document::new(), &options)
                .unwrap(),
        );
        assert_eq!(first["tags"], json!([1, 2]));
        let second = one(
            storage
                .find_one(&doc(json!({"n": 2})), &Document::new(), &options)
                .unwrap(),
        );
        assert_eq!(second["tags"], json!({"a": 1}));
    }

    #[test]
    fn explicit_identity_values_are_kept() {
        let engine = MemoryEngine::new();
        let storage = storage(&engine);

        let stored = one(
            storage
                .insert_one(&doc(json!({"_id": 40, "name": "x"})), &Options::default())
                .unwrap(),
        );
        assert_eq!(stored["_id"], json!(40));

        let next = one(
            storage
                .insert_one(&doc(json!({"_id": 0, "name": "y"})), &Options::default())
                .unwrap(),
        );
        assert_eq!(next["_id"], json!(41));
    }

    #[test]
    fn insert_reports_nothing_when_the_row_cannot_be_read_back() {
        let engine = MemoryEngine::new();
        let storage = storage(&engine);
        let options = Options::default();

        // The engine rounds the identity to 2, so reading back by 1.6 finds nothing.
        let reply = storage
            .insert_one(&doc(json!({"_id": 1.6, "name": "x"})), &options)
            .unwrap();
        assert_eq!(reply, Reply::Document(None));
        assert_eq!(
            storage.count(&Document::new(), &options).unwrap(),
            Reply::Count(1)
        );
    }

    #[test]
    fn repeated_shapes_issue_no_ddl() {
        let engine = MemoryEngine::new();
        let storage = storage(&engine);
        let options = Options::default();
        storage
            .insert_one(&doc(json!({"name": "ann", "age": 30, "tags": []})), &options)
            .unwrap();
        engine.clear_journal();

        storage
            .insert_one(&doc(json!({"name": "bob", "age": 2})), &options)
            .unwrap();
        storage
            .update_many(&Document::new(), &doc(json!({"$set": {"age": 5}})), &options)
            .unwrap();

        let ddl: Vec<String> = engine
            .journal()
            .into_iter()
            .filter(|s| s.starts_with("ALTER") || s.starts_with("CREATE"))
            .collect();
        assert!(ddl.is_empty(), "{ddl:?}");
    }

    #[test]
    fn writes_require_identity_values() {
        let engine = MemoryEngine::new();
        let storage = storage(&engine);
        let options = Options::default();
        let mut conn = engine.connect(&settings()).unwrap();

        let err = storage
            .write_document(conn.as_mut(), &doc(json!({"name": "ann"})))
            .unwrap_err();
        assert!(matches!(err, StorageError::SchemaPrecondition { .. }));

        let err = storage
            .delete_document(conn.as_mut(), &doc(json!({"_id": 0})))
            .unwrap_err();
        assert!(matches!(err, StorageError::SchemaPrecondition { .. }));

        drop(conn);
        assert_eq!(
            storage.delete_many(&Document::new(), &options).unwrap(),
            Reply::Documents(vec![])
        );
    }

    #[test]
    fn inserts_require_an_identity_column() {
        let engine = MemoryEngine::new();
        let settings = Settings::new("db", "legacy", "root", "");
        let mut conn = engine.connect(&settings).unwrap();
        let mut sql = Sql::new("CREATE TABLE ");
        sql.table("db", "legacy")
            .push(" (")
            .identifier("name")
            .push(" MEDIUMTEXT)");
        conn.execute(&sql).unwrap();
        drop(conn);

        let storage = DocumentStorage::new(engine.clone(), settings).unwrap();
        let err = storage
            .insert_one(&doc(json!({"name": "ann"})), &Options::default())
            .unwrap_err();

        assert!(matches!(err, StorageError::SchemaPrecondition { .. }));
        assert_eq!(engine.open_connections(), 0);
    }

    #[test]
    fn fixed_schema_rejects_unknown_fields() {
        let engine = MemoryEngine::new();
        storage(&engine)
            .insert_one(&doc(json!({"name": "ann"})), &Options::default())
            .unwrap();

        let fixed = DocumentStorage::new(engine.clone(), settings().with_modify_schema(false))
            .unwrap();
        let err = fixed
            .insert_one(&doc(json!({"name": "bob", "age": 3})), &Options::default())
            .unwrap_err();

        assert_eq!(err.code(), Some(ErrorCode::BadField));
        assert_eq!(engine.open_connections(), 0);
    }

    #[test]
    fn reads_on_missing_table_are_empty() {
        let engine = MemoryEngine::new();
        let storage = storage(&engine);

        assert_eq!(
            storage.count(&Document::new(), &Options::default()).unwrap(),
            Reply::Count(0)
        );
        assert_eq!(
            storage
                .find_one(&Document::new(), &Document::new(), &Options::default())
                .unwrap(),
            Reply::Document(None)
        );
    }

    #[test]
    fn drop_and_flush() {
        let engine = MemoryEngine::new();
        let storage = storage(&engine);
        storage
            .insert_one(&doc(json!({"a": 1})), &Options::default())
            .unwrap();

        assert!(storage.drop_storage().unwrap());
        assert!(!storage.catalog().table_exists());
        assert!(engine.table_names("db").is_empty());

        // Dropping again is not an error.
        assert!(storage.drop_storage().unwrap());
        assert!(storage.flush_storage());
    }

    #[test]
    fn unreachable_server_is_a_connectivity_error() {
        let engine = MemoryEngine::new();
        let storage = storage(&engine);
        engine.set_offline(true);

        let err = storage
            .count(&Document::new(), &Options::default())
            .unwrap_err();

        assert!(matches!(err, StorageError::Connectivity { .. }));
        assert_eq!(err.code(), Some(ErrorCode::ConnectionRefused));
    }

    #[test]
    fn invalid_settings_fail_before_connecting() {
        let engine = MemoryEngine::new();
        engine.set_offline(true);

        let err = DocumentStorage::new(engine, Settings::new("db", "", "root", ""))
            .err()
            .unwrap();

        assert!(matches!(
            err,
            StorageError::Config {
                cause: ConfigError::Missing("Table")
            }
        ));
    }

    #[test]
    fn documents_survive_engine_restart() {
        let dir = TempDir::new("docsql").unwrap();
        let path = dir.path().join("data.db");

        {
            let engine = MemoryEngine::open(&path).unwrap();
            storage(&engine)
                .insert_many(
                    &[doc(json!({"name": "ann"})), doc(json!({"name": "bob"}))],
                    &Options::default(),
                )
                .unwrap();
        }

        let engine = MemoryEngine::open(&path).unwrap();
        let storage = storage(&engine);
        let bob = one(
            storage
                .find_one(&doc(json!({"name": "bob"})), &Document::new(), &Options::default())
                .unwrap(),
        );
        assert_eq!(bob["_id"], json!(2));

        let cid = one(
            storage
                .insert_one(&doc(json!({"name": "cid"})), &Options::default())
                .unwrap(),
        );
        assert_eq!(cid["_id"], json!(3));
    }

    #[test]
    fn storage_is_shareable_across_threads() {
        let engine = MemoryEngine::new();
        let storage = std::sync::Arc::new(storage(&engine));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let storage = std::sync::Arc::clone(&storage);
                std::thread::spawn(move || {
                    storage
                        .insert_one(&doc(json!({"worker": i, "label": "w"})), &Options::default())
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            storage.count(&Document::new(), &Options::default()).unwrap(),
            Reply::Count(4)
        );
    }
}

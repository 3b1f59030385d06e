//! Relational engine interface.
//!
//! The storage layer talks to a relational engine through two small traits:
//!
//! - [`Connector`]: opens a [`Connection`] for the configured server and database.
//! - [`Connection`]: executes one parameterized [`Sql`] statement at a time and is
//!   closed explicitly once the caller is done with it.
//!
//! Engines describe result columns with MySQL type codes and column flags (see
//! [`types`] and [`flags`]), and report failures as an [`EngineError`] carrying a
//! machine-readable [`ErrorCode`].
//!
//! # See Also
//! - [`memory`]: embedded engine implementing this interface.
//! - [`Sql`]: statement builder; the only way statement text is produced.
pub mod memory;

use std::fmt;

use bincode::{Decode, Encode};
use log::debug;
use thiserror::Error;

use crate::{settings::Settings, sql::Sql};

/// MySQL column type codes as reported in result metadata.
pub mod types {
    pub const TINY: u8 = 1;
    pub const SHORT: u8 = 2;
    pub const LONG: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const DOUBLE: u8 = 5;
    pub const LONGLONG: u8 = 8;
    pub const INT24: u8 = 9;
    pub const JSON: u8 = 245;
    pub const NEWDECIMAL: u8 = 246;
    pub const BLOB: u8 = 252;
    pub const VAR_STRING: u8 = 253;
    pub const STRING: u8 = 254;
}

/// MySQL column definition flags.
pub mod flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRI_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const BLOB: u16 = 16;
    pub const AUTO_INCREMENT: u16 = 512;

    pub fn has(flags: u16, flag: u16) -> bool {
        flags & flag == flag
    }
}

/// A value bound to, or returned from, a statement.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum SqlValue {
    Null,
    Int(i64),
    Double(f64),
    Text(String),
    /// Serialized JSON text destined for (or read from) a JSON column.
    Json(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Int(i) => write!(f, "{i}"),
            SqlValue::Double(d) => write!(f, "{d}"),
            SqlValue::Text(s) => write!(f, "'{s}'"),
            SqlValue::Json(s) => write!(f, "{s}"),
        }
    }
}

/// Positional statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// Bound to a `??` placeholder.
    Identifier(String),
    /// Bound to a `?` placeholder.
    Value(SqlValue),
}

/// Description of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub type_code: u8,
    pub flags: u16,
}

/// Outcome of executing a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<SqlValue>>,
    pub affected_rows: u64,
    /// Auto-increment value assigned by the last insert, `0` if none.
    pub insert_id: u64,
}

/// Machine-readable failure reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoSuchTable,
    BadTable,
    TableExists,
    DuplicateField,
    BadField,
    Parse,
    WrongValue,
    InvalidJson,
    DuplicateEntry,
    NoDefault,
    WrongValueCount,
    ConnectionRefused,
    ConnectionClosed,
    Other,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoSuchTable => "ER_NO_SUCH_TABLE",
            ErrorCode::BadTable => "ER_BAD_TABLE_ERROR",
            ErrorCode::TableExists => "ER_TABLE_EXISTS_ERROR",
            ErrorCode::DuplicateField => "ER_DUP_FIELDNAME",
            ErrorCode::BadField => "ER_BAD_FIELD_ERROR",
            ErrorCode::Parse => "ER_PARSE_ERROR",
            ErrorCode::WrongValue => "ER_TRUNCATED_WRONG_VALUE",
            ErrorCode::InvalidJson => "ER_INVALID_JSON_TEXT",
            ErrorCode::DuplicateEntry => "ER_DUP_ENTRY",
            ErrorCode::NoDefault => "ER_NO_DEFAULT_FOR_FIELD",
            ErrorCode::WrongValueCount => "ER_WRONG_VALUE_COUNT",
            ErrorCode::ConnectionRefused => "ECONNREFUSED",
            ErrorCode::ConnectionClosed => "ER_CLOSED",
            ErrorCode::Other => "ER_UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
}

impl EngineError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Opens connections to a relational engine.
pub trait Connector {
    fn connect(&self, settings: &Settings) -> Result<Box<dyn Connection>, EngineError>;
}

/// A live engine session.
pub trait Connection {
    fn execute(&mut self, sql: &Sql) -> Result<ResultSet, EngineError>;

    /// Ends the session gracefully. Dropping a connection without closing it
    /// releases it as well, without the graceful handshake.
    fn close(self: Box<Self>) -> Result<(), EngineError>;
}

/// Executes one statement, logging it with identifiers escaped.
pub fn run(conn: &mut dyn Connection, sql: &Sql) -> Result<ResultSet, EngineError> {
    debug!("executing {sql}");
    conn.execute(sql)
}

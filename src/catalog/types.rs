//! Mapping between document value shapes and column types.
use crate::{document::ValueShape, engine::types};

/// Column type classification used by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortType {
    Boolean,
    Number,
    String,
    Json,
    Unsupported,
}

impl ShortType {
    /// Scalar types can take part in filter pushdown.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            ShortType::Boolean | ShortType::Number | ShortType::String
        )
    }

    /// Whether a document value of `shape` can be compared against this column
    /// in the engine with the same result as in a document.
    pub fn accepts(&self, shape: ValueShape) -> bool {
        matches!(
            (self, shape),
            (ShortType::Boolean, ValueShape::Boolean)
                | (ShortType::Number, ValueShape::Number)
                | (ShortType::String, ValueShape::String)
        )
    }
}

/// Column types created by schema migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    Number,
    Text,
    Json,
    Identity,
}

impl ColumnType {
    /// DDL fragment for this column type.
    pub fn ddl(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "TINYINT(1)",
            ColumnType::Number => "DOUBLE",
            ColumnType::Text => "MEDIUMTEXT",
            ColumnType::Json => "JSON",
            ColumnType::Identity => "INT(11)",
        }
    }

    /// Type code the engine reports for columns of this type.
    pub fn type_code(&self) -> u8 {
        match self {
            ColumnType::Boolean => types::TINY,
            ColumnType::Number => types::DOUBLE,
            ColumnType::Text => types::BLOB,
            ColumnType::Json => types::JSON,
            ColumnType::Identity => types::LONG,
        }
    }
}

/// Column type for a document value; `None` for null, which carries no type.
pub fn column_type_for(shape: ValueShape) -> Option<ColumnType> {
    match shape {
        ValueShape::Null => None,
        ValueShape::Boolean => Some(ColumnType::Boolean),
        ValueShape::Number => Some(ColumnType::Number),
        ValueShape::String => Some(ColumnType::Text),
        ValueShape::List | ValueShape::Object => Some(ColumnType::Json),
    }
}

pub fn short_type_for(type_code: u8) -> ShortType {
    match type_code {
        types::TINY => ShortType::Boolean,
        types::SHORT
        | types::LONG
        | types::FLOAT
        | types::DOUBLE
        | types::LONGLONG
        | types::INT24
        | types::NEWDECIMAL => ShortType::Number,
        types::JSON => ShortType::Json,
        types::BLOB | types::VAR_STRING | types::STRING => ShortType::String,
        _ => ShortType::Unsupported,
    }
}

pub fn type_name_for(type_code: u8) -> &'static str {
    match type_code {
        types::TINY => "TINYINT",
        types::SHORT => "SMALLINT",
        types::LONG => "INT",
        types::FLOAT => "FLOAT",
        types::DOUBLE => "DOUBLE",
        types::LONGLONG => "BIGINT",
        types::INT24 => "MEDIUMINT",
        types::NEWDECIMAL => "DECIMAL",
        types::JSON => "JSON",
        types::BLOB => "MEDIUMTEXT",
        types::VAR_STRING => "VARCHAR",
        types::STRING => "STRING",
        _ => "?",
    }
}

//! Parameterized statement builder.
//!
//! Every statement sent to an engine is assembled with [`Sql`]. Static keyword text is
//! appended with [`Sql::push`], which only accepts `&'static str`, so no runtime data can
//! ever reach the statement text. Runtime data enters through two placeholder kinds:
//!
//! - `??` marks an identifier (database, table or column name), recorded as
//!   [`Param::Identifier`].
//! - `?` marks a literal value, recorded as [`Param::Value`].
//!
//! Parameters are stored in placeholder order; engines bind them positionally.
//!
//! # Example
//! ```rust
//! use docsql::sql::Sql;
//! use docsql::engine::SqlValue;
//!
//! let mut sql = Sql::new("SELECT * FROM ");
//! sql.table("shop", "orders")
//!     .push(" WHERE (")
//!     .identifier("total")
//!     .push(" > ")
//!     .value(SqlValue::Int(10))
//!     .push(")");
//!
//! assert_eq!(sql.text(), "SELECT * FROM ??.?? WHERE (?? > ?)");
//! assert_eq!(sql.params().len(), 4);
//! ```
use std::fmt;

use crate::engine::{Param, SqlValue};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sql {
    text: String,
    params: Vec<Param>,
}

impl Sql {
    pub fn new(text: &'static str) -> Self {
        Self {
            text: text.to_string(),
            params: Vec::new(),
        }
    }

    pub fn push(&mut self, text: &'static str) -> &mut Self {
        self.text.push_str(text);
        self
    }

    pub fn identifier(&mut self, name: impl Into<String>) -> &mut Self {
        self.text.push_str("??");
        self.params.push(Param::Identifier(name.into()));
        self
    }

    pub fn value(&mut self, value: SqlValue) -> &mut Self {
        self.text.push('?');
        self.params.push(Param::Value(value));
        self
    }

    /// Appends a qualified `??.??` table reference.
    pub fn table(&mut self, database: &str, table: &str) -> &mut Self {
        self.identifier(database).push(".").identifier(table)
    }

    /// Appends another fragment, keeping its parameters in order.
    pub fn append(&mut self, other: Sql) -> &mut Self {
        self.text.push_str(&other.text);
        self.params.extend(other.params);
        self
    }

    /// Joins fragments with a static separator.
    pub fn join(parts: Vec<Sql>, separator: &'static str) -> Sql {
        let mut out = Sql::default();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                out.push(separator);
            }
            out.append(part);
        }
        out
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Renders the statement with identifiers escaped in place and values left as `?`.
    ///
    /// Used for logging and for engines that can bind values but not identifiers.
    pub fn escaped(&self) -> String {
        let mut out = String::with_capacity(self.text.len());
        let mut identifiers = self.params.iter().filter_map(|p| match p {
            Param::Identifier(name) => Some(name),
            Param::Value(_) => None,
        });
        let mut chars = self.text.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch == '?' && chars.peek() == Some(&'?') {
                chars.next();
                match identifiers.next() {
                    Some(name) => out.push_str(&escape_identifier(name)),
                    None => out.push_str("??"),
                }
            } else {
                out.push(ch);
            }
        }
        out
    }

    /// Values bound to `?` placeholders, in order.
    pub fn values(&self) -> Vec<&SqlValue> {
        self.params
            .iter()
            .filter_map(|p| match p {
                Param::Value(v) => Some(v),
                Param::Identifier(_) => None,
            })
            .collect()
    }
}

impl fmt::Display for Sql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.escaped())
    }
}

/// Quotes an identifier with backticks, doubling embedded backticks.
pub fn escape_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

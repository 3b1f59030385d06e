//! Storage settings.
//!
//! Settings use the PascalCase keys of the document adapter configuration format so a
//! settings file can be shared between deployments:
//!
//! ```json
//! {
//!     "Server": "localhost",
//!     "Port": 3306,
//!     "Database": "testdb",
//!     "Table": "test-table",
//!     "UserName": "root",
//!     "Password": "",
//!     "ModifySchema": true
//! }
//! ```
use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SERVER: &str = "localhost";
pub const DEFAULT_PORT: u16 = 3306;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("this adapter requires a Settings.{0} string parameter")]
    Missing(&'static str),

    #[error("invalid Settings.{setting}: {reason}")]
    Invalid {
        setting: &'static str,
        reason: String,
    },

    #[error("failed to read settings: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Settings {
    #[serde(default = "default_server")]
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub table: String,
    /// Column addressing single documents. Discovered from the table when unset.
    #[serde(default)]
    pub id_field: Option<String>,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Allow creating the table and adding columns at runtime.
    #[serde(default)]
    pub modify_schema: bool,
}

fn default_server() -> String {
    DEFAULT_SERVER.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Settings {
    pub fn new(
        database: impl Into<String>,
        table: impl Into<String>,
        user_name: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server: default_server(),
            port: default_port(),
            database: database.into(),
            table: table.into(),
            id_field: None,
            user_name: user_name.into(),
            password: Some(password.into()),
            modify_schema: false,
        }
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = Some(id_field.into());
        self
    }

    pub fn with_modify_schema(mut self, modify_schema: bool) -> Self {
        self.modify_schema = modify_schema;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Configured identity column, ignoring blank values.
    pub fn id_field(&self) -> Option<&str> {
        self.id_field.as_deref().filter(|f| !f.is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.is_empty() {
            return Err(ConfigError::Missing("Server"));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid {
                setting: "Port",
                reason: "port must be non-zero".into(),
            });
        }
        if self.database.is_empty() {
            return Err(ConfigError::Missing("Database"));
        }
        if self.table.is_empty() {
            return Err(ConfigError::Missing("Table"));
        }
        if self.user_name.is_empty() {
            return Err(ConfigError::Missing("UserName"));
        }
        if self.password.is_none() {
            return Err(ConfigError::Missing("Password"));
        }
        match self.id_field() {
            Some(id) if id.contains('.') => Err(ConfigError::Invalid {
                setting: "IdField",
                reason: format!("'{id}' must not contain a path separator"),
            }),
            _ => Ok(()),
        }
    }
}

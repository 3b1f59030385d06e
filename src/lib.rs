pub mod catalog;
pub mod cli;
pub mod codec;
pub mod document;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod query;
pub mod settings;
pub mod sql;
pub mod storage;

pub use cli::{Command, prompt};
pub use document::Document;
pub use error::StorageError;
pub use evaluator::{BasicEvaluator, Evaluator};
pub use settings::Settings;
pub use storage::{DocumentStorage, Options, Reply};

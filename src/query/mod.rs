//! Read path: criteria translation and execution.
pub mod executor;
pub mod pushdown;

pub use executor::execute;
pub use pushdown::pushdown;

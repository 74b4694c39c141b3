//! Result storage
//!
//! Check results are appended to the `network_checks` table of a libsql
//! database, either a local file or a remote server.

pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{LibsqlSink, ResultSink, persist_result};

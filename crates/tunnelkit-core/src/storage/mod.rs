//! Storage layer (`SQLite` profile table)

pub mod db;
pub mod migrations;
pub mod profiles;

pub use db::{Database, SharedDatabase};
pub use profiles::ProfileStore;

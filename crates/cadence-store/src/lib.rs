//! # Cadence Store
//!
//! SQLite persistence for the engine: automation rules, the action
//! execution log, data-source registrations, synced records, sync runs,
//! and stage-transition history. One database file, WAL mode, a single
//! connection behind a mutex.

pub mod db;

pub use db::EngineDb;

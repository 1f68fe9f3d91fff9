//! # wisp-store
//!
//! Durable record storage for the Wisp backend, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model: profiles, snaps, stories, messages, and streaks.  Binary payloads
//! (snap images) live outside the database; records carry an opaque payload
//! reference instead.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod profiles;
pub mod snaps;
pub mod stories;
pub mod streaks;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;

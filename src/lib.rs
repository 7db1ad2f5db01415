//! Sync and historical backfill of astronomy and space-weather feeds into a
//! local SQLite content store.

pub mod archive;
pub mod backfill;
pub mod chunker;
pub mod cleanup;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod feeds;
pub mod governor;
pub mod http;
pub mod imagery;
pub mod lock;
pub mod logfile;
pub mod model;
pub mod nasa;
pub mod pacer;
pub mod progress;
pub mod store;
pub mod upsert;

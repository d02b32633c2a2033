//! Callback-session pool for scrape replay.
//!
//! Captured callback URLs are stored in SQLite, checked out least-recently-used,
//! and scored by replay outcomes until they expire or retire. The capture
//! service keeps each region topped up with healthy sessions.

pub mod capture;
pub mod cli;
pub mod config;
pub mod models;
pub mod pool;
pub mod replay;
pub mod repository;

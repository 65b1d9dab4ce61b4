//! Instaman — a small Instagram account manager.
//!
//! Two binaries share this library: the worker (`instaman`), which runs the
//! job scheduler, and the JSON API server (`api_server`). Both talk to the
//! same SQLite database and to the instaproxy account-data service.

pub mod api;
pub mod config;
pub mod db;
pub mod instagram;
pub mod model;
pub mod worker;

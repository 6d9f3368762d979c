//! Job Dispatch Core
//!
//! Durable job queue: owners submit work, workers claim it one job at a time
//! in priority order and report the outcome. Every status change is recorded
//! in an append-only transition log.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;

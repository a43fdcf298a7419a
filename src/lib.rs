//! Upload pipeline
//!
//! Presigned or direct uploads into S3-compatible storage, confirmed against a
//! PostgreSQL metadata store, announced on a Redis event log with
//! at-least-once delivery, and turned into thumbnails by an idempotent worker.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;

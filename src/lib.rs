//! Event-driven image processing pipeline
//!
//! Jobs describing a source image and an ordered list of transforms arrive on
//! a Redis queue. The worker fetches and decodes the source, applies each
//! transform in turn, uploads every output to S3-compatible storage and keeps
//! a whole-record job status in Redis for the status API to read.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;

//! Commit ingestion service: tracks GitHub repositories, mirrors their commit
//! history into SQLite and serves simple queries over it.
//!
//! Registration publishes an event; a fixed worker pool runs per-repository
//! sync state machines that page through the GitHub commits API, persist
//! batches and advance a resume checkpoint. A monitoring loop re-syncs every
//! tracked repository periodically.

pub mod config;
pub mod events;
pub mod github;
pub mod ingest;
pub mod server;
pub mod storage;
pub mod types;

#[cfg(test)]
pub mod test_utils;

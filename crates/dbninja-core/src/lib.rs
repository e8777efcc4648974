//! # DBNinja Core
//!
//! Runtime-free logic for DBNinja: schema document models, score
//! normalization and fusion, the hybrid retriever, and the bounded
//! generate → validate → correct loop that turns a question into SQL.
//!
//! This crate contains no tokio, sqlx, reqwest, or other I/O dependencies.
//! Every external service (embedding provider, vector/keyword index, SQL
//! generator, dry-run validator) is reached through a trait, so the same
//! algorithms run against Qdrant in production and in-memory fakes in tests.

pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod ranking;
pub mod retriever;

pub use error::DbNinjaError;

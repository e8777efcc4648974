//! # DBNinja
//!
//! Natural-language questions to SQL over a hybrid-retrieval index of a
//! database's schema.
//!
//! Schema ingestion turns every table, column and worked example of the
//! target database into a document in Qdrant. A question is answered by
//! ranking those documents with a fused semantic + keyword score, prompting
//! an LLM with the best candidates, and dry-running the SQL it returns with
//! `EXPLAIN`, feeding any error back for a bounded number of corrections.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Target DB   │──▶│ Ingest        │──▶│  Qdrant  │
//! │ (introspect) │   │ Docs+Embed   │   │ vec + ft │
//! └──────────────┘   └──────────────┘   └────┬─────┘
//!                                            │ hybrid retrieval
//!                    ┌──────────────┐   ┌────▼─────┐
//!                    │  LLM gateway │◀──│ Pipeline │──▶ EXPLAIN (target DB)
//!                    └──────────────┘   └────┬─────┘
//!                                   ┌────────┴────────┐
//!                                   ▼                 ▼
//!                              ┌─────────┐       ┌─────────┐
//!                              │   CLI   │       │  HTTP   │
//!                              └─────────┘       └─────────┘
//! ```
//!
//! The retrieval and generation algorithms live in the runtime-free
//! `dbninja-core` crate; this crate supplies the concrete collaborators.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`http`] | JSON POST with retry and backoff |
//! | [`embedding`] | Embedding gateway client |
//! | [`llm`] | LLM gateway client and SQL generator |
//! | [`prompt`] | Chat prompt assembly |
//! | [`qdrant`] | Qdrant index for both retrieval channels |
//! | [`db`] | Target database connection |
//! | [`validator`] | `EXPLAIN` dry-run validator |
//! | [`ingest`] | Schema introspection and indexing |
//! | [`query`] | Pipeline wiring and answer shaping |
//! | [`server`] | HTTP API |

pub mod config;
pub mod db;
pub mod embedding;
pub mod http;
pub mod ingest;
pub mod llm;
pub mod prompt;
pub mod qdrant;
pub mod query;
pub mod server;
pub mod validator;

//! Core data models for schema retrieval and SQL generation.
//!
//! An [`IndexedDoc`] is one unit of schema knowledge (a table, a column, or a
//! worked example). The retrieval channels produce [`RetrievalHit`]s, the
//! fusion step collapses them into [`FusedResult`]s, and the generation loop
//! records each [`GenerationAttempt`] together with its [`ValidationOutcome`].

use serde::{Deserialize, Serialize};

/// The kind of schema element a document describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    Table,
    Column,
    Example,
}

impl DocKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocKind::Table => "table",
            DocKind::Column => "column",
            DocKind::Example => "example",
        }
    }
}

/// Structured fields of a table document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableFields {
    pub db_name: String,
    pub schema_name: String,
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
}

/// Structured fields of a column document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFields {
    pub db_name: String,
    pub schema_name: String,
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

/// A worked question → SQL example used as few-shot guidance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleFields {
    pub question: String,
    pub sql: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
}

/// Kind-specific payload of an [`IndexedDoc`].
///
/// Serialized inline with the document, discriminated by `object_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "object_type", rename_all = "lowercase")]
pub enum DocBody {
    Table(TableFields),
    Column(ColumnFields),
    Example(ExampleFields),
}

/// An indexed unit of schema knowledge. Immutable once indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDoc {
    /// Opaque identity (a UUID for ingested documents).
    pub id: String,
    /// Display title, e.g. `sales.orders.customer_id`.
    pub title: String,
    /// Free-text description used for keyword matching and prompting.
    pub doc_text: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Popularity weight in `[0, 1]`.
    #[serde(default = "default_popularity")]
    pub popularity: f64,
    /// RFC 3339 timestamp of the ingestion run that produced this document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(flatten)]
    pub body: DocBody,
}

/// Popularity assumed for documents that do not carry one.
pub const DEFAULT_POPULARITY: f64 = 0.5;

fn default_popularity() -> f64 {
    DEFAULT_POPULARITY
}

impl IndexedDoc {
    pub fn kind(&self) -> DocKind {
        match self.body {
            DocBody::Table(_) => DocKind::Table,
            DocBody::Column(_) => DocKind::Column,
            DocBody::Example(_) => DocKind::Example,
        }
    }

    pub fn schema_name(&self) -> Option<&str> {
        match &self.body {
            DocBody::Table(t) => Some(&t.schema_name),
            DocBody::Column(c) => Some(&c.schema_name),
            DocBody::Example(e) => e.schema_name.as_deref(),
        }
    }

    pub fn table_name(&self) -> Option<&str> {
        match &self.body {
            DocBody::Table(t) => Some(&t.table_name),
            DocBody::Column(c) => Some(&c.table_name),
            DocBody::Example(e) => e.table_name.as_deref(),
        }
    }

    pub fn column_name(&self) -> Option<&str> {
        match &self.body {
            DocBody::Column(c) => Some(&c.column_name),
            DocBody::Table(_) | DocBody::Example(_) => None,
        }
    }

    pub fn data_type(&self) -> Option<&str> {
        match &self.body {
            DocBody::Column(c) => Some(&c.data_type),
            DocBody::Table(_) | DocBody::Example(_) => None,
        }
    }
}

/// A document returned by one retrieval channel, with that channel's raw score.
#[derive(Debug, Clone)]
pub struct RetrievalHit {
    /// Raw channel score: vector similarity (semantic) or the keyword
    /// heuristic from [`keyword_score`](crate::ranking::keyword_score).
    pub raw_score: f64,
    pub doc: IndexedDoc,
}

impl RetrievalHit {
    pub fn new(doc: IndexedDoc, raw_score: f64) -> Self {
        Self { raw_score, doc }
    }

    pub fn id(&self) -> &str {
        &self.doc.id
    }
}

/// One ranked candidate after normalization and fusion.
#[derive(Debug, Clone, Serialize)]
pub struct FusedResult {
    /// Normalized semantic score (0.0 if absent from semantic hits).
    pub semantic_score: f64,
    /// Normalized keyword score (0.0 if absent from keyword hits).
    pub keyword_score: f64,
    /// `alpha * semantic + (1 - alpha) * keyword`.
    pub score: f64,
    pub doc: IndexedDoc,
}

impl FusedResult {
    pub fn id(&self) -> &str {
        &self.doc.id
    }
}

/// Verdict of a dry-run validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl ValidationOutcome {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            diagnostic: None,
        }
    }

    pub fn rejected(diagnostic: impl Into<String>) -> Self {
        Self {
            accepted: false,
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// One round of SQL generation and its validation verdict.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationAttempt {
    /// 0 for the first draft, `n >= 1` for the n-th correction.
    pub index: usize,
    pub sql: String,
    /// Diagnostic of the previous attempt, fed back into this one's prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_error: Option<String>,
    pub outcome: ValidationOutcome,
}

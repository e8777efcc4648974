//! Schema ingestion: introspect the target database and index its schema.
//!
//! One document per table, one per column, and one per configured worked
//! example. Documents are embedded and upserted in batches; a failed batch
//! is logged and skipped so one bad batch does not lose the whole run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::AnyPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use dbninja_core::embedding::Embedder;
use dbninja_core::index::memory::InMemoryIndex;
use dbninja_core::models::{ColumnFields, DocBody, ExampleFields, IndexedDoc, TableFields};

use crate::config::{Config, ExampleConfig, IngestConfig, TargetDbConfig};
use crate::db::{self, Backend};
use crate::embedding::HttpEmbedder;
use crate::qdrant::QdrantIndex;

/// Namespace for document ids. Ids are UUID v5 over a path naming the schema
/// object, so re-ingesting the same schema overwrites points instead of
/// adding copies.
const DOC_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1d_2c3e_8a4b_4e5f_9c07_d1b2_a3e4_f5a6);

fn doc_id(path: &str) -> String {
    Uuid::new_v5(&DOC_ID_NAMESPACE, path.as_bytes()).to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub row_count: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub tables: usize,
    pub columns: usize,
    pub examples: usize,
    pub failed_batches: usize,
}

/// Destination for embedded documents.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn upsert_batch(&self, docs: &[IndexedDoc], vectors: &[Vec<f32>]) -> Result<()>;
}

#[async_trait]
impl DocumentSink for QdrantIndex {
    async fn upsert_batch(&self, docs: &[IndexedDoc], vectors: &[Vec<f32>]) -> Result<()> {
        self.upsert(docs, vectors).await
    }
}

#[async_trait]
impl DocumentSink for InMemoryIndex {
    async fn upsert_batch(&self, docs: &[IndexedDoc], vectors: &[Vec<f32>]) -> Result<()> {
        for (doc, vector) in docs.iter().zip(vectors) {
            self.upsert(doc.clone(), vector.clone());
        }
        Ok(())
    }
}

/// Full ingestion run against the configured database, gateway and Qdrant.
pub async fn run_ingest(config: &Config) -> Result<IngestSummary> {
    let pool = db::connect(&config.target_db).await?;
    let backend = Backend::from_url(&config.target_db.url);
    let tables = introspect(&pool, backend, &config.target_db.schema).await?;
    pool.close().await;

    let docs = build_documents(&config.target_db, &config.ingest, &tables);

    let index = QdrantIndex::new(&config.qdrant)?;
    index.ensure_collection().await?;
    let embedder = HttpEmbedder::new(&config.api)?;

    let failed_batches = index_documents(&embedder, &index, &docs, config.ingest.batch_size).await;

    let summary = IngestSummary {
        tables: tables.len(),
        columns: tables.iter().map(|t| t.columns.len()).sum(),
        examples: config.ingest.examples.len(),
        failed_batches,
    };
    info!(
        tables = summary.tables,
        columns = summary.columns,
        examples = summary.examples,
        failed_batches = summary.failed_batches,
        "schema ingestion finished"
    );
    Ok(summary)
}

/// Read tables, columns and row counts for `schema`.
pub async fn introspect(pool: &AnyPool, backend: Backend, schema: &str) -> Result<Vec<TableInfo>> {
    let table_names: Vec<(String,)> = sqlx::query_as(&tables_sql(backend, schema))
        .fetch_all(pool)
        .await
        .with_context(|| format!("Failed to list tables of schema {}", schema))?;

    let mut tables = Vec::with_capacity(table_names.len());
    for (name,) in table_names {
        info!(table = %name, "introspecting table");

        let rows: Vec<(String, String, String)> =
            sqlx::query_as(&columns_sql(backend, schema, &name))
                .fetch_all(pool)
                .await
                .with_context(|| format!("Failed to list columns of {}.{}", schema, name))?;
        let columns = rows
            .into_iter()
            .map(|(name, data_type, nullable)| ColumnInfo {
                name,
                data_type,
                nullable: nullable.eq_ignore_ascii_case("YES"),
            })
            .collect();

        let row_count = match sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM {}",
            qualified_table(backend, schema, &name)
        ))
        .fetch_one(pool)
        .await
        {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(table = %name, error = %e, "could not fetch row count");
                None
            }
        };

        tables.push(TableInfo {
            name,
            columns,
            row_count,
        });
    }
    Ok(tables)
}

// information_schema columns are identifier domain types on Postgres;
// CONCAT(x, '') yields plain text on every backend the Any driver decodes.
fn tables_sql(backend: Backend, schema: &str) -> String {
    match backend {
        Backend::Sqlite => "SELECT name FROM sqlite_master \
                            WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
            .to_string(),
        Backend::MySql | Backend::Postgres => format!(
            "SELECT CONCAT(table_name, '') FROM information_schema.tables \
             WHERE table_schema = {} AND table_type = 'BASE TABLE' ORDER BY table_name",
            quote_literal(schema)
        ),
    }
}

fn columns_sql(backend: Backend, schema: &str, table: &str) -> String {
    match backend {
        Backend::Sqlite => format!(
            "SELECT name, type, CASE WHEN \"notnull\" = 0 THEN 'YES' ELSE 'NO' END \
             FROM pragma_table_info({}) ORDER BY cid",
            quote_literal(table)
        ),
        Backend::MySql | Backend::Postgres => format!(
            "SELECT CONCAT(column_name, ''), CONCAT(data_type, ''), CONCAT(is_nullable, '') \
             FROM information_schema.columns \
             WHERE table_schema = {} AND table_name = {} ORDER BY ordinal_position",
            quote_literal(schema),
            quote_literal(table)
        ),
    }
}

fn qualified_table(backend: Backend, schema: &str, table: &str) -> String {
    match backend {
        Backend::Sqlite => format!("\"{}\"", table.replace('"', "\"\"")),
        Backend::MySql => format!(
            "`{}`.`{}`",
            schema.replace('`', "``"),
            table.replace('`', "``")
        ),
        Backend::Postgres => format!(
            "\"{}\".\"{}\"",
            schema.replace('"', "\"\""),
            table.replace('"', "\"\"")
        ),
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Build every document for one ingestion run, stamped with one timestamp.
pub fn build_documents(
    target: &TargetDbConfig,
    ingest: &IngestConfig,
    tables: &[TableInfo],
) -> Vec<IndexedDoc> {
    let stamp = Utc::now().to_rfc3339();
    let mut docs = Vec::new();

    for table in tables {
        let key = table.name.to_uppercase();
        let description = ingest.table_descriptions.get(&key).map(String::as_str);
        let mut doc = table_doc(&target.db_name, &target.schema, table, description);
        doc.popularity = ingest.popularity;
        doc.last_updated = Some(stamp.clone());
        docs.push(doc);

        for column in &table.columns {
            let description = ingest
                .descriptions
                .get(&key)
                .and_then(|cols| cols.get(&column.name))
                .map(String::as_str);
            let mut doc = column_doc(&target.db_name, &target.schema, &table.name, column, description);
            doc.popularity = ingest.popularity;
            doc.last_updated = Some(stamp.clone());
            docs.push(doc);
        }
    }

    for example in &ingest.examples {
        let mut doc = example_doc(&target.schema, example);
        doc.popularity = ingest.popularity;
        doc.last_updated = Some(stamp.clone());
        docs.push(doc);
    }

    docs
}

pub fn table_doc(db_name: &str, schema: &str, table: &TableInfo, description: Option<&str>) -> IndexedDoc {
    let rows = table
        .row_count
        .map(|n| format!("Rows: {}", n))
        .unwrap_or_default();
    let tags: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();

    IndexedDoc {
        id: doc_id(&format!("table:{}/{}/{}", db_name, schema, table.name)),
        title: format!("{}.{}", schema, table.name),
        doc_text: format!(
            "TABLE {}.{}\n{}\n{}\nTAGS: {}",
            schema,
            table.name,
            description.unwrap_or(""),
            rows,
            tags.join(", ")
        ),
        keywords: vec![schema.to_string(), table.name.clone()],
        popularity: dbninja_core::models::DEFAULT_POPULARITY,
        last_updated: None,
        body: DocBody::Table(TableFields {
            db_name: db_name.to_string(),
            schema_name: schema.to_string(),
            table_name: table.name.clone(),
            row_count: table.row_count,
        }),
    }
}

pub fn column_doc(
    db_name: &str,
    schema: &str,
    table: &str,
    column: &ColumnInfo,
    description: Option<&str>,
) -> IndexedDoc {
    let nullability = if column.nullable { "NULLABLE" } else { "NOT NULL" };
    let underscored = column.name.replace(' ', "_");

    IndexedDoc {
        id: doc_id(&format!("column:{}/{}/{}/{}", db_name, schema, table, column.name)),
        title: format!("{}.{}.{}", schema, table, column.name),
        doc_text: format!(
            "COLUMN {}.{}.{}\nType: {} {}\n{}",
            schema,
            table,
            column.name,
            column.data_type,
            nullability,
            description.unwrap_or("")
        ),
        keywords: vec![
            schema.to_string(),
            table.to_string(),
            column.name.clone(),
            underscored.clone(),
            underscored.to_lowercase(),
        ],
        popularity: dbninja_core::models::DEFAULT_POPULARITY,
        last_updated: None,
        body: DocBody::Column(ColumnFields {
            db_name: db_name.to_string(),
            schema_name: schema.to_string(),
            table_name: table.to_lowercase(),
            column_name: column.name.to_lowercase(),
            data_type: column.data_type.clone(),
            nullable: column.nullable,
        }),
    }
}

pub fn example_doc(schema: &str, example: &ExampleConfig) -> IndexedDoc {
    IndexedDoc {
        id: doc_id(&format!("example:{}/{}", schema, example.question)),
        title: example.question.clone(),
        doc_text: format!("EXAMPLE\nQuestion: {}\nSQL:\n{}", example.question, example.sql),
        keywords: example.table.iter().cloned().collect(),
        popularity: dbninja_core::models::DEFAULT_POPULARITY,
        last_updated: None,
        body: DocBody::Example(ExampleFields {
            question: example.question.clone(),
            sql: example.sql.clone(),
            schema_name: Some(schema.to_string()),
            table_name: example.table.clone(),
        }),
    }
}

/// Embed and upsert `docs` in batches. Returns the number of failed batches.
pub async fn index_documents(
    embedder: &dyn Embedder,
    sink: &dyn DocumentSink,
    docs: &[IndexedDoc],
    batch_size: usize,
) -> usize {
    let total_batches = docs.len().div_ceil(batch_size.max(1));
    let mut failed = 0;

    for (i, batch) in docs.chunks(batch_size.max(1)).enumerate() {
        let texts: Vec<String> = batch.iter().map(|d| d.doc_text.clone()).collect();
        let result = match embedder.embed(&texts).await {
            Ok(vectors) => sink.upsert_batch(batch, &vectors).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => info!(batch = i + 1, total = total_batches, docs = batch.len(), "batch indexed"),
            Err(e) => {
                let message = format!("{:#}", e);
                error!(batch = i + 1, total = total_batches, error = %message, "batch failed; skipping");
                failed += 1;
            }
        }
    }

    failed
}

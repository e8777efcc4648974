//! Dry-run SQL validation against the target database.
//!
//! Each candidate is sent as `EXPLAIN {sql}`, so the database parses and
//! plans the statement without running it. A database error is a rejection
//! carrying the driver's message; any other failure (pool, connection, I/O)
//! means the validator is unavailable.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::AnyPool;

use dbninja_core::generation::SqlValidator;
use dbninja_core::models::ValidationOutcome;

pub struct ExplainValidator {
    pool: AnyPool,
}

impl ExplainValidator {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SqlValidator for ExplainValidator {
    async fn dry_run(&self, sql: &str) -> Result<ValidationOutcome> {
        let statement = sql.trim().trim_end_matches(';').trim_end();
        if statement.is_empty() {
            return Ok(ValidationOutcome::rejected("empty SQL"));
        }

        match sqlx::query(&format!("EXPLAIN {}", statement))
            .execute(&self.pool)
            .await
        {
            Ok(_) => Ok(ValidationOutcome::accepted()),
            Err(sqlx::Error::Database(e)) => Ok(ValidationOutcome::rejected(e.message())),
            Err(e) => Err(anyhow::Error::new(e).context("dry run could not reach the target database")),
        }
    }
}

//! Bounded generate → validate → correct loop.
//!
//! ```text
//!  Drafting ──▶ Validating ──accept──▶ Accepted
//!                 ▲     │
//!                 │   reject (corrections left)
//!                 │     ▼
//!               Correcting           reject (ceiling reached) ──▶ Exhausted
//! ```
//!
//! Attempt #0 is drafted from the question, the ranked context and the
//! worked examples. Each rejection feeds the validator's diagnostic back to
//! the generator for one corrected attempt, up to `max_corrections` times.
//! The loop is strictly sequential: every attempt depends on the previous
//! verdict.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::DbNinjaError;
use crate::models::{FusedResult, GenerationAttempt, IndexedDoc, ValidationOutcome};

/// Fed back to the generator when a rejection carries no diagnostic.
pub const MISSING_DIAGNOSTIC: &str = "validation failed without a diagnostic";

/// Everything the generator sees for one question.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub question: &'a str,
    /// Target SQL dialect tag (e.g. `"postgres"`, `"mysql"`).
    pub dialect: &'a str,
    /// Ranked schema context, already capped at top-K.
    pub context: &'a [FusedResult],
    /// Worked examples, at most three.
    pub examples: &'a [IndexedDoc],
}

/// SQL generator backend (an LLM in production).
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate(&self, req: &GenerationRequest<'_>) -> anyhow::Result<String>;

    /// Regenerate with the previous attempt's diagnostic as corrective guidance.
    async fn generate_with_correction(
        &self,
        req: &GenerationRequest<'_>,
        prior_error: &str,
    ) -> anyhow::Result<String>;
}

/// Dry-run SQL validator.
///
/// `Ok` with a rejected outcome means the SQL is wrong; `Err` means the
/// validator itself could not be reached.
#[async_trait]
pub trait SqlValidator: Send + Sync {
    async fn dry_run(&self, sql: &str) -> anyhow::Result<ValidationOutcome>;
}

/// Loop states. `Accepted` and `Exhausted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Drafting,
    Validating,
    Correcting,
    Accepted,
    Exhausted,
}

/// What reaching the correction ceiling means for the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Return the last attempt's SQL, unvalidated, in state `Exhausted`.
    #[default]
    BestEffort,
    /// Fail with [`DbNinjaError::ExhaustedRetries`].
    Fail,
}

#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Correction rounds after the first draft. `0` never corrects.
    pub max_corrections: usize,
    pub on_exhausted: ExhaustionPolicy,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_corrections: 1,
            on_exhausted: ExhaustionPolicy::BestEffort,
        }
    }
}

/// Terminal result of a loop run.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    /// SQL of the last attempt.
    pub sql: String,
    /// `Accepted` or `Exhausted`.
    pub state: LoopState,
    pub attempts: Vec<GenerationAttempt>,
}

enum Step {
    Drafting,
    Validating {
        sql: String,
        prior_error: Option<String>,
    },
    Correcting {
        diagnostic: String,
    },
}

impl Step {
    fn state(&self) -> LoopState {
        match self {
            Step::Drafting => LoopState::Drafting,
            Step::Validating { .. } => LoopState::Validating,
            Step::Correcting { .. } => LoopState::Correcting,
        }
    }
}

pub struct GenerationLoop<'a> {
    generator: &'a dyn SqlGenerator,
    validator: &'a dyn SqlValidator,
    params: GenerationParams,
}

impl<'a> GenerationLoop<'a> {
    pub fn new(
        generator: &'a dyn SqlGenerator,
        validator: &'a dyn SqlValidator,
        params: GenerationParams,
    ) -> Self {
        Self {
            generator,
            validator,
            params,
        }
    }

    /// Drive the loop to a terminal state.
    ///
    /// Generator and validator transport failures abort immediately.
    pub async fn run(&self, req: &GenerationRequest<'_>) -> Result<GenerationOutcome, DbNinjaError> {
        let mut attempts: Vec<GenerationAttempt> = Vec::new();
        let mut step = Step::Drafting;

        loop {
            debug!(state = ?step.state(), attempt = attempts.len(), "generation loop");
            step = match step {
                Step::Drafting => {
                    let sql = self
                        .generator
                        .generate(req)
                        .await
                        .map_err(|e| DbNinjaError::transport("sql generator", e))?;
                    Step::Validating {
                        sql,
                        prior_error: None,
                    }
                }
                Step::Validating { sql, prior_error } => {
                    let outcome = self
                        .validator
                        .dry_run(&sql)
                        .await
                        .map_err(|e| DbNinjaError::transport("sql validator", e))?;

                    let index = attempts.len();
                    let accepted = outcome.accepted;
                    let diagnostic = outcome
                        .diagnostic
                        .clone()
                        .unwrap_or_else(|| MISSING_DIAGNOSTIC.to_string());
                    attempts.push(GenerationAttempt {
                        index,
                        sql: sql.clone(),
                        prior_error,
                        outcome,
                    });

                    if accepted {
                        debug!(attempt = index, "sql accepted");
                        return Ok(GenerationOutcome {
                            sql,
                            state: LoopState::Accepted,
                            attempts,
                        });
                    }

                    info!(attempt = index, diagnostic = %diagnostic, "sql rejected by dry run");

                    if index >= self.params.max_corrections {
                        return self.exhaust(sql, diagnostic, attempts);
                    }
                    Step::Correcting { diagnostic }
                }
                Step::Correcting { diagnostic } => {
                    let sql = self
                        .generator
                        .generate_with_correction(req, &diagnostic)
                        .await
                        .map_err(|e| DbNinjaError::transport("sql generator", e))?;
                    Step::Validating {
                        sql,
                        prior_error: Some(diagnostic),
                    }
                }
            };
        }
    }

    fn exhaust(
        &self,
        sql: String,
        diagnostic: String,
        attempts: Vec<GenerationAttempt>,
    ) -> Result<GenerationOutcome, DbNinjaError> {
        match self.params.on_exhausted {
            ExhaustionPolicy::BestEffort => {
                info!(
                    attempts = attempts.len(),
                    "correction ceiling reached; returning last attempt unvalidated"
                );
                Ok(GenerationOutcome {
                    sql,
                    state: LoopState::Exhausted,
                    attempts,
                })
            }
            ExhaustionPolicy::Fail => Err(DbNinjaError::ExhaustedRetries {
                attempts: attempts.len(),
                sql,
                diagnostic,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Generator that replays scripted SQL and records every call.
    struct ScriptedGenerator {
        replies: Mutex<VecDeque<String>>,
        corrections: Mutex<Vec<String>>,
        drafts: Mutex<usize>,
    }

    impl ScriptedGenerator {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
                corrections: Mutex::new(Vec::new()),
                drafts: Mutex::new(0),
            }
        }

        fn next(&self) -> anyhow::Result<String> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }
    }

    #[async_trait]
    impl SqlGenerator for ScriptedGenerator {
        async fn generate(&self, _req: &GenerationRequest<'_>) -> anyhow::Result<String> {
            *self.drafts.lock().unwrap() += 1;
            self.next()
        }

        async fn generate_with_correction(
            &self,
            _req: &GenerationRequest<'_>,
            prior_error: &str,
        ) -> anyhow::Result<String> {
            self.corrections
                .lock()
                .unwrap()
                .push(prior_error.to_string());
            self.next()
        }
    }

    /// Validator that replays scripted verdicts.
    struct ScriptedValidator {
        verdicts: Mutex<VecDeque<ValidationOutcome>>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedValidator {
        fn new(verdicts: Vec<ValidationOutcome>) -> Self {
            Self {
                verdicts: Mutex::new(verdicts.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SqlValidator for ScriptedValidator {
        async fn dry_run(&self, sql: &str) -> anyhow::Result<ValidationOutcome> {
            self.seen.lock().unwrap().push(sql.to_string());
            self.verdicts
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no verdict scripted"))
        }
    }

    struct DownValidator;

    #[async_trait]
    impl SqlValidator for DownValidator {
        async fn dry_run(&self, _sql: &str) -> anyhow::Result<ValidationOutcome> {
            anyhow::bail!("connection refused")
        }
    }

    fn request() -> GenerationRequest<'static> {
        GenerationRequest {
            question: "How many active trades?",
            dialect: "mysql",
            context: &[],
            examples: &[],
        }
    }

    #[tokio::test]
    async fn test_first_attempt_accepted() {
        let generator = ScriptedGenerator::new(&["SELECT 1"]);
        let validator = ScriptedValidator::new(vec![ValidationOutcome::accepted()]);
        let lp = GenerationLoop::new(&generator, &validator, GenerationParams::default());

        let out = lp.run(&request()).await.unwrap();
        assert_eq!(out.state, LoopState::Accepted);
        assert_eq!(out.sql, "SELECT 1");
        assert_eq!(out.attempts.len(), 1);
        assert!(out.attempts[0].prior_error.is_none());
        assert!(generator.corrections.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejection_then_corrected_attempt_accepted() {
        let generator = ScriptedGenerator::new(&["SELECT X FROM trades", "SELECT id FROM trades"]);
        let validator = ScriptedValidator::new(vec![
            ValidationOutcome::rejected("unknown column X"),
            ValidationOutcome::accepted(),
        ]);
        let lp = GenerationLoop::new(&generator, &validator, GenerationParams::default());

        let out = lp.run(&request()).await.unwrap();
        assert_eq!(out.state, LoopState::Accepted);
        assert_eq!(out.sql, "SELECT id FROM trades");
        assert_eq!(out.attempts.len(), 2);
        assert_eq!(out.attempts[1].index, 1);
        assert_eq!(out.attempts[1].prior_error.as_deref(), Some("unknown column X"));
        assert_eq!(
            *generator.corrections.lock().unwrap(),
            vec!["unknown column X".to_string()]
        );
        assert_eq!(
            *validator.seen.lock().unwrap(),
            vec!["SELECT X FROM trades".to_string(), "SELECT id FROM trades".to_string()]
        );
    }

    #[tokio::test]
    async fn test_both_rejected_returns_last_attempt_exhausted() {
        let generator = ScriptedGenerator::new(&["SELECT a", "SELECT b"]);
        let validator = ScriptedValidator::new(vec![
            ValidationOutcome::rejected("bad a"),
            ValidationOutcome::rejected("bad b"),
        ]);
        let lp = GenerationLoop::new(&generator, &validator, GenerationParams::default());

        let out = lp.run(&request()).await.unwrap();
        assert_eq!(out.state, LoopState::Exhausted);
        assert_eq!(out.sql, "SELECT b");
        assert_eq!(out.attempts.len(), 2);
        assert_eq!(*generator.drafts.lock().unwrap(), 1);
        assert_eq!(generator.corrections.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_ceiling_never_corrects() {
        let generator = ScriptedGenerator::new(&["SELECT a"]);
        let validator = ScriptedValidator::new(vec![ValidationOutcome::rejected("bad")]);
        let params = GenerationParams {
            max_corrections: 0,
            ..Default::default()
        };
        let lp = GenerationLoop::new(&generator, &validator, params);

        let out = lp.run(&request()).await.unwrap();
        assert_eq!(out.state, LoopState::Exhausted);
        assert_eq!(out.sql, "SELECT a");
        assert!(generator.corrections.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_configured_ceiling_chains_diagnostics() {
        let generator = ScriptedGenerator::new(&["q0", "q1", "q2", "q3"]);
        let validator = ScriptedValidator::new(vec![
            ValidationOutcome::rejected("e0"),
            ValidationOutcome::rejected("e1"),
            ValidationOutcome::rejected("e2"),
            ValidationOutcome::accepted(),
        ]);
        let params = GenerationParams {
            max_corrections: 3,
            ..Default::default()
        };
        let lp = GenerationLoop::new(&generator, &validator, params);

        let out = lp.run(&request()).await.unwrap();
        assert_eq!(out.state, LoopState::Accepted);
        assert_eq!(out.sql, "q3");
        assert_eq!(
            *generator.corrections.lock().unwrap(),
            vec!["e0".to_string(), "e1".to_string(), "e2".to_string()]
        );
        let indices: Vec<usize> = out.attempts.iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fail_policy_surfaces_exhaustion() {
        let generator = ScriptedGenerator::new(&["SELECT a", "SELECT b"]);
        let validator = ScriptedValidator::new(vec![
            ValidationOutcome::rejected("bad a"),
            ValidationOutcome::rejected("bad b"),
        ]);
        let params = GenerationParams {
            max_corrections: 1,
            on_exhausted: ExhaustionPolicy::Fail,
        };
        let lp = GenerationLoop::new(&generator, &validator, params);

        match lp.run(&request()).await.unwrap_err() {
            DbNinjaError::ExhaustedRetries {
                attempts,
                sql,
                diagnostic,
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(sql, "SELECT b");
                assert_eq!(diagnostic, "bad b");
            }
            other => panic!("expected ExhaustedRetries, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_diagnostic_gets_placeholder() {
        let generator = ScriptedGenerator::new(&["SELECT a", "SELECT b"]);
        let validator = ScriptedValidator::new(vec![
            ValidationOutcome {
                accepted: false,
                diagnostic: None,
            },
            ValidationOutcome::accepted(),
        ]);
        let lp = GenerationLoop::new(&generator, &validator, GenerationParams::default());

        lp.run(&request()).await.unwrap();
        assert_eq!(
            *generator.corrections.lock().unwrap(),
            vec![MISSING_DIAGNOSTIC.to_string()]
        );
    }

    #[tokio::test]
    async fn test_validator_transport_failure_propagates() {
        let generator = ScriptedGenerator::new(&["SELECT 1"]);
        let lp = GenerationLoop::new(&generator, &DownValidator, GenerationParams::default());
        let err = lp.run(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            DbNinjaError::Transport {
                collaborator: "sql validator",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_generator_failure_propagates() {
        let generator = ScriptedGenerator::new(&[]);
        let validator = ScriptedValidator::new(vec![]);
        let lp = GenerationLoop::new(&generator, &validator, GenerationParams::default());
        let err = lp.run(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            DbNinjaError::Transport {
                collaborator: "sql generator",
                ..
            }
        ));
    }
}

//! Persistence: distillation records and the Store collaborator.
//!
//! The pipeline treats the store as a best-effort external collaborator:
//! every write failure is caught by the caller, counted, and processing
//! continues with the record held only in memory. [`SqliteStore`] is the
//! production implementation (dedicated database file, embedded schema, WAL);
//! [`MemoryStore`] backs tests and in-process embedding.

use crate::step::Step;
use crate::HindsightError;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use uuid::Uuid;

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

/// Evidence sample cap on a distillation's source step list.
pub const MAX_SOURCE_STEPS: usize = 10;

// ---------------------------------------------------------------------------
// Distillation record
// ---------------------------------------------------------------------------

/// The four distillation archetypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistillationType {
    Heuristic,
    AntiPattern,
    SharpEdge,
    Policy,
}

impl std::fmt::Display for DistillationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Heuristic => write!(f, "heuristic"),
            Self::AntiPattern => write!(f, "anti_pattern"),
            Self::SharpEdge => write!(f, "sharp_edge"),
            Self::Policy => write!(f, "policy"),
        }
    }
}

impl std::str::FromStr for DistillationType {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "heuristic" => Ok(Self::Heuristic),
            "anti_pattern" => Ok(Self::AntiPattern),
            "sharp_edge" => Ok(Self::SharpEdge),
            "policy" => Ok(Self::Policy),
            other => Err(anyhow::anyhow!("unknown distillation type: {other}")),
        }
    }
}

impl DistillationType {
    pub const ALL: [DistillationType; 4] = [
        Self::Heuristic,
        Self::AntiPattern,
        Self::SharpEdge,
        Self::Policy,
    ];
}

/// A generalized, reusable rule synthesized from multiple resolved steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distillation {
    pub distillation_id: String,
    pub distillation_type: DistillationType,
    pub statement: String,
    pub domains: Vec<String>,
    pub triggers: Vec<String>,
    pub anti_triggers: Vec<String>,
    /// Evidence sample, capped at [`MAX_SOURCE_STEPS`].
    pub source_step_ids: Vec<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Distillation {
    pub fn new(distillation_type: DistillationType, statement: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            distillation_id: Uuid::new_v4().to_string(),
            distillation_type,
            statement: statement.into(),
            domains: Vec::new(),
            triggers: Vec::new(),
            anti_triggers: Vec::new(),
            source_step_ids: Vec::new(),
            confidence: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold a merged candidate's sources into this record and recompute
    /// confidence from the enlarged population: the dampened
    /// approach-to-ceiling nudge, so confidence grows quickly at first and
    /// slows near 1.0.
    pub fn absorb(&mut self, candidate_confidence: f64, candidate_source_ids: &[String]) {
        for source_id in candidate_source_ids {
            if self.source_step_ids.len() >= MAX_SOURCE_STEPS {
                break;
            }
            if !self.source_step_ids.contains(source_id) {
                self.source_step_ids.push(source_id.clone());
            }
        }
        let base = self.confidence.max(candidate_confidence);
        self.confidence = base + (1.0 - base) * 0.1;
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Append-only persistence collaborator for steps and distillations.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_step(&self, step: &Step) -> Result<(), HindsightError>;

    async fn save_distillation(&self, distillation: &Distillation) -> Result<(), HindsightError>;

    /// Overwrite an existing distillation after a merge (confidence and
    /// statement refresh).
    async fn update_distillation(&self, distillation: &Distillation)
        -> Result<(), HindsightError>;

    async fn get_distillations_by_type(
        &self,
        distillation_type: DistillationType,
    ) -> Result<Vec<Distillation>, HindsightError>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS steps (
    step_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    episode_id TEXT NOT NULL DEFAULT '',
    intent TEXT NOT NULL DEFAULT '',
    decision TEXT NOT NULL DEFAULT '',
    action_details TEXT NOT NULL DEFAULT '{}',
    tool_used TEXT,
    prediction TEXT NOT NULL DEFAULT '',
    result TEXT NOT NULL DEFAULT '',
    evaluation TEXT NOT NULL DEFAULT 'UNKNOWN',
    lesson TEXT,
    confidence_before REAL NOT NULL DEFAULT 0,
    confidence_after REAL NOT NULL DEFAULT 0,
    surprise_level REAL NOT NULL DEFAULT 0,
    progress_made INTEGER NOT NULL DEFAULT 0,
    validated INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    resolved_at TEXT
);

CREATE TABLE IF NOT EXISTS distillations (
    distillation_id TEXT PRIMARY KEY,
    distillation_type TEXT NOT NULL,
    statement TEXT NOT NULL,
    domains TEXT NOT NULL DEFAULT '[]',
    triggers TEXT NOT NULL DEFAULT '[]',
    anti_triggers TEXT NOT NULL DEFAULT '[]',
    source_step_ids TEXT NOT NULL DEFAULT '[]',
    confidence REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_steps_session ON steps(session_id);
CREATE INDEX IF NOT EXISTS idx_distillations_type ON distillations(distillation_type);
"#;

/// SQLite-backed store with an embedded schema.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to (or create) the database at the given path.
    ///
    /// Enables WAL mode and keeps the pool small: one writer is plenty for
    /// an append-mostly learning database.
    pub async fn connect(path: &Path) -> Result<Self, HindsightError> {
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|error| HindsightError::Other(anyhow::anyhow!("invalid db path: {error}")))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA_V1).execute(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn save_step(&self, step: &Step) -> Result<(), HindsightError> {
        let action_details = serde_json::Value::Object(step.action_details.clone()).to_string();
        sqlx::query(
            "INSERT OR REPLACE INTO steps (
                step_id, session_id, episode_id, intent, decision, action_details,
                tool_used, prediction, result, evaluation, lesson,
                confidence_before, confidence_after, surprise_level,
                progress_made, validated, created_at, resolved_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&step.step_id)
        .bind(&step.session_id)
        .bind(&step.episode_id)
        .bind(&step.intent)
        .bind(&step.decision)
        .bind(&action_details)
        .bind(&step.tool_used)
        .bind(&step.prediction)
        .bind(&step.result)
        .bind(step.evaluation.to_string())
        .bind(&step.lesson)
        .bind(step.confidence_before)
        .bind(step.confidence_after)
        .bind(step.surprise_level)
        .bind(step.progress_made)
        .bind(step.validated)
        .bind(step.created_at.to_rfc3339())
        .bind(step.resolved_at.map(|timestamp| timestamp.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_distillation(&self, distillation: &Distillation) -> Result<(), HindsightError> {
        sqlx::query(
            "INSERT INTO distillations (
                distillation_id, distillation_type, statement, domains,
                triggers, anti_triggers, source_step_ids, confidence,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&distillation.distillation_id)
        .bind(distillation.distillation_type.to_string())
        .bind(&distillation.statement)
        .bind(serde_json::to_string(&distillation.domains).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&distillation.triggers).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&distillation.anti_triggers).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&distillation.source_step_ids).unwrap_or_else(|_| "[]".into()))
        .bind(distillation.confidence)
        .bind(distillation.created_at.to_rfc3339())
        .bind(distillation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_distillation(
        &self,
        distillation: &Distillation,
    ) -> Result<(), HindsightError> {
        sqlx::query(
            "UPDATE distillations SET statement = ?, confidence = ?, source_step_ids = ?,
             updated_at = ? WHERE distillation_id = ?",
        )
        .bind(&distillation.statement)
        .bind(distillation.confidence)
        .bind(serde_json::to_string(&distillation.source_step_ids).unwrap_or_else(|_| "[]".into()))
        .bind(distillation.updated_at.to_rfc3339())
        .bind(&distillation.distillation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_distillations_by_type(
        &self,
        distillation_type: DistillationType,
    ) -> Result<Vec<Distillation>, HindsightError> {
        let rows: Vec<(String, String, String, String, String, String, String, f64, String, String)> =
            sqlx::query_as(
                "SELECT distillation_id, distillation_type, statement, domains,
                        triggers, anti_triggers, source_step_ids, confidence,
                        created_at, updated_at
                 FROM distillations
                 WHERE distillation_type = ?
                 ORDER BY confidence DESC",
            )
            .bind(distillation_type.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut distillations = Vec::with_capacity(rows.len());
        for row in rows {
            let (
                distillation_id,
                type_string,
                statement,
                domains_json,
                triggers_json,
                anti_triggers_json,
                source_ids_json,
                confidence,
                created_at,
                updated_at,
            ) = row;

            distillations.push(Distillation {
                distillation_id,
                distillation_type: type_string.parse()?,
                statement,
                domains: serde_json::from_str(&domains_json).unwrap_or_default(),
                triggers: serde_json::from_str(&triggers_json).unwrap_or_default(),
                anti_triggers: serde_json::from_str(&anti_triggers_json).unwrap_or_default(),
                source_step_ids: serde_json::from_str(&source_ids_json).unwrap_or_default(),
                confidence,
                created_at: parse_timestamp(&created_at),
                updated_at: parse_timestamp(&updated_at),
            });
        }

        Ok(distillations)
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// In-memory store for tests and hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    steps: Mutex<Vec<Step>>,
    distillations: Mutex<HashMap<String, Distillation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step_count(&self) -> usize {
        self.steps.lock().expect("steps lock").len()
    }

    pub fn distillation_count(&self) -> usize {
        self.distillations.lock().expect("distillations lock").len()
    }

    pub fn all_distillations(&self) -> Vec<Distillation> {
        self.distillations
            .lock()
            .expect("distillations lock")
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_step(&self, step: &Step) -> Result<(), HindsightError> {
        self.steps.lock().expect("steps lock").push(step.clone());
        Ok(())
    }

    async fn save_distillation(&self, distillation: &Distillation) -> Result<(), HindsightError> {
        self.distillations
            .lock()
            .expect("distillations lock")
            .insert(distillation.distillation_id.clone(), distillation.clone());
        Ok(())
    }

    async fn update_distillation(
        &self,
        distillation: &Distillation,
    ) -> Result<(), HindsightError> {
        self.distillations
            .lock()
            .expect("distillations lock")
            .insert(distillation.distillation_id.clone(), distillation.clone());
        Ok(())
    }

    async fn get_distillations_by_type(
        &self,
        distillation_type: DistillationType,
    ) -> Result<Vec<Distillation>, HindsightError> {
        Ok(self
            .distillations
            .lock()
            .expect("distillations lock")
            .values()
            .filter(|distillation| distillation.distillation_type == distillation_type)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{Evaluation, Step};

    #[tokio::test]
    async fn test_sqlite_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::connect(&dir.path().join("hindsight.db"))
            .await
            .expect("connect");

        let mut step = Step::open("s1", "e1", "fix the login bug");
        step.resolve(Evaluation::Pass, "tests green", Some("token refresh was stale"));
        store.save_step(&step).await.expect("save step");

        let mut distillation =
            Distillation::new(DistillationType::Heuristic, "Restart the token service first");
        distillation.confidence = 0.7;
        distillation.triggers = vec!["token".into()];
        distillation.source_step_ids = vec![step.step_id.clone()];
        store
            .save_distillation(&distillation)
            .await
            .expect("save distillation");

        let loaded = store
            .get_distillations_by_type(DistillationType::Heuristic)
            .await
            .expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].statement, "Restart the token service first");
        assert_eq!(loaded[0].triggers, vec!["token".to_owned()]);
        assert!((loaded[0].confidence - 0.7).abs() < 1e-9);

        let empty = store
            .get_distillations_by_type(DistillationType::Policy)
            .await
            .expect("load empty");
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_update_distillation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::connect(&dir.path().join("hindsight.db"))
            .await
            .expect("connect");

        let mut distillation =
            Distillation::new(DistillationType::SharpEdge, "Watch out for locale cache keys");
        distillation.confidence = 0.4;
        store.save_distillation(&distillation).await.unwrap();

        distillation.absorb(0.6, &["step-a".to_owned()]);
        store.update_distillation(&distillation).await.unwrap();

        let loaded = store
            .get_distillations_by_type(DistillationType::SharpEdge)
            .await
            .unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].confidence > 0.6);
        assert_eq!(loaded[0].source_step_ids, vec!["step-a".to_owned()]);
    }

    #[test]
    fn test_absorb_caps_source_sample_and_recomputes_confidence() {
        let mut distillation = Distillation::new(DistillationType::Policy, "Policy: run migrations in order");
        distillation.confidence = 0.5;
        distillation.source_step_ids = (0..MAX_SOURCE_STEPS).map(|index| format!("id-{index}")).collect();

        distillation.absorb(0.8, &["extra".to_owned()]);
        assert_eq!(distillation.source_step_ids.len(), MAX_SOURCE_STEPS);
        assert!((distillation.confidence - (0.8 + 0.2 * 0.1)).abs() < 1e-9);
    }
}

//! Durable SQLite-backed store: runs, agent results, quality results,
//! phase progress, and the append-only run-event log.
//!
//! Migrations are numbered, idempotent SQL batches tracked in a
//! `schema_version` table, applied the way `descartes-core`'s
//! `SqliteStateStore::apply_migrations` tracks its own `migrations` table.

pub mod models;

use std::path::Path;
use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

use crate::{Error, Result};

pub use models::{
    AgentResultRow, PhaseProgressRow, QualityResultRow, Role, ResultType, Run, RunCommand,
    RunEventRow, RunStatus,
};

/// Highest schema version this binary understands. A database already
/// migrated past this version is refused rather than silently misread.
const BINARY_SCHEMA_VERSION: i64 = 1;

type Migration = (i64, &'static str, &'static [&'static str]);

fn migrations() -> Vec<Migration> {
    vec![(
        1,
        "create_core_tables",
        &[
            r#"CREATE TABLE IF NOT EXISTS plans (
                plan_path TEXT PRIMARY KEY NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY NOT NULL,
                plan_path TEXT NOT NULL,
                command TEXT NOT NULL,
                status TEXT NOT NULL,
                current_phase TEXT,
                current_state TEXT,
                review_path TEXT,
                started_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
            r#"CREATE INDEX IF NOT EXISTS idx_runs_plan_command_status
                ON runs(plan_path, command, status)"#,
            r#"CREATE TABLE IF NOT EXISTS agent_results (
                id TEXT PRIMARY KEY NOT NULL,
                run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                phase TEXT NOT NULL,
                iteration INTEGER NOT NULL,
                role TEXT NOT NULL,
                template TEXT NOT NULL,
                result_type TEXT NOT NULL,
                result_json TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                log_path TEXT,
                session_id TEXT,
                model TEXT,
                tokens_in INTEGER,
                tokens_out INTEGER,
                cost_usd REAL,
                UNIQUE(run_id, phase, iteration, role, template, result_type)
            )"#,
            r#"CREATE INDEX IF NOT EXISTS idx_agent_results_run_phase
                ON agent_results(run_id, phase)"#,
            r#"CREATE TABLE IF NOT EXISTS quality_results (
                id TEXT PRIMARY KEY NOT NULL,
                run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                phase TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                passed INTEGER NOT NULL,
                results TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                UNIQUE(run_id, phase, attempt)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS run_events (
                run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                seq INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                phase TEXT,
                iteration INTEGER,
                data TEXT NOT NULL,
                ts TEXT NOT NULL,
                PRIMARY KEY(run_id, seq)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS phase_progress (
                plan_path TEXT NOT NULL,
                phase TEXT NOT NULL,
                implementation_done INTEGER NOT NULL DEFAULT 0,
                review_outcome TEXT,
                approved INTEGER NOT NULL DEFAULT 0,
                reason TEXT,
                PRIMARY KEY(plan_path, phase)
            )"#,
        ],
    )]
}

/// Durable store handle. Cheaply cloneable (wraps a `sqlx::SqlitePool`).
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if absent) the SQLite database at `db_path`, applies
    /// pending migrations, and refuses to continue if the database is ahead
    /// of what this binary understands.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let connect_options = SqliteConnectOptions::from_str(&db_path.to_string_lossy())
            .map_err(|e| Error::Config(format!("invalid database path: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect_with(connect_options)
            .await?;

        let store = Store { pool };
        store.apply_migrations().await?;
        Ok(store)
    }

    /// In-memory store for tests: same migrations, no filesystem footprint.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Store { pool };
        store.apply_migrations().await?;
        Ok(store)
    }

    async fn apply_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY NOT NULL,
                applied_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        let db_version: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
                .fetch_one(&self.pool)
                .await?;

        if db_version > BINARY_SCHEMA_VERSION {
            return Err(Error::SchemaMismatch {
                db_version,
                binary_version: BINARY_SCHEMA_VERSION,
            });
        }

        for (version, _name, statements) in migrations() {
            if version <= db_version {
                continue;
            }
            let mut tx = self.pool.begin().await?;
            for statement in statements {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }

        Ok(())
    }

    pub async fn create_run(&self, plan_path: &str, command: RunCommand) -> Result<Run> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query("INSERT OR IGNORE INTO plans (plan_path) VALUES (?)")
            .bind(plan_path)
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"INSERT INTO runs (id, plan_path, command, status, current_phase, current_state, review_path, started_at, updated_at)
               VALUES (?, ?, ?, ?, NULL, NULL, NULL, ?, ?)"#,
        )
        .bind(&id)
        .bind(plan_path)
        .bind(command.as_str())
        .bind(RunStatus::Active.as_str())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Run {
            id,
            plan_path: plan_path.to_string(),
            command,
            status: RunStatus::Active,
            current_phase: None,
            current_state: None,
            review_path: None,
            started_at: now,
            updated_at: now,
        })
    }

    pub async fn update_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        state: Option<&str>,
        phase: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE runs SET status = ?, current_state = COALESCE(?, current_state),
               current_phase = COALESCE(?, current_phase), updated_at = ? WHERE id = ?"#,
        )
        .bind(status.as_str())
        .bind(state)
        .bind(phase)
        .bind(Utc::now().to_rfc3339())
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_review_path(&self, run_id: &str, review_path: &str) -> Result<()> {
        sqlx::query("UPDATE runs SET review_path = ?, updated_at = ? WHERE id = ?")
            .bind(review_path)
            .bind(Utc::now().to_rfc3339())
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let row = sqlx::query(
            "SELECT id, plan_path, command, status, current_phase, current_state, review_path, started_at, updated_at FROM runs WHERE id = ?",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_run))
    }

    /// Returns the at-most-one active run for (plan_path, command).
    pub async fn get_active_run(&self, plan_path: &str, command: RunCommand) -> Result<Option<Run>> {
        let row = sqlx::query(
            r#"SELECT id, plan_path, command, status, current_phase, current_state, review_path, started_at, updated_at
               FROM runs WHERE plan_path = ? AND command = ? AND status = ?
               ORDER BY started_at DESC LIMIT 1"#,
        )
        .bind(plan_path)
        .bind(command.as_str())
        .bind(RunStatus::Active.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_run))
    }

    /// Idempotent on the composite key: a retry with the same key overwrites.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_agent_result(
        &self,
        run_id: &str,
        phase: &str,
        iteration: i64,
        role: Role,
        template: &str,
        result_type: ResultType,
        result_json: &str,
        duration_ms: i64,
        log_path: Option<&str>,
        session_id: Option<&str>,
        model: Option<&str>,
        tokens_in: Option<i64>,
        tokens_out: Option<i64>,
        cost_usd: Option<f64>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"INSERT INTO agent_results
                (id, run_id, phase, iteration, role, template, result_type, result_json,
                 duration_ms, log_path, session_id, model, tokens_in, tokens_out, cost_usd)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(run_id, phase, iteration, role, template, result_type) DO UPDATE SET
                 result_json = excluded.result_json,
                 duration_ms = excluded.duration_ms,
                 log_path = excluded.log_path,
                 session_id = excluded.session_id,
                 model = excluded.model,
                 tokens_in = excluded.tokens_in,
                 tokens_out = excluded.tokens_out,
                 cost_usd = excluded.cost_usd"#,
        )
        .bind(&id)
        .bind(run_id)
        .bind(phase)
        .bind(iteration)
        .bind(role.as_str())
        .bind(template)
        .bind(result_type.as_str())
        .bind(result_json)
        .bind(duration_ms)
        .bind(log_path)
        .bind(session_id)
        .bind(model)
        .bind(tokens_in)
        .bind(tokens_out)
        .bind(cost_usd)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn has_completed_step(
        &self,
        run_id: &str,
        role: Role,
        phase: &str,
        iteration: i64,
        template: &str,
        result_type: ResultType,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM agent_results
               WHERE run_id = ? AND role = ? AND phase = ? AND iteration = ? AND template = ? AND result_type = ?"#,
        )
        .bind(run_id)
        .bind(role.as_str())
        .bind(phase)
        .bind(iteration)
        .bind(template)
        .bind(result_type.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn get_step_result(
        &self,
        run_id: &str,
        role: Role,
        phase: &str,
        iteration: i64,
        template: &str,
        result_type: ResultType,
    ) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"SELECT result_json FROM agent_results
               WHERE run_id = ? AND role = ? AND phase = ? AND iteration = ? AND template = ? AND result_type = ?"#,
        )
        .bind(run_id)
        .bind(role.as_str())
        .bind(phase)
        .bind(iteration)
        .bind(template)
        .bind(result_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(json,)| json))
    }

    pub async fn get_max_iteration_for_phase(&self, run_id: &str, phase: &str) -> Result<Option<i64>> {
        let max: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(iteration) FROM agent_results WHERE run_id = ? AND phase = ?",
        )
        .bind(run_id)
        .bind(phase)
        .fetch_one(&self.pool)
        .await?;
        Ok(max)
    }

    pub async fn get_quality_attempt_count(&self, run_id: &str, phase: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM quality_results WHERE run_id = ? AND phase = ?",
        )
        .bind(run_id)
        .bind(phase)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn record_quality_result(
        &self,
        run_id: &str,
        phase: &str,
        attempt: i64,
        passed: bool,
        results_json: &str,
        duration_ms: i64,
    ) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"INSERT INTO quality_results (id, run_id, phase, attempt, passed, results, duration_ms)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(run_id, phase, attempt) DO UPDATE SET
                 passed = excluded.passed, results = excluded.results, duration_ms = excluded.duration_ms"#,
        )
        .bind(&id)
        .bind(run_id)
        .bind(phase)
        .bind(attempt)
        .bind(passed as i64)
        .bind(results_json)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Appends one event with `seq = MAX(seq)+1` under the same connection,
    /// serialized through a transaction so concurrent appenders within the
    /// process cannot collide on `seq`.
    pub async fn append_run_event(
        &self,
        run_id: &str,
        event_type: &str,
        phase: Option<&str>,
        iteration: Option<i64>,
        data: &serde_json::Value,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let next_seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) + 1 FROM run_events WHERE run_id = ?")
            .bind(run_id)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(
            r#"INSERT INTO run_events (run_id, seq, event_type, phase, iteration, data, ts)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run_id)
        .bind(next_seq)
        .bind(event_type)
        .bind(phase)
        .bind(iteration)
        .bind(data.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(next_seq)
    }

    pub async fn list_run_events(&self, run_id: &str) -> Result<Vec<RunEventRow>> {
        let rows = sqlx::query(
            "SELECT run_id, seq, event_type, phase, iteration, data, ts FROM run_events WHERE run_id = ? ORDER BY seq ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let data_raw: String = row.try_get("data")?;
                let ts_raw: String = row.try_get("ts")?;
                Ok(RunEventRow {
                    run_id: row.try_get("run_id")?,
                    seq: row.try_get("seq")?,
                    event_type: row.try_get("event_type")?,
                    phase: row.try_get("phase")?,
                    iteration: row.try_get("iteration")?,
                    data: serde_json::from_str(&data_raw).unwrap_or(serde_json::Value::Null),
                    ts: chrono::DateTime::parse_from_rfc3339(&ts_raw)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(Error::from)
    }

    pub async fn get_approved_phase_numbers(&self, plan_path: &str) -> Result<std::collections::HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT phase FROM phase_progress WHERE plan_path = ? AND approved = 1",
        )
        .bind(plan_path)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(p,)| p).collect())
    }

    pub async fn set_phase_review_approved(&self, plan_path: &str, phase: &str, reason: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO phase_progress (plan_path, phase, implementation_done, review_outcome, approved, reason)
               VALUES (?, ?, 1, 'ready', 1, ?)
               ON CONFLICT(plan_path, phase) DO UPDATE SET
                 approved = 1, review_outcome = 'ready', implementation_done = 1, reason = excluded.reason"#,
        )
        .bind(plan_path)
        .bind(phase)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_phase_review_outcome(&self, plan_path: &str, phase: &str, outcome: &str, reason: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO phase_progress (plan_path, phase, implementation_done, review_outcome, approved, reason)
               VALUES (?, ?, 0, ?, 0, ?)
               ON CONFLICT(plan_path, phase) DO UPDATE SET
                 review_outcome = excluded.review_outcome, reason = excluded.reason"#,
        )
        .bind(plan_path)
        .bind(phase)
        .bind(outcome)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_phase_implementation_done(&self, plan_path: &str, phase: &str) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO phase_progress (plan_path, phase, implementation_done, review_outcome, approved, reason)
               VALUES (?, ?, 1, NULL, 0, NULL)
               ON CONFLICT(plan_path, phase) DO UPDATE SET implementation_done = 1"#,
        )
        .bind(plan_path)
        .bind(phase)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_phase_progress(&self, plan_path: &str, phase: &str) -> Result<Option<PhaseProgressRow>> {
        let row = sqlx::query(
            "SELECT plan_path, phase, implementation_done, review_outcome, approved, reason FROM phase_progress WHERE plan_path = ? AND phase = ?",
        )
        .bind(plan_path)
        .bind(phase)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| PhaseProgressRow {
            plan_path: row.get("plan_path"),
            phase: row.get("phase"),
            implementation_done: row.get::<i64, _>("implementation_done") != 0,
            review_outcome: row.get("review_outcome"),
            approved: row.get::<i64, _>("approved") != 0,
            reason: row.get("reason"),
        }))
    }
}

fn row_to_run(row: sqlx::sqlite::SqliteRow) -> Run {
    let command_raw: String = row.get("command");
    let status_raw: String = row.get("status");
    let started_raw: String = row.get("started_at");
    let updated_raw: String = row.get("updated_at");
    Run {
        id: row.get("id"),
        plan_path: row.get("plan_path"),
        command: RunCommand::parse(&command_raw).unwrap_or(RunCommand::Run),
        status: RunStatus::parse(&status_raw).unwrap_or(RunStatus::Failed),
        current_phase: row.get("current_phase"),
        current_state: row.get("current_state"),
        review_path: row.get("review_path"),
        started_at: chrono::DateTime::parse_from_rfc3339(&started_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_fetch_active_run() {
        let store = Store::open_in_memory().await.unwrap();
        let run = store.create_run("/plans/x.md", RunCommand::Run).await.unwrap();
        let active = store.get_active_run("/plans/x.md", RunCommand::Run).await.unwrap();
        assert_eq!(active.unwrap().id, run.id);
    }

    #[tokio::test]
    async fn update_run_status_marks_completed() {
        let store = Store::open_in_memory().await.unwrap();
        let run = store.create_run("/plans/x.md", RunCommand::Run).await.unwrap();
        store
            .update_run_status(&run.id, RunStatus::Completed, Some("PhaseComplete"), Some("1"))
            .await
            .unwrap();
        let active = store.get_active_run("/plans/x.md", RunCommand::Run).await.unwrap();
        assert!(active.is_none());
        let fetched = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Completed);
        assert_eq!(fetched.current_state.as_deref(), Some("PhaseComplete"));
    }

    #[tokio::test]
    async fn upsert_agent_result_is_idempotent_on_composite_key() {
        let store = Store::open_in_memory().await.unwrap();
        let run = store.create_run("/plans/x.md", RunCommand::Run).await.unwrap();
        store
            .upsert_agent_result(&run.id, "1", 1, Role::Author, "author", ResultType::Status, "{}", 10, None, None, None, None, None, None)
            .await
            .unwrap();
        store
            .upsert_agent_result(&run.id, "1", 1, Role::Author, "author", ResultType::Status, "{\"x\":1}", 20, None, None, None, None, None, None)
            .await
            .unwrap();

        let has = store
            .has_completed_step(&run.id, Role::Author, "1", 1, "author", ResultType::Status)
            .await
            .unwrap();
        assert!(has);

        let json = store
            .get_step_result(&run.id, Role::Author, "1", 1, "author", ResultType::Status)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(json, "{\"x\":1}");
    }

    #[tokio::test]
    async fn run_events_are_monotonically_sequenced() {
        let store = Store::open_in_memory().await.unwrap();
        let run = store.create_run("/plans/x.md", RunCommand::Run).await.unwrap();
        let s1 = store
            .append_run_event(&run.id, "run_start", None, None, &serde_json::json!({}))
            .await
            .unwrap();
        let s2 = store
            .append_run_event(&run.id, "phase_start", Some("1"), Some(1), &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(s1, 1);
        assert_eq!(s2, 2);

        let events = store.list_run_events(&run.id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "run_start");
        assert_eq!(events[1].event_type, "phase_start");
    }

    #[tokio::test]
    async fn phase_progress_tracks_approval() {
        let store = Store::open_in_memory().await.unwrap();
        store.set_phase_review_outcome("/plans/x.md", "1", "not_ready", Some("needs work")).await.unwrap();
        let approved = store.get_approved_phase_numbers("/plans/x.md").await.unwrap();
        assert!(approved.is_empty());

        store.set_phase_review_approved("/plans/x.md", "1", None).await.unwrap();
        let approved = store.get_approved_phase_numbers("/plans/x.md").await.unwrap();
        assert!(approved.contains("1"));
    }

    #[tokio::test]
    async fn iteration_arithmetic_helpers() {
        let store = Store::open_in_memory().await.unwrap();
        let run = store.create_run("/plans/x.md", RunCommand::Run).await.unwrap();
        assert_eq!(store.get_max_iteration_for_phase(&run.id, "1").await.unwrap(), None);

        store
            .upsert_agent_result(&run.id, "1", 1, Role::Author, "author", ResultType::Status, "{}", 5, None, None, None, None, None, None)
            .await
            .unwrap();
        store
            .upsert_agent_result(&run.id, "1", 2, Role::Reviewer, "review", ResultType::Verdict, "{}", 5, None, None, None, None, None, None)
            .await
            .unwrap();

        assert_eq!(store.get_max_iteration_for_phase(&run.id, "1").await.unwrap(), Some(2));
    }
}

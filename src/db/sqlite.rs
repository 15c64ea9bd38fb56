use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use super::{
    DurableRecord, MasteryRecord, PersistenceError, QValueRecord, RecordFilter, RecordStore,
    StoreSnapshot,
};

const SCHEMA_VERSION: &str = "2";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS "_db_metadata" (
    "key" TEXT PRIMARY KEY,
    "value" TEXT NOT NULL
);

-- append-only journal of every durable record
CREATE TABLE IF NOT EXISTS "records" (
    "seq" INTEGER PRIMARY KEY AUTOINCREMENT,
    "record_id" TEXT UNIQUE,
    "kind" TEXT NOT NULL,
    "session_id" TEXT,
    "user_id" TEXT,
    "recorded_at" INTEGER NOT NULL,
    "payload" TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS "idx_records_session" ON "records" ("session_id");
CREATE INDEX IF NOT EXISTS "idx_records_user" ON "records" ("user_id");
CREATE INDEX IF NOT EXISTS "idx_records_recorded_at" ON "records" ("recorded_at");

CREATE TABLE IF NOT EXISTS "q_values" (
    "state_key" TEXT NOT NULL,
    "action_key" TEXT NOT NULL,
    "value" REAL,
    "updated_at" INTEGER NOT NULL,
    "seq" INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY ("state_key", "action_key")
);

CREATE TABLE IF NOT EXISTS "skill_mastery" (
    "user_id" TEXT NOT NULL,
    "skill_category" TEXT NOT NULL,
    "probability" REAL,
    "updated_at" INTEGER NOT NULL,
    "seq" INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY ("user_id", "skill_category")
);

CREATE TABLE IF NOT EXISTS "session_reports" (
    "session_id" TEXT PRIMARY KEY,
    "user_id" TEXT NOT NULL,
    "module_type" TEXT NOT NULL,
    "event_count" INTEGER NOT NULL,
    "closed_at" INTEGER NOT NULL,
    "payload" TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS "recalibrations" (
    "version" INTEGER PRIMARY KEY,
    "recorded_at" INTEGER NOT NULL,
    "payload" TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS "dead_letters" (
    "id" INTEGER PRIMARY KEY AUTOINCREMENT,
    "kind" TEXT NOT NULL,
    "reason" TEXT NOT NULL,
    "payload" TEXT NOT NULL,
    "created_at" INTEGER NOT NULL
)
"#;

#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Opens (creating if missing) the database at `url` and bootstraps the schema.
    pub async fn connect(url: &str) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| PersistenceError::Config(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.bootstrap().await?;
        info!(url = %url, "sqlite record store ready");
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn bootstrap(&self) -> Result<(), PersistenceError> {
        for stmt in split_statements(SCHEMA_SQL) {
            sqlx::query(&stmt).execute(&self.pool).await?;
        }

        // Schema 1 projections predate per-key sequence numbers.
        for table in ["q_values", "skill_mastery"] {
            let has_seq: i64 = sqlx::query_scalar(
                r#"SELECT COUNT(*) FROM pragma_table_info(?) WHERE "name" = 'seq'"#,
            )
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
            if has_seq == 0 {
                info!(table, "adding seq column");
                sqlx::query(&format!(
                    r#"ALTER TABLE "{table}" ADD COLUMN "seq" INTEGER NOT NULL DEFAULT 0"#
                ))
                .execute(&self.pool)
                .await?;
            }
        }

        sqlx::query(
            r#"INSERT OR REPLACE INTO "_db_metadata" ("key", "value") VALUES ('schema_version', ?)"#,
        )
        .bind(SCHEMA_VERSION)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn dead_letter_count(&self) -> Result<u64, PersistenceError> {
        let count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "dead_letters""#)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(|stmt| {
            stmt.lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|stmt| !stmt.trim().is_empty())
        .collect()
}

fn decode_payload(row: &SqliteRow) -> Result<DurableRecord, PersistenceError> {
    let raw: String = row.try_get("payload")?;
    Ok(serde_json::from_str(&raw)?)
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn append(&self, record: &DurableRecord) -> Result<(), PersistenceError> {
        let payload = serde_json::to_string(record)?;
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO "records"
                ("record_id", "kind", "session_id", "user_id", "recorded_at", "payload")
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.record_id())
        .bind(record.kind())
        .bind(record.session_id())
        .bind(record.user_id())
        .bind(record.recorded_at())
        .bind(&payload)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            debug!(kind = record.kind(), "duplicate record skipped");
            tx.commit().await?;
            return Ok(());
        }

        match record {
            DurableRecord::QValue(q) => {
                sqlx::query(
                    r#"
                    INSERT INTO "q_values" ("state_key", "action_key", "value", "updated_at", "seq")
                    VALUES (?, ?, ?, ?, ?)
                    ON CONFLICT ("state_key", "action_key")
                    DO UPDATE SET "value" = excluded."value", "updated_at" = excluded."updated_at",
                        "seq" = excluded."seq"
                    WHERE excluded."seq" > "q_values"."seq"
                    "#,
                )
                .bind(&q.state_key)
                .bind(&q.action_key)
                .bind(q.value)
                .bind(q.updated_at)
                .bind(q.seq as i64)
                .execute(&mut *tx)
                .await?;
            }
            DurableRecord::Mastery(m) => {
                sqlx::query(
                    r#"
                    INSERT INTO "skill_mastery" ("user_id", "skill_category", "probability", "updated_at", "seq")
                    VALUES (?, ?, ?, ?, ?)
                    ON CONFLICT ("user_id", "skill_category")
                    DO UPDATE SET "probability" = excluded."probability", "updated_at" = excluded."updated_at",
                        "seq" = excluded."seq"
                    WHERE excluded."seq" > "skill_mastery"."seq"
                    "#,
                )
                .bind(&m.user_id)
                .bind(&m.skill_category)
                .bind(m.probability)
                .bind(m.updated_at)
                .bind(m.seq as i64)
                .execute(&mut *tx)
                .await?;
            }
            DurableRecord::SessionClosed(report) => {
                sqlx::query(
                    r#"
                    INSERT OR REPLACE INTO "session_reports"
                        ("session_id", "user_id", "module_type", "event_count", "closed_at", "payload")
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&report.session_id)
                .bind(&report.user_id)
                .bind(report.module_type.as_str())
                .bind(report.event_count as i64)
                .bind(report.closed_at)
                .bind(serde_json::to_string(report)?)
                .execute(&mut *tx)
                .await?;
            }
            DurableRecord::Recalibration(r) => {
                sqlx::query(
                    r#"INSERT OR REPLACE INTO "recalibrations" ("version", "recorded_at", "payload") VALUES (?, ?, ?)"#,
                )
                .bind(r.params.version as i64)
                .bind(r.recorded_at)
                .bind(serde_json::to_string(&r.params)?)
                .execute(&mut *tx)
                .await?;
            }
            DurableRecord::Event(_) => {}
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<DurableRecord>, PersistenceError> {
        let rows = match filter {
            RecordFilter::Session(id) => {
                sqlx::query(r#"SELECT "payload" FROM "records" WHERE "session_id" = ? ORDER BY "seq" ASC"#)
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?
            }
            RecordFilter::User(id) => {
                sqlx::query(r#"SELECT "payload" FROM "records" WHERE "user_id" = ? ORDER BY "seq" ASC"#)
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?
            }
            RecordFilter::Since(ts) => {
                sqlx::query(
                    r#"SELECT "payload" FROM "records" WHERE "recorded_at" >= ? ORDER BY "seq" ASC"#,
                )
                .bind(*ts)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(decode_payload).collect()
    }

    async fn dead_letter(
        &self,
        record: &DurableRecord,
        reason: &str,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"INSERT INTO "dead_letters" ("kind", "reason", "payload", "created_at") VALUES (?, ?, ?, ?)"#,
        )
        .bind(record.kind())
        .bind(reason)
        .bind(serde_json::to_string(record)?)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<StoreSnapshot, PersistenceError> {
        let q_rows = sqlx::query(
            r#"SELECT "state_key", "action_key", "value", "updated_at", "seq" FROM "q_values""#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut q_values = Vec::with_capacity(q_rows.len());
        for row in q_rows {
            let value: Option<f64> = row.try_get("value")?;
            q_values.push(QValueRecord {
                state_key: row.try_get("state_key")?,
                action_key: row.try_get("action_key")?,
                // SQLite stores NaN as NULL; keep it visible to validation.
                value: value.unwrap_or(f64::NAN),
                updated_at: row.try_get("updated_at")?,
                seq: row.try_get::<i64, _>("seq")?.max(0) as u64,
            });
        }

        let mastery_rows = sqlx::query(
            r#"SELECT "user_id", "skill_category", "probability", "updated_at", "seq" FROM "skill_mastery""#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut mastery = Vec::with_capacity(mastery_rows.len());
        for row in mastery_rows {
            let probability: Option<f64> = row.try_get("probability")?;
            mastery.push(MasteryRecord {
                user_id: row.try_get("user_id")?,
                skill_category: row.try_get("skill_category")?,
                probability: probability.unwrap_or(f64::NAN),
                updated_at: row.try_get("updated_at")?,
                seq: row.try_get::<i64, _>("seq")?.max(0) as u64,
            });
        }

        Ok(StoreSnapshot { q_values, mastery })
    }
}

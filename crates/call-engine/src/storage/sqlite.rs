//! SQLite-backed history store
//!
//! Uses runtime-checked `sqlx` queries so the crate builds without a live
//! database. The schema is created on connect.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use super::{CallRecordStore, CallSummary, DailyStats, StoreError};
use crate::queue::CallStatus;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS call_records (
        call_id TEXT PRIMARY KEY,
        queue TEXT NOT NULL,
        department TEXT NOT NULL,
        agent_id TEXT,
        location TEXT,
        status TEXT NOT NULL,
        enqueued_at TEXT NOT NULL,
        assigned_at TEXT,
        completed_at TEXT NOT NULL,
        call_date TEXT NOT NULL,
        wait_secs INTEGER NOT NULL,
        talk_secs INTEGER NOT NULL,
        hold_secs INTEGER NOT NULL,
        wrap_secs INTEGER NOT NULL,
        within_service_level BOOLEAN NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_call_records_agent ON call_records(agent_id)",
    "CREATE INDEX IF NOT EXISTS idx_call_records_date ON call_records(call_date)",
    "CREATE TABLE IF NOT EXISTS daily_stats (
        agent_id TEXT NOT NULL,
        stat_date TEXT NOT NULL,
        department TEXT NOT NULL,
        location TEXT NOT NULL,
        calls_handled INTEGER NOT NULL,
        total_talk_secs INTEGER NOT NULL,
        total_hold_secs INTEGER NOT NULL,
        avg_handle_secs REAL NOT NULL,
        occupancy_pct REAL NOT NULL,
        adherence_pct REAL NOT NULL,
        PRIMARY KEY (agent_id, stat_date)
    )",
];

const CALL_COLUMNS: &str = "call_id, queue, department, agent_id, location, status, enqueued_at, \
     assigned_at, completed_at, wait_secs, talk_secs, hold_secs, wrap_secs, within_service_level";

/// History store on an `sqlx` SQLite pool
#[derive(Clone)]
pub struct SqliteCallStore {
    pool: SqlitePool,
}

impl SqliteCallStore {
    /// Connect, creating the database file if needed, and apply the schema
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory database sees its own empty database
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(database_url = %database_url, "Connected call history store");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Migration(e.to_string()))?;
        }
        debug!("Call history schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn parse_status(raw: &str) -> Result<CallStatus, StoreError> {
    match raw {
        "waiting" => Ok(CallStatus::Waiting),
        "active" => Ok(CallStatus::Active),
        "completed" => Ok(CallStatus::Completed),
        "abandoned" => Ok(CallStatus::Abandoned),
        other => Err(StoreError::Corrupt(format!("unknown call status '{other}'"))),
    }
}

fn call_from_row(row: &SqliteRow) -> Result<CallSummary, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(CallSummary {
        call_id: row.try_get("call_id")?,
        queue: row.try_get("queue")?,
        department: row.try_get("department")?,
        agent_id: row.try_get("agent_id")?,
        location: row.try_get("location")?,
        status: parse_status(&status)?,
        enqueued_at: row.try_get::<DateTime<Utc>, _>("enqueued_at")?,
        assigned_at: row.try_get::<Option<DateTime<Utc>>, _>("assigned_at")?,
        completed_at: row.try_get::<DateTime<Utc>, _>("completed_at")?,
        wait_secs: to_u64(row.try_get("wait_secs")?),
        talk_secs: to_u64(row.try_get("talk_secs")?),
        hold_secs: to_u64(row.try_get("hold_secs")?),
        wrap_secs: to_u64(row.try_get("wrap_secs")?),
        within_service_level: row.try_get("within_service_level")?,
    })
}

fn stats_from_row(row: &SqliteRow) -> Result<DailyStats, StoreError> {
    let calls_handled: i64 = row.try_get("calls_handled")?;
    Ok(DailyStats {
        agent_id: row.try_get("agent_id")?,
        date: row.try_get::<NaiveDate, _>("stat_date")?,
        department: row.try_get("department")?,
        location: row.try_get("location")?,
        calls_handled: u32::try_from(calls_handled).unwrap_or(0),
        total_talk_secs: to_u64(row.try_get("total_talk_secs")?),
        total_hold_secs: to_u64(row.try_get("total_hold_secs")?),
        avg_handle_secs: row.try_get("avg_handle_secs")?,
        occupancy_pct: row.try_get("occupancy_pct")?,
        adherence_pct: row.try_get("adherence_pct")?,
    })
}

#[async_trait]
impl CallRecordStore for SqliteCallStore {
    async fn save_call(&self, summary: &CallSummary) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO call_records (call_id, queue, department, agent_id, location, status,
                 enqueued_at, assigned_at, completed_at, call_date, wait_secs, talk_secs, hold_secs,
                 wrap_secs, within_service_level)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&summary.call_id)
        .bind(&summary.queue)
        .bind(&summary.department)
        .bind(&summary.agent_id)
        .bind(&summary.location)
        .bind(summary.status.as_str())
        .bind(summary.enqueued_at)
        .bind(summary.assigned_at)
        .bind(summary.completed_at)
        .bind(summary.date())
        .bind(to_i64(summary.wait_secs))
        .bind(to_i64(summary.talk_secs))
        .bind(to_i64(summary.hold_secs))
        .bind(to_i64(summary.wrap_secs))
        .bind(summary.within_service_level)
        .execute(&self.pool)
        .await?;
        debug!(call_id = %summary.call_id, "Call record saved");
        Ok(())
    }

    async fn save_daily_stats(&self, stats: &DailyStats) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO daily_stats (agent_id, stat_date, department, location, calls_handled,
                 total_talk_secs, total_hold_secs, avg_handle_secs, occupancy_pct, adherence_pct)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(agent_id, stat_date) DO UPDATE SET
                 department = excluded.department,
                 location = excluded.location,
                 calls_handled = excluded.calls_handled,
                 total_talk_secs = excluded.total_talk_secs,
                 total_hold_secs = excluded.total_hold_secs,
                 avg_handle_secs = excluded.avg_handle_secs,
                 occupancy_pct = excluded.occupancy_pct,
                 adherence_pct = excluded.adherence_pct",
        )
        .bind(&stats.agent_id)
        .bind(stats.date)
        .bind(&stats.department)
        .bind(&stats.location)
        .bind(i64::from(stats.calls_handled))
        .bind(to_i64(stats.total_talk_secs))
        .bind(to_i64(stats.total_hold_secs))
        .bind(stats.avg_handle_secs)
        .bind(stats.occupancy_pct)
        .bind(stats.adherence_pct)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn calls_for_agent(&self, agent_id: &str) -> Result<Vec<CallSummary>, StoreError> {
        let sql = format!(
            "SELECT {CALL_COLUMNS} FROM call_records WHERE agent_id = ? ORDER BY completed_at DESC, call_id"
        );
        let rows = sqlx::query(&sql).bind(agent_id).fetch_all(&self.pool).await?;
        rows.iter().map(call_from_row).collect()
    }

    async fn calls_on(&self, date: NaiveDate) -> Result<Vec<CallSummary>, StoreError> {
        let sql = format!(
            "SELECT {CALL_COLUMNS} FROM call_records WHERE call_date = ? ORDER BY completed_at DESC, call_id"
        );
        let rows = sqlx::query(&sql).bind(date).fetch_all(&self.pool).await?;
        rows.iter().map(call_from_row).collect()
    }

    async fn daily_stats(
        &self,
        date: NaiveDate,
        agent_id: Option<&str>,
    ) -> Result<Vec<DailyStats>, StoreError> {
        let rows = match agent_id {
            Some(agent_id) => {
                sqlx::query("SELECT * FROM daily_stats WHERE stat_date = ? AND agent_id = ?")
                    .bind(date)
                    .bind(agent_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM daily_stats WHERE stat_date = ? ORDER BY agent_id")
                    .bind(date)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(stats_from_row).collect()
    }

    async fn truncate_all(&self) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let calls = sqlx::query("DELETE FROM call_records").execute(&mut *tx).await?;
        let stats = sqlx::query("DELETE FROM daily_stats").execute(&mut *tx).await?;
        tx.commit().await?;
        let removed = calls.rows_affected() + stats.rows_affected();
        info!(removed, "Call history truncated");
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn summary(id: &str, agent: Option<&str>) -> CallSummary {
        let finished = Utc.with_ymd_and_hms(2024, 5, 10, 9, 30, 0).unwrap();
        CallSummary {
            call_id: id.to_string(),
            queue: "support_inbound".to_string(),
            department: "support".to_string(),
            agent_id: agent.map(str::to_string),
            location: agent.map(|_| "denver".to_string()),
            status: if agent.is_some() { CallStatus::Completed } else { CallStatus::Abandoned },
            enqueued_at: finished - Duration::seconds(300),
            assigned_at: agent.map(|_| finished - Duration::seconds(250)),
            completed_at: finished,
            wait_secs: 50,
            talk_secs: 200,
            hold_secs: 30,
            wrap_secs: 0,
            within_service_level: false,
        }
    }

    #[tokio::test]
    async fn test_round_trip_call_records() {
        let store = SqliteCallStore::connect("sqlite::memory:").await.unwrap();
        store.ping().await.unwrap();
        store.save_call(&summary("c1", Some("a1"))).await.unwrap();
        store.save_call(&summary("c2", None)).await.unwrap();

        let calls = store.calls_for_agent("a1").await.unwrap();
        assert_eq!(calls, vec![summary("c1", Some("a1"))]);

        let day = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let on_day = store.calls_on(day).await.unwrap();
        assert_eq!(on_day.len(), 2);
        assert!(on_day.iter().any(|c| c.status == CallStatus::Abandoned));
    }

    #[tokio::test]
    async fn test_daily_stats_upsert_and_truncate() {
        let store = SqliteCallStore::connect("sqlite::memory:").await.unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let mut stats = DailyStats {
            agent_id: "a1".to_string(),
            date: day,
            department: "support".to_string(),
            location: "denver".to_string(),
            calls_handled: 1,
            total_talk_secs: 100,
            total_hold_secs: 0,
            avg_handle_secs: 100.0,
            occupancy_pct: 50.0,
            adherence_pct: 90.0,
        };
        store.save_daily_stats(&stats).await.unwrap();
        stats.calls_handled = 2;
        store.save_daily_stats(&stats).await.unwrap();

        let rows = store.daily_stats(day, Some("a1")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].calls_handled, 2);
        assert!(store.daily_stats(day, Some("a2")).await.unwrap().is_empty());

        store.save_call(&summary("c1", Some("a1"))).await.unwrap();
        assert_eq!(store.truncate_all().await.unwrap(), 2);
        assert!(store.daily_stats(day, None).await.unwrap().is_empty());
    }
}

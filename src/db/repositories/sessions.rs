use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{
        parse_datetime, parse_flush_status, parse_optional_datetime, parse_status, to_i64, to_u64,
    },
    models::{FlushStatus, LedgerStatus, SessionRecord},
    Database,
};

const SESSION_COLUMNS: &str = "id, game, user_id, status, end_reason, elapsed_active_secs, pending_reward, session_cap, flush_status, balance_after, started_at, ended_at, created_at, updated_at";

fn row_to_session(row: &Row) -> Result<SessionRecord> {
    let status: String = row.get("status")?;
    let flush_status: String = row.get("flush_status")?;
    let elapsed_active_secs: i64 = row.get("elapsed_active_secs")?;
    let pending_reward: i64 = row.get("pending_reward")?;
    let session_cap: i64 = row.get("session_cap")?;
    let balance_after: Option<i64> = row.get("balance_after")?;
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(SessionRecord {
        id: row.get("id")?,
        game: row.get("game")?,
        user_id: row.get("user_id")?,
        status: parse_status(&status)?,
        end_reason: row.get("end_reason")?,
        elapsed_active_secs: to_u64(elapsed_active_secs, "elapsed_active_secs")?,
        pending_reward: to_u64(pending_reward, "pending_reward")?,
        session_cap: to_u64(session_cap, "session_cap")?,
        flush_status: parse_flush_status(&flush_status)?,
        balance_after: balance_after
            .map(|value| to_u64(value, "balance_after"))
            .transpose()?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn insert_session(&self, session: &SessionRecord) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, game, user_id, status, end_reason, elapsed_active_secs, pending_reward, session_cap, flush_status, balance_after, started_at, ended_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    record.id,
                    record.game,
                    record.user_id,
                    record.status.as_str(),
                    record.end_reason,
                    to_i64(record.elapsed_active_secs)?,
                    to_i64(record.pending_reward)?,
                    to_i64(record.session_cap)?,
                    record.flush_status.as_str(),
                    record.balance_after.map(to_i64).transpose()?,
                    record.started_at.to_rfc3339(),
                    record.ended_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn update_session_progress(
        &self,
        session_id: &str,
        elapsed_active_secs: u64,
        pending_reward: u64,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET elapsed_active_secs = ?1,
                     pending_reward = ?2,
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    to_i64(elapsed_active_secs)?,
                    to_i64(pending_reward)?,
                    updated_at.to_rfc3339(),
                    session_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn mark_session_ending(
        &self,
        session_id: &str,
        end_reason: &str,
        elapsed_active_secs: u64,
        pending_reward: u64,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        let end_reason = end_reason.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET status = ?1,
                     end_reason = ?2,
                     elapsed_active_secs = ?3,
                     pending_reward = ?4,
                     updated_at = ?5
                 WHERE id = ?6",
                params![
                    LedgerStatus::Ending.as_str(),
                    end_reason,
                    to_i64(elapsed_active_secs)?,
                    to_i64(pending_reward)?,
                    updated_at.to_rfc3339(),
                    session_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn mark_session_completed(
        &self,
        session_id: &str,
        flush_status: FlushStatus,
        balance_after: Option<u64>,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET status = ?1,
                     flush_status = ?2,
                     balance_after = ?3,
                     ended_at = ?4,
                     updated_at = ?4
                 WHERE id = ?5",
                params![
                    LedgerStatus::Completed.as_str(),
                    flush_status.as_str(),
                    balance_after.map(to_i64).transpose()?,
                    ended_at.to_rfc3339(),
                    session_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn mark_session_abandoned(
        &self,
        session_id: &str,
        elapsed_active_secs: u64,
        pending_reward: u64,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET status = ?1,
                     elapsed_active_secs = ?2,
                     pending_reward = ?3,
                     ended_at = ?4,
                     updated_at = ?4
                 WHERE id = ?5",
                params![
                    LedgerStatus::Abandoned.as_str(),
                    to_i64(elapsed_active_secs)?,
                    to_i64(pending_reward)?,
                    ended_at.to_rfc3339(),
                    session_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<SessionRecord> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;

            let session = stmt
                .query_row(params![session_id], |row| Ok(row_to_session(row)))?
                .map_err(|e| anyhow!("Failed to parse session: {}", e))?;

            Ok(session)
        })
        .await
    }

    /// Sessions a crash left open.
    pub async fn get_incomplete_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.execute(|conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE status IN ('Playing', 'Ending')
                 ORDER BY started_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;

            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    pub async fn mark_session_interrupted(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET status = ?1,
                     ended_at = ?2,
                     updated_at = ?2
                 WHERE id = ?3",
                params![
                    LedgerStatus::Interrupted.as_str(),
                    ended_at.to_rfc3339(),
                    session_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_sessions_paginated(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SessionRecord>> {
        self.execute(move |conn| {
            let limit = to_i64(limit as u64)?;
            let offset = to_i64(offset as u64)?;
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 ORDER BY started_at DESC
                 LIMIT ?1 OFFSET ?2"
            );
            let mut stmt = conn.prepare(&sql)?;

            let mut rows = stmt.query(params![limit, offset])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, started_at: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            game: "doom".into(),
            user_id: Some("u-1".into()),
            status: LedgerStatus::Playing,
            end_reason: None,
            elapsed_active_secs: 0,
            pending_reward: 0,
            session_cap: 50,
            flush_status: FlushStatus::None,
            balance_after: None,
            started_at,
            ended_at: None,
            created_at: started_at,
            updated_at: started_at,
        }
    }

    #[tokio::test]
    async fn session_lifecycle_is_recorded() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.insert_session(&record("s-1", now)).await.unwrap();

        db.update_session_progress("s-1", 120, 0, now).await.unwrap();
        db.mark_session_ending("s-1", "CashOut", 200, 1, now)
            .await
            .unwrap();
        db.mark_session_completed("s-1", FlushStatus::Credited, Some(41), now)
            .await
            .unwrap();

        let stored = db.get_session("s-1").await.unwrap();
        assert_eq!(stored.status, LedgerStatus::Completed);
        assert_eq!(stored.end_reason.as_deref(), Some("CashOut"));
        assert_eq!(stored.elapsed_active_secs, 200);
        assert_eq!(stored.pending_reward, 1);
        assert_eq!(stored.flush_status, FlushStatus::Credited);
        assert_eq!(stored.balance_after, Some(41));
        assert!(stored.ended_at.is_some());
    }

    #[tokio::test]
    async fn open_sessions_can_be_recovered() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.insert_session(&record("open", now)).await.unwrap();
        db.insert_session(&record("done", now)).await.unwrap();
        db.mark_session_abandoned("done", 3, 0, now).await.unwrap();

        let open = db.get_incomplete_sessions().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "open");

        db.mark_session_interrupted("open", now).await.unwrap();
        assert!(db.get_incomplete_sessions().await.unwrap().is_empty());
        assert_eq!(db.list_sessions_paginated(10, 0).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn pagination_rejects_out_of_range_limits() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.insert_session(&record("a", now)).await.unwrap();
        db.insert_session(&record("b", now)).await.unwrap();

        assert_eq!(db.list_sessions_paginated(1, 0).await.unwrap().len(), 1);
        assert_eq!(db.list_sessions_paginated(1, 1).await.unwrap().len(), 1);
        assert!(db.list_sessions_paginated(usize::MAX, 0).await.is_err());
        assert!(db.list_sessions_paginated(1, usize::MAX).await.is_err());
    }
}

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::db::{
    helpers::{parse_datetime, parse_optional_datetime, to_i64, to_u64},
    models::InterruptionRecord,
    Database,
};

impl Database {
    pub async fn insert_interruption(&self, interruption: &InterruptionRecord) -> Result<()> {
        let record = interruption.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO interruptions (id, session_id, kind, started_at, ended_at, duration_secs)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.session_id,
                    record.kind,
                    record.started_at.to_rfc3339(),
                    record.ended_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.duration_secs.map(to_i64).transpose()?,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn finalize_interruption(
        &self,
        interruption_id: &str,
        ended_at: DateTime<Utc>,
        duration_secs: u64,
    ) -> Result<()> {
        let interruption_id = interruption_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE interruptions
                 SET ended_at = ?1,
                     duration_secs = ?2
                 WHERE id = ?3",
                params![ended_at.to_rfc3339(), to_i64(duration_secs)?, interruption_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_interruptions_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<InterruptionRecord>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, kind, started_at, ended_at, duration_secs
                 FROM interruptions
                 WHERE session_id = ?1
                 ORDER BY started_at ASC",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            let mut interruptions = Vec::new();
            while let Some(row) = rows.next()? {
                let started_at: String = row.get(3)?;
                let ended_at: Option<String> = row.get(4)?;
                let duration_secs: Option<i64> = row.get(5)?;
                interruptions.push(InterruptionRecord {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    kind: row.get(2)?,
                    started_at: parse_datetime(&started_at, "started_at")?,
                    ended_at: parse_optional_datetime(ended_at, "ended_at")?,
                    duration_secs: duration_secs
                        .map(|value| to_u64(value, "duration_secs"))
                        .transpose()?,
                });
            }
            Ok(interruptions)
        })
        .await
    }
}

use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{clamp_limit, format_datetime, parse_datetime},
    models::Reading,
};

/// Upper bound for `get_recent_readings`.
pub const MAX_RECENT_LIMIT: usize = 500;

fn row_to_reading(row: &Row) -> Result<Reading> {
    let observed_at: String = row.get("observed_at")?;

    Ok(Reading {
        id: row.get("id")?,
        value: row.get("temperature")?,
        device_id: row.get("device")?,
        observed_at: parse_datetime(&observed_at, "observed_at")?,
    })
}

impl Database {
    /// Persist one reading and return it with its assigned id.
    pub async fn insert_reading(&self, reading: &Reading) -> Result<Reading> {
        let mut record = reading.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO readings (temperature, device, observed_at)
                 VALUES (?1, ?2, ?3)",
                params![
                    record.value,
                    record.device_id,
                    format_datetime(&record.observed_at),
                ],
            )
            .with_context(|| "failed to insert reading")?;
            record.id = Some(conn.last_insert_rowid());
            Ok(record)
        })
        .await
    }

    /// Persist a batch of readings in one transaction.
    pub async fn insert_readings(&self, readings: Vec<Reading>) -> Result<Vec<Reading>> {
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open insert transaction")?;
            let mut stored = Vec::with_capacity(readings.len());
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO readings (temperature, device, observed_at)
                     VALUES (?1, ?2, ?3)",
                )?;
                for mut record in readings {
                    stmt.execute(params![
                        record.value,
                        record.device_id,
                        format_datetime(&record.observed_at),
                    ])
                    .with_context(|| "failed to insert reading")?;
                    record.id = Some(tx.last_insert_rowid());
                    stored.push(record);
                }
            }
            tx.commit().context("failed to commit readings")?;
            Ok(stored)
        })
        .await
    }

    /// Most recent readings, newest first.
    pub async fn get_recent_readings(&self, limit: usize) -> Result<Vec<Reading>> {
        let limit = clamp_limit(limit, MAX_RECENT_LIMIT)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, temperature, device, observed_at
                 FROM readings
                 ORDER BY observed_at DESC, id DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit])?;
            let mut readings = Vec::new();
            while let Some(row) = rows.next()? {
                readings.push(row_to_reading(row)?);
            }

            Ok(readings)
        })
        .await
    }

    /// Every stored reading, oldest first. Ties keep insertion order.
    pub async fn get_readings_ascending(&self) -> Result<Vec<Reading>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, temperature, device, observed_at
                 FROM readings
                 ORDER BY observed_at ASC, id ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut readings = Vec::new();
            while let Some(row) = rows.next()? {
                readings.push(row_to_reading(row)?);
            }

            Ok(readings)
        })
        .await
    }

    pub async fn count_readings(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?;
            u64::try_from(count).context("reading count is negative")
        })
        .await
    }
}

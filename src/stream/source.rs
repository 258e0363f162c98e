use anyhow::Result;
use async_trait::async_trait;

use crate::db::{Database, Reading};

/// Read side of the reading store as seen by stream sessions.
///
/// Sessions call this exactly once, at connect time, to capture their replay
/// snapshot.
#[async_trait]
pub trait ReadingSource: Send + Sync + 'static {
    /// Every stored reading ordered by `observed_at`, oldest first.
    async fn readings_ascending(&self) -> Result<Vec<Reading>>;
}

#[async_trait]
impl ReadingSource for Database {
    async fn readings_ascending(&self) -> Result<Vec<Reading>> {
        self.get_readings_ascending().await
    }
}

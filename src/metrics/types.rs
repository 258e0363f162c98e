use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub subscriber_id: String,
    pub closed_at: DateTime<Utc>,
    pub snapshot_len: usize,
    pub replayed: u64,
    pub synthetic: u64,
    pub outcome: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub active_sessions: usize,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub replayed_count: u64,
    pub synthetic_count: u64,
    pub emit_failures: u64,
    pub store_read_failures: u64,
    pub recent_sessions: Vec<SessionRecord>,
}

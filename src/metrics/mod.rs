mod types;

pub use types::{MetricsSnapshot, SessionRecord, SystemMetrics};

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use log::warn;
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::stream::Emission;

const MAX_RECENT_SESSIONS: usize = 20;

/// Counters for stream sessions.
///
/// Per-tick recording is a relaxed atomic increment; session tasks never
/// wait on each other or on a stats request. The process sampler has its
/// own lock and is refreshed on the blocking pool.
#[derive(Clone)]
pub struct StreamMetrics {
    counters: Arc<Counters>,
    recent_sessions: Arc<Mutex<VecDeque<SessionRecord>>>,
    sampler: Arc<Mutex<ProcessSampler>>,
}

#[derive(Default)]
struct Counters {
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    replayed_count: AtomicU64,
    synthetic_count: AtomicU64,
    emit_failures: AtomicU64,
    store_read_failures: AtomicU64,
}

struct ProcessSampler {
    system: System,
    pid: Pid,
}

impl ProcessSampler {
    fn sample(&mut self) -> SystemMetrics {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]));

        match self.system.process(self.pid) {
            Some(process) => SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            },
            None => SystemMetrics::default(),
        }
    }
}

impl StreamMetrics {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // Initial refresh to establish baseline for CPU calculation
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            counters: Arc::new(Counters::default()),
            recent_sessions: Arc::new(Mutex::new(VecDeque::with_capacity(
                MAX_RECENT_SESSIONS + 1,
            ))),
            sampler: Arc::new(Mutex::new(ProcessSampler { system, pid })),
        }
    }

    pub fn record_session_opened(&self) {
        self.counters.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_read_failure(&self) {
        self.counters
            .store_read_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emission(&self, emission: &Emission) {
        let counter = match emission {
            Emission::Replayed(_) => &self.counters.replayed_count,
            Emission::Synthetic(_) => &self.counters.synthetic_count,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Called once per session, from its own task, after the loop has ended.
    pub fn record_session_closed(&self, record: SessionRecord, emit_failed: bool) {
        self.counters.sessions_closed.fetch_add(1, Ordering::Relaxed);
        if emit_failed {
            self.counters.emit_failures.fetch_add(1, Ordering::Relaxed);
        }

        let mut recent = self
            .recent_sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        recent.push_back(record);
        while recent.len() > MAX_RECENT_SESSIONS {
            recent.pop_front();
        }
    }

    pub async fn get_snapshot(&self, active_sessions: usize) -> MetricsSnapshot {
        let sampler = Arc::clone(&self.sampler);
        let system = tokio::task::spawn_blocking(move || {
            sampler
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .sample()
        })
        .await
        .unwrap_or_else(|err| {
            warn!("Process sampling failed: {err}");
            SystemMetrics::default()
        });

        let recent_sessions = self
            .recent_sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();

        let counters = &self.counters;
        MetricsSnapshot {
            system,
            active_sessions,
            sessions_opened: counters.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: counters.sessions_closed.load(Ordering::Relaxed),
            replayed_count: counters.replayed_count.load(Ordering::Relaxed),
            synthetic_count: counters.synthetic_count.load(Ordering::Relaxed),
            emit_failures: counters.emit_failures.load(Ordering::Relaxed),
            store_read_failures: counters.store_read_failures.load(Ordering::Relaxed),
            recent_sessions,
        }
    }
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Reading;
    use chrono::Utc;

    fn record(id: usize) -> SessionRecord {
        SessionRecord {
            subscriber_id: id.to_string(),
            closed_at: Utc::now(),
            snapshot_len: 0,
            replayed: 0,
            synthetic: 1,
            outcome: "disconnected".into(),
        }
    }

    #[tokio::test]
    async fn counts_emissions_by_kind() {
        let metrics = StreamMetrics::new();
        let reading = Reading::new(20.0, "Salon", Utc::now());

        metrics.record_session_opened();
        metrics.record_emission(&Emission::Replayed(reading.clone()));
        metrics.record_emission(&Emission::Synthetic(reading));
        metrics.record_session_closed(record(1), true);

        let snapshot = metrics.get_snapshot(0).await;
        assert_eq!(snapshot.sessions_opened, 1);
        assert_eq!(snapshot.sessions_closed, 1);
        assert_eq!(snapshot.replayed_count, 1);
        assert_eq!(snapshot.synthetic_count, 1);
        assert_eq!(snapshot.emit_failures, 1);
    }

    #[tokio::test]
    async fn keeps_only_recent_sessions() {
        let metrics = StreamMetrics::new();
        for id in 0..(MAX_RECENT_SESSIONS + 5) {
            metrics.record_session_closed(record(id), false);
        }

        let snapshot = metrics.get_snapshot(3).await;
        assert_eq!(snapshot.recent_sessions.len(), MAX_RECENT_SESSIONS);
        assert_eq!(snapshot.recent_sessions[0].subscriber_id, "5");
        assert_eq!(snapshot.active_sessions, 3);
    }

    #[tokio::test]
    async fn recording_does_not_wait_for_a_held_sampler() {
        let metrics = StreamMetrics::new();
        let reading = Reading::new(20.0, "Salon", Utc::now());

        // A stats request in the middle of a process refresh.
        let sampler = metrics.sampler.lock().unwrap();
        for _ in 0..100 {
            metrics.record_emission(&Emission::Synthetic(reading.clone()));
        }
        metrics.record_session_closed(record(1), false);
        drop(sampler);

        let snapshot = metrics.get_snapshot(0).await;
        assert_eq!(snapshot.synthetic_count, 100);
        assert_eq!(snapshot.sessions_closed, 1);
    }
}

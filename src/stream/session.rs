use chrono::Utc;
use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;
use crate::metrics::{SessionRecord, StreamMetrics};

use super::manager::SubscriberId;
use super::state::{Emission, SessionState, StreamPhase};
use super::subscriber::{CloseReason, Subscriber};
use super::synthetic::generate_reading;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

// Import the logging macros (exported at crate root)
use crate::{log_debug, log_info, log_warn};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Cadence of emissions; the first tick fires one interval after the
    /// session starts.
    pub tick_interval: Duration,
    /// A send taking longer than this counts as an emit failure.
    pub send_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Closed from outside: disconnect, transport error or shutdown.
    Cancelled,
    /// Closed by the session itself after a failed send.
    EmitFailed(StreamError),
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub snapshot_len: usize,
    pub replayed: u64,
    pub synthetic: u64,
}

/// Drive one subscriber's stream until it is cancelled or a send fails.
///
/// Cancellation is only observed between ticks. Once a tick has produced its
/// reading the send runs to completion (or times out), so a close request
/// never cuts an emission in half and nothing is emitted after the loop
/// sees the token.
pub async fn run_session<S: Subscriber>(
    id: SubscriberId,
    mut state: SessionState,
    mut subscriber: S,
    config: SessionConfig,
    cancel: CancellationToken,
    metrics: StreamMetrics,
) -> SessionReport {
    let mut ticker = time::interval_at(
        time::Instant::now() + config.tick_interval,
        config.tick_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let snapshot_len = state.snapshot_len();
    let mut replayed: u64 = 0;
    let mut synthetic: u64 = 0;

    log_info!(
        "stream session {} started: {} stored readings to replay",
        id,
        snapshot_len
    );

    let outcome = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break SessionOutcome::Cancelled,
            _ = ticker.tick() => {}
        }

        let was_replaying = state.phase() == StreamPhase::Replaying;
        let Some(emission) = state.next_emission(generate_reading) else {
            break SessionOutcome::Cancelled;
        };

        let payload = emission.reading().to_payload();
        match time::timeout(config.send_timeout, subscriber.send(&payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                break SessionOutcome::EmitFailed(StreamError::Emit(format!("{err:#}")));
            }
            Err(_) => {
                break SessionOutcome::EmitFailed(StreamError::Emit(format!(
                    "send timed out after {}ms",
                    config.send_timeout.as_millis()
                )));
            }
        }

        metrics.record_emission(&emission);
        match &emission {
            Emission::Replayed(_) => {
                replayed += 1;
                log_debug!(
                    "stream session {} replayed reading {}/{}",
                    id,
                    state.cursor(),
                    snapshot_len
                );
            }
            Emission::Synthetic(reading) => {
                synthetic += 1;
                log_debug!(
                    "stream session {} sent synthetic reading: {} - {}°C",
                    id,
                    reading.device_id,
                    reading.value
                );
            }
        }

        if was_replaying && state.phase() == StreamPhase::Live {
            log_info!("stream session {} finished replay, switching to live readings", id);
        }
    };

    state.close();

    let reason = match &outcome {
        SessionOutcome::Cancelled => CloseReason::Closed,
        SessionOutcome::EmitFailed(_) => CloseReason::EmitFailed,
    };
    let _ = time::timeout(config.send_timeout, subscriber.close(reason)).await;
    drop(subscriber);

    match &outcome {
        SessionOutcome::Cancelled => log_info!("stream session {} closed", id),
        SessionOutcome::EmitFailed(err) => log_warn!("stream session {} closed: {}", id, err),
    }

    let emit_failed = matches!(outcome, SessionOutcome::EmitFailed(_));
    metrics.record_session_closed(
        SessionRecord {
            subscriber_id: id.to_string(),
            closed_at: Utc::now(),
            snapshot_len,
            replayed,
            synthetic,
            outcome: match &outcome {
                SessionOutcome::Cancelled => "closed".to_string(),
                SessionOutcome::EmitFailed(err) => err.to_string(),
            },
        },
        emit_failed,
    );

    SessionReport {
        outcome,
        snapshot_len,
        replayed,
        synthetic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Reading, ReadingPayload};
    use crate::stream::subscriber::ChannelSubscriber;
    use crate::stream::synthetic::{DEVICES, MAX_TEMPERATURE, MIN_TEMPERATURE};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::TimeZone;

    const TICK: Duration = Duration::from_secs(3);

    fn config() -> SessionConfig {
        SessionConfig {
            tick_interval: TICK,
            send_timeout: Duration::from_secs(1),
        }
    }

    fn kitchen(minute: u32, value: f64) -> Reading {
        Reading::new(
            value,
            "Kitchen",
            Utc.with_ymd_and_hms(2024, 1, 1, 10, minute, 0).unwrap(),
        )
    }

    fn assert_synthetic(payload: &ReadingPayload) {
        assert!(DEVICES.contains(&payload.device.as_str()));
        assert!((MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&payload.temperature));
    }

    struct FailingSubscriber {
        fail_after: usize,
        sent: usize,
    }

    #[async_trait]
    impl Subscriber for FailingSubscriber {
        async fn send(&mut self, _payload: &ReadingPayload) -> Result<()> {
            if self.sent >= self.fail_after {
                return Err(anyhow!("connection reset"));
            }
            self.sent += 1;
            Ok(())
        }
    }

    struct StalledSubscriber;

    #[async_trait]
    impl Subscriber for StalledSubscriber {
        async fn send(&mut self, _payload: &ReadingPayload) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn replays_snapshot_then_goes_live() {
        let snapshot = vec![kitchen(0, 20.1), kitchen(5, 20.2), kitchen(10, 20.3)];
        let (subscriber, mut rx) = ChannelSubscriber::new();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_session(
            SubscriberId::new(),
            SessionState::new(snapshot.clone()),
            subscriber,
            config(),
            cancel.clone(),
            StreamMetrics::new(),
        ));

        for expected in &snapshot {
            let payload = rx.recv().await.unwrap();
            assert_eq!(payload, expected.to_payload());
        }
        let fourth = rx.recv().await.unwrap();
        assert_synthetic(&fourth);

        cancel.cancel();
        let report = task.await.unwrap();
        assert_eq!(report.outcome, SessionOutcome::Cancelled);
        assert_eq!(report.replayed, 3);
        assert!(report.synthetic >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_follow_the_configured_cadence() {
        let (subscriber, mut rx) = ChannelSubscriber::new();
        let cancel = CancellationToken::new();
        let started = time::Instant::now();

        let task = tokio::spawn(run_session(
            SubscriberId::new(),
            SessionState::new(vec![kitchen(0, 20.0), kitchen(1, 21.0)]),
            subscriber,
            config(),
            cancel.clone(),
            StreamMetrics::new(),
        ));

        rx.recv().await.unwrap();
        assert_eq!(started.elapsed(), TICK);
        rx.recv().await.unwrap();
        assert_eq!(started.elapsed(), TICK * 2);
        rx.recv().await.unwrap();
        assert_eq!(started.elapsed(), TICK * 3);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn empty_snapshot_emits_synthetic_on_first_tick() {
        let started = time::Instant::now();
        let (subscriber, mut rx) = ChannelSubscriber::new();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_session(
            SubscriberId::new(),
            SessionState::new(Vec::new()),
            subscriber,
            config(),
            cancel.clone(),
            StreamMetrics::new(),
        ));

        let first = rx.recv().await.unwrap();
        assert_synthetic(&first);
        assert_eq!(started.elapsed(), TICK);

        cancel.cancel();
        let report = task.await.unwrap();
        assert_eq!(report.replayed, 0);
        assert_eq!(report.snapshot_len, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_session_emits_nothing_more() {
        let (subscriber, mut rx) = ChannelSubscriber::new();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_session(
            SubscriberId::new(),
            SessionState::new(vec![kitchen(0, 20.0), kitchen(5, 21.0), kitchen(10, 22.0)]),
            subscriber,
            config(),
            cancel.clone(),
            StreamMetrics::new(),
        ));

        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        cancel.cancel();
        task.await.unwrap();

        time::sleep(TICK * 10).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_closes_session() {
        let cancel = CancellationToken::new();
        let report = run_session(
            SubscriberId::new(),
            SessionState::new(vec![kitchen(0, 20.0), kitchen(5, 21.0), kitchen(10, 22.0)]),
            FailingSubscriber {
                fail_after: 2,
                sent: 0,
            },
            config(),
            cancel.clone(),
            StreamMetrics::new(),
        )
        .await;

        assert!(matches!(
            report.outcome,
            SessionOutcome::EmitFailed(StreamError::Emit(_))
        ));
        assert_eq!(report.replayed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_subscriber_times_out() {
        let report = run_session(
            SubscriberId::new(),
            SessionState::new(Vec::new()),
            StalledSubscriber,
            config(),
            CancellationToken::new(),
            StreamMetrics::new(),
        )
        .await;

        match report.outcome {
            SessionOutcome::EmitFailed(StreamError::Emit(message)) => {
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(report.synthetic, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_see_every_emission() {
        let metrics = StreamMetrics::new();
        let (subscriber, mut rx) = ChannelSubscriber::new();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_session(
            SubscriberId::new(),
            SessionState::new(vec![kitchen(0, 20.0)]),
            subscriber,
            config(),
            cancel.clone(),
            metrics.clone(),
        ));

        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        cancel.cancel();
        let report = task.await.unwrap();

        let snapshot = metrics.get_snapshot(0).await;
        assert_eq!(snapshot.replayed_count, report.replayed);
        assert_eq!(snapshot.synthetic_count, report.synthetic);
        assert_eq!(snapshot.sessions_closed, 1);
        assert_eq!(snapshot.emit_failures, 0);
    }
}

use serde::Serialize;

use crate::db::Reading;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StreamPhase {
    /// Emitting from the captured snapshot.
    Replaying,
    /// Snapshot exhausted; emitting synthetic readings. Never reverts.
    Live,
    Closed,
}

/// Where a tick's reading came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    Replayed(Reading),
    Synthetic(Reading),
}

impl Emission {
    pub fn reading(&self) -> &Reading {
        match self {
            Emission::Replayed(reading) | Emission::Synthetic(reading) => reading,
        }
    }
}

/// Per-session replay state machine.
///
/// Owned exclusively by the session task; nothing else mutates it.
#[derive(Debug)]
pub struct SessionState {
    phase: StreamPhase,
    snapshot: Vec<Reading>,
    snapshot_len: usize,
    cursor: usize,
}

impl SessionState {
    pub fn new(snapshot: Vec<Reading>) -> Self {
        let snapshot_len = snapshot.len();
        let phase = if snapshot.is_empty() {
            StreamPhase::Live
        } else {
            StreamPhase::Replaying
        };

        Self {
            phase,
            snapshot,
            snapshot_len,
            cursor: 0,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Length of the snapshot captured at session start. Stays fixed after
    /// close even though the snapshot itself is released.
    pub fn snapshot_len(&self) -> usize {
        self.snapshot_len
    }

    pub fn is_closed(&self) -> bool {
        self.phase == StreamPhase::Closed
    }

    /// Produce the reading for one tick, or `None` once closed.
    ///
    /// The replay → live transition happens after the last replayed reading
    /// is handed out, so the following tick is the first synthetic one.
    pub fn next_emission(&mut self, synthesize: impl FnOnce() -> Reading) -> Option<Emission> {
        match self.phase {
            StreamPhase::Closed => None,
            StreamPhase::Live => Some(Emission::Synthetic(synthesize())),
            StreamPhase::Replaying => {
                let reading = self.snapshot[self.cursor].clone();
                self.cursor += 1;
                if self.cursor == self.snapshot_len {
                    self.phase = StreamPhase::Live;
                    self.snapshot = Vec::new();
                }
                Some(Emission::Replayed(reading))
            }
        }
    }

    /// Returns `true` only for the call that actually closed the session.
    pub fn close(&mut self) -> bool {
        if self.phase == StreamPhase::Closed {
            return false;
        }
        self.phase = StreamPhase::Closed;
        self.snapshot = Vec::new();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn stored(minute: u32) -> Reading {
        let mut reading = Reading::new(
            20.0 + f64::from(minute) / 10.0,
            "Kitchen",
            Utc.with_ymd_and_hms(2024, 1, 1, 10, minute, 0).unwrap(),
        );
        reading.id = Some(i64::from(minute));
        reading
    }

    fn synthetic() -> Reading {
        Reading::new(25.0, "Salon", Utc::now())
    }

    #[test]
    fn empty_snapshot_starts_live() {
        let mut state = SessionState::new(Vec::new());
        assert_eq!(state.phase(), StreamPhase::Live);
        assert!(matches!(
            state.next_emission(synthetic),
            Some(Emission::Synthetic(_))
        ));
        assert_eq!(state.cursor(), 0);
    }

    #[test]
    fn replays_exactly_n_then_goes_live() {
        let snapshot = vec![stored(0), stored(5), stored(10)];
        let mut state = SessionState::new(snapshot.clone());

        for (i, expected) in snapshot.iter().enumerate() {
            assert_eq!(state.phase(), StreamPhase::Replaying);
            let emission = state.next_emission(synthetic).unwrap();
            assert_eq!(emission, Emission::Replayed(expected.clone()));
            assert_eq!(state.cursor(), i + 1);
        }

        assert_eq!(state.phase(), StreamPhase::Live);
        assert!(matches!(
            state.next_emission(synthetic),
            Some(Emission::Synthetic(_))
        ));
    }

    #[test]
    fn cursor_is_monotonic_and_bounded() {
        let mut state = SessionState::new(vec![stored(1), stored(2)]);
        let mut last = state.cursor();
        for _ in 0..10 {
            state.next_emission(synthetic);
            assert!(state.cursor() >= last);
            assert!(state.cursor() <= state.snapshot_len());
            last = state.cursor();
        }
        assert_eq!(state.cursor(), 2);
        assert_eq!(state.phase(), StreamPhase::Live);
    }

    #[test]
    fn live_phase_never_reverts() {
        let mut state = SessionState::new(vec![stored(1)]);
        state.next_emission(synthetic);
        for _ in 0..5 {
            state.next_emission(synthetic);
            assert_eq!(state.phase(), StreamPhase::Live);
        }
    }

    #[test]
    fn closed_state_emits_nothing_and_close_is_idempotent() {
        let mut state = SessionState::new(vec![stored(1), stored(2)]);
        state.next_emission(synthetic);

        assert!(state.close());
        assert!(!state.close());
        assert!(state.is_closed());
        assert!(state.next_emission(synthetic).is_none());
        assert_eq!(state.cursor(), 1);
        assert_eq!(state.snapshot_len(), 2);
    }
}

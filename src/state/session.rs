//! The "currently open round" cell.
//!
//! A single [`SessionWriter`] exists per [`AppState`](super::AppState) and is handed to the
//! scheduler; every other component reads through [`SessionReader::snapshot`], which returns the
//! round and its start timestamp together under one version number.

use tokio::sync::watch;
use uuid::Uuid;

use crate::dao::models::RoundEntity;

/// The open round together with the wall-clock instant it started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRound {
    /// Round as persisted when it opened.
    pub round: RoundEntity,
    /// Start instant in Unix-epoch milliseconds.
    pub started_at_ms: u64,
}

impl ActiveRound {
    /// Identifier of the open round.
    pub fn id(&self) -> Uuid {
        self.round.id
    }

    /// Milliseconds left before the round is due to close, saturating at zero.
    pub fn time_left_ms(&self, now_ms: u64) -> u64 {
        let elapsed = now_ms.saturating_sub(self.started_at_ms);
        self.round.duration_ms.saturating_sub(elapsed)
    }
}

/// Consistent view of the session cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Open round, if any.
    pub active: Option<ActiveRound>,
    /// Incremented on every publish or clear.
    pub version: u64,
}

impl SessionSnapshot {
    /// The open round, but only when it is the one identified by `round_id`.
    pub fn active_round(&self, round_id: Uuid) -> Option<&ActiveRound> {
        self.active.as_ref().filter(|active| active.id() == round_id)
    }
}

/// Create a linked writer/reader pair with an empty session.
pub fn session_cell() -> (SessionWriter, SessionReader) {
    let (tx, rx) = watch::channel(SessionSnapshot::default());
    (SessionWriter { tx }, SessionReader { rx })
}

/// Exclusive write handle. Deliberately not `Clone`.
#[derive(Debug)]
pub struct SessionWriter {
    tx: watch::Sender<SessionSnapshot>,
}

impl SessionWriter {
    /// Publish `round` as the open round.
    pub fn publish(&mut self, round: RoundEntity, started_at_ms: u64) -> ActiveRound {
        let active = ActiveRound {
            round,
            started_at_ms,
        };
        let published = active.clone();
        self.tx.send_modify(|snapshot| {
            snapshot.active = Some(published);
            snapshot.version += 1;
        });
        active
    }

    /// Clear the session, returning the round that was open.
    pub fn clear(&mut self) -> Option<ActiveRound> {
        let mut previous = None;
        self.tx.send_if_modified(|snapshot| {
            previous = snapshot.active.take();
            if previous.is_some() {
                snapshot.version += 1;
                true
            } else {
                false
            }
        });
        previous
    }

    /// Clear the session only if it still holds `round_id`.
    pub fn clear_if(&mut self, round_id: Uuid) -> bool {
        if !self.holds(round_id) {
            return false;
        }
        self.clear().is_some()
    }

    /// Whether the session currently holds `round_id`.
    pub fn holds(&self, round_id: Uuid) -> bool {
        self.tx.borrow().active_round(round_id).is_some()
    }
}

/// Cloneable read handle.
#[derive(Debug, Clone)]
pub struct SessionReader {
    rx: watch::Receiver<SessionSnapshot>,
}

impl SessionReader {
    /// Take a consistent copy of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.rx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::dao::models::RoundStatus;

    fn round(duration_ms: u64) -> RoundEntity {
        RoundEntity {
            id: Uuid::new_v4(),
            status: RoundStatus::Active,
            duration_ms,
            winning_number: None,
            player_count: 0,
            started_at: SystemTime::now(),
            ended_at: None,
        }
    }

    #[test]
    fn publish_and_clear_bump_version() {
        let (mut writer, reader) = session_cell();
        assert_eq!(reader.snapshot(), SessionSnapshot::default());

        let active = writer.publish(round(30_000), 1_000);
        let snapshot = reader.snapshot();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.active.as_ref(), Some(&active));

        assert_eq!(writer.clear(), Some(active));
        let snapshot = reader.snapshot();
        assert_eq!(snapshot.version, 2);
        assert!(snapshot.active.is_none());

        assert_eq!(writer.clear(), None);
        assert_eq!(reader.snapshot().version, 2);
    }

    #[test]
    fn clear_if_ignores_superseded_rounds() {
        let (mut writer, reader) = session_cell();
        let first = writer.publish(round(30_000), 0);
        let second = writer.publish(round(30_000), 40_000);

        assert!(!writer.clear_if(first.id()));
        assert_eq!(reader.snapshot().active_round(second.id()), Some(&second));
        assert!(reader.snapshot().active_round(first.id()).is_none());

        assert!(writer.clear_if(second.id()));
        assert!(!writer.clear_if(second.id()));
    }

    #[test]
    fn time_left_saturates() {
        let active = ActiveRound {
            round: round(30_000),
            started_at_ms: 10_000,
        };
        assert_eq!(active.time_left_ms(10_000), 30_000);
        assert_eq!(active.time_left_ms(25_000), 15_000);
        assert_eq!(active.time_left_ms(90_000), 0);
        assert_eq!(active.time_left_ms(5_000), 30_000);
    }
}

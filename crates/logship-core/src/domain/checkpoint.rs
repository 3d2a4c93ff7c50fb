//! Checkpoint - 「どこまで送ったか」の状態機械
//!
//! # 状態
//! - **Uninitialized**: まだ何も送っていない（初回は過去 window を取得）
//! - **Initialized(instant)**: 最後に書き込み成功したレコードの instant
//!
//! # 不変条件
//! - プロセスの生存期間中、checkpoint は後退しない

use chrono::{DateTime, Utc};

/// Checkpoint の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Checkpoint {
    #[default]
    Uninitialized,
    Initialized(DateTime<Utc>),
}

impl Checkpoint {
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Checkpoint::Uninitialized => None,
            Checkpoint::Initialized(instant) => Some(*instant),
        }
    }
}

/// CheckpointTracker は checkpoint を唯一所有する
///
/// 永続化は持たない。CheckpointStore への write-through は呼び出し側（Agent）が行う。
#[derive(Debug, Clone, Default)]
pub struct CheckpointTracker {
    state: Checkpoint,
}

impl CheckpointTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 永続化された instant から復元
    pub fn restored(instant: DateTime<Utc>) -> Self {
        Self {
            state: Checkpoint::Initialized(instant),
        }
    }

    pub fn state(&self) -> Checkpoint {
        self.state
    }

    /// 次の poll の下限。`None` なら過去 window を取得する
    pub fn boundary_for_next_poll(&self) -> Option<DateTime<Utc>> {
        self.state.instant()
    }

    /// candidate が現在より新しいときだけ前進する
    ///
    /// 前進したら `true`。古い candidate や `None` は無視される。
    pub fn advance(&mut self, candidate: Option<DateTime<Utc>>) -> bool {
        let Some(candidate) = candidate else {
            return false;
        };
        match self.state {
            Checkpoint::Initialized(current) if candidate <= current => false,
            _ => {
                self.state = Checkpoint::Initialized(candidate);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::codec::decode_instant;

    #[test]
    fn starts_uninitialized() {
        let tracker = CheckpointTracker::new();
        assert_eq!(tracker.state(), Checkpoint::Uninitialized);
        assert_eq!(tracker.boundary_for_next_poll(), None);
    }

    #[test]
    fn advance_initializes() {
        let mut tracker = CheckpointTracker::new();
        let t = decode_instant(1_000_000).unwrap();
        assert!(tracker.advance(Some(t)));
        assert_eq!(tracker.boundary_for_next_poll(), Some(t));
    }

    #[test]
    fn never_regresses() {
        let mut tracker = CheckpointTracker::new();
        let t0 = decode_instant(1_000_000).unwrap();
        let t1 = decode_instant(2_000_000).unwrap();

        tracker.advance(Some(t1));
        assert!(!tracker.advance(Some(t0)));
        assert_eq!(tracker.boundary_for_next_poll(), Some(t1));

        assert!(!tracker.advance(Some(t1)));
        assert!(!tracker.advance(None));
        assert_eq!(tracker.boundary_for_next_poll(), Some(t1));
    }

    #[test]
    fn restored_tracker_keeps_instant() {
        let t = decode_instant(1_700_000_000_000_001).unwrap();
        let tracker = CheckpointTracker::restored(t);
        assert_eq!(tracker.state(), Checkpoint::Initialized(t));
    }
}

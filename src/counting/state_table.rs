// src/counting/state_table.rs
//
// Per-track crossing state. A track starts UNCROSSED and may settle into
// CROSSED_GREEN or CROSSED_RED exactly once; after that the value is frozen
// for the rest of the run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CounterError;
use crate::signal::SignalPhase;
use crate::types::TrackId;

/// Serialized as the integers 0 / 1 / -1 used by the `pass` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i64")]
pub enum CrossingState {
    #[default]
    Uncrossed,
    CrossedGreen,
    CrossedRed,
}

impl CrossingState {
    pub fn from_phase(phase: SignalPhase) -> Self {
        match phase {
            SignalPhase::Green => Self::CrossedGreen,
            SignalPhase::Red => Self::CrossedRed,
        }
    }

    pub fn value(&self) -> i8 {
        match self {
            Self::Uncrossed => 0,
            Self::CrossedGreen => 1,
            Self::CrossedRed => -1,
        }
    }

    pub fn is_crossed(&self) -> bool {
        !matches!(self, Self::Uncrossed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uncrossed => "UNCROSSED",
            Self::CrossedGreen => "CROSSED_GREEN",
            Self::CrossedRed => "CROSSED_RED",
        }
    }
}

impl From<CrossingState> for i8 {
    fn from(state: CrossingState) -> Self {
        state.value()
    }
}

impl TryFrom<i64> for CrossingState {
    type Error = CounterError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Uncrossed),
            1 => Ok(Self::CrossedGreen),
            -1 => Ok(Self::CrossedRed),
            other => Err(CounterError::InvalidPassValue(other)),
        }
    }
}

/// Crossing state of every track seen during one run. Owned by the
/// aggregator; entries are created on first sight and never removed.
#[derive(Debug, Default)]
pub struct CrossingStateTable {
    states: HashMap<TrackId, CrossingState>,
}

impl CrossingStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `id`, inserting `Uncrossed` if the track is new.
    pub fn get_or_create(&mut self, id: TrackId) -> CrossingState {
        *self.states.entry(id).or_default()
    }

    pub fn get(&self, id: TrackId) -> Option<CrossingState> {
        self.states.get(&id).copied()
    }

    /// Settles `id` according to `phase`. Returns the new state when this
    /// call performed the transition, `None` if the track had already crossed.
    pub fn settle(&mut self, id: TrackId, phase: SignalPhase) -> Option<CrossingState> {
        let state = self.states.entry(id).or_default();
        if state.is_crossed() {
            return None;
        }
        *state = CrossingState::from_phase(phase);
        Some(*state)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn crossed_count(&self) -> usize {
        self.states.values().filter(|s| s.is_crossed()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TrackId, CrossingState)> + '_ {
        self.states.iter().map(|(id, state)| (*id, *state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_track_defaults_to_uncrossed() {
        let mut table = CrossingStateTable::new();
        assert_eq!(table.get(4), None);
        assert_eq!(table.get_or_create(4), CrossingState::Uncrossed);
        assert_eq!(table.get(4), Some(CrossingState::Uncrossed));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_settle_happens_once() {
        let mut table = CrossingStateTable::new();
        assert_eq!(
            table.settle(9, SignalPhase::Red),
            Some(CrossingState::CrossedRed)
        );
        // Later phases never overwrite the first transition
        assert_eq!(table.settle(9, SignalPhase::Green), None);
        assert_eq!(table.settle(9, SignalPhase::Red), None);
        assert_eq!(table.get(9), Some(CrossingState::CrossedRed));
        assert_eq!(table.crossed_count(), 1);
    }

    #[test]
    fn test_pass_values() {
        assert_eq!(CrossingState::Uncrossed.value(), 0);
        assert_eq!(CrossingState::CrossedGreen.value(), 1);
        assert_eq!(CrossingState::CrossedRed.value(), -1);
        assert_eq!(CrossingState::try_from(-1).unwrap(), CrossingState::CrossedRed);
        assert!(matches!(
            CrossingState::try_from(2),
            Err(CounterError::InvalidPassValue(2))
        ));
    }
}

//! Playback lifecycle state shared between the control and real-time threads

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a [`StreamEngine`](super::StreamEngine)
///
/// ```text
/// Stopped ──start──► Starting ──► Running ──drain──► Draining ──join──► Stopped
///                                    └─────drop────► Dropped ───join──┘
/// ```
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    /// No real-time thread; the device is idle
    Stopped = 0,
    /// `start` won the race and is spawning the real-time thread
    Starting = 1,
    /// The real-time thread is writing periods
    Running = 2,
    /// Stop requested; the current period is finished, then the device drains
    Draining = 3,
    /// Stop requested; pending frames are discarded
    Dropped = 4,
}

impl PlaybackState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PlaybackState::Stopped,
            1 => PlaybackState::Starting,
            2 => PlaybackState::Running,
            3 => PlaybackState::Draining,
            _ => PlaybackState::Dropped,
        }
    }

    /// Whether the real-time loop should keep going
    pub fn is_active(self) -> bool {
        matches!(self, PlaybackState::Starting | PlaybackState::Running)
    }
}

/// [`PlaybackState`] in an atomic cell
#[derive(Debug)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub fn new(state: PlaybackState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self, order: Ordering) -> PlaybackState {
        PlaybackState::from_u8(self.0.load(order))
    }

    pub fn store(&self, state: PlaybackState, order: Ordering) {
        self.0.store(state as u8, order);
    }

    /// Move `from` → `to`; on failure returns the state actually observed
    pub fn transition(&self, from: PlaybackState, to: PlaybackState) -> Result<(), PlaybackState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(PlaybackState::from_u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_reports_observed_state() {
        let state = AtomicState::new(PlaybackState::Stopped);
        assert_eq!(
            state.transition(PlaybackState::Stopped, PlaybackState::Starting),
            Ok(())
        );
        assert_eq!(
            state.transition(PlaybackState::Stopped, PlaybackState::Starting),
            Err(PlaybackState::Starting)
        );
        state.store(PlaybackState::Running, Ordering::Release);
        assert_eq!(state.load(Ordering::Acquire), PlaybackState::Running);
    }

    #[test]
    fn test_active_states() {
        assert!(PlaybackState::Starting.is_active());
        assert!(PlaybackState::Running.is_active());
        assert!(!PlaybackState::Draining.is_active());
        assert!(!PlaybackState::Dropped.is_active());
        assert!(!PlaybackState::Stopped.is_active());
    }
}

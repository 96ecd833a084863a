//! Export job lifecycle.

use std::fmt;

use splice_core::{SpliceError, SpliceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Idle,
    Demuxing,
    Rendering,
    FlushingVideo,
    EncodingAudio,
    Finalized,
    Cancelled,
    Errored,
}

impl ExportState {
    /// Terminal states end the job. Only `Finalized` may still fall to
    /// `Errored`; `Cancelled` and `Errored` absorb everything.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExportState::Finalized | ExportState::Cancelled | ExportState::Errored
        )
    }

    pub fn can_transition(self, to: ExportState) -> bool {
        use ExportState::*;
        match self {
            Cancelled | Errored => return false,
            Finalized => return to == Errored,
            _ => {}
        }
        matches!(
            (self, to),
            (Idle, Demuxing)
                | (Demuxing, Rendering)
                | (Rendering, FlushingVideo)
                | (FlushingVideo, EncodingAudio)
                | (FlushingVideo, Finalized)
                | (EncodingAudio, Finalized)
                | (_, Cancelled)
                | (_, Errored)
        )
    }
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportState::Idle => "idle",
            ExportState::Demuxing => "demuxing",
            ExportState::Rendering => "rendering",
            ExportState::FlushingVideo => "flushing-video",
            ExportState::EncodingAudio => "encoding-audio",
            ExportState::Finalized => "finalized",
            ExportState::Cancelled => "cancelled",
            ExportState::Errored => "errored",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct StateMachine {
    state: ExportState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            state: ExportState::Idle,
        }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn transition(&mut self, to: ExportState) -> SpliceResult<()> {
        if !self.state.can_transition(to) {
            return Err(SpliceError::Render(format!(
                "illegal export transition {} -> {}",
                self.state, to
            )));
        }
        tracing::debug!(from = %self.state, to = %to, "export state");
        self.state = to;
        Ok(())
    }

    /// Enter `Cancelled` unless already terminal.
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = ExportState::Cancelled;
        }
    }

    /// Enter `Errored` unless already cancelled or errored.
    pub fn fail(&mut self) {
        if self.state.can_transition(ExportState::Errored) {
            self.state = ExportState::Errored;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_with_audio() {
        let mut sm = StateMachine::new();
        for next in [
            ExportState::Demuxing,
            ExportState::Rendering,
            ExportState::FlushingVideo,
            ExportState::EncodingAudio,
            ExportState::Finalized,
        ] {
            sm.transition(next).unwrap();
        }
        assert_eq!(sm.state(), ExportState::Finalized);
    }

    #[test]
    fn test_audio_is_optional() {
        assert!(ExportState::FlushingVideo.can_transition(ExportState::Finalized));
        assert!(!ExportState::Rendering.can_transition(ExportState::EncodingAudio));
        assert!(!ExportState::Idle.can_transition(ExportState::Rendering));
    }

    #[test]
    fn test_terminal_states_absorb() {
        let mut sm = StateMachine::new();
        sm.transition(ExportState::Demuxing).unwrap();
        sm.cancel();
        assert_eq!(sm.state(), ExportState::Cancelled);
        sm.fail();
        assert_eq!(sm.state(), ExportState::Cancelled);
        assert!(sm.transition(ExportState::Rendering).is_err());

        assert!(!ExportState::Finalized.can_transition(ExportState::Cancelled));
        assert!(ExportState::Finalized.can_transition(ExportState::Errored));
        assert!(!ExportState::Errored.can_transition(ExportState::Cancelled));
        assert!(!ExportState::Errored.can_transition(ExportState::Errored));
    }

    #[test]
    fn test_cancel_and_error_reachable_from_every_live_state() {
        for state in [
            ExportState::Idle,
            ExportState::Demuxing,
            ExportState::Rendering,
            ExportState::FlushingVideo,
            ExportState::EncodingAudio,
        ] {
            assert!(state.can_transition(ExportState::Cancelled), "{}", state);
            assert!(state.can_transition(ExportState::Errored), "{}", state);
        }
    }
}

//! Link session state machine

use mpi_core::{MpiError, MpiResult};

/// Link session state
///
/// # State Transitions
/// ```text
/// Closed -> Opening (on open())
/// Opening -> Open (on handshake OK)
/// Open -> Closing (on close())
/// Closing -> Closed (on handshake OK or timeout)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No channel handshake has completed (initial state)
    #[default]
    Closed,
    /// Open control frame sent, waiting for the peer's reply
    Opening,
    /// Handshake completed, requests can be exchanged
    Open,
    /// Close control frame sent, waiting for the peer's reply
    Closing,
}

impl LinkState {
    /// Check if requests can be issued
    pub fn can_send(&self) -> bool {
        matches!(self, LinkState::Open)
    }

    /// Validate a state transition
    pub fn validate_transition(&self, new_state: LinkState) -> MpiResult<()> {
        let valid = matches!(
            (*self, new_state),
            (LinkState::Closed, LinkState::Opening)
                | (LinkState::Opening, LinkState::Open)
                | (LinkState::Opening, LinkState::Closed) // handshake failed
                | (LinkState::Open, LinkState::Closing)
                | (LinkState::Open, LinkState::Closed) // channel died
                | (LinkState::Closing, LinkState::Closed)
                | (LinkState::Closed, LinkState::Closed)
        );

        if valid {
            Ok(())
        } else {
            Err(MpiError::Protocol(format!(
                "Invalid link state transition: {:?} -> {:?}",
                self, new_state
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let state = LinkState::Closed;
        state.validate_transition(LinkState::Opening).unwrap();
        LinkState::Opening.validate_transition(LinkState::Open).unwrap();
        LinkState::Open.validate_transition(LinkState::Closing).unwrap();
        LinkState::Closing.validate_transition(LinkState::Closed).unwrap();
    }

    #[test]
    fn test_invalid_transition() {
        assert!(LinkState::Closed.validate_transition(LinkState::Open).is_err());
        assert!(LinkState::Closing.validate_transition(LinkState::Open).is_err());
    }
}

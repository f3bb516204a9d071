//! The state machine a single recovery process walks through. Each CLI verb
//! starts a fresh process, so only forward transitions within one process
//! lifetime are ever exercised; this type exists to make an out-of-order
//! call a compile-visible logic error rather than a silent no-op.

use exfat_core::RecoveryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opened,
    Scanned,
    LogPersisted,
    Loaded,
    Extracted,
    MetadataWritten,
    Both,
    Closed,
}

impl SessionState {
    /// Whether `self -> next` is a permitted forward transition.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Opened, Scanned)
                | (Scanned, LogPersisted)
                | (LogPersisted, Loaded)
                | (Loaded, Extracted)
                | (Loaded, MetadataWritten)
                | (Extracted, MetadataWritten)
                | (MetadataWritten, Extracted)
                | (Extracted, Both)
                | (MetadataWritten, Both)
                | (Extracted, Closed)
                | (MetadataWritten, Closed)
                | (Both, Closed)
                | (Loaded, Closed)
        )
    }

    pub fn advance(&mut self, next: SessionState) -> Result<(), RecoveryError> {
        if !self.can_advance_to(next) {
            return Err(RecoveryError::NonContiguous(format!(
                "illegal session transition {self:?} -> {next:?}"
            )));
        }
        *self = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_allowed() {
        let mut state = SessionState::Opened;
        state.advance(SessionState::Scanned).unwrap();
        state.advance(SessionState::LogPersisted).unwrap();
        state.advance(SessionState::Loaded).unwrap();
        state.advance(SessionState::Extracted).unwrap();
        state.advance(SessionState::Closed).unwrap();
    }

    #[test]
    fn backward_transition_rejected() {
        let mut state = SessionState::Loaded;
        assert!(state.advance(SessionState::Opened).is_err());
    }
}

//! Session lifecycle states.

use std::fmt;

/// Where a session is in its lifecycle.
///
/// ```text
/// Unmounted ──► Mounting ──► Active ──► Unmounting ──► Unmounted
///                   │                                      ▲
///                   └──────── handshake failure ───────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unmounted,
    Mounting,
    Active,
    Unmounting,
}

impl SessionState {
    /// Whether moving from `self` to `next` follows the lifecycle.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Unmounted, Mounting)
                | (Mounting, Active)
                | (Mounting, Unmounted)
                | (Active, Unmounting)
                | (Unmounting, Unmounted)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unmounted => "unmounted",
            SessionState::Mounting => "mounting",
            SessionState::Active => "active",
            SessionState::Unmounting => "unmounting",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use SessionState::*;
        assert!(Unmounted.can_transition_to(Mounting));
        assert!(Mounting.can_transition_to(Active));
        assert!(Mounting.can_transition_to(Unmounted));
        assert!(Active.can_transition_to(Unmounting));
        assert!(Unmounting.can_transition_to(Unmounted));

        assert!(!Unmounted.can_transition_to(Active));
        assert!(!Active.can_transition_to(Unmounted));
        assert!(!Unmounting.can_transition_to(Active));
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionState::Active.to_string(), "active");
        assert_eq!(SessionState::Unmounting.to_string(), "unmounting");
    }
}

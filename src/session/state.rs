use std::fmt;

/// Lifecycle of one live session.
///
/// `Idle → Connecting → Active → Closing → Closed`, and back to
/// `Connecting` from `Closed` on restart. A failed connect goes straight from
/// `Connecting` to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    /// Whether `start()` may begin a new connection from here.
    pub fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Closed)
    }

    /// Connecting, Active or Closing.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Connecting | Self::Active | Self::Closing)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Closed, Connecting)
                | (Connecting, Active)
                | (Connecting, Closing)
                | (Connecting, Closed)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;

    #[test]
    fn restart_only_from_rest() {
        assert!(Idle.can_start());
        assert!(Closed.can_start());
        assert!(!Connecting.can_start());
        assert!(!Active.can_start());
        assert!(!Closing.can_start());
    }

    #[test]
    fn transitions() {
        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Closed));
        assert!(Active.can_transition_to(Closing));
        assert!(!Active.can_transition_to(Closed));
        assert!(!Idle.can_transition_to(Active));
        assert!(!Closed.can_transition_to(Active));
    }
}

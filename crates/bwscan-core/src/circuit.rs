use serde::{Deserialize, Serialize};

/// Opaque circuit identifier assigned by the anonymity daemon at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CircuitId(pub u64);

impl std::fmt::Display for CircuitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CircuitId {
    fn from(id: u64) -> Self {
        CircuitId(id)
    }
}

/// Lifecycle state of a circuit. Transitions: `Pending -> Built` (success),
/// `Pending -> Failed`, `Built -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Pending,
    Built,
    Failed,
    Closed,
}

impl CircuitState {
    pub fn can_transition_to(self, next: CircuitState) -> bool {
        matches!(
            (self, next),
            (CircuitState::Pending, CircuitState::Built)
                | (CircuitState::Pending, CircuitState::Failed)
                | (CircuitState::Built, CircuitState::Closed)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions() {
        assert!(CircuitState::Pending.can_transition_to(CircuitState::Built));
        assert!(CircuitState::Pending.can_transition_to(CircuitState::Failed));
        assert!(CircuitState::Built.can_transition_to(CircuitState::Closed));
        assert!(!CircuitState::Closed.can_transition_to(CircuitState::Built));
        assert!(!CircuitState::Failed.can_transition_to(CircuitState::Built));
    }
}

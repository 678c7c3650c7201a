use serde::{Deserialize, Serialize};

/// Existence tag attached to every managed resource production.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum DesiredState {
    #[default]
    Present,
    Absent,
}

impl DesiredState {
    /// Resolve a resource-level toggle against the owning component's. Absent wins.
    pub fn combine(self, other: DesiredState) -> DesiredState {
        if self == DesiredState::Absent || other == DesiredState::Absent {
            DesiredState::Absent
        } else {
            DesiredState::Present
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DesiredState::Present => "present",
            DesiredState::Absent => "absent",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DesiredState::*;

    #[test]
    fn absent_wins() {
        assert_eq!(Present.combine(Present), Present);
        assert_eq!(Present.combine(Absent), Absent);
        assert_eq!(Absent.combine(Present), Absent);
        assert_eq!(Absent.combine(Absent), Absent);
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cycle engine phases, in forced order.
///
/// No phase may be skipped and no completed phase re-entered within a cycle;
/// each active phase is re-evaluated on every tick batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CyclePhase {
    /// Selecting the cycle's instrument universe around the target price
    Init,
    /// Recomputing per-instrument metrics, running the signal-filter pipeline
    Update,
    /// Resolving the pair against the reference price and placing buys
    FinalRef,
    /// Fallback re-confirmation path when the calc-ref signal fired instead
    Ref3,
    /// Holding: mark-to-market scenario evaluation until an exit fires
    Diff10,
    /// Waiting for cross-instance completion quorum, then resetting
    NextCycle,
}

impl CyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CyclePhase::Init => "INIT",
            CyclePhase::Update => "UPDATE",
            CyclePhase::FinalRef => "FINAL_REF",
            CyclePhase::Ref3 => "REF3",
            CyclePhase::Diff10 => "DIFF10",
            CyclePhase::NextCycle => "NEXT_CYCLE",
        }
    }

    /// Check if this phase can transition to another phase
    pub fn can_transition_to(&self, target: CyclePhase) -> bool {
        use CyclePhase::*;

        match (self, target) {
            (Init, Update) => true,
            // The pipeline resolves to one of two confirmation paths
            (Update, FinalRef) => true,
            (Update, Ref3) => true,
            (FinalRef, Diff10) => true,
            (Ref3, Diff10) => true,
            (Diff10, NextCycle) => true,
            // Cycle reset
            (NextCycle, Init) => true,
            _ => false,
        }
    }

    /// Get valid next phases from the current phase
    pub fn valid_transitions(&self) -> Vec<CyclePhase> {
        use CyclePhase::*;

        match self {
            Init => vec![Update],
            Update => vec![FinalRef, Ref3],
            FinalRef => vec![Diff10],
            Ref3 => vec![Diff10],
            Diff10 => vec![NextCycle],
            NextCycle => vec![Init],
        }
    }

    /// Is the engine holding a position in this phase?
    pub fn is_holding(&self) -> bool {
        matches!(self, CyclePhase::Diff10)
    }

    /// Does this phase place orders through the gateway?
    pub fn places_orders(&self) -> bool {
        matches!(
            self,
            CyclePhase::FinalRef | CyclePhase::Ref3 | CyclePhase::Diff10
        )
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for CyclePhase {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "INIT" => Ok(CyclePhase::Init),
            "UPDATE" => Ok(CyclePhase::Update),
            "FINAL_REF" => Ok(CyclePhase::FinalRef),
            "REF3" => Ok(CyclePhase::Ref3),
            "DIFF10" => Ok(CyclePhase::Diff10),
            "NEXT_CYCLE" => Ok(CyclePhase::NextCycle),
            _ => Err(format!("Unknown phase: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use CyclePhase::*;

        assert!(Init.can_transition_to(Update));
        assert!(Update.can_transition_to(FinalRef));
        assert!(Update.can_transition_to(Ref3));
        assert!(FinalRef.can_transition_to(Diff10));
        assert!(Ref3.can_transition_to(Diff10));
        assert!(Diff10.can_transition_to(NextCycle));
        assert!(NextCycle.can_transition_to(Init));

        // No skipping, no going backwards
        assert!(!Init.can_transition_to(Diff10));
        assert!(!Update.can_transition_to(Init));
        assert!(!FinalRef.can_transition_to(Ref3));
        assert!(!Diff10.can_transition_to(Update));
    }

    #[test]
    fn test_phase_from_str() {
        assert_eq!(CyclePhase::try_from("INIT").unwrap(), CyclePhase::Init);
        assert_eq!(
            CyclePhase::try_from("final_ref").unwrap(),
            CyclePhase::FinalRef
        );
        assert!(CyclePhase::try_from("INVALID").is_err());
    }

    #[test]
    fn test_is_holding() {
        assert!(CyclePhase::Diff10.is_holding());
        assert!(!CyclePhase::Init.is_holding());
        assert!(!CyclePhase::NextCycle.is_holding());
    }
}

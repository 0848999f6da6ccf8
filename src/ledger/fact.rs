use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of distinct instances that must log COMPLETE before a cycle is
/// considered finished. Fixed by design: exactly two shadow runs work each
/// logical cycle.
pub const COMPLETION_QUORUM: usize = 2;

/// How a cycle's position was closed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionMethod {
    Complete,
    ExitAtCost,
    ExitAtStoploss,
    TargetHit,
}

impl CompletionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionMethod::Complete => "COMPLETE",
            CompletionMethod::ExitAtCost => "EXIT_AT_COST",
            CompletionMethod::ExitAtStoploss => "EXIT_AT_STOPLOSS",
            CompletionMethod::TargetHit => "TARGET_HIT",
        }
    }

    pub fn parse(tag: &str) -> Option<CompletionMethod> {
        match tag {
            "COMPLETE" => Some(CompletionMethod::Complete),
            "EXIT_AT_COST" => Some(CompletionMethod::ExitAtCost),
            "EXIT_AT_STOPLOSS" => Some(CompletionMethod::ExitAtStoploss),
            "TARGET_HIT" => Some(CompletionMethod::TargetHit),
            _ => None,
        }
    }
}

impl fmt::Display for CompletionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON-payload fact kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayloadKind {
    PrebuyInstruments,
    PreviousCompletionMethod,
    RebuyData,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::PrebuyInstruments => "PREBUY_INSTRUMENTS",
            PayloadKind::PreviousCompletionMethod => "PREVIOUS_COMPLETION_METHOD",
            PayloadKind::RebuyData => "REBUY_DATA",
        }
    }

    pub fn parse(tag: &str) -> Option<PayloadKind> {
        match tag {
            "PREBUY_INSTRUMENTS" => Some(PayloadKind::PrebuyInstruments),
            "PREVIOUS_COMPLETION_METHOD" => Some(PayloadKind::PreviousCompletionMethod),
            "REBUY_DATA" => Some(PayloadKind::RebuyData),
            _ => None,
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cycle-scoped fact in the coordination ledger.
///
/// Two wire layouts, distinguished by separator:
/// - `cycle:instance:TAG` for completion/exit/target facts
/// - `cycle|payloadJSON|TAG` for JSON-payload facts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CycleFact {
    Completion {
        cycle: u64,
        instance: String,
        method: CompletionMethod,
    },
    Payload {
        cycle: u64,
        kind: PayloadKind,
        payload: serde_json::Value,
    },
}

impl CycleFact {
    pub fn cycle(&self) -> u64 {
        match self {
            CycleFact::Completion { cycle, .. } => *cycle,
            CycleFact::Payload { cycle, .. } => *cycle,
        }
    }

    /// Encode to the newline-delimited wire format (no trailing newline)
    pub fn encode(&self) -> String {
        match self {
            CycleFact::Completion {
                cycle,
                instance,
                method,
            } => format!("{cycle}:{instance}:{method}"),
            CycleFact::Payload {
                cycle,
                kind,
                payload,
            } => format!("{cycle}|{payload}|{kind}"),
        }
    }

    /// Decode one ledger line. Malformed lines yield `None` and are skipped
    /// by the caller rather than failing the whole scan.
    pub fn decode(line: &str) -> Option<CycleFact> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if line.contains('|') {
            // cycle|payloadJSON|TAG — the JSON may itself contain pipes, so
            // split off the first and last fields only.
            let (cycle_raw, rest) = line.split_once('|')?;
            let (payload_raw, tag) = rest.rsplit_once('|')?;

            let cycle = cycle_raw.parse().ok()?;
            let kind = PayloadKind::parse(tag)?;
            let payload = serde_json::from_str(payload_raw).ok()?;

            Some(CycleFact::Payload {
                cycle,
                kind,
                payload,
            })
        } else {
            // cycle:instance:TAG
            let (cycle_raw, rest) = line.split_once(':')?;
            let (instance, tag) = rest.rsplit_once(':')?;

            let cycle = cycle_raw.parse().ok()?;
            let method = CompletionMethod::parse(tag)?;
            if instance.is_empty() {
                return None;
            }

            Some(CycleFact::Completion {
                cycle,
                instance: instance.to_string(),
                method,
            })
        }
    }
}

/// One leg of a broadcast pre-buy pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrebuyLeg {
    pub token: u32,
    pub symbol: String,
    /// Price at which the candidate was first observed; both instances
    /// confirm against the same reference
    pub observed: rust_decimal::Decimal,
}

/// Payload of a PREBUY_INSTRUMENTS fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrebuyPair {
    pub call: PrebuyLeg,
    pub put: PrebuyLeg,
}

/// Payload of a REBUY_DATA fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebuyNote {
    pub symbol: String,
    pub price: rust_decimal::Decimal,
}

/// Payload of a PREVIOUS_COMPLETION_METHOD fact
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreviousOutcome {
    pub method: CompletionMethod,
}

//! Three-tier parameter store.
//!
//! Each strategy instance owns one store with three scopes:
//! - *global*: trading economics (target, stoploss, quantity, rebuy level, …)
//! - *universal*: cross-cycle configuration (expiry day, cycle counter, modes)
//! - *block*: ephemeral per-phase scratch values, cleared on cycle reset
//!
//! Defaults are applied once at initialization and only where no value is
//! already present, so a store seeded from a previous run keeps its values.
//! External patches are validated against the declared kind; a rejected patch
//! leaves the prior value untouched.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::config::StrategyDefaults;
use crate::error::{Result, StraddleError};

/// Parameter scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamScope {
    Global,
    Universal,
    Block,
}

impl ParamScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamScope::Global => "global",
            ParamScope::Universal => "universal",
            ParamScope::Block => "block",
        }
    }

    /// Scopes accepted by the external patch command
    pub fn patchable(&self) -> bool {
        matches!(self, ParamScope::Global | ParamScope::Universal)
    }
}

impl fmt::Display for ParamScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamScope {
    type Err = StraddleError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(ParamScope::Global),
            "universal" => Ok(ParamScope::Universal),
            "block" => Ok(ParamScope::Block),
            other => Err(StraddleError::Validation(format!(
                "invalid parameter scope '{other}'; expected global|universal|block"
            ))),
        }
    }
}

/// Declared parameter kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Bool,
    Int,
    Price,
    Text,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Bool => "bool",
            ParamKind::Int => "int",
            ParamKind::Price => "price",
            ParamKind::Text => "text",
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Price(Decimal),
    Text(String),
}

impl ParamValue {
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Bool(_) => ParamKind::Bool,
            ParamValue::Int(_) => ParamKind::Int,
            ParamValue::Price(_) => ParamKind::Price,
            ParamValue::Text(_) => ParamKind::Text,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_price(&self) -> Option<Decimal> {
        match self {
            ParamValue::Price(v) => Some(*v),
            // An integer patch for a price parameter is unambiguous
            ParamValue::Int(v) => Some(Decimal::from(*v)),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this value satisfies the declared kind
    pub fn matches(&self, kind: ParamKind) -> bool {
        match kind {
            ParamKind::Price => self.as_price().is_some(),
            other => self.kind() == other,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Price(v) => write!(f, "{v}"),
            ParamValue::Text(v) => f.write_str(v),
        }
    }
}

/// Declared shape of one parameter
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub kind: ParamKind,
    pub default: ParamValue,
    pub description: &'static str,
}

#[derive(Debug, Clone)]
struct ParamEntry {
    spec: ParamSpec,
    value: Option<ParamValue>,
}

/// Parameter store owned by one strategy instance
#[derive(Debug, Clone)]
pub struct ParameterStore {
    global: HashMap<String, ParamEntry>,
    universal: HashMap<String, ParamEntry>,
    block: HashMap<String, ParamValue>,
}

fn declared(defaults: &StrategyDefaults, scope: ParamScope) -> Vec<(&'static str, ParamSpec)> {
    match scope {
        ParamScope::Global => vec![
            (
                "target",
                ParamSpec {
                    kind: ParamKind::Price,
                    default: ParamValue::Price(defaults.target),
                    description: "mark-to-market exit target in points",
                },
            ),
            (
                "stoploss",
                ParamSpec {
                    kind: ParamKind::Price,
                    default: ParamValue::Price(defaults.stoploss),
                    description: "stop-loss magnitude in points",
                },
            ),
            (
                "quantity",
                ParamSpec {
                    kind: ParamKind::Int,
                    default: ParamValue::Int(defaults.quantity),
                    description: "quantity per instrument leg",
                },
            ),
            (
                "rebuy_at",
                ParamSpec {
                    kind: ParamKind::Price,
                    default: ParamValue::Price(defaults.rebuy_at),
                    description: "rise above entry that triggers the rebuy",
                },
            ),
            (
                "target_price",
                ParamSpec {
                    kind: ParamKind::Price,
                    default: ParamValue::Price(defaults.target_price),
                    description: "anchor price for candidate selection",
                },
            ),
            (
                "reference_price",
                ParamSpec {
                    kind: ParamKind::Price,
                    default: ParamValue::Price(defaults.reference_price),
                    description: "reference price for the final pair pick",
                },
            ),
            (
                "band_step",
                ParamSpec {
                    kind: ParamKind::Price,
                    default: ParamValue::Price(defaults.band_step),
                    description: "selection band widening step",
                },
            ),
            (
                "confirm_gain",
                ParamSpec {
                    kind: ParamKind::Price,
                    default: ParamValue::Price(defaults.confirm_gain),
                    description: "pre-buy gain confirmation level",
                },
            ),
            (
                "confirm_loss",
                ParamSpec {
                    kind: ParamKind::Price,
                    default: ParamValue::Price(defaults.confirm_loss),
                    description: "pre-buy loss confirmation level",
                },
            ),
        ],
        ParamScope::Universal => vec![
            (
                "expiry_day",
                ParamSpec {
                    kind: ParamKind::Text,
                    default: ParamValue::Text(defaults.expiry_day.clone()),
                    description: "contract expiry day label",
                },
            ),
            (
                "cycle_number",
                ParamSpec {
                    kind: ParamKind::Int,
                    default: ParamValue::Int(1),
                    description: "current cycle counter",
                },
            ),
            (
                "use_prebuy",
                ParamSpec {
                    kind: ParamKind::Bool,
                    default: ParamValue::Bool(defaults.use_prebuy),
                    description: "observe candidates before committing capital",
                },
            ),
            (
                "enable_trading",
                ParamSpec {
                    kind: ParamKind::Bool,
                    default: ParamValue::Bool(defaults.enable_trading),
                    description: "route orders through the bound gateway",
                },
            ),
        ],
        ParamScope::Block => vec![],
    }
}

impl ParameterStore {
    /// Create a store with the declared schema but no values yet
    pub fn new(defaults: &StrategyDefaults) -> Self {
        let build = |scope| {
            declared(defaults, scope)
                .into_iter()
                .map(|(name, spec)| (name.to_string(), ParamEntry { spec, value: None }))
                .collect()
        };

        Self {
            global: build(ParamScope::Global),
            universal: build(ParamScope::Universal),
            block: HashMap::new(),
        }
    }

    /// Create a store and immediately apply all defaults
    pub fn with_defaults(defaults: &StrategyDefaults) -> Self {
        let mut store = Self::new(defaults);
        store.apply_defaults();
        store
    }

    /// Pre-set a value before defaults are applied (restart carryover).
    /// The value must still match the declared kind.
    pub fn seed(&mut self, scope: ParamScope, name: &str, value: ParamValue) -> Result<()> {
        self.write(scope, name, value)
    }

    /// Fill in declared defaults for every parameter with no value yet
    pub fn apply_defaults(&mut self) {
        for entry in self.global.values_mut().chain(self.universal.values_mut()) {
            if entry.value.is_none() {
                entry.value = Some(entry.spec.default.clone());
            }
        }
    }

    fn scope_map(&self, scope: ParamScope) -> Option<&HashMap<String, ParamEntry>> {
        match scope {
            ParamScope::Global => Some(&self.global),
            ParamScope::Universal => Some(&self.universal),
            ParamScope::Block => None,
        }
    }

    fn scope_map_mut(&mut self, scope: ParamScope) -> Option<&mut HashMap<String, ParamEntry>> {
        match scope {
            ParamScope::Global => Some(&mut self.global),
            ParamScope::Universal => Some(&mut self.universal),
            ParamScope::Block => None,
        }
    }

    /// Raw value lookup
    pub fn get(&self, scope: ParamScope, name: &str) -> Option<&ParamValue> {
        match scope {
            ParamScope::Block => self.block.get(name),
            _ => self
                .scope_map(scope)
                .and_then(|m| m.get(name))
                .and_then(|e| e.value.as_ref()),
        }
    }

    /// Typed write used internally by the engine (no notification)
    pub fn write(&mut self, scope: ParamScope, name: &str, value: ParamValue) -> Result<()> {
        if scope == ParamScope::Block {
            self.block.insert(name.to_string(), value);
            return Ok(());
        }

        let map = self
            .scope_map_mut(scope)
            .ok_or_else(|| StraddleError::Internal(format!("no map for scope {scope}")))?;

        let entry = map
            .get_mut(name)
            .ok_or_else(|| StraddleError::UnknownParameter {
                scope: scope.to_string(),
                name: name.to_string(),
            })?;

        if !value.matches(entry.spec.kind) {
            return Err(StraddleError::ParameterType {
                name: name.to_string(),
                expected: entry.spec.kind.to_string(),
                got: value.kind().to_string(),
            });
        }

        entry.value = Some(value);
        Ok(())
    }

    /// External patch: one key at a time, type-checked, patchable scopes only.
    /// On rejection the prior value is retained.
    pub fn patch(&mut self, scope: ParamScope, name: &str, value: ParamValue) -> Result<()> {
        if !scope.patchable() {
            return Err(StraddleError::Validation(format!(
                "scope {scope} is not externally patchable"
            )));
        }
        self.write(scope, name, value)
    }

    pub fn price(&self, scope: ParamScope, name: &str) -> Result<Decimal> {
        self.get(scope, name)
            .and_then(|v| v.as_price())
            .ok_or_else(|| StraddleError::UnknownParameter {
                scope: scope.to_string(),
                name: name.to_string(),
            })
    }

    pub fn int(&self, scope: ParamScope, name: &str) -> Result<i64> {
        self.get(scope, name)
            .and_then(|v| v.as_int())
            .ok_or_else(|| StraddleError::UnknownParameter {
                scope: scope.to_string(),
                name: name.to_string(),
            })
    }

    pub fn flag(&self, scope: ParamScope, name: &str) -> Result<bool> {
        self.get(scope, name)
            .and_then(|v| v.as_bool())
            .ok_or_else(|| StraddleError::UnknownParameter {
                scope: scope.to_string(),
                name: name.to_string(),
            })
    }

    /// Block-scope scratch accessors
    pub fn set_block(&mut self, name: &str, value: ParamValue) {
        self.block.insert(name.to_string(), value);
    }

    pub fn block(&self, name: &str) -> Option<&ParamValue> {
        self.block.get(name)
    }

    pub fn take_block(&mut self, name: &str) -> Option<ParamValue> {
        self.block.remove(name)
    }

    /// Drop all per-phase scratch state
    pub fn clear_blocks(&mut self) {
        self.block.clear();
    }

    /// Description of a declared parameter, if any
    pub fn describe(&self, scope: ParamScope, name: &str) -> Option<&'static str> {
        self.scope_map(scope)
            .and_then(|m| m.get(name))
            .map(|e| e.spec.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use rust_decimal_macros::dec;

    fn defaults() -> StrategyDefaults {
        AppConfig::default_config().strategy
    }

    #[test]
    fn test_defaults_applied_once() {
        let d = defaults();
        let mut store = ParameterStore::new(&d);

        // Value set externally before initialization must survive it
        store
            .seed(ParamScope::Global, "target", ParamValue::Price(dec!(42)))
            .unwrap();
        store.apply_defaults();

        assert_eq!(store.price(ParamScope::Global, "target").unwrap(), dec!(42));
        // Untouched parameters got their defaults
        assert_eq!(
            store.price(ParamScope::Global, "stoploss").unwrap(),
            dec!(10)
        );
    }

    #[test]
    fn test_patch_type_mismatch_keeps_prior_value() {
        let d = defaults();
        let mut store = ParameterStore::with_defaults(&d);

        let err = store.patch(
            ParamScope::Global,
            "target",
            ParamValue::Text("ten".to_string()),
        );
        assert!(err.is_err());
        assert_eq!(store.price(ParamScope::Global, "target").unwrap(), dec!(10));
    }

    #[test]
    fn test_patch_unknown_parameter() {
        let d = defaults();
        let mut store = ParameterStore::with_defaults(&d);

        let err = store.patch(ParamScope::Global, "bogus", ParamValue::Int(1));
        assert!(matches!(err, Err(StraddleError::UnknownParameter { .. })));
    }

    #[test]
    fn test_block_scope_is_free_form() {
        let d = defaults();
        let mut store = ParameterStore::with_defaults(&d);

        store.set_block("saved_target", ParamValue::Price(dec!(10)));
        assert_eq!(
            store.block("saved_target"),
            Some(&ParamValue::Price(dec!(10)))
        );

        store.clear_blocks();
        assert!(store.block("saved_target").is_none());
    }

    #[test]
    fn test_block_not_patchable() {
        let d = defaults();
        let mut store = ParameterStore::with_defaults(&d);

        assert!(store
            .patch(ParamScope::Block, "scratch", ParamValue::Int(1))
            .is_err());
    }

    #[test]
    fn test_int_patch_accepted_for_price_kind() {
        let d = defaults();
        let mut store = ParameterStore::with_defaults(&d);

        store
            .patch(ParamScope::Global, "target", ParamValue::Int(12))
            .unwrap();
        assert_eq!(store.price(ParamScope::Global, "target").unwrap(), dec!(12));
    }
}

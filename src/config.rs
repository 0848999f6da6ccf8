use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub dispatcher: DispatcherSettings,
    pub strategy: StrategyDefaults,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherSettings {
    /// Maximum per-user jobs in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_concurrent() -> usize {
    10
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// Default values seeded into each user's parameter store.
///
/// A value already present in the store (restart carryover, external patch
/// before startup) wins over these.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyDefaults {
    /// Mark-to-market target in points
    pub target: Decimal,
    /// Stop-loss magnitude in points (engine exits at -stoploss)
    pub stoploss: Decimal,
    /// Quantity per instrument leg
    pub quantity: i64,
    /// Price rise above entry that triggers the rebuy scenario
    pub rebuy_at: Decimal,
    /// Anchor price used to rank candidates during instrument selection
    pub target_price: Decimal,
    /// Reference price used to resolve the final instrument pair
    pub reference_price: Decimal,
    /// Step by which the selection band widens per evaluation
    pub band_step: Decimal,
    /// Gain from the observation price that confirms a pre-buy candidate
    pub confirm_gain: Decimal,
    /// Fall from the observation price that confirms the opposite candidate
    pub confirm_loss: Decimal,
    /// Contract expiry day label (universal scope)
    #[serde(default = "default_expiry_day")]
    pub expiry_day: String,
    /// Observe both candidates before committing capital to one
    #[serde(default)]
    pub use_prebuy: bool,
    /// Route orders through the bound gateway; paper-fill internally when off
    #[serde(default = "default_enable_trading")]
    pub enable_trading: bool,
}

fn default_expiry_day() -> String {
    "THURSDAY".to_string()
}

fn default_enable_trading() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LedgerConfig {
    /// Directory for per-user coordination ledger files (memory-only if unset)
    #[serde(default)]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("dispatcher.max_concurrent", 10)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("STRADDLE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (STRADDLE_STRATEGY__TARGET, etc.)
            .add_source(
                Environment::with_prefix("STRADDLE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Create a default configuration for CLI usage
    pub fn default_config() -> Self {
        use rust_decimal_macros::dec;

        Self {
            dispatcher: DispatcherSettings::default(),
            strategy: StrategyDefaults {
                target: dec!(10),
                stoploss: dec!(10),
                quantity: 75,
                rebuy_at: dec!(10),
                target_price: dec!(200),
                reference_price: dec!(200),
                band_step: dec!(25),
                confirm_gain: dec!(3),
                confirm_loss: dec!(3),
                expiry_day: default_expiry_day(),
                use_prebuy: false,
                enable_trading: true,
            },
            ledger: LedgerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.dispatcher.max_concurrent == 0 {
            errors.push("dispatcher.max_concurrent must be at least 1".to_string());
        }

        if self.strategy.target <= Decimal::ZERO {
            errors.push("strategy.target must be positive".to_string());
        }

        if self.strategy.stoploss <= Decimal::ZERO {
            errors.push("strategy.stoploss must be a positive magnitude".to_string());
        }

        if self.strategy.quantity <= 0 {
            errors.push("strategy.quantity must be positive".to_string());
        }

        if self.strategy.rebuy_at <= Decimal::ZERO {
            errors.push("strategy.rebuy_at must be positive".to_string());
        }

        if self.strategy.band_step <= Decimal::ZERO {
            errors.push("strategy.band_step must be positive".to_string());
        }

        if self.strategy.target_price <= Decimal::ZERO {
            errors.push("strategy.target_price must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_validates() {
        let config = AppConfig::default_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default_config();
        config.dispatcher.max_concurrent = 0;
        config.strategy.target = dec!(0);

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}

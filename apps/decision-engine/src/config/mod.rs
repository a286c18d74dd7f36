//! Configuration for the decision engine.
//!
//! Configuration is loaded from a YAML file with `${VAR}` /
//! `${VAR:-default}` environment interpolation, then validated. An
//! invalid configuration is fatal at startup; nothing runs on unsafe
//! settings.

mod analysts;
mod broker;
mod journal;
mod marketdata;
mod monitor;
mod notifications;
mod retry;
mod risk;
mod safety;
mod scheduler;
mod server;
mod synthesis;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use analysts::AnalystsConfig;
pub use broker::{BrokerConfig, BrokerKind, Environment};
pub use journal::JournalConfig;
pub use marketdata::MarketDataConfig;
pub use monitor::MonitorConfig;
pub use notifications::NotificationsConfig;
pub use retry::RetryConfig;
pub use risk::{RiskLimitsConfig, UNCLASSIFIED_SECTOR};
pub use safety::SafetyConfig;
pub use scheduler::SchedulerConfig;
pub use server::ServerConfig;
pub use synthesis::SynthesisConfig;

use crate::gate::SafetyLevel;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),

    /// Missing required environment variable.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Safety gate configuration.
    #[serde(default)]
    pub safety: SafetyConfig,
    /// Risk limit thresholds.
    #[serde(default)]
    pub risk_limits: RiskLimitsConfig,
    /// Broker retry behavior.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Independent risk monitor.
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Continuous-mode scheduler.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Analyst capability selection and tuning.
    #[serde(default)]
    pub analysts: AnalystsConfig,
    /// Decision synthesis policy.
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    /// Broker adapter binding.
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Journal persistence.
    #[serde(default)]
    pub journal: JournalConfig,
    /// Control API server.
    #[serde(default)]
    pub server: ServerConfig,
    /// Alert notifications.
    #[serde(default)]
    pub notifications: NotificationsConfig,
    /// In-process market data series.
    #[serde(default)]
    pub market_data: MarketDataConfig,
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax. A variable that
/// is unset or empty falls back to its default, or the empty string.
#[allow(clippy::expect_used)] // pattern is a compile-time constant
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let fallback = caps.get(2).map_or("", |m| m.as_str());
        match std::env::var(&caps[1]) {
            Ok(value) if !value.is_empty() => value,
            _ => fallback.to_string(),
        }
    })
    .into_owned()
}

fn check_unit_fraction(name: &str, value: Decimal) -> Result<(), ConfigError> {
    if value <= Decimal::ZERO || value > Decimal::ONE {
        return Err(ConfigError::ValidationError(format!(
            "{name} must be in (0, 1], got {value}"
        )));
    }
    Ok(())
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let limits = &config.risk_limits;
    check_unit_fraction("risk_limits.max_position_weight", limits.max_position_weight)?;
    check_unit_fraction("risk_limits.max_sector_weight", limits.max_sector_weight)?;
    check_unit_fraction("risk_limits.max_drawdown", limits.max_drawdown)?;
    check_unit_fraction("risk_limits.max_concentration", limits.max_concentration)?;
    check_unit_fraction("risk_limits.scale_down_factor", limits.scale_down_factor)?;

    if limits.min_confidence < Decimal::ZERO || limits.min_confidence > Decimal::ONE {
        return Err(ConfigError::ValidationError(format!(
            "risk_limits.min_confidence must be in [0, 1], got {}",
            limits.min_confidence
        )));
    }

    let synthesis = &config.synthesis;
    if synthesis.score_epsilon < Decimal::ZERO || synthesis.score_epsilon >= Decimal::ONE {
        return Err(ConfigError::ValidationError(format!(
            "synthesis.score_epsilon must be in [0, 1), got {}",
            synthesis.score_epsilon
        )));
    }
    check_unit_fraction(
        "synthesis.trade_budget_fraction",
        synthesis.trade_budget_fraction,
    )?;

    if config.retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "retry.max_attempts must be at least 1".to_string(),
        ));
    }

    if config.monitor.interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "monitor.interval_secs must be at least 1".to_string(),
        ));
    }
    if config.monitor.failure_threshold == 0 {
        return Err(ConfigError::ValidationError(
            "monitor.failure_threshold must be at least 1".to_string(),
        ));
    }
    if config.monitor.equity_window < 2 {
        return Err(ConfigError::ValidationError(
            "monitor.equity_window must be at least 2".to_string(),
        ));
    }
    check_unit_fraction(
        "monitor.max_window_drawdown",
        config.monitor.max_window_drawdown,
    )?;

    if config.scheduler.run_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.run_interval_secs must be at least 1".to_string(),
        ));
    }

    if config.safety.approval_expiry_secs == 0 {
        return Err(ConfigError::ValidationError(
            "safety.approval_expiry_secs must be at least 1".to_string(),
        ));
    }

    // Halted is reachable only through the emergency path, never at startup.
    if config.safety.initial_level == SafetyLevel::Halted {
        return Err(ConfigError::ValidationError(
            "safety.initial_level must not be HALTED".to_string(),
        ));
    }

    if config.safety.initial_level == SafetyLevel::AutoTrading {
        tracing::warn!(
            environment = %config.broker.environment,
            "Engine configured to start in AUTO_TRADING; orders will flow without manual review"
        );
    }

    if config.analysts.timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "analysts.timeout_ms must be at least 1".to_string(),
        ));
    }
    if config.analysts.max_concurrent == 0 {
        return Err(ConfigError::ValidationError(
            "analysts.max_concurrent must be at least 1".to_string(),
        ));
    }
    if config.analysts.lookback < 2 {
        return Err(ConfigError::ValidationError(
            "analysts.lookback must be at least 2".to_string(),
        ));
    }
    if config.analysts.momentum_entry_return <= Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "analysts.momentum_entry_return must be positive".to_string(),
        ));
    }
    if config.analysts.reversion_entry_ratio <= Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "analysts.reversion_entry_ratio must be positive".to_string(),
        ));
    }
    if config.analysts.calm_volatility <= Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "analysts.calm_volatility must be positive".to_string(),
        ));
    }
    if config.analysts.stressed_volatility <= config.analysts.calm_volatility {
        return Err(ConfigError::ValidationError(
            "analysts.stressed_volatility must exceed calm_volatility".to_string(),
        ));
    }

    let mut seen_analysts = std::collections::HashSet::new();
    for name in &config.analysts.enabled {
        if !crate::analysts::is_known(name) {
            return Err(ConfigError::ValidationError(format!(
                "analysts.enabled contains unknown capability '{name}'"
            )));
        }
        if !seen_analysts.insert(name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "analysts.enabled lists '{name}' more than once"
            )));
        }
    }

    if config.broker.kind == BrokerKind::Alpaca {
        if config.broker.api_key.is_empty() {
            return Err(ConfigError::MissingEnvVar("ALPACA_API_KEY".to_string()));
        }
        if config.broker.api_secret.is_empty() {
            return Err(ConfigError::MissingEnvVar("ALPACA_API_SECRET".to_string()));
        }
    }

    Ok(())
}

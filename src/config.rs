use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_PENDING_ORDER_TTL_SECS: u64 = 10 * 60;
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 60;
const DEFAULT_REAPER_BATCH_SIZE: u64 = 500;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_GATEWAY_BASE_URL: &str = "https://api.stripe.com";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// HS256 secret shared with the identity provider
    #[validate(length(min = 32, message = "jwt_secret must be at least 32 characters"))]
    pub jwt_secret: String,

    /// Expected `iss` claim; unchecked when absent
    #[serde(default)]
    pub jwt_issuer: Option<String>,

    /// ISO 4217 currency code sent to the payment gateway
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3, message = "currency must be a 3-letter code"))]
    pub currency: String,

    /// Payment gateway API base URL
    #[serde(default = "default_gateway_base_url")]
    pub payment_gateway_base_url: String,

    /// Payment gateway secret API key
    #[validate(length(min = 1, message = "payment_gateway_secret_key is required"))]
    pub payment_gateway_secret_key: String,

    /// Shared secret for verifying payment gateway callbacks
    #[validate(length(min = 16, message = "payment_webhook_secret must be at least 16 characters"))]
    pub payment_webhook_secret: String,

    /// Webhook timestamp tolerance (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub payment_webhook_tolerance_secs: u64,

    /// Redirect after a completed hosted payment; `{ORDER_ID}` is substituted
    pub checkout_success_url: String,

    /// Redirect after an abandoned hosted payment; `{ORDER_ID}` is substituted
    pub checkout_cancel_url: String,

    /// Age after which a still-unpaid order is reaped
    #[serde(default = "default_pending_order_ttl_secs")]
    #[validate(custom = "validate_non_zero_secs")]
    pub pending_order_ttl_secs: u64,

    /// Expiry reaper tick
    #[serde(default = "default_reaper_interval_secs")]
    #[validate(custom = "validate_non_zero_secs")]
    pub reaper_interval_secs: u64,

    /// Return reserved stock and coupon usage when an order is reaped
    #[serde(default = "default_true_bool")]
    pub reaper_restore_reservations: bool,

    /// Upper bound of orders examined per reaper pass
    #[serde(default = "default_reaper_batch_size")]
    #[validate(custom = "validate_non_zero_secs")]
    pub reaper_batch_size: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Creates a new configuration with defaults for everything that has one
    pub fn new(
        database_url: String,
        jwt_secret: String,
        payment_gateway_secret_key: String,
        payment_webhook_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            jwt_secret,
            jwt_issuer: None,
            currency: default_currency(),
            payment_gateway_base_url: default_gateway_base_url(),
            payment_gateway_secret_key,
            payment_webhook_secret,
            payment_webhook_tolerance_secs: default_webhook_tolerance_secs(),
            checkout_success_url: "http://localhost:3000/orders/{ORDER_ID}?paid=1".to_string(),
            checkout_cancel_url: "http://localhost:3000/cart?order={ORDER_ID}".to_string(),
            pending_order_ttl_secs: default_pending_order_ttl_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
            reaper_restore_reservations: default_true_bool(),
            reaper_batch_size: default_reaper_batch_size(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn pending_order_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pending_order_ttl_secs as i64)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    /// Explicit CORS origins, if any are configured
    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.is_production() && self.cors_origins().is_empty() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some("Set APP__CORS_ALLOWED_ORIGINS in production".into());
            errors.add("cors_allowed_origins", err);
        }

        for (field, url) in [
            ("checkout_success_url", &self.checkout_success_url),
            ("checkout_cancel_url", &self.checkout_cancel_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                let mut err = ValidationError::new("absolute_url");
                err.message = Some("Redirect URLs must be absolute http(s) URLs".into());
                errors.add(field, err);
            }
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_true_bool() -> bool {
    true
}

fn default_currency() -> String {
    "INR".to_string()
}

fn default_gateway_base_url() -> String {
    DEFAULT_GATEWAY_BASE_URL.to_string()
}

fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_pending_order_ttl_secs() -> u64 {
    DEFAULT_PENDING_ORDER_TTL_SECS
}

fn default_reaper_interval_secs() -> u64 {
    DEFAULT_REAPER_INTERVAL_SECS
}

fn default_reaper_batch_size() -> u64 {
    DEFAULT_REAPER_BATCH_SIZE
}

fn default_event_channel_capacity() -> usize {
    1024
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_non_zero_secs(value: u64) -> Result<(), ValidationError> {
    if value == 0 {
        let mut err = ValidationError::new("non_zero");
        err.message = Some("must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_checkout={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // Secrets have no defaults and must come from a config file or APP__* variables.
    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default(
            "checkout_success_url",
            "http://localhost:3000/orders/{ORDER_ID}?paid=1",
        )?
        .set_default(
            "checkout_cancel_url",
            "http://localhost:3000/cart?order={ORDER_ID}",
        )?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    for secret in [
        "jwt_secret",
        "payment_gateway_secret_key",
        "payment_webhook_secret",
    ] {
        if config.get_string(secret).is_err() {
            error!(
                "{} is not configured. Set APP__{} in the environment.",
                secret,
                secret.to_ascii_uppercase()
            );
            return Err(AppConfigError::Load(ConfigError::NotFound(secret.into())));
        }
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "a_reasonably_long_jwt_secret_for_tests_0123456789".into(),
            "sk_test_123".into(),
            "whsec_test_secret_value".into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
        )
    }

    #[test]
    fn defaults_match_reaper_contract() {
        let cfg = base_config();
        assert_eq!(cfg.pending_order_ttl(), chrono::Duration::minutes(10));
        assert_eq!(cfg.reaper_interval(), Duration::from_secs(60));
        assert!(cfg.reaper_restore_reservations);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn production_requires_cors_origins() {
        let mut cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());
        cfg.cors_allowed_origins = Some("https://shop.example, ".into());
        assert_eq!(cfg.cors_origins(), vec!["https://shop.example".to_string()]);
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn relative_redirect_urls_are_rejected() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        cfg.checkout_success_url = "/orders/{ORDER_ID}".into();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("checkout_success_url"));
    }

    #[test]
    fn short_webhook_secret_fails_validation() {
        let mut cfg = base_config();
        cfg.payment_webhook_secret = "short".into();
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("payment_webhook_secret"));
    }

    #[test]
    fn zero_ttl_fails_validation() {
        let mut cfg = base_config();
        cfg.pending_order_ttl_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_event_channel_capacity_fails_validation() {
        let mut cfg = base_config();
        cfg.event_channel_capacity = 0;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("event_channel_capacity"));
    }
}

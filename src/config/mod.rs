//! Application configuration
//!
//! Loaded from environment variables with the `SOULDREAM_BILLING` prefix;
//! nested values use `__` as separator. A `.env` file is read first when
//! present.
//!
//! ```no_run
//! use souldream_billing::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod billing;
mod database;
mod error;
mod paypal;
mod server;

pub use billing::BillingConfig;
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use paypal::{PayPalSettings, VerificationStrategy};
pub use server::{Environment, ServerConfig};

use serde::Deserialize;

const ENV_PREFIX: &str = "SOULDREAM_BILLING";

/// Root configuration of the billing service.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    pub database: DatabaseConfig,

    pub paypal: PayPalSettings,

    #[serde(default)]
    pub billing: BillingConfig,
}

impl AppConfig {
    /// Load configuration from the environment.
    ///
    /// - `SOULDREAM_BILLING__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `SOULDREAM_BILLING__PAYPAL__CLIENT_ID=...` -> `paypal.client_id = ...`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or a value
    /// cannot be parsed into its type.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix(ENV_PREFIX)
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Semantic validation of every section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.paypal.validate()?;
        self.billing.validate()?;
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

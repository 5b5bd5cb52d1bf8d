// Engine configuration
// Layered like the rest of our services: config/default, then config/{environment},
// then HOTEL_ENGINE__* environment variables.

use chrono::NaiveDate;
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::error::EngineResult;
use crate::retry::DelaySchedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(from = "String")]
pub enum Environment {
    Production,
    Staging,
    #[default]
    Development,
}

impl From<String> for Environment {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "production" => Environment::Production,
            "staging" => Environment::Staging,
            _ => Environment::Development,
        }
    }
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Development => "development",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub environment: Environment,
    pub sync: SyncConfig,
    pub retry: RetryConfig,
    pub orders: OrderConfig,
    pub balance: BalanceConfig,
    pub supplier: SupplierConfig,
    pub logging: LoggingConfig,
    // No broker configured means every instance runs the scheduled jobs itself
    pub lock_broker_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            sync: SyncConfig::default(),
            retry: RetryConfig::default(),
            orders: OrderConfig::default(),
            balance: BalanceConfig::default(),
            supplier: SupplierConfig::default(),
            logging: LoggingConfig::default(),
            lock_broker_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub chunk_size: usize,
    pub hotels_per_page: usize,
    pub synced_threshold: usize,
    pub lock_key: String,
    pub lock_lease_secs: u64,
    pub try_sync_until_hour: u32,
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            hotels_per_page: 100,
            synced_threshold: 100,
            lock_key: "hotel-engine:sync-hotels".to_string(),
            lock_lease_secs: 10,
            try_sync_until_hour: 6,
            interval_secs: 15 * 60,
        }
    }
}

impl SyncConfig {
    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }
}

// Delay schedules for supplier endpoints that answer with intermediate results
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub hotel_detail_delays_ms: Vec<u64>,
    pub search_delays_ms: Vec<u64>,
    pub rooms_delays_ms: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            hotel_detail_delays_ms: vec![
                1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 64_000, 128_000,
            ],
            search_delays_ms: vec![0, 200, 300, 500, 800, 1_300, 2_100, 3_400],
            rooms_delays_ms: vec![800, 50, 50, 150, 200, 300],
        }
    }
}

impl RetryConfig {
    pub fn hotel_detail_schedule(&self) -> DelaySchedule {
        DelaySchedule::from_millis(&self.hotel_detail_delays_ms)
    }

    pub fn search_schedule(&self) -> DelaySchedule {
        DelaySchedule::from_millis(&self.search_delays_ms)
    }

    pub fn rooms_schedule(&self) -> DelaySchedule {
        DelaySchedule::from_millis(&self.rooms_delays_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrderConfig {
    pub available_hotels_whitelist: Vec<String>,
    pub refund_event_topic: String,
    pub refund_pulling_from_date: NaiveDate,
    pub refund_pulling_max_try_days: i64,
    pub refund_pulling_interval_secs: u64,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            available_hotels_whitelist: Vec::new(),
            refund_event_topic: "hotel.order.refund-finalized".to_string(),
            refund_pulling_from_date: NaiveDate::from_ymd_opt(2021, 1, 1)
                .unwrap_or(NaiveDate::MIN),
            refund_pulling_max_try_days: 30,
            refund_pulling_interval_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    pub alert_limit: f64,
    pub provider_account: String,
    pub alert_phone_numbers: Vec<String>,
    pub sms_endpoint: Option<String>,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            alert_limit: 50_000_000.0,
            provider_account: String::new(),
            alert_phone_numbers: Vec::new(),
            sms_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupplierConfig {
    pub hotel_endpoint: String,
    pub order_endpoint: String,
    pub username: String,
    pub password: String,
    pub cities_file: String,
    pub token_refresh_secs: u64,
    pub timeout_ms: u64,
}

impl Default for SupplierConfig {
    fn default() -> Self {
        Self {
            hotel_endpoint: "http://localhost:8081".to_string(),
            order_endpoint: "http://localhost:8082".to_string(),
            username: String::new(),
            password: String::new(),
            cities_file: "assets/cities.json".to_string(),
            token_refresh_secs: 60 * 60,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
    pub level: Option<String>,
}

impl EngineConfig {
    pub fn load() -> EngineResult<Self> {
        let run_mode = env::var("HOTEL_ENGINE__ENVIRONMENT")
            .or_else(|_| env::var("RUN_MODE"))
            .unwrap_or_else(|_| "development".into());

        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(
                config::File::with_name(&format!("config/{}", run_mode.to_lowercase()))
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("HOTEL_ENGINE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("orders.available_hotels_whitelist")
                    .with_list_parse_key("balance.alert_phone_numbers")
                    .with_list_parse_key("retry.hotel_detail_delays_ms")
                    .with_list_parse_key("retry.search_delays_ms")
                    .with_list_parse_key("retry.rooms_delays_ms")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.sync.chunk_size == 0 {
            return Err(crate::error::EngineError::Config(
                "sync.chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.sync.hotels_per_page == 0 {
            return Err(crate::error::EngineError::Config(
                "sync.hotels_per_page must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Production", Environment::Production)]
    #[test_case("production", Environment::Production)]
    #[test_case("STAGING", Environment::Staging)]
    #[test_case("development", Environment::Development)]
    #[test_case("whatever", Environment::Development)]
    fn parses_environment_case_insensitively(raw: &str, expected: Environment) {
        assert_eq!(Environment::from(raw.to_string()), expected);
    }

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.is_development());
        assert_eq!(config.retry.hotel_detail_schedule().len(), 8);
        assert_eq!(
            config.retry.search_schedule().delays()[0],
            Duration::from_millis(0)
        );
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let mut config = EngineConfig::default();
        config.sync.chunk_size = 0;
        assert!(config.validate().is_err());
    }
}

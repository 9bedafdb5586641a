use std::env;
use std::time::Duration;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub presence_ttl_secs: u64,
    pub presence_refresh_secs: u64,
    pub destination_tolerance: f64,
    pub max_search_radius_km: f64,
    pub default_search_radius_km: f64,
    pub resubscribe_interval_secs: u64,
    pub jwt_secret: Option<String>,
    pub sync_on_startup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            redis_url: String::new(),
            server_host: "0.0.0.0".into(),
            server_port: 8081,
            presence_ttl_secs: 60,
            presence_refresh_secs: 30,
            destination_tolerance: 0.01,
            max_search_radius_km: 50.0,
            default_search_radius_km: 5.0,
            resubscribe_interval_secs: 15,
            jwt_secret: None,
            sync_on_startup: false,
        }
    }
}

fn var_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn required(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::validation(format!("{} is not set", name)))
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        dotenv::dotenv().ok();

        let defaults = Config::default();
        let config = Config {
            database_url: required("DATABASE_URL")?,
            redis_url: required("REDIS_URL")?,
            server_host: env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: var_or("SERVER_PORT", defaults.server_port),
            presence_ttl_secs: var_or("PRESENCE_TTL_SECS", defaults.presence_ttl_secs),
            presence_refresh_secs: var_or("PRESENCE_REFRESH_SECS", defaults.presence_refresh_secs),
            destination_tolerance: var_or("DESTINATION_TOLERANCE", defaults.destination_tolerance),
            max_search_radius_km: var_or("MAX_SEARCH_RADIUS_KM", defaults.max_search_radius_km),
            default_search_radius_km: var_or(
                "DEFAULT_SEARCH_RADIUS_KM",
                defaults.default_search_radius_km,
            ),
            resubscribe_interval_secs: var_or(
                "RESUBSCRIBE_INTERVAL_SECS",
                defaults.resubscribe_interval_secs,
            ),
            jwt_secret: env::var("JWT_SECRET").ok().filter(|s| !s.is_empty()),
            sync_on_startup: var_or("SYNC_ON_STARTUP", defaults.sync_on_startup),
        };

        config.validate()?;
        Ok(config)
    }

    /// 刷新间隔必须严格小于TTL，保证过期前至少刷新一次
    pub fn validate(&self) -> AppResult<()> {
        if self.presence_refresh_secs == 0 || self.presence_refresh_secs >= self.presence_ttl_secs {
            return Err(AppError::validation(format!(
                "PRESENCE_REFRESH_SECS ({}) must be in 1..PRESENCE_TTL_SECS ({})",
                self.presence_refresh_secs, self.presence_ttl_secs
            )));
        }
        if !self.destination_tolerance.is_finite() || self.destination_tolerance < 0.0 {
            return Err(AppError::validation("DESTINATION_TOLERANCE must be >= 0"));
        }
        if self.max_search_radius_km <= 0.0 || self.default_search_radius_km <= 0.0 {
            return Err(AppError::validation("search radius must be positive"));
        }
        if self.resubscribe_interval_secs == 0 {
            return Err(AppError::validation("RESUBSCRIBE_INTERVAL_SECS must be positive"));
        }
        Ok(())
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }

    pub fn presence_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.presence_refresh_secs)
    }

    pub fn resubscribe_interval(&self) -> Duration {
        Duration::from_secs(self.resubscribe_interval_secs)
    }

    /// 请求半径缺省时取默认值，并限制在最大半径内；非有限值直接拒绝，非正数由匹配器拒绝
    pub fn clamp_radius(&self, requested: Option<f64>) -> AppResult<f64> {
        let radius = requested.unwrap_or(self.default_search_radius_km);
        if !radius.is_finite() {
            return Err(AppError::validation(format!("radius must be finite: {}", radius)));
        }
        Ok(radius.min(self.max_search_radius_km))
    }
}

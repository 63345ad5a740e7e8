use std::env;
use std::time::Duration;

use anyhow::{Context, bail};
use rotor_core::{PortRange, RotationSettings};

#[derive(Debug, Clone)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Database settings
    pub database_url: String,

    // Rotation settings
    pub update_interval_hours: u32,
    pub port_min: u16,
    pub port_max: u16,
    pub sweep_period: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present
        dotenv::dotenv().ok();

        let config = Self {
            server_host: env::var("SERVER_HOST")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: parse_env("SERVER_PORT", 3000)?,

            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,

            update_interval_hours: parse_env("UPDATE_INTERVAL_HOURS", 24)?,
            port_min: parse_env("PORT_MIN", 20000)?,
            port_max: parse_env("PORT_MAX", 50000)?,
            sweep_period: Duration::from_secs(parse_env(
                "SWEEP_PERIOD_SECS",
                300,
            )?),
        };

        if config.update_interval_hours == 0 {
            bail!("UPDATE_INTERVAL_HOURS must be positive");
        }
        if config.port_min >= config.port_max {
            bail!(
                "invalid port range: PORT_MIN ({}) must be below PORT_MAX ({})",
                config.port_min,
                config.port_max
            );
        }

        Ok(config)
    }

    pub fn rotation_settings(&self) -> anyhow::Result<RotationSettings> {
        Ok(RotationSettings {
            update_interval_hours: self.update_interval_hours,
            port_range: PortRange::new(self.port_min, self.port_max)?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn parse_env<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {name}: {raw}")),
        Err(_) => Ok(default),
    }
}

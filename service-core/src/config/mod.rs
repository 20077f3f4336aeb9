use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Settings shared by every service: an optional `configuration` file
/// overridden by `APP__*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_port_defaults_and_overrides() {
        unsafe { std::env::remove_var("APP__PORT") };
        assert_eq!(Config::load().unwrap().port, 8080);

        unsafe { std::env::set_var("APP__PORT", "9191") };
        assert_eq!(Config::load().unwrap().port, 9191);

        unsafe { std::env::set_var("APP__PORT", "not-a-port") };
        assert!(matches!(Config::load(), Err(AppError::ConfigError(_))));

        unsafe { std::env::remove_var("APP__PORT") };
    }
}

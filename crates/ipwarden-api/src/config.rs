use std::env;

use thiserror::Error;

#[derive(Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub admin_token: String,
    pub database_max_connections: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {var}")]
    MissingEnvVar { var: &'static str },

    #[error("ADMIN_TOKEN must not be empty")]
    EmptyAdminToken,

    #[error("DATABASE_MAX_CONNECTIONS must be a positive integer, got {0:?}")]
    InvalidMaxConnections(String),
}

fn require_env(var: &'static str) -> Result<String, ConfigError> {
    env::var(var).map_err(|_| ConfigError::MissingEnvVar { var })
}

fn parse_max_connections(raw: Option<String>) -> Result<u32, ConfigError> {
    match raw {
        None => Ok(8),
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ConfigError::InvalidMaxConnections(raw)),
        },
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let admin_token = require_env("ADMIN_TOKEN")?.trim().to_string();
        if admin_token.is_empty() {
            return Err(ConfigError::EmptyAdminToken);
        }

        Ok(Self {
            database_url: require_env("DATABASE_URL")?,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            admin_token,
            database_max_connections: parse_max_connections(
                env::var("DATABASE_MAX_CONNECTIONS").ok(),
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(None, Some(8) ; "default")]
    #[test_case(Some("16"), Some(16) ; "explicit")]
    #[test_case(Some(" 4 "), Some(4) ; "whitespace")]
    #[test_case(Some("0"), None ; "zero")]
    #[test_case(Some("lots"), None ; "garbage")]
    fn test_parse_max_connections(raw: Option<&str>, expected: Option<u32>) {
        assert_eq!(parse_max_connections(raw.map(str::to_string)).ok(), expected);
    }
}

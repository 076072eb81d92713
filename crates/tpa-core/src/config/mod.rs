use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::adjudication::coverage::{CoverageResolver, DEFAULT_COVERAGE_PERCENT};

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub adjudication: AdjudicationConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let default_coverage_percent = match env::var("TPA_DEFAULT_COVERAGE_PERCENT") {
            Ok(raw) => raw
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|percent| *percent <= 100)
                .ok_or(ConfigError::InvalidCoveragePercent { value: raw })?,
            Err(_) => DEFAULT_COVERAGE_PERCENT,
        };

        let sweep_interval_secs = match env::var("TPA_SWEEP_INTERVAL_SECS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidSweepInterval { value: raw })?,
            Err(_) => DEFAULT_SWEEP_INTERVAL_SECS,
        };

        let super_admin_role =
            env::var("TPA_SUPER_ADMIN_ROLE").unwrap_or_else(|_| "SUPER_ADMIN".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            adjudication: AdjudicationConfig {
                default_coverage_percent,
                sweep_interval_secs,
                super_admin_role,
            },
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Adjudication tuning knobs.
#[derive(Debug, Clone)]
pub struct AdjudicationConfig {
    /// Coverage percent used when neither the rule nor the policy sets one.
    pub default_coverage_percent: u8,
    pub sweep_interval_secs: u64,
    /// Role name that grants the super-admin bypass of transition role checks.
    pub super_admin_role: String,
}

impl AdjudicationConfig {
    pub fn coverage_resolver(&self) -> CoverageResolver {
        CoverageResolver::new(self.default_coverage_percent)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for AdjudicationConfig {
    fn default() -> Self {
        Self {
            default_coverage_percent: DEFAULT_COVERAGE_PERCENT,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            super_admin_role: "SUPER_ADMIN".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidCoveragePercent { value: String },
    InvalidSweepInterval { value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidCoveragePercent { value } => write!(
                f,
                "TPA_DEFAULT_COVERAGE_PERCENT must be between 0 and 100 (got '{value}')"
            ),
            ConfigError::InvalidSweepInterval { value } => write!(
                f,
                "TPA_SWEEP_INTERVAL_SECS must be a positive number of seconds (got '{value}')"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidCoveragePercent { .. }
            | ConfigError::InvalidSweepInterval { .. } => None,
        }
    }
}

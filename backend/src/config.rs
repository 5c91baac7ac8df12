use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable carrying the prediction service credential.
/// Absence fails startup, never a run in flight.
pub const API_TOKEN_VAR: &str = "REPLICATE_API_TOKEN";

const DEFAULT_API_URL: &str = "https://api.replicate.com/v1";
const DEFAULT_CROP_DEPLOYMENT: &str = "serum4321/cropmodel";
const DEFAULT_EXPLAIN_DEPLOYMENT: &str = "serum4321/tbsiglip";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_token: String,
    pub api_base_url: String,
    pub crop_deployment: String,
    pub explain_deployment: String,
    pub poll_interval: Duration,
    pub prediction_timeout: Option<Duration>,
    pub display_height: u32,
    pub port: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_token = get(API_TOKEN_VAR)
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::MissingVar(API_TOKEN_VAR))?;

        let poll_interval_ms: u64 = parse(&get, "PREDICTION_POLL_INTERVAL_MS", 1000)?;
        let prediction_timeout = match get("PREDICTION_TIMEOUT_SECS") {
            Some(value) => {
                let secs: u64 = parse_value("PREDICTION_TIMEOUT_SECS", value)?;
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            api_token,
            api_base_url: get("PREDICTION_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            crop_deployment: get("CROP_DEPLOYMENT")
                .unwrap_or_else(|| DEFAULT_CROP_DEPLOYMENT.to_string()),
            explain_deployment: get("EXPLAIN_DEPLOYMENT")
                .unwrap_or_else(|| DEFAULT_EXPLAIN_DEPLOYMENT.to_string()),
            poll_interval: Duration::from_millis(poll_interval_ms),
            prediction_timeout,
            display_height: parse(&get, "DISPLAY_HEIGHT", 350)?,
            port: parse(&get, "PORT", 8081)?,
        })
    }
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(name) {
        None => Ok(default),
        Some(value) => parse_value(name, value),
    }
}

fn parse_value<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

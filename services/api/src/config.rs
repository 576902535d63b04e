use crate::ws::provider::openai::{DEFAULT_LOG_EVENT_TYPES, DEFAULT_REALTIME_MODEL, OPENAI_REALTIME_URL};
use callbridge_core::session_config::SessionProfile;
use secrecy::SecretString;
use std::{fmt::Display, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Certificate material for serving the media stream over `wss://`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Credentials for the telephony provider's REST API.
#[derive(Debug)]
pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: SecretString,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Host name the telephony edge should dial back for the media stream.
    pub public_host: Option<String>,
    pub tls: Option<TlsConfig>,
    pub openai_api_key: SecretString,
    pub realtime_url: String,
    pub realtime_model: String,
    pub profile: SessionProfile,
    pub voice: Option<String>,
    pub prompts_path: Option<PathBuf>,
    pub transfer_number: Option<String>,
    pub twilio: Option<TwilioCredentials>,
    pub bing_api_key: Option<SecretString>,
    pub log_event_types: Vec<String>,
    pub config_delay: Duration,
    pub activation_timeout: Duration,
    pub tool_timeout: Duration,
    pub setup_timeout: Duration,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address = parse_var("BIND_ADDRESS", "0.0.0.0:5050".parse::<SocketAddr>())?;

        let openai_api_key = var("OPENAI_API_KEY")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let tls = match (var("TLS_CERT_PATH"), var("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::MissingVar("TLS_KEY_PATH".to_string())),
            (None, Some(_)) => return Err(ConfigError::MissingVar("TLS_CERT_PATH".to_string())),
        };

        let profile = match var("SESSION_PROFILE") {
            Some(value) => value
                .parse::<SessionProfile>()
                .map_err(|e| ConfigError::InvalidValue("SESSION_PROFILE".to_string(), e))?,
            None => SessionProfile::Assistant,
        };

        let twilio = match (var("TWILIO_ACCOUNT_SID"), var("TWILIO_AUTH_TOKEN")) {
            (Some(account_sid), Some(auth_token)) => Some(TwilioCredentials {
                account_sid,
                auth_token: SecretString::from(auth_token),
            }),
            _ => None,
        };
        let transfer_number = var("TRANSFER_NUMBER");

        if profile == SessionProfile::Screening {
            if twilio.is_none() {
                return Err(ConfigError::MissingVar(
                    "TWILIO_ACCOUNT_SID and TWILIO_AUTH_TOKEN must be set for the 'screening' profile"
                        .to_string(),
                ));
            }
            if transfer_number.is_none() {
                return Err(ConfigError::MissingVar(
                    "TRANSFER_NUMBER must be set for the 'screening' profile".to_string(),
                ));
            }
        }

        let log_event_types = match var("LOG_EVENT_TYPES") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_LOG_EVENT_TYPES.iter().map(|tag| tag.to_string()).collect(),
        };

        let log_level = parse_var("RUST_LOG", Ok::<_, ConfigError>(Level::INFO))?;

        Ok(Self {
            bind_address,
            public_host: var("PUBLIC_HOST"),
            tls,
            openai_api_key,
            realtime_url: var("REALTIME_URL").unwrap_or_else(|| OPENAI_REALTIME_URL.to_string()),
            realtime_model: var("REALTIME_MODEL")
                .unwrap_or_else(|| DEFAULT_REALTIME_MODEL.to_string()),
            profile,
            voice: var("VOICE"),
            prompts_path: var("PROMPTS_PATH").map(PathBuf::from),
            transfer_number,
            twilio,
            bing_api_key: var("BING_API_KEY").map(SecretString::from),
            log_event_types,
            config_delay: Duration::from_millis(parse_var("CONFIG_DELAY_MS", Ok::<u64, ConfigError>(250))?),
            activation_timeout: Duration::from_millis(parse_var(
                "ACTIVATION_TIMEOUT_MS",
                Ok::<u64, ConfigError>(1000),
            )?),
            tool_timeout: Duration::from_secs(parse_var("TOOL_TIMEOUT_SECS", Ok::<u64, ConfigError>(15))?),
            setup_timeout: Duration::from_secs(parse_var("SETUP_TIMEOUT_SECS", Ok::<u64, ConfigError>(10))?),
            log_level,
        })
    }
}

/// Reads a variable, treating an empty value as unset.
fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Parses a variable if set, otherwise falls back to `default`.
fn parse_var<T, E>(name: &str, default: Result<T, E>) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    E: Display,
{
    match var(name) {
        Some(value) => value.trim().parse::<T>().map_err(|e| {
            ConfigError::InvalidValue(name.to_string(), format!("'{value}' is invalid: {e}"))
        }),
        None => default.map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
    }
}

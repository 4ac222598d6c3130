//! Runtime configuration.
//!
//! Everything the server needs is read once at startup into [`Config`] and
//! handed to the request handlers through `AppState`. Values come from the
//! process environment (a `.env` file is loaded by the binaries first).

use std::{env, path::PathBuf, str::FromStr};

use thiserror::Error;

use crate::usage::{TierLimits, UsageLimits};

/// MIME types accepted for uploaded answers unless `ALLOWED_AUDIO_TYPES` says otherwise.
pub const DEFAULT_AUDIO_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/wav",
    "audio/x-wav",
    "audio/wave",
    "audio/x-m4a",
    "audio/m4a",
];

/// Accepted range for `BCRYPT_COST`.
pub const MIN_BCRYPT_COST: u32 = 4;
pub const MAX_BCRYPT_COST: u32 = 31;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}' (expected pretty or json)")),
        }
    }
}

/// OpenAI-compatible speech-to-text and chat-completion endpoint.
#[derive(Clone)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub chat_model: String,
    pub max_tokens: u32,
    pub transcription_model: String,
}

/// Payment provider (Stripe) credentials.
#[derive(Clone)]
pub struct StripeSettings {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub api_base: String,
}

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub jwt_secret: String,
    pub jwt_refresh_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub bcrypt_cost: u32,
    /// Adds `Secure` to the refresh-token cookie (enable behind TLS).
    pub secure_cookies: bool,
    /// Browser origin allowed by CORS.
    pub client_origin: String,
    pub http_timeout_secs: u64,
    pub max_upload_bytes: usize,
    pub allowed_audio_types: Vec<String>,
    pub limits: UsageLimits,
    pub openai: OpenAiSettings,
    pub stripe: StripeSettings,
    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Configuration with every optional value at its default.
    pub fn new(jwt_secret: impl Into<String>, jwt_refresh_secret: impl Into<String>) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            data_dir: PathBuf::from("interview_data"),
            jwt_secret: jwt_secret.into(),
            jwt_refresh_secret: jwt_refresh_secret.into(),
            access_token_ttl_secs: 2 * 60 * 60,
            refresh_token_ttl_secs: 7 * 24 * 60 * 60,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            secure_cookies: false,
            client_origin: "http://localhost:3000".to_string(),
            http_timeout_secs: 60,
            max_upload_bytes: 10_000_000,
            allowed_audio_types: DEFAULT_AUDIO_TYPES.iter().map(|t| t.to_string()).collect(),
            limits: UsageLimits::default(),
            openai: OpenAiSettings {
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                chat_model: "gpt-4".to_string(),
                max_tokens: 500,
                transcription_model: "whisper-1".to_string(),
            },
            stripe: StripeSettings {
                secret_key: None,
                webhook_secret: None,
                api_base: "https://api.stripe.com/v1".to_string(),
            },
            log_format: LogFormat::Pretty,
            log_dir: None,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(
            required(&lookup, "JWT_SECRET")?,
            required(&lookup, "JWT_REFRESH_SECRET")?,
        );

        config.host = parse_or(&lookup, "HOST", config.host)?;
        config.port = parse_or(&lookup, "PORT", config.port)?;
        config.data_dir = parse_or(&lookup, "DATA_DIR", config.data_dir)?;
        config.access_token_ttl_secs =
            parse_or(&lookup, "ACCESS_TOKEN_TTL_SECS", config.access_token_ttl_secs)?;
        config.refresh_token_ttl_secs =
            parse_or(&lookup, "REFRESH_TOKEN_TTL_SECS", config.refresh_token_ttl_secs)?;
        config.bcrypt_cost = parse_or(&lookup, "BCRYPT_COST", config.bcrypt_cost)?;
        config.secure_cookies = parse_or(&lookup, "SECURE_COOKIES", config.secure_cookies)?;
        config.client_origin = parse_or(&lookup, "CLIENT_ORIGIN", config.client_origin)?;
        config.http_timeout_secs = parse_or(&lookup, "HTTP_TIMEOUT_SECS", config.http_timeout_secs)?;
        config.max_upload_bytes = parse_or(&lookup, "MAX_UPLOAD_BYTES", config.max_upload_bytes)?;

        if let Some(types) = lookup("ALLOWED_AUDIO_TYPES") {
            config.allowed_audio_types = types
                .split(',')
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
        }

        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&config.bcrypt_cost) {
            return Err(ConfigError::Invalid {
                key: "BCRYPT_COST",
                message: format!("must be between {MIN_BCRYPT_COST} and {MAX_BCRYPT_COST}"),
            });
        }

        config.limits = UsageLimits {
            free: TierLimits {
                audio_submissions: Some(parse_or(
                    &lookup,
                    "FREE_AUDIO_SUBMISSIONS",
                    config.limits.free.audio_submissions.unwrap_or(3),
                )?),
                chat_messages: Some(parse_or(
                    &lookup,
                    "FREE_CHAT_MESSAGES",
                    config.limits.free.chat_messages.unwrap_or(10),
                )?),
            },
            premium: TierLimits {
                audio_submissions: parse_opt(&lookup, "PREMIUM_AUDIO_SUBMISSIONS")?,
                chat_messages: parse_opt(&lookup, "PREMIUM_CHAT_MESSAGES")?,
            },
        };

        config.openai.api_key = non_empty(&lookup, "OPENAI_API_KEY");
        config.openai.base_url = parse_or(&lookup, "OPENAI_BASE_URL", config.openai.base_url)?;
        config.openai.chat_model = parse_or(&lookup, "OPENAI_CHAT_MODEL", config.openai.chat_model)?;
        config.openai.max_tokens = parse_or(&lookup, "OPENAI_MAX_TOKENS", config.openai.max_tokens)?;
        config.openai.transcription_model = parse_or(
            &lookup,
            "OPENAI_TRANSCRIPTION_MODEL",
            config.openai.transcription_model,
        )?;

        config.stripe.secret_key = non_empty(&lookup, "STRIPE_SECRET_KEY");
        config.stripe.webhook_secret = non_empty(&lookup, "STRIPE_WEBHOOK_SECRET");
        config.stripe.api_base = parse_or(&lookup, "STRIPE_API_BASE", config.stripe.api_base)?;

        config.log_format = parse_or(&lookup, "LOG_FORMAT", config.log_format)?;
        config.log_dir = parse_opt(&lookup, "LOG_DIR")?;

        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_allowed_audio_type(&self, mime: &str) -> bool {
        let mime = mime.to_ascii_lowercase();
        // Ignore parameters such as `audio/wav; codecs=1`
        let essence = mime.split(';').next().unwrap_or_default().trim();
        self.allowed_audio_types.iter().any(|t| t == essence)
    }
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, key).ok_or(ConfigError::Missing(key))
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(lookup, key)?.unwrap_or(default))
}

fn parse_opt<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, key)
        .map(|raw| {
            raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                message: e.to_string(),
            })
        })
        .transpose()
}

//! Environment-driven configuration with validated, redacted secrets.
//!
//! Every optional capability (text model, image model, diagram renderer,
//! Telegram messaging) is enabled by the presence of its keys: components
//! receive `None` for absent collaborators and short-circuit. Validation
//! runs once at startup; the loaded config is immutable afterwards.

use std::fmt;
use std::net::SocketAddr;

use url::Url;

/// Default bind address for the HTTP server.
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

/// Default base URL for the generative model API.
const DEFAULT_MODEL_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default access-token lifetime when `TOKEN_EXPIRY_MINUTES` is not set.
const DEFAULT_TOKEN_EXPIRY_MINUTES: u32 = 1440;

/// Maximum accepted token lifetime (30 days).
const MAX_TOKEN_EXPIRY_MINUTES: u32 = 43_200;

/// Minimum accepted JWT secret length.
const MIN_JWT_SECRET_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Secret
// ---------------------------------------------------------------------------

/// A sensitive string that never renders in logs or error output.
///
/// `Debug` and `Display` both print a redaction marker; reading the raw
/// value requires an explicit [`Secret::expose`] call.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    /// Wrap a raw secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value. Call sites should be the only places the
    /// secret crosses a process boundary (auth header, API client).
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a candidate value.
    ///
    /// Folds the XOR of every byte pair so the comparison touches the whole
    /// string regardless of where the first mismatch occurs. Length
    /// mismatches return early; the length itself is not secret.
    pub fn matches(&self, candidate: &str) -> bool {
        let a = self.0.as_bytes();
        let b = candidate.as_bytes();
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("__REDACTED__")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("__REDACTED__")
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required key is absent or empty.
    #[error("missing required configuration key {0}")]
    Missing(&'static str),
    /// A key is present but its value fails validation.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// The offending environment key.
        key: &'static str,
        /// Human-readable description of the violation.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Config sections
// ---------------------------------------------------------------------------

/// Text-model configuration. Present iff `TEXT_MODEL_API_KEY` and
/// `TEXT_MODEL_ID` are both set.
#[derive(Debug, Clone)]
pub struct TextModelConfig {
    /// API key for the generative model service.
    pub api_key: Secret,
    /// Model identifier used for all text and vision calls.
    pub model: String,
    /// API base URL (overridable for self-hosted gateways and tests).
    pub base_url: String,
}

/// Telegram messaging configuration. Present iff bot token, chat id, and
/// webhook URL are all set and `MESSAGING_ENABLED` is not false.
#[derive(Debug, Clone)]
pub struct MessagingConfig {
    /// Bot API token.
    pub bot_token: Secret,
    /// The single chat the companion posts to and accepts updates from.
    pub chat_id: i64,
    /// Public URL Telegram delivers webhook updates to.
    pub webhook_url: Url,
}

/// Settings consumed by the library-browsing API layer; validated here so
/// a misconfigured deployment fails at startup rather than at first login.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// JWT signing secret, at least 32 characters.
    pub jwt_secret: Secret,
    /// Access-token lifetime in minutes, within `1..=43200`.
    pub token_expiry_minutes: u32,
}

/// Immutable service configuration, loaded from the environment once at
/// startup.
#[derive(Debug, Clone)]
pub struct CompanionConfig {
    /// HTTP listen address.
    pub bind_addr: SocketAddr,
    /// Shared secret expected in `X-API-Key` on device endpoints.
    pub kobo_api_key: Secret,
    /// Text/vision model access, when configured.
    pub text_model: Option<TextModelConfig>,
    /// Image-producing model identifier; enables direct diagram generation.
    pub image_model_id: Option<String>,
    /// External diagram renderer base URL; enables the render fallback.
    pub renderer_base_url: Option<String>,
    /// Telegram delivery, when configured.
    pub messaging: Option<MessagingConfig>,
    /// JWT settings for the sibling library API, when configured.
    pub auth: Option<AuthConfig>,
}

impl CompanionConfig {
    /// Load and validate configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required key is missing or any
    /// validator fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Load configuration through a custom resolver (for testing).
    pub fn from_env_with(
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let bind_addr = non_empty(&env, "BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                key: "BIND_ADDR",
                reason: e.to_string(),
            })?;

        let kobo_api_key = non_empty(&env, "KOBO_API_KEY")
            .map(Secret::new)
            .ok_or(ConfigError::Missing("KOBO_API_KEY"))?;

        let text_model = load_text_model(&env)?;
        let image_model_id = non_empty(&env, "IMAGE_MODEL_ID");
        let renderer_base_url =
            non_empty(&env, "DIAGRAM_RENDERER_BASE_URL").map(|u| u.trim_end_matches('/').to_owned());
        let messaging = load_messaging(&env)?;
        let auth = load_auth(&env)?;

        Ok(Self {
            bind_addr,
            kobo_api_key,
            text_model,
            image_model_id,
            renderer_base_url,
            messaging,
            auth,
        })
    }

    /// Whether any diagram strategy can run.
    pub fn image_generation_enabled(&self) -> bool {
        self.image_model_id.is_some()
            || (self.renderer_base_url.is_some() && self.text_model.is_some())
    }
}

fn load_text_model(
    env: &impl Fn(&str) -> Option<String>,
) -> Result<Option<TextModelConfig>, ConfigError> {
    let api_key = non_empty(env, "TEXT_MODEL_API_KEY");
    let model = non_empty(env, "TEXT_MODEL_ID");
    match (api_key, model) {
        (Some(api_key), Some(model)) => {
            let base_url = non_empty(env, "TEXT_MODEL_BASE_URL")
                .unwrap_or_else(|| DEFAULT_MODEL_BASE_URL.to_owned())
                .trim_end_matches('/')
                .to_owned();
            Ok(Some(TextModelConfig {
                api_key: Secret::new(api_key),
                model,
                base_url,
            }))
        }
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::Invalid {
            key: "TEXT_MODEL_ID",
            reason: "TEXT_MODEL_API_KEY is set but TEXT_MODEL_ID is not".to_owned(),
        }),
        (None, Some(_)) => Err(ConfigError::Invalid {
            key: "TEXT_MODEL_API_KEY",
            reason: "TEXT_MODEL_ID is set but TEXT_MODEL_API_KEY is not".to_owned(),
        }),
    }
}

fn load_messaging(
    env: &impl Fn(&str) -> Option<String>,
) -> Result<Option<MessagingConfig>, ConfigError> {
    if !flag_enabled(env, "MESSAGING_ENABLED") {
        return Ok(None);
    }

    let token = non_empty(env, "MESSAGING_BOT_TOKEN");
    let chat = non_empty(env, "MESSAGING_CHAT_ID");
    let webhook = non_empty(env, "MESSAGING_WEBHOOK_URL");

    match (token, chat, webhook) {
        (None, None, None) => Ok(None),
        (Some(token), Some(chat), Some(webhook)) => {
            let chat_id = chat.parse::<i64>().map_err(|e| ConfigError::Invalid {
                key: "MESSAGING_CHAT_ID",
                reason: e.to_string(),
            })?;
            let webhook_url = Url::parse(&webhook).map_err(|e| ConfigError::Invalid {
                key: "MESSAGING_WEBHOOK_URL",
                reason: e.to_string(),
            })?;
            Ok(Some(MessagingConfig {
                bot_token: Secret::new(token),
                chat_id,
                webhook_url,
            }))
        }
        _ => Err(ConfigError::Invalid {
            key: "MESSAGING_BOT_TOKEN",
            reason: "messaging requires MESSAGING_BOT_TOKEN, MESSAGING_CHAT_ID, \
                     and MESSAGING_WEBHOOK_URL to all be set"
                .to_owned(),
        }),
    }
}

fn load_auth(
    env: &impl Fn(&str) -> Option<String>,
) -> Result<Option<AuthConfig>, ConfigError> {
    let Some(jwt_secret) = non_empty(env, "JWT_SECRET") else {
        return Ok(None);
    };
    if jwt_secret.chars().count() < MIN_JWT_SECRET_LEN {
        return Err(ConfigError::Invalid {
            key: "JWT_SECRET",
            reason: format!("must be at least {MIN_JWT_SECRET_LEN} characters"),
        });
    }

    let token_expiry_minutes = match non_empty(env, "TOKEN_EXPIRY_MINUTES") {
        Some(raw) => {
            let minutes = raw.parse::<u32>().map_err(|e| ConfigError::Invalid {
                key: "TOKEN_EXPIRY_MINUTES",
                reason: e.to_string(),
            })?;
            if !(1..=MAX_TOKEN_EXPIRY_MINUTES).contains(&minutes) {
                return Err(ConfigError::Invalid {
                    key: "TOKEN_EXPIRY_MINUTES",
                    reason: format!("must be within 1..={MAX_TOKEN_EXPIRY_MINUTES}"),
                });
            }
            minutes
        }
        None => DEFAULT_TOKEN_EXPIRY_MINUTES,
    };

    Ok(Some(AuthConfig {
        jwt_secret: Secret::new(jwt_secret),
        token_expiry_minutes,
    }))
}

/// Read a key and normalize: trimmed, empty treated as absent.
fn non_empty(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    env(key)
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Parse a boolean switch; absent means enabled.
fn flag_enabled(env: &impl Fn(&str) -> Option<String>, key: &str) -> bool {
    match non_empty(env, key) {
        Some(v) => !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"),
        None => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

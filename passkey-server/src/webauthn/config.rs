//! WebAuthn Relying Party configuration
//!
//! Builds one protocol instance per tenant from its relying-party settings.

use std::time::Duration;

use serde::Deserialize;
use url::Url;
use webauthn_rs::prelude::*;
use webauthn_rs_proto::UserVerificationPolicy;

/// Default ceremony timeout (60 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid origin URL: {0}")]
    InvalidOrigin(String),
    #[error("At least one origin is required")]
    MissingOrigin,
    #[error("WebAuthn error: {0:?}")]
    Webauthn(WebauthnError),
}

/// User verification requested from authenticators
///
/// Only the `userVerification` hint in the issued options follows this value.
/// Passkey ceremonies verify the UV flag on every response regardless, so with
/// `Preferred` an authenticator that skips verification (a security key without
/// a PIN, for instance) still fails finalize with `Unprocessable`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserVerification {
    #[default]
    Required,
    Preferred,
}

impl From<UserVerification> for UserVerificationPolicy {
    fn from(uv: UserVerification) -> Self {
        match uv {
            UserVerification::Required => UserVerificationPolicy::Required,
            UserVerification::Preferred => UserVerificationPolicy::Preferred,
        }
    }
}

/// Relying party settings of a tenant
#[derive(Debug, Clone, Deserialize)]
pub struct WebauthnSettings {
    /// Relying Party ID (typically the domain name)
    pub rp_id: String,
    /// Human-readable name for the Relying Party
    pub rp_name: String,
    /// Allowed origins; the first one is the primary origin
    pub origins: Vec<String>,
    /// Ceremony timeout in milliseconds, also the session lifetime
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub user_verification: UserVerification,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl WebauthnSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// WebAuthn configuration wrapper
pub struct WebAuthnConfig {
    webauthn: Webauthn,
}

impl WebAuthnConfig {
    /// Create the protocol instance for a tenant's settings.
    pub fn new(settings: &WebauthnSettings) -> Result<Self, ConfigError> {
        let mut origins = settings
            .origins
            .iter()
            .map(|o| Url::parse(o).map_err(|e| ConfigError::InvalidOrigin(format!("{}: {}", o, e))));

        let primary = origins.next().ok_or(ConfigError::MissingOrigin)??;

        let mut builder = WebauthnBuilder::new(&settings.rp_id, &primary)
            .map_err(ConfigError::Webauthn)?
            .rp_name(&settings.rp_name)
            .timeout(settings.timeout())
            .allow_subdomains(false);

        for origin in origins {
            builder = builder.append_allowed_origin(&origin?);
        }

        Ok(Self {
            webauthn: builder.build().map_err(ConfigError::Webauthn)?,
        })
    }

    /// Get a reference to the Webauthn instance
    pub fn webauthn(&self) -> &Webauthn {
        &self.webauthn
    }
}

impl std::fmt::Debug for WebAuthnConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebAuthnConfig")
            .field("webauthn", &"<Webauthn instance>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(origins: &[&str]) -> WebauthnSettings {
        WebauthnSettings {
            rp_id: "localhost".to_string(),
            rp_name: "Test".to_string(),
            origins: origins.iter().map(|o| o.to_string()).collect(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            user_verification: UserVerification::Required,
        }
    }

    #[test]
    fn test_config_creation() {
        let config = WebAuthnConfig::new(&settings(&[
            "http://localhost:3001",
            "http://localhost:3002",
        ]))
        .unwrap();

        let allowed = config.webauthn().get_allowed_origins();
        assert!(allowed.contains(&Url::parse("http://localhost:3001").unwrap()));
        assert!(allowed.contains(&Url::parse("http://localhost:3002").unwrap()));
    }

    #[test]
    fn test_config_rejects_bad_origins() {
        assert!(matches!(
            WebAuthnConfig::new(&settings(&[])),
            Err(ConfigError::MissingOrigin)
        ));
        assert!(matches!(
            WebAuthnConfig::new(&settings(&["not a url"])),
            Err(ConfigError::InvalidOrigin(_))
        ));
    }

    #[test]
    fn test_settings_defaults() {
        let parsed: WebauthnSettings = serde_json::from_str(
            r#"{"rp_id": "example.com", "rp_name": "Example", "origins": ["https://example.com"]}"#,
        )
        .unwrap();
        assert_eq!(parsed.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(parsed.user_verification, UserVerification::Required);
    }

    #[test]
    fn test_user_verification_maps_to_options_hint() {
        let parsed: UserVerification = serde_json::from_str(r#""preferred""#).unwrap();
        assert_eq!(
            UserVerificationPolicy::from(parsed),
            UserVerificationPolicy::Preferred
        );
        assert_eq!(
            UserVerificationPolicy::from(UserVerification::Required),
            UserVerificationPolicy::Required
        );
    }
}

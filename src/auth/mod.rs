//! Bearer tokens for the Google APIs.

mod private_key;
mod service_account;

pub use private_key::normalize_private_key;
pub use service_account::ServiceAccountTokenProvider;

use crate::config::GoogleAuthSettings;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// A token issued out of band, used as-is.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Picks the provider matching the configured credentials.
///
/// A static access token wins over service account credentials.
pub fn token_provider_from_settings(
    settings: &GoogleAuthSettings,
    scopes: &[&str],
) -> Result<Arc<dyn TokenProvider>> {
    if let Some(token) = &settings.access_token {
        return Ok(Arc::new(StaticTokenProvider::new(token.clone())));
    }
    match (&settings.client_email, &settings.private_key) {
        (Some(client_email), Some(private_key)) => Ok(Arc::new(ServiceAccountTokenProvider::new(
            client_email,
            private_key,
            &settings.token_url,
            scopes,
        )?)),
        _ => bail!("No Google credentials configured"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_wins() {
        let settings = GoogleAuthSettings {
            client_email: Some("svc@example.iam.gserviceaccount.com".to_string()),
            private_key: Some("not a key".to_string()),
            access_token: Some("ya29.static".to_string()),
            token_url: "http://unused".to_string(),
        };
        let provider = token_provider_from_settings(&settings, &[SPREADSHEETS_SCOPE]).unwrap();
        assert_eq!(provider.access_token().await.unwrap(), "ya29.static");
    }

    #[test]
    fn test_missing_credentials() {
        let settings = GoogleAuthSettings::default();
        assert!(token_provider_from_settings(&settings, &[SPREADSHEETS_SCOPE]).is_err());
    }

    #[test]
    fn test_invalid_private_key_is_rejected() {
        let settings = GoogleAuthSettings {
            client_email: Some("svc@example.iam.gserviceaccount.com".to_string()),
            private_key: Some("garbage".to_string()),
            access_token: None,
            token_url: "http://unused".to_string(),
        };
        assert!(token_provider_from_settings(&settings, &[SPREADSHEETS_SCOPE]).is_err());
    }
}

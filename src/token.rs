use std::fs;
use std::path::PathBuf;

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use log::info;
use reqwest::{header::AUTHORIZATION, Client};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;

// Refresh this long before the stored expiry rather than racing it.
const REFRESH_LEEWAY_SECS: i64 = 300;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    /// Returns a currently valid bearer token, refreshing and re-persisting
    /// the stored credential when it is about to expire.
    async fn get_valid_token(&self) -> Result<String, Error>;
}

#[derive(Debug, Deserialize, Serialize)]
struct StoredTokens {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    obtained_at: Option<i64>,
    // scope, token_type and friends ride along untouched
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Token provider backed by the JSON file written by the one-time OAuth
/// login flow. Only refresh is handled here; the initial grant is not.
pub struct FileTokenProvider {
    path: PathBuf,
    token_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    client: Client,
}

impl FileTokenProvider {
    pub fn new(config: &Config) -> Self {
        FileTokenProvider {
            path: PathBuf::from(&config.token_file),
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            client: Client::new(),
        }
    }

    fn load(&self) -> Result<StoredTokens, Error> {
        let content = fs::read_to_string(&self.path).map_err(|_| Error::Auth {
            message: format!(
                "no token file at {}; run the OAuth login flow once to create it",
                self.path.display()
            ),
        })?;
        serde_json::from_str(&content).map_err(|err| Error::Auth {
            message: format!("token file {} is unreadable: {}", self.path.display(), err),
        })
    }

    fn save(&self, tokens: &StoredTokens) -> Result<(), Error> {
        let content = serde_json::to_string_pretty(tokens).map_err(|err| Error::Auth {
            message: format!("failed to serialize tokens: {}", err),
        })?;
        fs::write(&self.path, content).map_err(|err| Error::Auth {
            message: format!("failed to write token file {}: {}", self.path.display(), err),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<StoredTokens, Error> {
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret) else {
            return Err(Error::Auth {
                message: "token refresh requires PINTEREST_CLIENT_ID and PINTEREST_CLIENT_SECRET"
                    .to_string(),
            });
        };

        let basic = general_purpose::STANDARD.encode(format!("{}:{}", client_id, client_secret));
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
        ];

        let resp = self
            .client
            .post(&self.token_url)
            .header(AUTHORIZATION, format!("Basic {}", basic))
            .form(&params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Auth {
                message: format!("token refresh failed with {}: {}", status, body),
            });
        }

        let mut tokens = resp.json::<StoredTokens>().await?;
        tokens.obtained_at = Some(Utc::now().timestamp());
        Ok(tokens)
    }
}

#[async_trait::async_trait]
impl TokenProvider for FileTokenProvider {
    async fn get_valid_token(&self) -> Result<String, Error> {
        let tokens = self.load()?;

        // Files without expiry metadata can only be used as-is.
        let (Some(expires_in), Some(obtained_at)) = (tokens.expires_in, tokens.obtained_at) else {
            return Ok(tokens.access_token);
        };

        let now = Utc::now().timestamp();
        if now >= obtained_at + expires_in - REFRESH_LEEWAY_SECS {
            if let Some(refresh_token) = &tokens.refresh_token {
                info!("access token expired or expiring soon, refreshing");
                let refreshed = self.refresh(refresh_token).await?;
                self.save(&refreshed)?;
                return Ok(refreshed.access_token);
            }
        }

        Ok(tokens.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn provider(token_file: &str) -> FileTokenProvider {
        let mut config = Config::test_default();
        config.token_file = token_file.to_string();
        FileTokenProvider::new(&config)
    }

    #[tokio::test]
    async fn test_missing_token_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pinterest_tokens.json");
        let provider = provider(path.to_str().unwrap());

        let result = provider.get_valid_token().await;
        assert!(matches!(result.unwrap_err(), Error::Auth { .. }));
    }

    #[tokio::test]
    async fn test_fresh_token_is_returned_without_refresh() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pinterest_tokens.json");
        let stored = serde_json::json!({
            "access_token": "fresh",
            "refresh_token": "refresh",
            "expires_in": 86400,
            "obtained_at": Utc::now().timestamp(),
        });
        fs::write(&path, stored.to_string()).unwrap();

        let provider = provider(path.to_str().unwrap());
        assert_eq!(provider.get_valid_token().await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_token_without_expiry_metadata_is_returned_as_is() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pinterest_tokens.json");
        fs::write(&path, r#"{"access_token": "bare"}"#).unwrap();

        let provider = provider(path.to_str().unwrap());
        assert_eq!(provider.get_valid_token().await.unwrap(), "bare");
    }

    #[tokio::test]
    async fn test_expired_token_without_client_credentials() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pinterest_tokens.json");
        let stored = serde_json::json!({
            "access_token": "stale",
            "refresh_token": "refresh",
            "expires_in": 60,
            "obtained_at": Utc::now().timestamp() - 3600,
        });
        fs::write(&path, stored.to_string()).unwrap();

        let provider = provider(path.to_str().unwrap());
        let result = provider.get_valid_token().await;
        assert!(matches!(result.unwrap_err(), Error::Auth { .. }));
    }

    #[tokio::test]
    async fn test_unreadable_token_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pinterest_tokens.json");
        fs::write(&path, "not json").unwrap();

        let provider = provider(path.to_str().unwrap());
        let result = provider.get_valid_token().await;
        assert!(matches!(result.unwrap_err(), Error::Auth { .. }));
    }
}

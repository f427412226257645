use std::time::Duration;

use crate::error::{Result, TikTokError};
use crate::types::TokenResponse;

pub const DEFAULT_TOKEN_URL: &str = "https://open.tiktokapis.com/v2/oauth/token/";

/// OAuth app credentials used to exchange refresh tokens.
pub struct TikTokOAuth {
    client: reqwest::Client,
    token_url: String,
    client_key: String,
    client_secret: String,
    timeout: Duration,
}

impl TikTokOAuth {
    pub fn new(client_key: String, client_secret: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            client_key,
            client_secret,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_token_url(mut self, token_url: &str) -> Self {
        self.token_url = token_url.to_string();
        self
    }

    /// Exchange a refresh token for a fresh access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let form = [
            ("client_key", self.client_key.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let resp = self
            .client
            .post(&self.token_url)
            .form(&form)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(TikTokError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        // Errors come back as 200 with an `error` field instead of tokens.
        serde_json::from_str::<TokenResponse>(&body).map_err(|_| TikTokError::Api {
            status: status.as_u16(),
            message: body,
        })
    }
}

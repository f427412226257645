use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::common::{PipelineError, TokenCipher, UserId};
use crate::kernel::{BaseCredentialStore, BaseTokenRefresher};

/// Hands out usable access tokens, refreshing them shortly before expiry.
pub struct TokenManager {
    store: Arc<dyn BaseCredentialStore>,
    refresher: Arc<dyn BaseTokenRefresher>,
    cipher: TokenCipher,
    skew: chrono::Duration,
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn BaseCredentialStore>,
        refresher: Arc<dyn BaseTokenRefresher>,
        cipher: TokenCipher,
        skew: Duration,
    ) -> Self {
        Self {
            store,
            refresher,
            cipher,
            skew: chrono::Duration::from_std(skew).unwrap_or_else(|_| chrono::Duration::minutes(5)),
        }
    }

    /// Return a plaintext access token that is valid for at least the skew window.
    pub async fn get_valid_access_token(&self, user_id: UserId) -> Result<String, PipelineError> {
        let credential = self
            .store
            .find_credential(user_id)
            .await?
            .ok_or_else(|| PipelineError::UserNotAuthenticated(format!("User not found: {}", user_id)))?;

        let access_encrypted = credential.access_token_encrypted.as_deref().ok_or_else(|| {
            PipelineError::UserNotAuthenticated("User not authenticated - no stored tokens".into())
        })?;

        let now = Utc::now();
        let needs_refresh = credential
            .token_expires_at
            .map(|expires_at| expires_at <= now + self.skew)
            .unwrap_or(false);

        if !needs_refresh {
            return self.cipher.decrypt(access_encrypted).map_err(|e| {
                warn!(user_id = %user_id, error = %e, "Stored access token failed to decrypt");
                PipelineError::TokenInvalid(e.to_string())
            });
        }

        debug!(
            user_id = %user_id,
            expires_at = ?credential.token_expires_at,
            "Access token expiring, refreshing"
        );

        let refresh_encrypted = credential.refresh_token_encrypted.as_deref().ok_or_else(|| {
            PipelineError::TokenExpired("Token has expired. Please re-authenticate.".into())
        })?;

        let refresh_token = self.cipher.decrypt(refresh_encrypted).map_err(|e| {
            warn!(user_id = %user_id, error = %e, "Stored refresh token failed to decrypt");
            PipelineError::TokenInvalid(e.to_string())
        })?;

        let refreshed = self.refresher.refresh(&refresh_token).await.map_err(|e| {
            warn!(user_id = %user_id, error = %e, "Token refresh failed");
            PipelineError::TokenExpired(format!(
                "Token has expired and refresh failed. Please re-authenticate. ({})",
                e
            ))
        })?;

        let expires_at = Utc::now() + chrono::Duration::seconds(refreshed.expires_in_secs);
        let access_out = self.cipher.encrypt(&refreshed.access_token)?;
        let refresh_out = refreshed
            .refresh_token
            .as_deref()
            .map(|token| self.cipher.encrypt(token))
            .transpose()?;

        self.store
            .save_tokens(user_id, &access_out, refresh_out.as_deref(), Some(expires_at))
            .await?;

        info!(user_id = %user_id, expires_at = %expires_at, "Access token refreshed");
        Ok(refreshed.access_token)
    }

    /// Encrypt and persist tokens obtained from an OAuth exchange.
    pub async fn store_tokens(
        &self,
        user_id: UserId,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in_secs: Option<i64>,
    ) -> Result<(), PipelineError> {
        let access_out = self.cipher.encrypt(access_token)?;
        let refresh_out = refresh_token.map(|t| self.cipher.encrypt(t)).transpose()?;
        let expires_at = expires_in_secs.map(|secs| Utc::now() + chrono::Duration::seconds(secs));
        self.store
            .save_tokens(user_id, &access_out, refresh_out.as_deref(), expires_at)
            .await?;
        Ok(())
    }
}

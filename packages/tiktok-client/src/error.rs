use thiserror::Error;

pub type Result<T> = std::result::Result<T, TikTokError>;

#[derive(Debug, Error)]
pub enum TikTokError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl TikTokError {
    /// HTTP status when the platform answered, `None` for transport failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            TikTokError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TikTokError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TikTokError::Decode(err.to_string())
        } else {
            TikTokError::Network(err.to_string())
        }
    }
}

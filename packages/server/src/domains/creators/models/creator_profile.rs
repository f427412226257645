use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use crate::common::CreatorId;
use crate::domains::scraping::ScrapedProfile;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CreatorProfile {
    pub id: CreatorId,
    pub platform_id: String,
    pub username: String,
    pub follower_count: i64,
    pub following_count: i64,
    pub total_likes: i64,
    pub video_count: i64,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub profile_data: Json<serde_json::Value>,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreatorProfile {
    /// Platform id derived from a handle; stable across case changes.
    pub fn platform_id_for(handle: &str) -> String {
        format!("tiktok_{}", handle.to_lowercase())
    }

    /// Provenance blob stored with each scrape.
    pub fn profile_data_for(profile: &ScrapedProfile, source: &str, scraped_at: DateTime<Utc>) -> serde_json::Value {
        serde_json::json!({
            "avatarUrl": profile.avatar_url,
            "scrapedAt": scraped_at,
            "source": source,
        })
    }

    pub async fn exists_by_handle(handle: &str, pool: &PgPool) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM creators WHERE LOWER(username) = LOWER($1))",
        )
        .bind(handle)
        .fetch_one(pool)
        .await?;
        Ok(exists)
    }

    pub async fn find_by_handle(handle: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM creators WHERE LOWER(username) = LOWER($1)")
            .bind(handle)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Insert or refresh the creator keyed by case-insensitive handle.
    pub async fn upsert(profile: &ScrapedProfile, source: &str, pool: &PgPool) -> Result<Self> {
        let now = Utc::now();
        sqlx::query_as::<_, Self>(
            "INSERT INTO creators
                 (id, platform_id, username, follower_count, following_count, total_likes,
                  video_count, bio, avatar_url, profile_data, last_scraped_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT ((LOWER(username))) DO UPDATE SET
                 follower_count = EXCLUDED.follower_count,
                 following_count = EXCLUDED.following_count,
                 total_likes = EXCLUDED.total_likes,
                 video_count = EXCLUDED.video_count,
                 bio = EXCLUDED.bio,
                 avatar_url = EXCLUDED.avatar_url,
                 profile_data = EXCLUDED.profile_data,
                 last_scraped_at = EXCLUDED.last_scraped_at,
                 updated_at = NOW()
             RETURNING *",
        )
        .bind(CreatorId::new())
        .bind(Self::platform_id_for(&profile.username))
        .bind(&profile.username)
        .bind(profile.follower_count)
        .bind(profile.following_count)
        .bind(profile.total_likes)
        .bind(profile.video_count)
        .bind(&profile.bio)
        .bind(&profile.avatar_url)
        .bind(Json(Self::profile_data_for(profile, source, now)))
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }
}

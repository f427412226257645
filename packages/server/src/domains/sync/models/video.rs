use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

use crate::common::{UserId, VideoId};

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: VideoId,
    pub user_id: UserId,
    pub tiktok_video_id: String,
    pub description: Option<String>,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub share_count: i64,
    /// Percentage with two decimals, e.g. `"4.25"`.
    pub engagement_rate: String,
    pub video_created_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `(likes + comments + shares) / views * 100`, two decimals; `"0.00"` without views.
pub fn engagement_rate(likes: i64, comments: i64, shares: i64, views: i64) -> String {
    if views <= 0 {
        return "0.00".to_string();
    }
    let interactions = (likes.max(0) + comments.max(0) + shares.max(0)) as f64;
    format!("{:.2}", interactions / views as f64 * 100.0)
}

/// Row values derived from one platform video.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoUpsert {
    pub tiktok_video_id: String,
    pub description: Option<String>,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub share_count: i64,
    pub engagement_rate: String,
    pub video_created_at: Option<DateTime<Utc>>,
}

impl From<&tiktok_client::Video> for VideoUpsert {
    fn from(video: &tiktok_client::Video) -> Self {
        let views = video.view_count.unwrap_or(0).max(0);
        let likes = video.like_count.unwrap_or(0);
        let comments = video.comment_count.unwrap_or(0);
        let shares = video.share_count.unwrap_or(0);
        let description = video
            .video_description
            .clone()
            .filter(|d| !d.is_empty())
            .or_else(|| video.title.clone());

        Self {
            tiktok_video_id: video.id.clone(),
            description,
            view_count: views,
            like_count: likes,
            comment_count: comments,
            share_count: shares,
            engagement_rate: engagement_rate(likes, comments, shares, views),
            video_created_at: Utc.timestamp_opt(video.create_time, 0).single(),
        }
    }
}

const COLUMNS: &str = "id, user_id, tiktok_video_id, description, view_count, like_count, comment_count, \
     share_count, engagement_rate::text AS engagement_rate, video_created_at, created_at, updated_at";

impl VideoRecord {
    /// Insert, or overwrite counts and engagement on an existing platform id.
    pub async fn upsert(user_id: UserId, row: &VideoUpsert, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "INSERT INTO videos
                 (id, user_id, tiktok_video_id, description, view_count, like_count,
                  comment_count, share_count, engagement_rate, video_created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9::numeric, $10)
             ON CONFLICT (tiktok_video_id) DO UPDATE SET
                 view_count = EXCLUDED.view_count,
                 like_count = EXCLUDED.like_count,
                 comment_count = EXCLUDED.comment_count,
                 share_count = EXCLUDED.share_count,
                 engagement_rate = EXCLUDED.engagement_rate,
                 updated_at = NOW()",
        )
        .bind(VideoId::new())
        .bind(user_id)
        .bind(&row.tiktok_video_id)
        .bind(&row.description)
        .bind(row.view_count)
        .bind(row.like_count)
        .bind(row.comment_count)
        .bind(row.share_count)
        .bind(&row.engagement_rate)
        .bind(row.video_created_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_platform_id(tiktok_video_id: &str, pool: &PgPool) -> Result<Option<Self>> {
        let q = format!("SELECT {} FROM videos WHERE tiktok_video_id = $1", COLUMNS);
        sqlx::query_as::<_, Self>(&q)
            .bind(tiktok_video_id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_user(user_id: UserId, pool: &PgPool) -> Result<Vec<Self>> {
        let q = format!(
            "SELECT {} FROM videos WHERE user_id = $1 ORDER BY video_created_at DESC NULLS LAST",
            COLUMNS
        );
        sqlx::query_as::<_, Self>(&q)
            .bind(user_id)
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engagement_rate_rounds_to_two_decimals() {
        assert_eq!(engagement_rate(10, 5, 2, 400), "4.25");
        assert_eq!(engagement_rate(1, 0, 0, 3), "33.33");
    }

    #[test]
    fn engagement_rate_without_views_is_zero() {
        assert_eq!(engagement_rate(10, 5, 2, 0), "0.00");
        assert_eq!(engagement_rate(10, 5, 2, -7), "0.00");
    }

    #[test]
    fn upsert_row_falls_back_to_title() {
        let video = tiktok_client::Video {
            id: "v1".into(),
            create_time: 1_700_000_000,
            title: Some("title".into()),
            video_description: Some(String::new()),
            view_count: Some(200),
            like_count: Some(10),
            ..Default::default()
        };
        let row = VideoUpsert::from(&video);
        assert_eq!(row.description.as_deref(), Some("title"));
        assert_eq!(row.engagement_rate, "5.00");
        assert_eq!(row.video_created_at.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn missing_counts_default_to_zero() {
        let video = tiktok_client::Video {
            id: "v2".into(),
            ..Default::default()
        };
        let row = VideoUpsert::from(&video);
        assert_eq!(row.view_count, 0);
        assert_eq!(row.engagement_rate, "0.00");
    }
}

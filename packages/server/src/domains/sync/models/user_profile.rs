use anyhow::Result;
use sqlx::PgPool;

use crate::common::UserId;

/// Profile columns on `users` refreshed from the platform during sync.
pub struct UserProfile;

impl UserProfile {
    pub async fn update_from_info(user_id: UserId, info: &tiktok_client::UserInfo, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE users SET
                 tiktok_open_id = COALESCE($2, tiktok_open_id),
                 display_name = COALESCE($3, display_name),
                 avatar_url = $4,
                 bio = $5,
                 follower_count = $6,
                 following_count = $7,
                 total_likes = $8,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(&info.open_id)
        .bind(&info.display_name)
        .bind(&info.avatar_url)
        .bind(&info.bio_description)
        .bind(info.follower_count)
        .bind(info.following_count)
        .bind(info.likes_count)
        .execute(pool)
        .await?;
        Ok(())
    }
}

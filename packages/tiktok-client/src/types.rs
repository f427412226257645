use serde::{Deserialize, Serialize};

/// Profile fields requested from `/user/info/`.
pub const USER_INFO_FIELDS: &str = "open_id,union_id,avatar_url,display_name,bio_description,follower_count,following_count,likes_count,video_count";

/// Video fields requested from `/video/list/`.
pub const VIDEO_FIELDS: &str = "id,create_time,cover_image_url,share_url,video_description,duration,height,width,title,embed_html,embed_link,like_count,comment_count,share_count,view_count";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserInfo {
    pub open_id: Option<String>,
    pub union_id: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio_description: Option<String>,
    pub follower_count: Option<i64>,
    pub following_count: Option<i64>,
    pub likes_count: Option<i64>,
    pub video_count: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Video {
    pub id: String,
    /// Unix seconds.
    #[serde(default)]
    pub create_time: i64,
    pub cover_image_url: Option<String>,
    pub share_url: Option<String>,
    pub video_description: Option<String>,
    pub duration: Option<i64>,
    pub height: Option<i64>,
    pub width: Option<i64>,
    pub title: Option<String>,
    pub embed_html: Option<String>,
    pub embed_link: Option<String>,
    pub like_count: Option<i64>,
    pub comment_count: Option<i64>,
    pub share_count: Option<i64>,
    pub view_count: Option<i64>,
}

/// Body of a `/video/list/` request.
#[derive(Debug, Clone, Serialize)]
pub struct VideoListRequest {
    pub max_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<serde_json::Value>,
}

/// Envelope every open API response is wrapped in.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub data: Option<T>,
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub log_id: Option<String>,
}

impl ApiErrorBody {
    pub fn is_ok(&self) -> bool {
        self.code.is_empty() || self.code == "ok"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfoData {
    pub user: UserInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoListData {
    #[serde(default)]
    pub videos: Vec<Video>,
    /// Opaque continuation token; the platform currently sends a number.
    #[serde(default)]
    pub cursor: Option<serde_json::Value>,
    #[serde(default)]
    pub has_more: bool,
}

impl VideoListData {
    /// The cursor to send with the next page, if paging should continue.
    pub fn next_cursor(&self) -> Option<serde_json::Value> {
        if !self.has_more {
            return None;
        }
        match &self.cursor {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) if s.is_empty() => None,
            Some(serde_json::Value::Number(n)) if n.as_i64() == Some(0) => None,
            Some(other) => Some(other.clone()),
        }
    }
}

/// Response of the OAuth token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Seconds until `access_token` expires.
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub refresh_expires_in: Option<i64>,
    #[serde(default)]
    pub open_id: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(cursor: serde_json::Value, has_more: bool) -> VideoListData {
        serde_json::from_value(json!({ "videos": [], "cursor": cursor, "has_more": has_more }))
            .unwrap()
    }

    #[test]
    fn next_cursor_requires_has_more() {
        assert_eq!(page(json!(1700000000000i64), false).next_cursor(), None);
        assert_eq!(
            page(json!(1700000000000i64), true).next_cursor(),
            Some(json!(1700000000000i64))
        );
    }

    #[test]
    fn falsy_cursor_stops_paging() {
        assert_eq!(page(json!(0), true).next_cursor(), None);
        assert_eq!(page(json!(""), true).next_cursor(), None);
        assert_eq!(page(serde_json::Value::Null, true).next_cursor(), None);
    }

    #[test]
    fn video_tolerates_missing_counts() {
        let video: Video = serde_json::from_value(json!({ "id": "v1", "create_time": 10 })).unwrap();
        assert_eq!(video.id, "v1");
        assert_eq!(video.view_count, None);
    }
}

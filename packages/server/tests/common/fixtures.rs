//! Test fixtures: rendered pages, platform payloads and logging setup.

use discovery_core::domains::scraping::ScrapedProfile;

/// Route `tracing` output through the test writer. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A hashtag listing page linking to each handle.
pub fn tag_page(handles: &[&str]) -> String {
    let cards: String = handles
        .iter()
        .map(|h| format!(r#"<div class="card"><a href="/@{h}/video/1">@{h}</a></div>"#))
        .collect();
    format!("<html><body><main>{}</main></body></html>", cards)
}

/// A rendered profile page with the usual `data-e2e` markers.
pub fn profile_page(handle: &str, followers: &str, likes: &str, videos: usize) -> String {
    let posts: String = (0..videos).map(|_| r#"<div data-e2e="user-post-item"></div>"#).collect();
    format!(
        r#"<html><body>
            <h1 data-e2e="user-title">@{handle}</h1>
            <h2 data-e2e="user-bio">posting about {handle}</h2>
            <strong data-e2e="followers-count">{followers}</strong>
            <strong data-e2e="following-count">42</strong>
            <strong data-e2e="likes-count">{likes}</strong>
            <span data-e2e="user-avatar"><img src="https://cdn.example/{handle}.jpg"></span>
            {posts}
        </body></html>"#
    )
}

pub const ERROR_PAGE: &str =
    r#"<html><body><div data-e2e="error-page">Something went wrong. Please try again.</div></body></html>"#;

pub const CHALLENGE_PAGE: &str =
    r#"<html><body><div class="captcha" data-captcha="1">Verify to continue</div></body></html>"#;

pub fn scraped(handle: &str, followers: i64) -> ScrapedProfile {
    ScrapedProfile {
        username: handle.to_string(),
        bio: Some(format!("bio of {}", handle)),
        follower_count: followers,
        following_count: 10,
        total_likes: followers * 3,
        video_count: 12,
        avatar_url: None,
    }
}

pub fn user_info(name: &str) -> tiktok_client::UserInfo {
    tiktok_client::UserInfo {
        open_id: Some(format!("open-{}", name)),
        display_name: Some(name.to_string()),
        follower_count: Some(1_500),
        following_count: Some(20),
        likes_count: Some(9_000),
        video_count: Some(3),
        ..Default::default()
    }
}

pub fn video(id: &str, views: i64, likes: i64) -> tiktok_client::Video {
    tiktok_client::Video {
        id: id.to_string(),
        create_time: 1_700_000_000,
        title: Some(format!("video {}", id)),
        view_count: Some(views),
        like_count: Some(likes),
        comment_count: Some(0),
        share_count: Some(0),
        ..Default::default()
    }
}

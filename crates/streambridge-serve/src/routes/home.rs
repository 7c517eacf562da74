//! Root banner.

pub async fn banner() -> &'static str {
    "streambridge - Twitch EventSub webhook bridge\n"
}

use uuid::Uuid;

/// 好友集合键前缀
const FRIENDS_PREFIX: &str = "friends:";

/// 位置更新频道前缀
const LOCATION_CHANNEL_PREFIX: &str = "location_updates:";

/// 好友变更通知频道前缀
const FRIENDS_CHANGED_PREFIX: &str = "friends_changed:";

pub fn friends_key(user_id: &Uuid) -> String {
    format!("{}{}", FRIENDS_PREFIX, user_id)
}

/// 用户发布自己位置更新的频道
pub fn location_channel(user_id: &Uuid) -> String {
    format!("{}{}", LOCATION_CHANNEL_PREFIX, user_id)
}

pub fn friends_changed_channel(user_id: &Uuid) -> String {
    format!("{}{}", FRIENDS_CHANGED_PREFIX, user_id)
}

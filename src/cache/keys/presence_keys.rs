use uuid::Uuid;

/// 在线位置缓存键前缀
const PRESENCE_PREFIX: &str = "presence:user:";

/// 在线用户GEO索引键
pub const PRESENCE_GEO_KEY: &str = "presence:geo";

/// 生成在线位置哈希键，该键携带TTL
pub fn presence_key(user_id: &Uuid) -> String {
    format!("{}{}", PRESENCE_PREFIX, user_id)
}

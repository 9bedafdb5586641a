/// 缓存操作
/// 提供基于 Redis 的缓存实现

// 在线位置缓存操作
pub mod presence;

pub use presence::RedisPresenceCache;

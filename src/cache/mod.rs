// 缓存模块
// 在线位置的临时缓存：GEO索引 + 目的地字段，按用户设置TTL

pub mod keys;
pub mod memory;
pub mod operations;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{NearbyPresence, PresenceEntry};

pub use memory::MemoryPresenceCache;
pub use operations::presence::RedisPresenceCache;

/// 在线位置缓存
///
/// 过期的条目与不存在无法区分，任何查询都不会返回它。
/// 过期是存储自身的属性，调用方不需要清理。
#[async_trait]
pub trait PresenceCache: Send + Sync {
    /// 原子地写入位置索引和目的地字段，并重置TTL
    async fn put(&self, entry: &PresenceEntry, ttl: Duration) -> AppResult<()>;

    async fn get(&self, user_id: Uuid) -> AppResult<PresenceEntry>;

    /// 延长TTL；条目不存在时返回 NotFound
    async fn refresh(&self, user_id: Uuid, ttl: Duration) -> AppResult<()>;

    async fn remove(&self, user_id: Uuid) -> AppResult<()>;

    /// 以 `center` 的当前位置为圆心查询半径内的用户，按距离升序，不含圆心用户。
    /// 圆心用户没有在线位置时返回 NotFound。
    async fn query_radius(&self, center: Uuid, radius_km: f64) -> AppResult<Vec<NearbyPresence>>;

    /// 批量写入，返回写入条数
    async fn put_many(&self, entries: &[PresenceEntry], ttl: Duration) -> AppResult<usize> {
        for entry in entries {
            self.put(entry, ttl).await?;
        }
        Ok(entries.len())
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client as RedisClient, aio::MultiplexedConnection};
use uuid::Uuid;

use crate::cache::PresenceCache;
use crate::cache::keys::{PRESENCE_GEO_KEY, presence_key};
use crate::error::{AppError, AppResult};
use crate::models::{Coordinates, NearbyPresence, PresenceEntry};

const FIELD_CURRENT_LAT: &str = "current_latitude";
const FIELD_CURRENT_LON: &str = "current_longitude";
const FIELD_DEST_LAT: &str = "destination_latitude";
const FIELD_DEST_LON: &str = "destination_longitude";
const FIELD_UPDATED_AT: &str = "updated_at";

/// 原子地清理GEO中哈希已过期的成员：KEYS[1] 为GEO键，KEYS[i+1] 对应 ARGV[i] 的哈希键。
/// 检查与删除在同一脚本内，期间写入的新位置不会被误删。
const PRUNE_EXPIRED_SCRIPT: &str = r#"
local removed = 0
for i, member in ipairs(ARGV) do
    if redis.call('EXISTS', KEYS[i + 1]) == 0 then
        removed = removed + redis.call('ZREM', KEYS[1], member)
    end
end
return removed
"#;

/// 基于 Redis 的在线位置缓存
///
/// GEO 有序集合保存位置索引，每个用户的哈希保存目的地并携带TTL。
/// 哈希是存活标记：哈希过期后，GEO 中残留的成员视为不存在，查询时顺便清理。
#[derive(Clone)]
pub struct RedisPresenceCache {
    redis: Arc<RedisClient>,
}

impl RedisPresenceCache {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }

    async fn connection(&self) -> AppResult<MultiplexedConnection> {
        Ok(self.redis.get_multiplexed_async_connection().await?)
    }

    fn ttl_secs(ttl: Duration) -> i64 {
        ttl.as_secs().max(1) as i64
    }

    fn fields(entry: &PresenceEntry) -> [(&'static str, String); 5] {
        [
            (FIELD_CURRENT_LAT, entry.current.latitude.to_string()),
            (FIELD_CURRENT_LON, entry.current.longitude.to_string()),
            (FIELD_DEST_LAT, entry.destination.latitude.to_string()),
            (FIELD_DEST_LON, entry.destination.longitude.to_string()),
            (FIELD_UPDATED_AT, entry.updated_at.to_rfc3339()),
        ]
    }

    /// 把一次写入追加到事务管道：GEOADD + DEL + HSET + EXPIRE
    fn queue_put(pipe: &mut redis::Pipeline, entry: &PresenceEntry, ttl: Duration) {
        let key = presence_key(&entry.user_id);
        pipe.cmd("GEOADD")
            .arg(PRESENCE_GEO_KEY)
            .arg(entry.current.longitude)
            .arg(entry.current.latitude)
            .arg(entry.user_id.to_string())
            .ignore()
            .del(&key)
            .ignore()
            .hset_multiple(&key, &Self::fields(entry))
            .ignore()
            .expire(&key, Self::ttl_secs(ttl))
            .ignore();
    }

    /// 按存活标记拆分候选：返回（存活的，已过期的）
    fn partition_alive(
        candidates: Vec<NearbyPresence>,
        alive: &[bool],
    ) -> (Vec<NearbyPresence>, Vec<Uuid>) {
        let mut live = Vec::with_capacity(candidates.len());
        let mut expired = Vec::new();
        for (candidate, is_alive) in candidates.into_iter().zip(alive.iter().copied()) {
            if is_alive {
                live.push(candidate);
            } else {
                expired.push(candidate.user_id);
            }
        }
        (live, expired)
    }

    async fn prune_expired(conn: &mut MultiplexedConnection, expired: &[Uuid]) {
        let script = redis::Script::new(PRUNE_EXPIRED_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation.key(PRESENCE_GEO_KEY);
        for user_id in expired {
            invocation.key(presence_key(user_id));
            invocation.arg(user_id.to_string());
        }

        let removed: redis::RedisResult<i64> = invocation.invoke_async(conn).await;
        match removed {
            Ok(n) => tracing::debug!("Pruned {} expired geo members", n),
            Err(e) => tracing::warn!("Failed to prune expired geo members: {}", e),
        }
    }

    fn parse_entry(user_id: Uuid, fields: &HashMap<String, String>) -> AppResult<PresenceEntry> {
        let number = |name: &str| -> AppResult<f64> {
            fields
                .get(name)
                .and_then(|v| v.parse::<f64>().ok())
                .ok_or_else(|| {
                    AppError::StoreUnavailable(format!(
                        "corrupt presence entry for {}: field {}",
                        user_id, name
                    ))
                })
        };

        let updated_at = fields
            .get(FIELD_UPDATED_AT)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(PresenceEntry {
            user_id,
            current: Coordinates::new(number(FIELD_CURRENT_LAT)?, number(FIELD_CURRENT_LON)?),
            destination: Coordinates::new(number(FIELD_DEST_LAT)?, number(FIELD_DEST_LON)?),
            updated_at,
        })
    }
}

#[async_trait]
impl PresenceCache for RedisPresenceCache {
    async fn put(&self, entry: &PresenceEntry, ttl: Duration) -> AppResult<()> {
        let mut conn = self.connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        Self::queue_put(&mut pipe, entry, ttl);
        let _: () = pipe.query_async(&mut conn).await?;

        tracing::debug!(user_id = %entry.user_id, "Presence entry cached");
        Ok(())
    }

    async fn get(&self, user_id: Uuid) -> AppResult<PresenceEntry> {
        let mut conn = self.connection().await?;

        let fields: HashMap<String, String> = conn.hgetall(presence_key(&user_id)).await?;
        if fields.is_empty() {
            return Err(AppError::not_found(format!("presence for user {}", user_id)));
        }

        Self::parse_entry(user_id, &fields)
    }

    async fn refresh(&self, user_id: Uuid, ttl: Duration) -> AppResult<()> {
        let mut conn = self.connection().await?;

        let refreshed: bool = conn
            .expire(presence_key(&user_id), Self::ttl_secs(ttl))
            .await?;
        if !refreshed {
            return Err(AppError::not_found(format!("presence for user {}", user_id)));
        }
        Ok(())
    }

    async fn remove(&self, user_id: Uuid) -> AppResult<()> {
        let mut conn = self.connection().await?;

        let _: () = redis::pipe()
            .atomic()
            .zrem(PRESENCE_GEO_KEY, user_id.to_string())
            .ignore()
            .del(presence_key(&user_id))
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn query_radius(&self, center: Uuid, radius_km: f64) -> AppResult<Vec<NearbyPresence>> {
        let origin = self.get(center).await?;
        let mut conn = self.connection().await?;

        // 使用GEORADIUS命令查找附近用户，距离升序
        let raw: Vec<(String, f64, (f64, f64))> = redis::cmd("GEORADIUS")
            .arg(PRESENCE_GEO_KEY)
            .arg(origin.current.longitude)
            .arg(origin.current.latitude)
            .arg(radius_km)
            .arg("km")
            .arg("WITHDIST")
            .arg("WITHCOORD")
            .arg("ASC")
            .query_async(&mut conn)
            .await?;

        let mut candidates = Vec::with_capacity(raw.len());
        for (member, distance_km, (longitude, latitude)) in raw {
            match Uuid::parse_str(&member) {
                Ok(user_id) if user_id == center => {}
                Ok(user_id) => candidates.push(NearbyPresence {
                    user_id,
                    distance_km,
                    coordinates: Coordinates::new(latitude, longitude),
                }),
                Err(_) => tracing::warn!("Ignoring malformed geo member: {}", member),
            }
        }

        if candidates.is_empty() {
            return Ok(candidates);
        }

        // 过滤哈希已过期的成员
        let mut pipe = redis::pipe();
        for candidate in &candidates {
            pipe.exists(presence_key(&candidate.user_id));
        }
        let alive: Vec<bool> = pipe.query_async(&mut conn).await?;

        let (live, expired) = Self::partition_alive(candidates, &alive);
        if !expired.is_empty() {
            // 脚本内重新检查存活，只删仍然过期的成员
            Self::prune_expired(&mut conn, &expired).await;
        }

        Ok(live)
    }

    async fn put_many(&self, entries: &[PresenceEntry], ttl: Duration) -> AppResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;

        let mut pipe = redis::pipe();
        for entry in entries {
            Self::queue_put(&mut pipe, entry, ttl);
        }
        let _: () = pipe.query_async(&mut conn).await?;

        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entry_round_trips_fields() {
        let entry = PresenceEntry {
            user_id: Uuid::new_v4(),
            current: Coordinates::new(37.7749, -122.4194),
            destination: Coordinates::new(40.7128, -74.006),
            updated_at: Utc::now(),
        };
        let fields: HashMap<String, String> = RedisPresenceCache::fields(&entry)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let parsed = RedisPresenceCache::parse_entry(entry.user_id, &fields).unwrap();
        assert_eq!(parsed.current, entry.current);
        assert_eq!(parsed.destination, entry.destination);
    }

    #[test]
    fn test_parse_entry_rejects_missing_destination() {
        let mut fields = HashMap::new();
        fields.insert(FIELD_CURRENT_LAT.to_string(), "1.0".to_string());
        fields.insert(FIELD_CURRENT_LON.to_string(), "2.0".to_string());

        let err = RedisPresenceCache::parse_entry(Uuid::new_v4(), &fields).unwrap_err();
        assert!(matches!(err, AppError::StoreUnavailable(_)));
    }

    fn nearby(distance_km: f64) -> NearbyPresence {
        NearbyPresence {
            user_id: Uuid::new_v4(),
            distance_km,
            coordinates: Coordinates::new(0.0, 0.0),
        }
    }

    #[test]
    fn test_partition_alive_keeps_order_and_collects_expired() {
        let candidates = vec![nearby(0.5), nearby(1.0), nearby(2.0), nearby(3.0)];
        let ids: Vec<Uuid> = candidates.iter().map(|c| c.user_id).collect();

        let (live, expired) =
            RedisPresenceCache::partition_alive(candidates, &[true, false, true, false]);

        let live_ids: Vec<Uuid> = live.iter().map(|c| c.user_id).collect();
        assert_eq!(live_ids, vec![ids[0], ids[2]]);
        assert_eq!(expired, vec![ids[1], ids[3]]);
    }

    #[test]
    fn test_prune_script_rechecks_liveness_before_removing() {
        let exists = PRUNE_EXPIRED_SCRIPT.find("EXISTS").unwrap();
        let zrem = PRUNE_EXPIRED_SCRIPT.find("ZREM").unwrap();
        assert!(exists < zrem);
        assert!(PRUNE_EXPIRED_SCRIPT.contains("KEYS[i + 1]"));
    }

    #[test]
    fn test_ttl_is_at_least_one_second() {
        assert_eq!(RedisPresenceCache::ttl_secs(Duration::from_millis(10)), 1);
        assert_eq!(RedisPresenceCache::ttl_secs(Duration::from_secs(60)), 60);
    }
}

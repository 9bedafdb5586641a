use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use crate::cache::PresenceCache;
use crate::error::{AppError, AppResult};
use crate::models::{NearbyPresence, PresenceEntry};
use crate::utils::calculate_distance_km;

/// 在线位置缓存条目
#[derive(Clone, Debug)]
struct CachedPresence {
    entry: PresenceEntry,
    expires_at: Instant,
}

impl CachedPresence {
    fn is_alive(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// 进程内在线位置缓存，过期判断基于 tokio 时钟，测试中可以暂停和快进
#[derive(Default)]
pub struct MemoryPresenceCache {
    entries: RwLock<HashMap<Uuid, CachedPresence>>,
    unavailable: AtomicBool,
}

impl MemoryPresenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟缓存不可达
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// 当前存活的条目数
    pub async fn live_count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|c| c.is_alive(now))
            .count()
    }

    fn check(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable("memory cache offline".into()));
        }
        Ok(())
    }

    fn missing(user_id: Uuid) -> AppError {
        AppError::not_found(format!("presence for user {}", user_id))
    }
}

#[async_trait]
impl PresenceCache for MemoryPresenceCache {
    async fn put(&self, entry: &PresenceEntry, ttl: Duration) -> AppResult<()> {
        self.check()?;
        self.entries.write().await.insert(
            entry.user_id,
            CachedPresence {
                entry: entry.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, user_id: Uuid) -> AppResult<PresenceEntry> {
        self.check()?;
        let now = Instant::now();
        self.entries
            .read()
            .await
            .get(&user_id)
            .filter(|c| c.is_alive(now))
            .map(|c| c.entry.clone())
            .ok_or_else(|| Self::missing(user_id))
    }

    async fn refresh(&self, user_id: Uuid, ttl: Duration) -> AppResult<()> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get_mut(&user_id) {
            Some(cached) if cached.is_alive(now) => {
                cached.expires_at = now + ttl;
                Ok(())
            }
            Some(_) => {
                entries.remove(&user_id);
                Err(Self::missing(user_id))
            }
            None => Err(Self::missing(user_id)),
        }
    }

    async fn remove(&self, user_id: Uuid) -> AppResult<()> {
        self.check()?;
        self.entries.write().await.remove(&user_id);
        Ok(())
    }

    async fn query_radius(&self, center: Uuid, radius_km: f64) -> AppResult<Vec<NearbyPresence>> {
        let origin = self.get(center).await?;
        let now = Instant::now();
        let entries = self.entries.read().await;

        let mut nearby: Vec<NearbyPresence> = entries
            .values()
            .filter(|c| c.is_alive(now) && c.entry.user_id != center)
            .filter_map(|c| {
                let distance_km = calculate_distance_km(
                    origin.current.latitude,
                    origin.current.longitude,
                    c.entry.current.latitude,
                    c.entry.current.longitude,
                );
                (distance_km <= radius_km).then(|| NearbyPresence {
                    user_id: c.entry.user_id,
                    distance_km,
                    coordinates: c.entry.current,
                })
            })
            .collect();

        // 按距离排序
        nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        Ok(nearby)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Coordinates;
    use chrono::Utc;

    const TTL: Duration = Duration::from_secs(60);

    fn entry_at(latitude: f64, longitude: f64) -> PresenceEntry {
        PresenceEntry {
            user_id: Uuid::new_v4(),
            current: Coordinates::new(latitude, longitude),
            destination: Coordinates::new(40.7128, -74.0060),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_without_refresh() {
        let cache = MemoryPresenceCache::new();
        let entry = entry_at(37.7749, -122.4194);
        cache.put(&entry, TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get(entry.user_id).await.is_ok());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(entry.user_id).await.unwrap_err().is_not_found());
        assert!(
            cache
                .refresh(entry.user_id, TTL)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_extends_deadline() {
        let cache = MemoryPresenceCache::new();
        let entry = entry_at(37.7749, -122.4194);
        cache.put(&entry, TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        cache.refresh(entry.user_id, TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(cache.get(entry.user_id).await.unwrap(), entry);
    }

    #[tokio::test]
    async fn test_query_radius_orders_and_excludes_center() {
        let cache = MemoryPresenceCache::new();
        let center = entry_at(37.7749, -122.4194);
        let near = entry_at(37.7839, -122.4194); // 约1公里
        let nearer = entry_at(37.7769, -122.4194); // 约0.2公里
        let far = entry_at(37.9, -122.4194); // 约14公里
        for e in [&center, &near, &nearer, &far] {
            cache.put(e, TTL).await.unwrap();
        }

        let result = cache.query_radius(center.user_id, 5.0).await.unwrap();
        let ids: Vec<Uuid> = result.iter().map(|n| n.user_id).collect();
        assert_eq!(ids, vec![nearer.user_id, near.user_id]);
        assert!(result.iter().all(|n| n.distance_km <= 5.0));
    }

    #[tokio::test]
    async fn test_query_radius_without_center_is_not_found() {
        let cache = MemoryPresenceCache::new();
        let err = cache.query_radius(Uuid::new_v4(), 5.0).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_neighbours_are_not_returned() {
        let cache = MemoryPresenceCache::new();
        let center = entry_at(37.7749, -122.4194);
        let stale = entry_at(37.7769, -122.4194);
        cache.put(&stale, Duration::from_secs(10)).await.unwrap();
        cache.put(&center, TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        let result = cache.query_radius(center.user_id, 5.0).await.unwrap();
        assert!(result.is_empty());
    }
}

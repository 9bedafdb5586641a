//! 邻近匹配
//!
//! 在请求方附近的在线用户中，找出目的地与请求方相同（在容差内）的用户。
//! 目的地按经纬度各自比较，容差只是近似判断，并不代表语义上的同一地点。

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use uuid::Uuid;

use crate::cache::PresenceCache;
use crate::database::LocationStore;
use crate::error::{AppError, AppResult};
use crate::models::{Coordinates, MatchedUser, PresenceEntry};

/// 默认目的地容差（度），赤道附近约1公里
pub const DEFAULT_DESTINATION_TOLERANCE: f64 = 0.01;

/// 吸收浮点减法误差，使恰好等于容差的差值仍然算匹配
const TOLERANCE_EPSILON: f64 = 1e-9;

/// 两个目的地的纬度差和经度差都不超过容差时视为相同
pub fn is_destination_match(a: Coordinates, b: Coordinates, tolerance: f64) -> bool {
    let limit = tolerance + TOLERANCE_EPSILON;
    (a.latitude - b.latitude).abs() <= limit && (a.longitude - b.longitude).abs() <= limit
}

#[derive(Clone)]
pub struct ProximityMatcher {
    presence: Arc<dyn PresenceCache>,
    store: Arc<dyn LocationStore>,
    tolerance: f64,
    presence_ttl: Duration,
}

impl ProximityMatcher {
    pub fn new(
        presence: Arc<dyn PresenceCache>,
        store: Arc<dyn LocationStore>,
        tolerance: f64,
        presence_ttl: Duration,
    ) -> Self {
        Self {
            presence,
            store,
            tolerance,
            presence_ttl,
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// 查找半径内目的地相同的用户，保持距离升序。
    /// 单个候选读取失败只记录日志并跳过。
    pub async fn find_matches(&self, user_id: Uuid, radius_km: f64) -> AppResult<Vec<MatchedUser>> {
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(AppError::validation(format!(
                "radius must be positive: {}",
                radius_km
            )));
        }

        let requester = self
            .presence
            .get(user_id)
            .await
            .map_err(|e| location_not_found(e, user_id))?;

        let candidates = self
            .presence
            .query_radius(user_id, radius_km)
            .await
            .map_err(|e| location_not_found(e, user_id))?
            .into_iter()
            .filter(|c| c.user_id != user_id)
            .collect::<Vec<_>>();

        let destinations = join_all(
            candidates
                .iter()
                .map(|candidate| self.presence.get(candidate.user_id)),
        )
        .await;

        let mut matches = Vec::new();
        for (candidate, lookup) in candidates.into_iter().zip(destinations) {
            let entry = match lookup {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(
                        user_id = %candidate.user_id,
                        "Failed to get destination for candidate: {}",
                        e
                    );
                    continue;
                }
            };

            if is_destination_match(requester.destination, entry.destination, self.tolerance) {
                matches.push(MatchedUser {
                    user_id: candidate.user_id,
                    distance_km: candidate.distance_km,
                    current: candidate.coordinates,
                    destination: entry.destination,
                });
            }
        }

        tracing::debug!(
            user_id = %user_id,
            radius_km,
            matches = matches.len(),
            "Proximity matches computed"
        );
        Ok(matches)
    }

    /// 从持久存储重建在线位置缓存，用于冷启动或缓存数据丢失后，不在请求路径上执行
    pub async fn sync_from_store(&self) -> AppResult<usize> {
        let records = self.store.list_all().await?;
        let entries: Vec<PresenceEntry> = records.iter().map(PresenceEntry::from).collect();

        let synced = self.presence.put_many(&entries, self.presence_ttl).await?;
        tracing::info!("Synced {} locations to presence cache", synced);
        Ok(synced)
    }
}

fn location_not_found(err: AppError, user_id: Uuid) -> AppError {
    if err.is_not_found() {
        AppError::LocationNotFound(user_id.to_string())
    } else {
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryPresenceCache;
    use crate::database::MemoryLocationStore;
    use crate::models::LocationRecord;

    const TTL: Duration = Duration::from_secs(60);
    const SF: Coordinates = Coordinates {
        latitude: 37.7749,
        longitude: -122.4194,
    };
    const NYC: Coordinates = Coordinates {
        latitude: 40.7128,
        longitude: -74.0060,
    };

    struct Fixture {
        presence: Arc<MemoryPresenceCache>,
        store: Arc<MemoryLocationStore>,
        matcher: ProximityMatcher,
    }

    fn fixture() -> Fixture {
        let presence = Arc::new(MemoryPresenceCache::new());
        let store = Arc::new(MemoryLocationStore::new());
        let matcher = ProximityMatcher::new(
            presence.clone(),
            store.clone(),
            DEFAULT_DESTINATION_TOLERANCE,
            TTL,
        );
        Fixture {
            presence,
            store,
            matcher,
        }
    }

    async fn place(presence: &MemoryPresenceCache, current: Coordinates, destination: Coordinates) -> Uuid {
        let record = LocationRecord::new(Uuid::new_v4(), current, destination);
        presence.put(&PresenceEntry::from(&record), TTL).await.unwrap();
        record.user_id
    }

    #[test]
    fn test_tolerance_boundary() {
        let base = Coordinates::new(40.7128, -74.0060);
        let at_boundary = Coordinates::new(40.7128 + 0.01, -74.0060 - 0.01);
        let beyond = Coordinates::new(40.7128 + 0.01 + 1e-6, -74.0060);

        assert!(is_destination_match(base, at_boundary, 0.01));
        assert!(!is_destination_match(base, beyond, 0.01));
    }

    #[test]
    fn test_both_axes_must_match() {
        let base = Coordinates::new(10.0, 10.0);
        assert!(!is_destination_match(base, Coordinates::new(10.0, 10.5), 0.01));
        assert!(!is_destination_match(base, Coordinates::new(10.5, 10.0), 0.01));
    }

    #[tokio::test]
    async fn test_matches_same_destination_nearby() {
        let f = fixture();
        let a = place(&f.presence, SF, NYC).await;
        // 约2公里外，目的地相差0.005度
        let b = place(
            &f.presence,
            Coordinates::new(37.7929, -122.4194),
            Coordinates::new(40.7178, -74.0010),
        )
        .await;
        let c = place(&f.presence, SF, Coordinates::new(0.0, 0.0)).await;

        let matches = f.matcher.find_matches(a, 5.0).await.unwrap();
        let ids: Vec<Uuid> = matches.iter().map(|m| m.user_id).collect();

        assert_eq!(ids, vec![b]);
        assert!(!ids.contains(&c));
        assert!((matches[0].distance_km - 2.0).abs() < 0.1);
    }

    #[tokio::test]
    async fn test_matches_keep_distance_order() {
        let f = fixture();
        let a = place(&f.presence, SF, NYC).await;
        let far = place(&f.presence, Coordinates::new(37.8029, -122.4194), NYC).await;
        let near = place(&f.presence, Coordinates::new(37.7769, -122.4194), NYC).await;
        let outside = place(&f.presence, Coordinates::new(38.5, -122.4194), NYC).await;

        let ids: Vec<Uuid> = f
            .matcher
            .find_matches(a, 5.0)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.user_id)
            .collect();

        assert_eq!(ids, vec![near, far]);
        assert!(!ids.contains(&outside));
    }

    #[tokio::test]
    async fn test_requester_without_presence() {
        let f = fixture();
        let err = f.matcher.find_matches(Uuid::new_v4(), 5.0).await.unwrap_err();
        assert!(matches!(err, AppError::LocationNotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_radius() {
        let f = fixture();
        let a = place(&f.presence, SF, NYC).await;
        let err = f.matcher.find_matches(a, 0.0).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_sync_from_store_rehydrates_cache() {
        let f = fixture();
        let a = LocationRecord::new(Uuid::new_v4(), SF, NYC);
        let b = LocationRecord::new(Uuid::new_v4(), Coordinates::new(37.7769, -122.4194), NYC);
        f.store.create(&a).await.unwrap();
        f.store.create(&b).await.unwrap();

        assert!(f.matcher.find_matches(a.user_id, 5.0).await.is_err());
        assert_eq!(f.matcher.sync_from_store().await.unwrap(), 2);

        let matches = f.matcher.find_matches(a.user_id, 5.0).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].user_id, b.user_id);
    }
}

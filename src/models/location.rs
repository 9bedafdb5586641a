use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 经纬度坐标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// 用户位置的持久记录，每个用户至多一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LocationRecord {
    pub user_id: Uuid,
    pub current_latitude: f64,
    pub current_longitude: f64,
    pub destination_latitude: f64,
    pub destination_longitude: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocationRecord {
    pub fn new(user_id: Uuid, current: Coordinates, destination: Coordinates) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            current_latitude: current.latitude,
            current_longitude: current.longitude,
            destination_latitude: destination.latitude,
            destination_longitude: destination.longitude,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn current(&self) -> Coordinates {
        Coordinates::new(self.current_latitude, self.current_longitude)
    }

    pub fn destination(&self) -> Coordinates {
        Coordinates::new(self.destination_latitude, self.destination_longitude)
    }
}

/// 位置记录在缓存中的投影，过期后视同不存在
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: Uuid,
    pub current: Coordinates,
    pub destination: Coordinates,
    pub updated_at: DateTime<Utc>,
}

impl From<&LocationRecord> for PresenceEntry {
    fn from(record: &LocationRecord) -> Self {
        Self {
            user_id: record.user_id,
            current: record.current(),
            destination: record.destination(),
            updated_at: record.updated_at,
        }
    }
}

/// 半径查询的结果项
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyPresence {
    pub user_id: Uuid,
    pub distance_km: f64,
    pub coordinates: Coordinates,
}

/// 目的地相同的附近用户
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedUser {
    pub user_id: Uuid,
    pub distance_km: f64,
    pub current: Coordinates,
    pub destination: Coordinates,
}

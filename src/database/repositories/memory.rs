use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::LocationStore;
use crate::error::{AppError, AppResult};
use crate::models::LocationRecord;

/// 进程内位置记录存储，用于测试和本地调试
#[derive(Default)]
pub struct MemoryLocationStore {
    records: RwLock<BTreeMap<Uuid, LocationRecord>>,
    unavailable: AtomicBool,
}

impl MemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储不可达
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    fn check(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable("memory store offline".into()));
        }
        Ok(())
    }

    async fn modify<F>(&self, user_id: Uuid, apply: F) -> AppResult<LocationRecord>
    where
        F: FnOnce(&mut LocationRecord) + Send,
    {
        self.check()?;
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&user_id)
            .ok_or_else(|| AppError::not_found(format!("location for user {}", user_id)))?;
        apply(record);
        Ok(record.clone())
    }
}

#[async_trait]
impl LocationStore for MemoryLocationStore {
    async fn create(&self, record: &LocationRecord) -> AppResult<LocationRecord> {
        self.check()?;
        let mut records = self.records.write().await;
        let saved = match records.get(&record.user_id) {
            Some(existing) => LocationRecord {
                created_at: existing.created_at,
                ..record.clone()
            },
            None => record.clone(),
        };
        records.insert(record.user_id, saved.clone());
        Ok(saved)
    }

    async fn get(&self, user_id: Uuid) -> AppResult<LocationRecord> {
        self.check()?;
        self.records
            .read()
            .await
            .get(&user_id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("location for user {}", user_id)))
    }

    async fn update(&self, record: &LocationRecord) -> AppResult<LocationRecord> {
        let incoming = record.clone();
        self.modify(record.user_id, move |r| {
            r.current_latitude = incoming.current_latitude;
            r.current_longitude = incoming.current_longitude;
            r.destination_latitude = incoming.destination_latitude;
            r.destination_longitude = incoming.destination_longitude;
            r.updated_at = incoming.updated_at;
        })
        .await
    }

    async fn update_destination(
        &self,
        user_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> AppResult<LocationRecord> {
        self.modify(user_id, |r| {
            r.destination_latitude = latitude;
            r.destination_longitude = longitude;
            r.updated_at = Utc::now();
        })
        .await
    }

    async fn update_current_location(
        &self,
        user_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> AppResult<LocationRecord> {
        self.modify(user_id, |r| {
            r.current_latitude = latitude;
            r.current_longitude = longitude;
            r.updated_at = Utc::now();
        })
        .await
    }

    async fn delete(&self, user_id: Uuid) -> AppResult<()> {
        self.check()?;
        match self.records.write().await.remove(&user_id) {
            Some(_) => Ok(()),
            None => Err(AppError::not_found(format!("location for user {}", user_id))),
        }
    }

    async fn list_page(&self, after: Option<Uuid>, limit: i64) -> AppResult<Vec<LocationRecord>> {
        self.check()?;
        let records = self.records.read().await;
        let page = records
            .values()
            .filter(|r| after.is_none_or(|a| r.user_id > a))
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok(page)
    }
}

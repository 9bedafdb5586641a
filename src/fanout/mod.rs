//! 位置更新扇出
//!
//! 每个用户把自己的位置发布到专属频道，好友订阅这些频道。
//! 投递至多一次，不同发布者之间无序，不保证持久。

pub mod memory;
pub mod pubsub;

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::LocationRecord;

pub use self::memory::MemoryFanOut;
pub use self::pubsub::RedisFanOut;

/// 每个订阅在本地缓冲的更新条数
pub const SUBSCRIPTION_BUFFER: usize = 100;

#[async_trait]
pub trait LocationFanOut: Send + Sync {
    /// 把位置快照发布到该用户的频道
    async fn publish(&self, record: &LocationRecord) -> AppResult<()>;

    /// 订阅该用户所有好友的位置更新。
    /// 好友增删会反映到已有订阅上，无需重新订阅。
    async fn subscribe(&self, user_id: Uuid) -> AppResult<Subscription>;

    /// 双向添加好友，重复添加无副作用
    async fn add_friend(&self, user_id: Uuid, friend_id: Uuid) -> AppResult<()>;

    /// 双向删除好友
    async fn remove_friend(&self, user_id: Uuid, friend_id: Uuid) -> AppResult<()>;

    async fn friends(&self, user_id: Uuid) -> AppResult<Vec<Uuid>>;
}

/// 不允许添加自己为好友
pub(crate) fn ensure_distinct(user_id: Uuid, friend_id: Uuid) -> AppResult<()> {
    if user_id == friend_id {
        return Err(AppError::validation("a user cannot befriend themselves"));
    }
    Ok(())
}

/// 好友位置更新流，由后台任务驱动，drop 时任务随之取消
pub struct Subscription {
    user_id: Uuid,
    rx: mpsc::Receiver<LocationRecord>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(user_id: Uuid, rx: mpsc::Receiver<LocationRecord>, task: JoinHandle<()>) -> Self {
        Self { user_id, rx, task }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub async fn recv(&mut self) -> Option<LocationRecord> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = LocationRecord;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
        tracing::debug!(user_id = %self.user_id, "Friend subscription cancelled");
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::fanout::{LocationFanOut, SUBSCRIPTION_BUFFER, Subscription, ensure_distinct};
use crate::models::LocationRecord;

type FriendMap = Arc<RwLock<HashMap<Uuid, HashSet<Uuid>>>>;

/// 进程内位置扇出
///
/// 所有发布进入同一条广播总线，每个订阅按当前好友集合过滤，
/// 好友变更对下一条消息立即生效。
pub struct MemoryFanOut {
    friends: FriendMap,
    bus: broadcast::Sender<LocationRecord>,
}

impl Default for MemoryFanOut {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFanOut {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(1024);
        Self {
            friends: Arc::new(RwLock::new(HashMap::new())),
            bus,
        }
    }

    async fn is_friend(friends: &FriendMap, user_id: Uuid, publisher: Uuid) -> bool {
        friends
            .read()
            .await
            .get(&user_id)
            .is_some_and(|set| set.contains(&publisher))
    }
}

#[async_trait]
impl LocationFanOut for MemoryFanOut {
    async fn publish(&self, record: &LocationRecord) -> AppResult<()> {
        // 没有订阅者时发送失败，至多一次投递下可以忽略
        let _ = self.bus.send(record.clone());
        Ok(())
    }

    async fn subscribe(&self, user_id: Uuid) -> AppResult<Subscription> {
        let mut bus_rx = self.bus.subscribe();
        let friends = self.friends.clone();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let task = tokio::spawn(async move {
            loop {
                match bus_rx.recv().await {
                    Ok(record) => {
                        if !Self::is_friend(&friends, user_id, record.user_id).await {
                            continue;
                        }
                        if tx.send(record).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(user_id = %user_id, skipped, "Friend subscription lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(user_id, rx, task))
    }

    async fn add_friend(&self, user_id: Uuid, friend_id: Uuid) -> AppResult<()> {
        ensure_distinct(user_id, friend_id)?;
        let mut friends = self.friends.write().await;
        friends.entry(user_id).or_default().insert(friend_id);
        friends.entry(friend_id).or_default().insert(user_id);
        Ok(())
    }

    async fn remove_friend(&self, user_id: Uuid, friend_id: Uuid) -> AppResult<()> {
        let mut friends = self.friends.write().await;
        if let Some(set) = friends.get_mut(&user_id) {
            set.remove(&friend_id);
        }
        if let Some(set) = friends.get_mut(&friend_id) {
            set.remove(&user_id);
        }
        Ok(())
    }

    async fn friends(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        let mut friends: Vec<Uuid> = self
            .friends
            .read()
            .await
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        friends.sort();
        Ok(friends)
    }
}

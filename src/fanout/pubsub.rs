use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::{AsyncCommands, Client as RedisClient, aio::PubSub};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cache::keys::{friends_changed_channel, friends_key, location_channel};
use crate::error::AppResult;
use crate::fanout::{LocationFanOut, SUBSCRIPTION_BUFFER, Subscription, ensure_distinct};
use crate::models::LocationRecord;

/// 好友变更通知的消息体，订阅方只关心有通知这件事
const FRIENDS_CHANGED_PAYLOAD: &str = "changed";

/// 订阅连接断开后的首次重连等待
const RECONNECT_BACKOFF_MIN: Duration = Duration::from_millis(500);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// 重连失败后等待时间翻倍，不超过上限
fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(RECONNECT_BACKOFF_MAX)
}

/// 计算频道变更：返回（需要订阅的，需要退订的），结果有序
fn channel_diff(desired: &HashSet<Uuid>, subscribed: &HashSet<Uuid>) -> (Vec<Uuid>, Vec<Uuid>) {
    let mut to_subscribe: Vec<Uuid> = desired.difference(subscribed).copied().collect();
    let mut to_unsubscribe: Vec<Uuid> = subscribed.difference(desired).copied().collect();
    to_subscribe.sort();
    to_unsubscribe.sort();
    (to_subscribe, to_unsubscribe)
}

/// 基于 Redis Pub/Sub 的位置扇出
///
/// 好友集合存在 `friends:{id}`，位置发布到 `location_updates:{id}`。
/// 增删好友时向双方的 `friends_changed:{id}` 发通知，活跃订阅收到后立即重新同步频道；
/// 另外按固定周期重新同步，防止通知丢失。
#[derive(Clone)]
pub struct RedisFanOut {
    redis: Arc<RedisClient>,
    resubscribe_interval: Duration,
}

enum Flow {
    Resync,
    /// 订阅连接断开，需要重连
    Disconnected,
    Closed,
}

impl RedisFanOut {
    pub fn new(redis: Arc<RedisClient>, resubscribe_interval: Duration) -> Self {
        Self {
            redis,
            resubscribe_interval,
        }
    }

    async fn load_friends(redis: &RedisClient, user_id: Uuid) -> AppResult<HashSet<Uuid>> {
        let mut conn = redis.get_multiplexed_async_connection().await?;
        let members: Vec<String> = conn.smembers(friends_key(&user_id)).await?;

        Ok(members
            .iter()
            .filter_map(|m| match Uuid::parse_str(m) {
                Ok(id) => Some(id),
                Err(_) => {
                    tracing::warn!(user_id = %user_id, "Ignoring malformed friend id: {}", m);
                    None
                }
            })
            .collect())
    }

    /// 把订阅的频道集合调整为当前好友集合
    async fn sync_channels(
        redis: &RedisClient,
        pubsub: &mut PubSub,
        user_id: Uuid,
        subscribed: &mut HashSet<Uuid>,
    ) {
        let desired = match Self::load_friends(redis, user_id).await {
            Ok(friends) => friends,
            Err(e) => {
                tracing::warn!(user_id = %user_id, "Failed to load friends: {}", e);
                return;
            }
        };

        let (to_subscribe, to_unsubscribe) = channel_diff(&desired, subscribed);
        for friend in &to_subscribe {
            if let Err(e) = pubsub.subscribe(location_channel(friend)).await {
                tracing::warn!(user_id = %user_id, "Failed to subscribe to {}: {}", friend, e);
            }
        }
        for friend in &to_unsubscribe {
            if let Err(e) = pubsub.unsubscribe(location_channel(friend)).await {
                tracing::warn!(user_id = %user_id, "Failed to unsubscribe from {}: {}", friend, e);
            }
        }

        tracing::debug!(
            user_id = %user_id,
            friends = desired.len(),
            "Friend channels synchronised"
        );
        *subscribed = desired;
    }

    /// 建立订阅连接并订阅控制频道
    async fn connect(redis: &RedisClient, user_id: Uuid) -> AppResult<PubSub> {
        let mut pubsub = redis.get_async_pubsub().await?;
        pubsub.subscribe(friends_changed_channel(&user_id)).await?;
        Ok(pubsub)
    }

    /// 断线后按退避间隔重连；订阅方已关闭时返回 None
    async fn reconnect(
        redis: &RedisClient,
        user_id: Uuid,
        tx: &mpsc::Sender<LocationRecord>,
    ) -> Option<PubSub> {
        let mut backoff = RECONNECT_BACKOFF_MIN;
        loop {
            tokio::select! {
                _ = tx.closed() => return None,
                _ = tokio::time::sleep(backoff) => {}
            }

            match Self::connect(redis, user_id).await {
                Ok(pubsub) => {
                    tracing::info!(user_id = %user_id, "Friend subscription reconnected");
                    return Some(pubsub);
                }
                Err(e) => {
                    tracing::warn!(user_id = %user_id, "Reconnect failed, retrying in {:?}: {}", backoff, e);
                    backoff = next_backoff(backoff);
                }
            }
        }
    }

    async fn run(
        redis: Arc<RedisClient>,
        mut pubsub: PubSub,
        user_id: Uuid,
        tx: mpsc::Sender<LocationRecord>,
        resubscribe_interval: Duration,
    ) {
        let control = friends_changed_channel(&user_id);
        let mut subscribed = HashSet::new();

        loop {
            Self::sync_channels(&redis, &mut pubsub, user_id, &mut subscribed).await;

            // 消息流借用连接，块结束后才能在重连时替换连接
            let flow = {
                let resync = tokio::time::sleep(resubscribe_interval);
                tokio::pin!(resync);
                let messages = pubsub.on_message();
                tokio::pin!(messages);

                loop {
                    tokio::select! {
                        _ = tx.closed() => break Flow::Closed,
                        _ = &mut resync => break Flow::Resync,
                        msg = messages.next() => {
                            let Some(msg) = msg else { break Flow::Disconnected };
                            if msg.get_channel_name() == control {
                                break Flow::Resync;
                            }

                            let payload: String = match msg.get_payload() {
                                Ok(payload) => payload,
                                Err(e) => {
                                    tracing::warn!("Error reading pub/sub payload: {}", e);
                                    continue;
                                }
                            };
                            match serde_json::from_str::<LocationRecord>(&payload) {
                                Ok(record) => {
                                    if tx.send(record).await.is_err() {
                                        break Flow::Closed;
                                    }
                                }
                                Err(e) => tracing::warn!("Error unmarshaling location: {}", e),
                            }
                        }
                    }
                }
            };

            match flow {
                Flow::Resync => {}
                Flow::Disconnected => {
                    tracing::warn!(user_id = %user_id, "Pub/sub connection lost");
                    pubsub = match Self::reconnect(&redis, user_id, &tx).await {
                        Some(pubsub) => pubsub,
                        None => return,
                    };
                    // 新连接上没有任何好友频道
                    subscribed.clear();
                }
                Flow::Closed => {
                    tracing::info!(user_id = %user_id, "Stopping friend subscription");
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl LocationFanOut for RedisFanOut {
    async fn publish(&self, record: &LocationRecord) -> AppResult<()> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(record)?;

        let receivers: i64 = conn
            .publish(location_channel(&record.user_id), payload)
            .await?;
        tracing::debug!(user_id = %record.user_id, receivers, "Location update published");
        Ok(())
    }

    async fn subscribe(&self, user_id: Uuid) -> AppResult<Subscription> {
        let pubsub = Self::connect(&self.redis, user_id).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let task = tokio::spawn(Self::run(
            self.redis.clone(),
            pubsub,
            user_id,
            tx,
            self.resubscribe_interval,
        ));

        Ok(Subscription::new(user_id, rx, task))
    }

    async fn add_friend(&self, user_id: Uuid, friend_id: Uuid) -> AppResult<()> {
        ensure_distinct(user_id, friend_id)?;
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let _: () = redis::pipe()
            .atomic()
            .sadd(friends_key(&user_id), friend_id.to_string())
            .ignore()
            .sadd(friends_key(&friend_id), user_id.to_string())
            .ignore()
            .publish(friends_changed_channel(&user_id), FRIENDS_CHANGED_PAYLOAD)
            .ignore()
            .publish(friends_changed_channel(&friend_id), FRIENDS_CHANGED_PAYLOAD)
            .ignore()
            .query_async(&mut conn)
            .await?;

        tracing::info!(user_id = %user_id, friend_id = %friend_id, "Friend added");
        Ok(())
    }

    async fn remove_friend(&self, user_id: Uuid, friend_id: Uuid) -> AppResult<()> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let _: () = redis::pipe()
            .atomic()
            .srem(friends_key(&user_id), friend_id.to_string())
            .ignore()
            .srem(friends_key(&friend_id), user_id.to_string())
            .ignore()
            .publish(friends_changed_channel(&user_id), FRIENDS_CHANGED_PAYLOAD)
            .ignore()
            .publish(friends_changed_channel(&friend_id), FRIENDS_CHANGED_PAYLOAD)
            .ignore()
            .query_async(&mut conn)
            .await?;

        tracing::info!(user_id = %user_id, friend_id = %friend_id, "Friend removed");
        Ok(())
    }

    async fn friends(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        let mut friends: Vec<Uuid> = Self::load_friends(&self.redis, user_id)
            .await?
            .into_iter()
            .collect();
        friends.sort();
        Ok(friends)
    }
}

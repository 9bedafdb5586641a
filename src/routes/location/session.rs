//! 单个 WebSocket 连接的会话
//!
//! 状态机：Connecting → Active → Closing → Closed。
//! 读循环严格串行处理消息；TTL 刷新任务与读循环并发运行，
//! 二者只通过一个 oneshot 停止信号同步。缓存写入和位置发布不等待结果，失败只记录日志；
//! 它们经同一个队列交给单个写入任务，按提交顺序执行，旧快照不会覆盖新快照。

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::AppState;
use crate::cache::PresenceCache;
use crate::database::LocationStore;
use crate::error::{AppError, AppResult};
use crate::fanout::LocationFanOut;
use crate::models::message::{ACTION_FRIEND_LOCATION, ACTION_GET_LOCATION};
use crate::models::{Action, LocationRecord, PresenceEntry, WsMessage};
use crate::utils::parse_user_id;

/// 发往客户端的消息缓冲条数
const OUTBOUND_BUFFER: usize = 64;

/// 交给缓存写入任务的操作
#[derive(Debug)]
enum CacheCommand {
    /// 写入缓存，`publish` 为真时随后发布给好友
    Put {
        record: LocationRecord,
        publish: bool,
    },
    Remove(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Active,
    Closing,
    Closed,
}

pub struct Session {
    user_id: Uuid,
    phase: SessionPhase,
    /// 本会话最近一次写入的位置
    last_record: Option<LocationRecord>,
    store: Arc<dyn LocationStore>,
    presence: Arc<dyn PresenceCache>,
    fanout: Arc<dyn LocationFanOut>,
    presence_ttl: Duration,
    refresh_interval: Duration,
    cache_tx: mpsc::UnboundedSender<CacheCommand>,
}

impl Session {
    /// 必须在 tokio 运行时内调用：会话的缓存写入任务随之启动，会话 drop 后排空队列退出
    pub fn new(user_id: Uuid, state: &AppState) -> Self {
        let (cache_tx, cache_rx) = mpsc::unbounded_channel();
        tokio::spawn(cache_writer(
            state.presence.clone(),
            state.fanout.clone(),
            state.config.presence_ttl(),
            cache_rx,
        ));

        Self {
            user_id,
            phase: SessionPhase::Connecting,
            last_record: None,
            store: state.store.clone(),
            presence: state.presence.clone(),
            fanout: state.fanout.clone(),
            presence_ttl: state.config.presence_ttl(),
            refresh_interval: state.config.presence_refresh_interval(),
            cache_tx,
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn last_record(&self) -> Option<&LocationRecord> {
        self.last_record.as_ref()
    }

    fn transition(&mut self, next: SessionPhase) {
        tracing::info!(
            user_id = %self.user_id,
            "Session {:?} -> {:?}",
            self.phase,
            next
        );
        self.phase = next;
    }

    /// 驱动整个连接直到关闭。一次读错误即结束会话，不重试。
    pub async fn run<R, W, E>(mut self, mut incoming: R, outgoing: W)
    where
        R: Stream<Item = Result<Message, E>> + Unpin + Send,
        E: Display + Send,
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display + Send,
    {
        let (out_tx, out_rx) = mpsc::channel::<WsMessage>(OUTBOUND_BUFFER);
        let writer = tokio::spawn(write_loop(self.user_id, out_rx, outgoing));

        self.transition(SessionPhase::Active);
        let (stop_tx, stop_rx) = oneshot::channel();
        let refresher = spawn_ttl_refresh(
            self.presence.clone(),
            self.user_id,
            self.presence_ttl,
            self.refresh_interval,
            stop_rx,
        );
        let forwarder = self.spawn_friend_forwarder(out_tx.clone()).await;

        while let Some(frame) = incoming.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(user_id = %self.user_id, "Error while reading message: {}", e);
                    break;
                }
            };

            let response = match frame {
                Message::Text(text) => self.handle_text(text.as_str()).await,
                Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                    Ok(text) => self.handle_text(text).await,
                    Err(e) => {
                        tracing::warn!(user_id = %self.user_id, "Ignoring non UTF-8 frame: {}", e);
                        None
                    }
                },
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => None,
            };

            if let Some(response) = response {
                if out_tx.send(response).await.is_err() {
                    tracing::warn!(user_id = %self.user_id, "Writer closed, ending session");
                    break;
                }
            }
        }

        self.transition(SessionPhase::Closing);
        let _ = stop_tx.send(());
        if let Some(forwarder) = forwarder {
            forwarder.abort();
            let _ = forwarder.await;
        }
        drop(out_tx);
        let _ = writer.await;
        let _ = refresher.await;
        self.transition(SessionPhase::Closed);
    }

    /// 解码一条文本消息并处理；解码失败只跳过这条消息
    pub async fn handle_text(&mut self, raw: &str) -> Option<WsMessage> {
        let message: WsMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(user_id = %self.user_id, "Error while unmarshalling message: {}", e);
                return None;
            }
        };

        match Action::try_from(&message) {
            Ok(action) => self.dispatch(action).await,
            Err(e) => {
                tracing::warn!(
                    user_id = %self.user_id,
                    action = %message.action,
                    "Rejected message: {}",
                    e
                );
                None
            }
        }
    }

    /// 按动作分发，只有 get_location 产生响应
    pub async fn dispatch(&mut self, action: Action) -> Option<WsMessage> {
        tracing::debug!(user_id = %self.user_id, action = action.name(), "Processing message");

        let written = match action {
            Action::Create {
                current,
                destination,
            } => {
                let record = LocationRecord::new(self.user_id, current, destination);
                self.store.create(&record).await
            }
            Action::Update {
                current,
                destination,
            } => {
                let record = LocationRecord::new(self.user_id, current, destination);
                self.store.update(&record).await
            }
            Action::UpdateDestination(destination) => {
                self.store
                    .update_destination(self.user_id, destination.latitude, destination.longitude)
                    .await
            }
            Action::UpdateCurrentLocation(current) => {
                self.store
                    .update_current_location(self.user_id, current.latitude, current.longitude)
                    .await
            }
            Action::Delete => {
                self.delete_location().await;
                return None;
            }
            Action::GetLocation { user_id } => {
                return Some(self.get_location(user_id.as_deref()).await);
            }
            Action::Unknown(name) => {
                tracing::warn!(user_id = %self.user_id, "Unknown action: {}", name);
                return None;
            }
        };

        match written {
            Ok(record) => self.after_write(record),
            Err(e) => {
                tracing::error!(user_id = %self.user_id, "Error processing message: {}", e)
            }
        }
        None
    }

    fn enqueue(&self, command: CacheCommand) {
        if self.cache_tx.send(command).is_err() {
            tracing::warn!(user_id = %self.user_id, "Cache writer stopped, dropping cache update");
        }
    }

    /// 持久写入成功后：异步写缓存，再发布给好友
    fn after_write(&mut self, record: LocationRecord) {
        self.last_record = Some(record.clone());
        self.enqueue(CacheCommand::Put {
            record,
            publish: true,
        });
    }

    /// 删除持久记录，并异步清除缓存条目
    async fn delete_location(&mut self) {
        match self.store.delete(self.user_id).await {
            Ok(()) => {
                self.last_record = None;
                self.enqueue(CacheCommand::Remove(self.user_id));
                tracing::info!(user_id = %self.user_id, "Location deleted");
            }
            Err(e) if e.is_not_found() => {
                tracing::info!(user_id = %self.user_id, "Delete ignored: {}", e);
            }
            Err(e) => tracing::error!(user_id = %self.user_id, "Failed to delete location: {}", e),
        }
    }

    async fn get_location(&self, requested: Option<&str>) -> WsMessage {
        let target = match requested.map(parse_user_id).transpose() {
            Ok(target) => target.unwrap_or(self.user_id),
            Err(e) => return WsMessage::error(ACTION_GET_LOCATION, e.to_string()),
        };

        match self.read_location(target).await {
            Ok(response) => response,
            Err(e) if e.is_not_found() => {
                WsMessage::error(ACTION_GET_LOCATION, "location not found")
            }
            Err(e) => {
                tracing::error!(user_id = %self.user_id, "Error getting user location: {}", e);
                WsMessage::error(ACTION_GET_LOCATION, "failed to get location")
            }
        }
    }

    /// 旁路缓存读：先查缓存，未命中再查持久存储并异步回填缓存
    async fn read_location(&self, user_id: Uuid) -> AppResult<WsMessage> {
        match self.presence.get(user_id).await {
            Ok(entry) => return Ok(presence_message(&entry)),
            Err(AppError::NotFound(_)) => {}
            Err(e) => tracing::warn!(user_id = %user_id, "Presence lookup failed: {}", e),
        }

        let record = self.store.get(user_id).await?;
        self.enqueue(CacheCommand::Put {
            record: record.clone(),
            publish: false,
        });

        Ok(WsMessage::from_record(ACTION_GET_LOCATION, &record))
    }

    async fn spawn_friend_forwarder(&self, out: mpsc::Sender<WsMessage>) -> Option<JoinHandle<()>> {
        let mut subscription = match self.fanout.subscribe(self.user_id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(user_id = %self.user_id, "Friend updates unavailable: {}", e);
                return None;
            }
        };

        Some(tokio::spawn(async move {
            while let Some(record) = subscription.next().await {
                let update = WsMessage::from_record(ACTION_FRIEND_LOCATION, &record);
                if out.send(update).await.is_err() {
                    break;
                }
            }
        }))
    }
}

fn presence_message(entry: &PresenceEntry) -> WsMessage {
    WsMessage {
        action: ACTION_GET_LOCATION.to_string(),
        user_id: Some(entry.user_id.to_string()),
        current_latitude: Some(entry.current.latitude),
        current_longitude: Some(entry.current.longitude),
        destination_latitude: Some(entry.destination.latitude),
        destination_longitude: Some(entry.destination.longitude),
        updated_at: Some(entry.updated_at),
        ..Default::default()
    }
}

/// 按提交顺序执行缓存写入和发布，发送端全部关闭后退出
async fn cache_writer(
    presence: Arc<dyn PresenceCache>,
    fanout: Arc<dyn LocationFanOut>,
    ttl: Duration,
    mut commands: mpsc::UnboundedReceiver<CacheCommand>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            CacheCommand::Put { record, publish } => {
                if let Err(e) = presence.put(&PresenceEntry::from(&record), ttl).await {
                    tracing::warn!(user_id = %record.user_id, "Failed to cache location: {}", e);
                }
                if publish {
                    if let Err(e) = fanout.publish(&record).await {
                        tracing::warn!(user_id = %record.user_id, "Failed to publish location: {}", e);
                    }
                }
            }
            CacheCommand::Remove(user_id) => {
                if let Err(e) = presence.remove(user_id).await {
                    tracing::warn!(user_id = %user_id, "Failed to evict presence entry: {}", e);
                }
            }
        }
    }
}

async fn write_loop<W>(user_id: Uuid, mut out_rx: mpsc::Receiver<WsMessage>, mut outgoing: W)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    while let Some(message) = out_rx.recv().await {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(user_id = %user_id, "Error encoding response: {}", e);
                continue;
            }
        };
        if let Err(e) = outgoing.send(Message::Text(text.into())).await {
            tracing::warn!(user_id = %user_id, "Error sending response: {}", e);
            break;
        }
    }
    let _ = outgoing.close().await;
}

/// 周期性延长在线位置的TTL，收到停止信号（或发送端被丢弃）后在下一次刷新前退出
pub fn spawn_ttl_refresh(
    presence: Arc<dyn PresenceCache>,
    user_id: Uuid,
    ttl: Duration,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut stop => {
                    tracing::info!(user_id = %user_id, "Stopping TTL refresh");
                    return;
                }
                _ = ticker.tick() => match presence.refresh(user_id, ttl).await {
                    Ok(()) => tracing::debug!(user_id = %user_id, "TTL refreshed"),
                    Err(e) if e.is_not_found() => {
                        tracing::debug!(user_id = %user_id, "No presence entry to refresh")
                    }
                    Err(e) => tracing::warn!(user_id = %user_id, "Could not refresh TTL: {}", e),
                },
            }
        }
    })
}

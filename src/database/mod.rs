// 数据库模块
// 位置记录的持久存储，是用户位置的权威来源

pub mod repositories;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::LocationRecord;

pub use repositories::location::PgLocationStore;
pub use repositories::memory::MemoryLocationStore;

/// 批量读取时每页的记录数
pub const LIST_PAGE_SIZE: i64 = 500;

/// 位置记录存储
///
/// 所有写操作按 `updated_at` 后写者胜，不需要乐观锁：
/// 同一个用户同一时刻最多只有一个活跃会话在写。
/// 对不存在的用户，读写都返回 `AppError::NotFound`。
#[async_trait]
pub trait LocationStore: Send + Sync {
    /// 写入记录；已存在时覆盖坐标并保留首次创建时间
    async fn create(&self, record: &LocationRecord) -> AppResult<LocationRecord>;

    async fn get(&self, user_id: Uuid) -> AppResult<LocationRecord>;

    /// 覆盖当前位置和目的地
    async fn update(&self, record: &LocationRecord) -> AppResult<LocationRecord>;

    async fn update_destination(
        &self,
        user_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> AppResult<LocationRecord>;

    async fn update_current_location(
        &self,
        user_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> AppResult<LocationRecord>;

    async fn delete(&self, user_id: Uuid) -> AppResult<()>;

    /// 按 user_id 升序分页，`after` 为上一页最后一个用户
    async fn list_page(&self, after: Option<Uuid>, limit: i64) -> AppResult<Vec<LocationRecord>>;

    /// 读取全部记录，内部分页，仅用于缓存重建
    async fn list_all(&self) -> AppResult<Vec<LocationRecord>> {
        let mut records = Vec::new();
        let mut after = None;

        loop {
            let page = self.list_page(after, LIST_PAGE_SIZE).await?;
            let page_len = page.len();
            after = page.last().map(|r| r.user_id);
            records.extend(page);

            if page_len < LIST_PAGE_SIZE as usize {
                break;
            }
        }

        Ok(records)
    }
}

/// 缓存键模块
/// 提供各种缓存键和频道名生成函数

// 在线位置缓存键
pub mod presence_keys;

// 好友与频道键
pub mod friend_keys;

pub use friend_keys::{friends_changed_channel, friends_key, location_channel};
pub use presence_keys::{PRESENCE_GEO_KEY, presence_key};

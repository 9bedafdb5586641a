mod handler;

pub use handler::{SyncResponse, health, sync_presence};
